//! # Fragment Matchers
//!
//! Each matcher is an independent recognizer for one framing variant. A
//! matcher only decides whether it *recognizes* the fragment and, if so,
//! splits it into raw (untrimmed) fields. Field count, emptiness and shape
//! are validated afterwards by the parser, so a recognized fragment with the
//! wrong number of fields yields `FieldCountMismatch` instead of falling
//! through to the next matcher.
//!
//! ## Variants
//!
//! | Order | Name | Framing | Serial |
//! |-------|------|---------|--------|
//! | 1 | `framed-prefixed` | `##…##` | carries the prefix |
//! | 2 | `framed-numeric` | `##…##` | digits only |
//! | 3 | `loose` | none, one marker, or a pair | anything |
//!
//! The whole list is tried with `|` first, then again with `,`.

/// Frame marker wrapping a record on the wire.
pub const FRAME_MARKER: &str = "##";

/// Splits a recognized fragment into raw fields.
pub type Recognizer = for<'a> fn(&'a str, char, &str) -> Option<Vec<&'a str>>;

/// One entry in the ordered matcher list.
#[derive(Clone, Copy)]
pub struct Matcher {
    pub name: &'static str,
    pub separator: char,
    pub recognize: Recognizer,
}

impl std::fmt::Debug for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Matcher")
            .field("name", &self.name)
            .field("separator", &self.separator)
            .finish()
    }
}

/// All matchers, in the order they are tried. First match wins.
pub const MATCHERS: &[Matcher] = &[
    Matcher {
        name: "framed-prefixed",
        separator: '|',
        recognize: framed_prefixed,
    },
    Matcher {
        name: "framed-numeric",
        separator: '|',
        recognize: framed_numeric,
    },
    Matcher {
        name: "loose",
        separator: '|',
        recognize: loose,
    },
    Matcher {
        name: "framed-prefixed-comma",
        separator: ',',
        recognize: framed_prefixed,
    },
    Matcher {
        name: "framed-numeric-comma",
        separator: ',',
        recognize: framed_numeric,
    },
    Matcher {
        name: "loose-comma",
        separator: ',',
        recognize: loose,
    },
];

/// Body between a matched pair of frame markers.
fn framed(text: &str) -> Option<&str> {
    if text.len() < 2 * FRAME_MARKER.len() {
        return None;
    }
    text.strip_prefix(FRAME_MARKER)?.strip_suffix(FRAME_MARKER)
}

/// Framed record whose serial already carries the vendor prefix.
pub fn framed_prefixed<'a>(text: &'a str, separator: char, prefix: &str) -> Option<Vec<&'a str>> {
    let body = framed(text)?;
    if !body.contains(separator) {
        return None;
    }
    let fields: Vec<&str> = body.split(separator).collect();
    let serial = fields[0].trim();
    starts_with_ignore_case(serial, prefix).then_some(fields)
}

/// Framed record with a purely numeric serial.
pub fn framed_numeric<'a>(text: &'a str, separator: char, _prefix: &str) -> Option<Vec<&'a str>> {
    let body = framed(text)?;
    if !body.contains(separator) {
        return None;
    }
    let fields: Vec<&str> = body.split(separator).collect();
    let serial = fields[0].trim();
    (!serial.is_empty() && serial.bytes().all(|b| b.is_ascii_digit())).then_some(fields)
}

/// Any separated record with at most one marker on each side.
pub fn loose<'a>(text: &'a str, separator: char, _prefix: &str) -> Option<Vec<&'a str>> {
    let body = strip_marker_suffix(strip_marker_prefix(text));
    if !body.contains(separator) {
        return None;
    }
    Some(body.split(separator).collect())
}

fn strip_marker_prefix(text: &str) -> &str {
    text.strip_prefix(FRAME_MARKER)
        .or_else(|| text.strip_prefix('#'))
        .unwrap_or(text)
}

fn strip_marker_suffix(text: &str) -> &str {
    text.strip_suffix(FRAME_MARKER)
        .or_else(|| text.strip_suffix('#'))
        .unwrap_or(text)
}

pub(crate) fn starts_with_ignore_case(value: &str, prefix: &str) -> bool {
    value.len() >= prefix.len()
        && value.is_char_boundary(prefix.len())
        && value[..prefix.len()].eq_ignore_ascii_case(prefix)
}
