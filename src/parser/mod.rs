//! # Record Parser
//!
//! Turns a text fragment into [`DeviceFields`] or a classified [`ParseError`].
//!
//! ## Wire Format
//!
//! ```text
//! ##ATS542912923728|866988074133496|286019876543210|8991101200003204510|AA:BB:CC:DD:EE:FF##
//!   └─ serial ─────┘ └─ IMEI ───────┘ └─ IMSI ───────┘ └─ CCID ──────────┘ └─ MAC ──────────┘
//! ```
//!
//! Devices in the field are inconsistent: some drop the frame markers, some
//! send only one of them, older firmware sends the serial without its `ATS`
//! prefix, and one batch used commas. The parser tries the ordered
//! [`matchers::MATCHERS`] list and validates whatever the first matcher
//! recognized.
//!
//! ## Guarantees
//!
//! - Pure: no I/O, no allocation of tracking numbers.
//! - Idempotent: the same fragment always gives the same result.
//! - Every accepted record has five non-empty fields and a serial number
//!   starting with the canonical prefix.

pub mod matchers;

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{ParseError, ParseErrorKind};
use crate::record::DeviceFields;

use matchers::{FRAME_MARKER, MATCHERS, Matcher, starts_with_ignore_case};

/// Vendor prefix every canonical serial number starts with.
pub const DEFAULT_SERIAL_PREFIX: &str = "ATS";

/// Number of fields in one record.
pub const FIELD_COUNT: usize = 5;

/// Field names in wire order, as used in the audit log header.
pub const FIELD_NAMES: [&str; FIELD_COUNT] =
    ["serialNumber", "imei", "imsi", "ccid", "macAddress"];

static FIELD_SHAPES: OnceLock<[Regex; FIELD_COUNT]> = OnceLock::new();

/// Accepted character shapes, one per field in wire order.
fn field_shapes() -> &'static [Regex; FIELD_COUNT] {
    FIELD_SHAPES.get_or_init(|| {
        [
            r"^[A-Z0-9]+$",
            r"^[0-9]+$",
            r"^[0-9]+$",
            r"^[0-9A-Fa-f]+$",
            r"^[0-9A-Fa-f]{2}(?:[:-][0-9A-Fa-f]{2}){5}$",
        ]
        .map(|pattern| Regex::new(pattern).expect("field shape patterns are valid"))
    })
}

/// Parser configured with the canonical serial prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parser {
    prefix: String,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new(DEFAULT_SERIAL_PREFIX)
    }
}

impl Parser {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into().trim().to_ascii_uppercase(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Parse one fragment.
    ///
    /// ## Errors
    ///
    /// - `FieldCountMismatch`: a matcher recognized the framing but there are
    ///   not exactly five fields
    /// - `EmptyField`: a field is blank after trimming
    /// - `NoPatternMatched`: nothing recognized the fragment, or a field has
    ///   characters that cannot belong to it
    pub fn parse(&self, fragment: &str) -> Result<DeviceFields, ParseError> {
        let cleaned = clean(fragment);
        match self.recognize(&cleaned) {
            Some((matcher, fields)) => self.validate(matcher, &fields, fragment),
            None => Err(ParseError::new(
                ParseErrorKind::NoPatternMatched,
                fragment,
                "no matcher recognized the fragment",
            )),
        }
    }

    /// Name of the matcher that recognizes this fragment, if any.
    pub fn matched_by(&self, fragment: &str) -> Option<&'static str> {
        self.recognize(&clean(fragment)).map(|(matcher, _)| matcher.name)
    }

    fn recognize<'a>(&self, cleaned: &'a str) -> Option<(&'static Matcher, Vec<&'a str>)> {
        MATCHERS.iter().find_map(|matcher| {
            (matcher.recognize)(cleaned, matcher.separator, &self.prefix)
                .map(|fields| (matcher, fields))
        })
    }

    fn validate(
        &self,
        matcher: &Matcher,
        fields: &[&str],
        fragment: &str,
    ) -> Result<DeviceFields, ParseError> {
        if fields.len() != FIELD_COUNT {
            return Err(ParseError::new(
                ParseErrorKind::FieldCountMismatch,
                fragment,
                format!(
                    "{}: expected {} fields, found {}",
                    matcher.name,
                    FIELD_COUNT,
                    fields.len()
                ),
            ));
        }

        let trimmed: Vec<&str> = fields.iter().map(|f| f.trim()).collect();
        if let Some(index) = trimmed.iter().position(|f| f.is_empty()) {
            return Err(ParseError::new(
                ParseErrorKind::EmptyField,
                fragment,
                format!("{}: {} is empty", matcher.name, FIELD_NAMES[index]),
            ));
        }

        let serial = self.canonical_serial(trimmed[0]);
        if serial.len() == self.prefix.len() {
            return Err(ParseError::new(
                ParseErrorKind::EmptyField,
                fragment,
                format!("{}: serialNumber has no digits after the prefix", matcher.name),
            ));
        }

        let values = [
            serial,
            trimmed[1].to_string(),
            trimmed[2].to_string(),
            trimmed[3].to_string(),
            trimmed[4].to_string(),
        ];
        for (index, (value, shape)) in values.iter().zip(field_shapes()).enumerate() {
            if !shape.is_match(value) {
                return Err(ParseError::new(
                    ParseErrorKind::NoPatternMatched,
                    fragment,
                    format!("{}: {} {:?} is malformed", matcher.name, FIELD_NAMES[index], value),
                ));
            }
        }

        let [serial_number, imei, imsi, ccid, mac_address] = values;
        Ok(DeviceFields {
            serial_number,
            imei,
            imsi,
            ccid,
            mac_address,
        })
    }

    /// Upper-case the serial and make sure it carries the prefix exactly once.
    pub fn canonical_serial(&self, serial: &str) -> String {
        let upper = serial.trim().to_ascii_uppercase();
        if starts_with_ignore_case(&upper, &self.prefix) {
            upper
        } else {
            format!("{}{}", self.prefix, upper)
        }
    }
}

/// Parse with the default prefix.
pub fn parse(fragment: &str) -> Result<DeviceFields, ParseError> {
    Parser::default().parse(fragment)
}

/// Drop control characters and cut a `##…##` span out of surrounding noise.
fn clean(fragment: &str) -> String {
    let printable: String = fragment.chars().filter(|c| !c.is_control()).collect();
    let trimmed = printable.trim();

    if let Some(start) = trimmed.find(FRAME_MARKER) {
        let after = start + FRAME_MARKER.len();
        if let Some(len) = trimmed[after..].find(FRAME_MARKER) {
            let end = after + len + FRAME_MARKER.len();
            return trimmed[start..end].to_string();
        }
    }
    trimmed.to_string()
}
