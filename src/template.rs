//! # Label Templates
//!
//! The primary label is expanded from a human-editable template. Placeholders
//! are written in braces and validated when the template is loaded, so a typo
//! surfaces at startup instead of on the first printed label.
//!
//! | Placeholder | Value |
//! |-------------|-------|
//! | `{TRACKING_NUMBER}` (alias `{STC}`) | tracking number |
//! | `{SERIAL_NUMBER}` | canonical serial number |
//! | `{IMEI}` | IMEI |
//! | `{IMSI}` | IMSI |
//! | `{CCID}` | SIM card id |
//! | `{MAC_ADDRESS}` | MAC address |
//!
//! The dispatcher only sees the [`Renderer`] trait; [`PlaceholderRenderer`] is
//! the implementation used by the binary.

use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::error::LabelfeedError;
use crate::protocol::{tspl, zpl};
use crate::record::DeviceRecord;

static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();

fn placeholder_regex() -> &'static Regex {
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{([A-Za-z_]+)\}").expect("placeholder pattern is valid"))
}

/// Label language of a template, used to sanitize substituted values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelFormat {
    Zpl,
    Tspl,
    Raw,
}

impl LabelFormat {
    /// Guess the format from a file extension (`.zpl`, `.tspl`/`.tsc`).
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("zpl") => Self::Zpl,
            Some("tspl") | Some("tsc") => Self::Tspl,
            _ => Self::Raw,
        }
    }

    fn sanitize(&self, value: &str) -> String {
        match self {
            Self::Zpl => zpl::sanitize_field(value),
            Self::Tspl => tspl::escape_text(value),
            Self::Raw => value.to_string(),
        }
    }
}

/// A value that can be substituted into a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    TrackingNumber,
    SerialNumber,
    Imei,
    Imsi,
    Ccid,
    MacAddress,
}

impl Placeholder {
    pub const ALL: [Placeholder; 6] = [
        Self::TrackingNumber,
        Self::SerialNumber,
        Self::Imei,
        Self::Imsi,
        Self::Ccid,
        Self::MacAddress,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "TRACKING_NUMBER" | "STC" => Some(Self::TrackingNumber),
            "SERIAL_NUMBER" => Some(Self::SerialNumber),
            "IMEI" => Some(Self::Imei),
            "IMSI" => Some(Self::Imsi),
            "CCID" => Some(Self::Ccid),
            "MAC_ADDRESS" | "MAC" => Some(Self::MacAddress),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::TrackingNumber => "TRACKING_NUMBER",
            Self::SerialNumber => "SERIAL_NUMBER",
            Self::Imei => "IMEI",
            Self::Imsi => "IMSI",
            Self::Ccid => "CCID",
            Self::MacAddress => "MAC_ADDRESS",
        }
    }

    pub fn value(&self, record: &DeviceRecord) -> String {
        match self {
            Self::TrackingNumber => record.tracking_number.to_string(),
            Self::SerialNumber => record.fields.serial_number.clone(),
            Self::Imei => record.fields.imei.clone(),
            Self::Imsi => record.fields.imsi.clone(),
            Self::Ccid => record.fields.ccid.clone(),
            Self::MacAddress => record.fields.mac_address.clone(),
        }
    }
}

/// A validated label template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTemplate {
    name: String,
    format: LabelFormat,
    body: String,
    placeholders: Vec<Placeholder>,
}

impl LabelTemplate {
    /// Validate a template body.
    ///
    /// ## Errors
    ///
    /// `Template` if the body uses a placeholder that is not in the table above.
    pub fn parse(
        name: impl Into<String>,
        body: impl Into<String>,
        format: LabelFormat,
    ) -> Result<Self, LabelfeedError> {
        let name = name.into();
        let body = body.into();
        let mut placeholders = Vec::new();

        for caps in placeholder_regex().captures_iter(&body) {
            let token = &caps[1];
            let placeholder = Placeholder::from_name(token).ok_or_else(|| {
                LabelfeedError::Template(format!(
                    "template '{}' uses unknown placeholder {{{}}}",
                    name, token
                ))
            })?;
            if !placeholders.contains(&placeholder) {
                placeholders.push(placeholder);
            }
        }

        let missing: Vec<&str> = Placeholder::ALL
            .iter()
            .filter(|p| !placeholders.contains(p))
            .map(|p| p.name())
            .collect();
        if !missing.is_empty() {
            tracing::warn!(template = %name, ?missing, "template does not print every field");
        }

        Ok(Self {
            name,
            format,
            body,
            placeholders,
        })
    }

    /// Load a template file; the format follows the file extension.
    pub fn from_file(path: &Path) -> Result<Self, LabelfeedError> {
        let body = fs::read_to_string(path).map_err(|e| {
            LabelfeedError::Template(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("template")
            .to_string();
        Self::parse(name, body, LabelFormat::from_path(path))
    }

    /// The built-in ZPL device label.
    pub fn device_label() -> Self {
        Self {
            name: "device-zpl".to_string(),
            format: LabelFormat::Zpl,
            body: zpl::DEVICE_LABEL_TEMPLATE.to_string(),
            placeholders: Placeholder::ALL.to_vec(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> LabelFormat {
        self.format
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn placeholders(&self) -> &[Placeholder] {
        &self.placeholders
    }
}

/// Get a built-in template by name.
pub fn by_name(name: &str) -> Option<LabelTemplate> {
    match name.to_lowercase().as_str() {
        "device-zpl" | "device" => Some(LabelTemplate::device_label()),
        _ => None,
    }
}

/// Capability to turn a record and a template into a printer payload.
pub trait Renderer: Send + Sync {
    fn render(&self, record: &DeviceRecord, template: &LabelTemplate)
    -> Result<String, LabelfeedError>;
}

/// Substitutes `{PLACEHOLDER}` tokens, sanitizing values for the template's
/// label language.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderRenderer;

impl Renderer for PlaceholderRenderer {
    fn render(
        &self,
        record: &DeviceRecord,
        template: &LabelTemplate,
    ) -> Result<String, LabelfeedError> {
        let mut unknown = None;
        let rendered = placeholder_regex().replace_all(template.body(), |caps: &Captures| {
            match Placeholder::from_name(&caps[1]) {
                Some(placeholder) => template.format().sanitize(&placeholder.value(record)),
                None => {
                    unknown.get_or_insert_with(|| caps[1].to_string());
                    String::new()
                }
            }
        });

        match unknown {
            Some(token) => Err(LabelfeedError::Template(format!(
                "template '{}' uses unknown placeholder {{{}}}",
                template.name(),
                token
            ))),
            None => Ok(rendered.into_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::fixtures::sample_record;
    use std::io::Write;

    #[test]
    fn test_device_label_renders_all_fields() {
        let record = sample_record(60042);
        let payload = PlaceholderRenderer
            .render(&record, &LabelTemplate::device_label())
            .unwrap();
        assert!(payload.contains("^FD60042^FS"));
        assert!(payload.contains("SN:ATS542912923728;"));
        assert!(payload.contains("^FDAA:BB:CC:DD:EE:FF^FS"));
        assert!(!payload.contains('{'));
        assert!(zpl::is_complete_label(&payload));
    }

    #[test]
    fn test_unknown_placeholder_rejected_on_load() {
        let err = LabelTemplate::parse("bad", "^XA{SERIAL}^XZ", LabelFormat::Zpl).unwrap_err();
        assert!(err.to_string().contains("{SERIAL}"));
    }

    #[test]
    fn test_stc_alias_and_raw_format() {
        let template =
            LabelTemplate::parse("mini", "{STC} {serial_number}", LabelFormat::Raw).unwrap();
        assert_eq!(
            template.placeholders(),
            &[Placeholder::TrackingNumber, Placeholder::SerialNumber]
        );
        let rendered = PlaceholderRenderer.render(&sample_record(7), &template).unwrap();
        assert_eq!(rendered, "7 ATS542912923728");
    }

    #[test]
    fn test_tspl_values_are_escaped() {
        let template =
            LabelTemplate::parse("pcb", "TEXT 1,1,\"2\",0,1,1,\"{SERIAL_NUMBER}\"", LabelFormat::Tspl)
                .unwrap();
        let mut record = sample_record(1);
        record.fields.serial_number = "ATS\"1".into();
        let rendered = PlaceholderRenderer.render(&record, &template).unwrap();
        assert!(rendered.contains("ATS\\[\"]1"));
    }

    #[test]
    fn test_from_file_uses_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.zpl");
        let mut file = fs::File::create(&path).unwrap();
        write!(file, "^XA^FD{{TRACKING_NUMBER}}^FS^XZ").unwrap();

        let template = LabelTemplate::from_file(&path).unwrap();
        assert_eq!(template.name(), "custom");
        assert_eq!(template.format(), LabelFormat::Zpl);
    }

    #[test]
    fn test_by_name() {
        assert!(by_name("device-zpl").is_some());
        assert!(by_name("nonexistent").is_none());
    }
}
