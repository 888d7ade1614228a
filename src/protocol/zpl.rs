//! # ZPL Device Label
//!
//! ZPL II is the label language of Zebra (and compatible) printers. A job is
//! framed by `^XA` … `^XZ`; every command starts with a caret (format
//! command) or tilde (control command).
//!
//! ## Default Device Label
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │ ▓▓▓▓▓▓▓   STC:  60000                     │
//! │ ▓ QR  ▓   S/N:  ATS542912923728           │
//! │ ▓▓▓▓▓▓▓   IMEI: 866988074133496           │
//! │           IMSI: 286019876543210           │
//! │           CCID: 8991101200003204510       │
//! │           MAC:  AA:BB:CC:DD:EE:FF         │
//! └───────────────────────────────────────────┘
//! ```
//!
//! The QR code encodes every identifier so a scanner can read the whole
//! record back from the label.

/// Start of a ZPL label
pub const LABEL_START: &str = "^XA";

/// End of a ZPL label
pub const LABEL_END: &str = "^XZ";

/// Built-in primary template with placeholders for the tracking number and
/// the five device fields. Geometry matches [`crate::printer::LabelStock::DEVICE_50X30`].
pub const DEVICE_LABEL_TEMPLATE: &str = "^XA
^PW399
^LL240
^CI28
^MD15
~SD15

^FO20,50^BQN,2,4
^FDLA,STC:{TRACKING_NUMBER};SN:{SERIAL_NUMBER};IMEI:{IMEI};IMSI:{IMSI};CCID:{CCID};MAC:{MAC_ADDRESS}^FS

^CF0,18,18
^FO185,32^FDSTC:^FS
^FO185,70^FDS/N:^FS
^FO185,107^FDIMEI:^FS
^FO185,145^FDIMSI:^FS
^FO185,182^FDCCID:^FS
^FO185,220^FDMAC:^FS

^CF0,22,16
^FO225,32^FD{TRACKING_NUMBER}^FS
^FO225,70^FD{SERIAL_NUMBER}^FS
^FO225,107^FD{IMEI}^FS
^FO225,145^FD{IMSI}^FS
^FO225,182^FD{CCID}^FS
^FO225,220^FD{MAC_ADDRESS}^FS

^XZ
";

/// Make a value safe to place inside `^FD … ^FS`.
///
/// Caret and tilde would start a new command inside field data, so they
/// are dropped.
pub fn sanitize_field(value: &str) -> String {
    value.chars().filter(|c| *c != '^' && *c != '~').collect()
}

/// Whether a payload is framed as a complete ZPL label.
pub fn is_complete_label(payload: &str) -> bool {
    let trimmed = payload.trim();
    trimmed.starts_with(LABEL_START) && trimmed.ends_with(LABEL_END)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_field_drops_command_prefixes() {
        assert_eq!(sanitize_field("AB^FS~JA12"), "ABFSJA12");
        assert_eq!(sanitize_field("AA:BB:CC:DD:EE:FF"), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_default_template_is_complete() {
        assert!(is_complete_label(DEVICE_LABEL_TEMPLATE));
        assert!(!is_complete_label("^XA^FDhello^FS"));
    }
}
