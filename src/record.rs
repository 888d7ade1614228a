//! # Device Records
//!
//! The values that flow through the pipeline:
//!
//! ```text
//! Fragment ──parse──▶ DeviceFields ──allocate──▶ DeviceRecord
//! ```
//!
//! A [`Fragment`] is whatever text the byte stream reader flushed. The parser
//! turns it into [`DeviceFields`] (no side effects, no tracking number). Only
//! the mode controller turns fields into a [`DeviceRecord`], because only it
//! may draw a tracking number from the allocator.

use chrono::{DateTime, Local};
use serde::Serialize;

/// A chunk of text flushed by the byte stream reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub text: String,
    pub received_at: DateTime<Local>,
}

impl Fragment {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            received_at: Local::now(),
        }
    }
}

/// The five identifiers carried by one device record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DeviceFields {
    /// Business key, always carrying the canonical vendor prefix
    pub serial_number: String,
    pub imei: String,
    pub imsi: String,
    pub ccid: String,
    pub mac_address: String,
}

/// A parsed record with its tracking number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceRecord {
    pub tracking_number: u64,
    pub fields: DeviceFields,
    pub received_at: DateTime<Local>,
    pub raw_fragment: String,
}

impl DeviceRecord {
    pub fn new(tracking_number: u64, fields: DeviceFields, fragment: &Fragment) -> Self {
        Self {
            tracking_number,
            fields,
            received_at: fragment.received_at,
            raw_fragment: fragment.text.clone(),
        }
    }

    pub fn serial_number(&self) -> &str {
        &self.fields.serial_number
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Fields from the reference device used throughout the tests.
    pub fn sample_fields() -> DeviceFields {
        DeviceFields {
            serial_number: "ATS542912923728".into(),
            imei: "866988074133496".into(),
            imsi: "286019876543210".into(),
            ccid: "8991101200003204510".into(),
            mac_address: "AA:BB:CC:DD:EE:FF".into(),
        }
    }

    pub fn sample_record(tracking_number: u64) -> DeviceRecord {
        let fragment = Fragment::new(
            "##ATS542912923728|866988074133496|286019876543210|8991101200003204510|AA:BB:CC:DD:EE:FF##",
        );
        DeviceRecord::new(tracking_number, sample_fields(), &fragment)
    }
}
