//! # Audit Log
//!
//! One CSV row per processed fragment, plus an archive file holding the exact
//! primary payload for every label that printed.
//!
//! ## Log Layout
//!
//! ```text
//! timestamp,serialNumber,imei,imsi,ccid,macAddress,trackingNumber,printStatus,archiveFileName,rawFragment
//! 2025-10-14 09:12:01,ATS542912923728,866988074133496,...,60000,Success,ATS542912923728_20251014_091201.zpl,##ATS…##
//! 2025-10-14 09:12:03,,,,,,,ParseError,,garbage
//! ```
//!
//! Rows are never rewritten. The file is opened in append mode for every row
//! so a crash loses at most the row being written.
//!
//! ## Failure Handling
//!
//! The archive file and the row are written independently. If either fails,
//! [`AuditLog::append`] reports it in an [`AuditFailure`]; the caller counts
//! and surfaces it but keeps processing records.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::dispatch::{CombinedStatus, Dispatch, PrintOutcome};
use crate::error::{AuditFailure, LabelfeedError, ParseError};
use crate::parser::Parser;
use crate::record::{DeviceFields, DeviceRecord, Fragment};

/// CSV header, in column order.
pub const LOG_HEADER: [&str; 10] = [
    "timestamp",
    "serialNumber",
    "imei",
    "imsi",
    "ccid",
    "macAddress",
    "trackingNumber",
    "printStatus",
    "archiveFileName",
    "rawFragment",
];

/// Header names older logs used for the tracking number column.
const LEGACY_TRACKING_COLUMNS: &[&str] = &["STC", "stc"];
const LEGACY_SERIAL_COLUMNS: &[&str] = &["SERIAL_NUMBER"];
const LEGACY_STATUS_COLUMNS: &[&str] = &["STATUS"];

/// Statuses of rows whose primary label made it onto paper. `Printed` is what
/// older logs wrote.
const PRINTED_STATUSES: &[&str] = &[
    "Success",
    "SuccessWithSecondary",
    "SuccessSecondaryFailed",
    "Printed",
];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const ARCHIVE_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

// ============================================================================
// LOG ENTRY
// ============================================================================

/// One immutable audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    /// `None` for parse errors and rejected duplicates
    pub tracking_number: Option<u64>,
    /// `None` for parse errors
    pub fields: Option<DeviceFields>,
    pub raw_fragment: String,
    pub primary: Option<PrintOutcome>,
    pub secondary: Option<PrintOutcome>,
    pub status: CombinedStatus,
    /// Parse error or discard reason, for the console
    pub detail: Option<String>,
}

impl LogEntry {
    pub fn dispatched(record: &DeviceRecord, dispatch: Dispatch) -> Self {
        Self {
            timestamp: Local::now(),
            tracking_number: Some(record.tracking_number),
            fields: Some(record.fields.clone()),
            raw_fragment: record.raw_fragment.clone(),
            detail: dispatch.primary.error_detail.clone(),
            primary: Some(dispatch.primary),
            secondary: dispatch.secondary,
            status: dispatch.status,
        }
    }

    pub fn parse_error(fragment: &Fragment, error: &ParseError) -> Self {
        Self {
            timestamp: Local::now(),
            tracking_number: None,
            fields: None,
            raw_fragment: fragment.text.clone(),
            primary: None,
            secondary: None,
            status: CombinedStatus::ParseError,
            detail: Some(format!("{}: {}", error.kind, error.detail)),
        }
    }

    pub fn discarded(record: &DeviceRecord, reason: &str) -> Self {
        Self {
            timestamp: Local::now(),
            tracking_number: Some(record.tracking_number),
            fields: Some(record.fields.clone()),
            raw_fragment: record.raw_fragment.clone(),
            primary: None,
            secondary: None,
            status: CombinedStatus::Discarded,
            detail: Some(reason.to_string()),
        }
    }

    pub fn duplicate_rejected(fragment: &Fragment, fields: DeviceFields) -> Self {
        Self {
            timestamp: Local::now(),
            tracking_number: None,
            detail: Some(format!("serial {} already processed", fields.serial_number)),
            fields: Some(fields),
            raw_fragment: fragment.text.clone(),
            primary: None,
            secondary: None,
            status: CombinedStatus::DuplicateRejected,
        }
    }

    pub fn serial_number(&self) -> Option<&str> {
        self.fields.as_ref().map(|f| f.serial_number.as_str())
    }

    /// The payload to archive: only labels whose primary print succeeded.
    fn archive_payload(&self) -> Option<&str> {
        self.primary
            .as_ref()
            .filter(|p| p.is_success())
            .map(|p| p.rendered_payload.as_str())
    }

    fn to_row(&self, archive_file: &str) -> [String; 10] {
        let fields = self.fields.as_ref();
        let column = |value: Option<&String>| value.cloned().unwrap_or_default();
        [
            self.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            column(fields.map(|d| &d.serial_number)),
            column(fields.map(|d| &d.imei)),
            column(fields.map(|d| &d.imsi)),
            column(fields.map(|d| &d.ccid)),
            column(fields.map(|d| &d.mac_address)),
            self.tracking_number.map(|n| n.to_string()).unwrap_or_default(),
            self.status.to_string(),
            archive_file.to_string(),
            self.raw_fragment.clone(),
        ]
    }
}

// ============================================================================
// WRITER
// ============================================================================

/// What an append produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Archived {
    /// File name (not path) of the archived payload, if one was written
    pub archive_file: Option<String>,
}

/// Single writer of the audit log and archive directory.
#[derive(Debug)]
pub struct AuditLog {
    csv_path: PathBuf,
    archive_dir: PathBuf,
    archive_extension: String,
    rows_written: u64,
}

impl AuditLog {
    /// Prepare the log: create directories and write the header if the file
    /// does not exist yet.
    pub fn open(
        csv_path: impl Into<PathBuf>,
        archive_dir: impl Into<PathBuf>,
        archive_extension: &str,
    ) -> Result<Self, LabelfeedError> {
        let log = Self {
            csv_path: csv_path.into(),
            archive_dir: archive_dir.into(),
            archive_extension: archive_extension.trim_start_matches('.').to_string(),
            rows_written: 0,
        };

        if let Some(parent) = log.csv_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::create_dir_all(&log.archive_dir)?;

        let file = log.open_for_append()?;
        if file.metadata()?.len() == 0 {
            write_records(file, None)?;
            tracing::info!(path = %log.csv_path.display(), "created audit log");
        }
        Ok(log)
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// Rows appended by this writer since it was opened.
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Append one entry.
    ///
    /// The archive is attempted first so its name can go into the row; a
    /// failed archive leaves the column empty but the row is still written.
    pub fn append(&mut self, entry: &LogEntry) -> Result<Archived, AuditFailure> {
        let mut failure = AuditFailure::default();

        let archive_file = match (entry.archive_payload(), entry.serial_number()) {
            (Some(payload), Some(serial)) => {
                match self.write_archive(serial, &entry.timestamp, payload) {
                    Ok(name) => Some(name),
                    Err(e) => {
                        failure.archive = Some(e.to_string());
                        None
                    }
                }
            }
            _ => None,
        };

        let row = entry.to_row(archive_file.as_deref().unwrap_or(""));
        match self
            .open_for_append()
            .and_then(|file| write_records(file, Some(&row)))
        {
            Ok(()) => self.rows_written += 1,
            Err(e) => failure.row = Some(e.to_string()),
        }

        if failure.is_empty() {
            Ok(Archived { archive_file })
        } else {
            tracing::error!(%failure, status = %entry.status, "audit append failed");
            Err(failure)
        }
    }

    fn open_for_append(&self) -> io::Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.csv_path)
    }

    /// Write the payload to `{serial}_{YYYYMMDD_HHMMSS}.{ext}`, adding `_N`
    /// when a label for the same serial was archived in the same second.
    fn write_archive(
        &self,
        serial: &str,
        timestamp: &DateTime<Local>,
        payload: &str,
    ) -> io::Result<String> {
        let stem = format!(
            "{}_{}",
            sanitize_file_stem(serial),
            timestamp.format(ARCHIVE_TIMESTAMP_FORMAT)
        );

        for attempt in 0u32.. {
            let name = match attempt {
                0 => self.archive_name(&stem),
                n => self.archive_name(&format!("{}_{}", stem, n)),
            };
            let path = self.archive_dir.join(&name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(payload.as_bytes())?;
                    file.sync_data()?;
                    return Ok(name);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }
        unreachable!("archive suffixes exhausted")
    }

    fn archive_name(&self, stem: &str) -> String {
        if self.archive_extension.is_empty() {
            stem.to_string()
        } else {
            format!("{}.{}", stem, self.archive_extension)
        }
    }
}

fn write_records(file: File, row: Option<&[String; 10]>) -> io::Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    match row {
        Some(row) => writer.write_record(row)?,
        None => writer.write_record(LOG_HEADER)?,
    }
    writer.flush()
}

fn sanitize_file_stem(serial: &str) -> String {
    serial
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

// ============================================================================
// SCAN
// ============================================================================

/// What an existing log tells a new run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogScan {
    pub rows: usize,
    /// Every tracking number in the log, printed or not
    pub tracking_numbers: Vec<u64>,
    /// Canonical serials of units whose primary label printed
    pub serial_numbers: Vec<String>,
}

impl LogScan {
    pub fn max_tracking_number(&self) -> Option<u64> {
        self.tracking_numbers.iter().copied().max()
    }
}

/// Read an existing log. A missing file is an empty history.
///
/// Serials are canonicalized with `parser`'s prefix so numeric serials from
/// older logs compare equal to freshly parsed ones. Rows that never printed
/// (failed, discarded, rejected) do not count as seen; a log without a
/// status column counts every serial.
pub fn scan(path: &Path, parser: &Parser) -> Result<LogScan, LabelfeedError> {
    if !path.exists() {
        return Ok(LogScan::default());
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| LabelfeedError::Io(io::Error::other(e)))?;
    let headers = reader
        .headers()
        .map_err(|e| LabelfeedError::Io(io::Error::other(e)))?
        .clone();

    let column = |primary: &str, legacy: &[&str]| {
        headers
            .iter()
            .position(|h| h.trim() == primary || legacy.contains(&h.trim()))
    };
    let tracking_col = column("trackingNumber", LEGACY_TRACKING_COLUMNS);
    let serial_col = column("serialNumber", LEGACY_SERIAL_COLUMNS);
    let status_col = column("printStatus", LEGACY_STATUS_COLUMNS);

    let mut scan = LogScan::default();
    for (line, result) in reader.records().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(line = line + 2, error = %e, "skipping unreadable log row");
                continue;
            }
        };
        scan.rows += 1;

        if let Some(n) = tracking_col
            .and_then(|i| record.get(i))
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            scan.tracking_numbers.push(n);
        }
        let printed = status_col
            .and_then(|i| record.get(i))
            .is_none_or(|status| PRINTED_STATUSES.contains(&status.trim()));
        if let Some(serial) = serial_col
            .and_then(|i| record.get(i))
            .map(str::trim)
            .filter(|s| printed && !s.is_empty())
        {
            scan.serial_numbers.push(parser.canonical_serial(serial));
        }
    }
    Ok(scan)
}
