//! # Configuration
//!
//! Settings are read from a TOML file; every section and key is optional and
//! falls back to the defaults below. Command-line flags override the file.
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyUSB0"
//! baud_rate = 9600
//! idle_timeout_ms = 100
//!
//! [print]
//! primary = { kind = "device", path = "/dev/usb/lp0" }
//! secondary = { kind = "spool", dir = "save/pcb_spool" }
//! secondary_stock = "pcb-40x20"
//!
//! [run]
//! mode = "queue"
//! duplicate_policy = "reject"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audit::AuditLog;
use crate::controller::{DuplicatePolicy, Mode};
use crate::dispatch::PrintBackend;
use crate::error::LabelfeedError;
use crate::ingest::ReaderSettings;
use crate::parser::{DEFAULT_SERIAL_PREFIX, Parser};
use crate::printer::LabelStock;
use crate::template::{self, LabelTemplate};
use crate::tracking::DEFAULT_BASE_TRACKING_NUMBER;
use crate::transport::{DeviceBackend, SpoolBackend};

/// Accepted range for the idle flush timeout.
const IDLE_TIMEOUT_RANGE_MS: std::ops::RangeInclusive<u64> = 50..=150;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub serial: SerialConfig,
    pub parser: ParserConfig,
    pub tracking: TrackingConfig,
    pub print: PrintConfig,
    pub audit: AuditConfig,
    pub run: RunConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    pub idle_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub max_fragment_len: usize,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            idle_timeout_ms: 100,
            poll_interval_ms: 10,
            max_fragment_len: 1024,
        }
    }
}

impl SerialConfig {
    pub fn reader_settings(&self) -> ReaderSettings {
        ReaderSettings {
            idle_timeout: Duration::from_millis(self.idle_timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_fragment_len: self.max_fragment_len,
        }
    }

    /// Serial read timeout; one poll interval keeps stop requests responsive.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParserConfig {
    pub serial_prefix: String,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            serial_prefix: DEFAULT_SERIAL_PREFIX.to_string(),
        }
    }
}

impl ParserConfig {
    pub fn parser(&self) -> Parser {
        Parser::new(self.serial_prefix.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackingConfig {
    pub base: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE_TRACKING_NUMBER,
        }
    }
}

/// Where a printer's payloads go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase", deny_unknown_fields)]
pub enum BackendConfig {
    /// Raw device file
    Device { path: PathBuf },
    /// One file per job in a directory
    Spool {
        dir: PathBuf,
        #[serde(default)]
        extension: Option<String>,
    },
}

impl BackendConfig {
    /// Build the backend; `default_extension` names spool files when the
    /// config does not.
    pub fn build(&self, default_extension: &str) -> Result<Arc<dyn PrintBackend>, LabelfeedError> {
        let backend: Arc<dyn PrintBackend> = match self {
            Self::Device { path } => Arc::new(DeviceBackend::new(path)),
            Self::Spool { dir, extension } => Arc::new(SpoolBackend::new(
                dir,
                extension.as_deref().unwrap_or(default_extension),
            )?),
        };
        Ok(backend)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PrintConfig {
    pub primary: BackendConfig,
    pub secondary: Option<BackendConfig>,
    pub secondary_enabled: bool,
    /// Template file for the primary label; the built-in ZPL label when unset
    pub template: Option<PathBuf>,
    /// Label stock of the secondary printer (see [`LabelStock::by_name`])
    pub secondary_stock: String,
}

impl Default for PrintConfig {
    fn default() -> Self {
        Self {
            primary: BackendConfig::Device {
                path: PathBuf::from("/dev/usb/lp0"),
            },
            secondary: None,
            secondary_enabled: true,
            template: None,
            secondary_stock: LabelStock::PCB_40X20.name.to_string(),
        }
    }
}

impl PrintConfig {
    /// Load the configured template, or the built-in one.
    pub fn template(&self) -> Result<LabelTemplate, LabelfeedError> {
        match &self.template {
            Some(path) => match template::by_name(&path.to_string_lossy()) {
                Some(builtin) if !path.exists() => Ok(builtin),
                _ => LabelTemplate::from_file(path),
            },
            None => Ok(LabelTemplate::device_label()),
        }
    }

    pub fn stock(&self) -> Result<LabelStock, LabelfeedError> {
        LabelStock::by_name(&self.secondary_stock).ok_or_else(|| {
            LabelfeedError::Config(format!("unknown label stock '{}'", self.secondary_stock))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuditConfig {
    pub csv_path: PathBuf,
    pub archive_dir: PathBuf,
    pub archive_extension: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            csv_path: PathBuf::from("save/csv/device_log.csv"),
            archive_dir: PathBuf::from("save/zpl_outputs"),
            archive_extension: "zpl".to_string(),
        }
    }
}

impl AuditConfig {
    pub fn open(&self) -> Result<AuditLog, LabelfeedError> {
        AuditLog::open(&self.csv_path, &self.archive_dir, &self.archive_extension)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub mode: Mode,
    pub duplicate_policy: DuplicatePolicy,
}

impl Config {
    /// Read a config file. A missing `path` means all defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, LabelfeedError> {
        let config = match path {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|e| {
                    LabelfeedError::Config(format!("Failed to read {}: {}", path.display(), e))
                })?;
                Self::from_toml(&text)?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, LabelfeedError> {
        toml::from_str(text).map_err(|e| LabelfeedError::Config(e.to_string()))
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), LabelfeedError> {
        let serial = &self.serial;
        if !IDLE_TIMEOUT_RANGE_MS.contains(&serial.idle_timeout_ms) {
            return Err(LabelfeedError::Config(format!(
                "serial.idle_timeout_ms must be between {} and {}, got {}",
                IDLE_TIMEOUT_RANGE_MS.start(),
                IDLE_TIMEOUT_RANGE_MS.end(),
                serial.idle_timeout_ms
            )));
        }
        if serial.baud_rate == 0 {
            return Err(LabelfeedError::Config("serial.baud_rate must be positive".to_string()));
        }
        if serial.poll_interval_ms == 0 || serial.poll_interval_ms > serial.idle_timeout_ms {
            return Err(LabelfeedError::Config(
                "serial.poll_interval_ms must be positive and below the idle timeout".to_string(),
            ));
        }
        if serial.max_fragment_len < 16 {
            return Err(LabelfeedError::Config(
                "serial.max_fragment_len must be at least 16".to_string(),
            ));
        }
        if self.parser.serial_prefix.trim().is_empty()
            || !self.parser.serial_prefix.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(LabelfeedError::Config(
                "parser.serial_prefix must be non-empty and alphanumeric".to_string(),
            ));
        }
        self.print.stock()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_file_is_all_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.tracking.base, 60000);
        assert_eq!(config.audit.csv_path, PathBuf::from("save/csv/device_log.csv"));
        assert_eq!(config.run.mode, Mode::AutoPrint);
        assert_eq!(config.run.duplicate_policy, DuplicatePolicy::Warn);
        config.validate().unwrap();
    }

    #[test]
    fn test_full_file() {
        let config = Config::from_toml(
            r#"
            [serial]
            port = "/dev/ttyACM0"
            baud_rate = 115200
            idle_timeout_ms = 60

            [parser]
            serial_prefix = "ats"

            [print]
            primary = { kind = "spool", dir = "out/zebra" }
            secondary = { kind = "device", path = "/dev/usb/lp1" }
            secondary_enabled = false
            secondary_stock = "device-50x30"

            [run]
            mode = "queue"
            duplicate_policy = "reject"
            "#,
        )
        .unwrap();

        assert_eq!(config.serial.port, "/dev/ttyACM0");
        assert_eq!(config.serial.reader_settings().idle_timeout, Duration::from_millis(60));
        assert_eq!(config.parser.parser().prefix(), "ATS");
        assert_eq!(
            config.print.primary,
            BackendConfig::Spool {
                dir: PathBuf::from("out/zebra"),
                extension: None
            }
        );
        assert!(!config.print.secondary_enabled);
        assert_eq!(config.print.stock().unwrap(), LabelStock::DEVICE_50X30);
        assert_eq!(config.run.mode, Mode::QueueHold);
        assert_eq!(config.run.duplicate_policy, DuplicatePolicy::Reject);
        config.validate().unwrap();
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let err = Config::from_toml("[serial]\nbaud = 9600\n").unwrap_err();
        assert!(matches!(err, LabelfeedError::Config(_)));
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.serial.idle_timeout_ms = 500;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.print.secondary_stock = "a4".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.parser.serial_prefix = "A-S".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_spool_backend_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let backend = BackendConfig::Spool {
            dir: dir.path().join("zebra"),
            extension: None,
        }
        .build("zpl")
        .unwrap();
        backend.submit(b"^XA^XZ").unwrap();
        let file = std::fs::read_dir(dir.path().join("zebra"))
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        assert!(file.file_name().to_string_lossy().ends_with(".zpl"));
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let err = Config::load(Some(Path::new("/nonexistent/labelfeed.toml"))).unwrap_err();
        assert!(matches!(err, LabelfeedError::Config(_)));
    }
}
