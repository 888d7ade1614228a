//! # Labelfeed - Serial-to-Label Printing Station
//!
//! Labelfeed reads device identity records from a serial-attached test
//! fixture, gives every unit a sequential tracking number and prints its
//! labels. It provides:
//!
//! - **Ingestion**: fragment buffering over a serial byte stream
//! - **Parsing**: tolerant recognition of `##SN|IMEI|IMSI|CCID|MAC##` records
//! - **Printing**: a templated ZPL label plus an optional TSPL serial label
//! - **Audit**: one CSV row per processed fragment, archived label payloads
//!
//! ## Quick Start
//!
//! ```
//! use labelfeed::parser;
//!
//! let fields = parser::parse(
//!     "##ATS542912923728|866988074133496|286019876543210|8991101200003204510|AA:BB:CC:DD:EE:FF##",
//! )?;
//! assert_eq!(fields.serial_number, "ATS542912923728");
//!
//! // Numeric serials get the canonical prefix
//! let fields = parser::parse(
//!     "#612165404520|866988074129817|286016570017900|8990011419260179000F|B8:46:52:25:67:68",
//! )?;
//! assert_eq!(fields.serial_number, "ATS612165404520");
//! # Ok::<(), labelfeed::error::ParseError>(())
//! ```
//!
//! ## Module Overview
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`ingest`] | Byte stream reader and fragment buffer |
//! | [`parser`] | Record matchers and field validation |
//! | [`tracking`] | Tracking number allocator and run statistics |
//! | [`controller`] | Auto/queue modes, operator commands, station threads |
//! | [`dispatch`] | Primary/secondary print dispatch |
//! | [`audit`] | CSV audit log and payload archive |
//! | [`template`] | Primary label templates |
//! | [`protocol`] | ZPL and TSPL helpers |
//! | [`printer`] | Label stock geometry |
//! | [`transport`] | Serial source, device and spool backends |
//! | [`console`] | Operator console grammar |
//! | [`config`] | TOML configuration |
//! | [`error`] | Error types |

pub mod audit;
pub mod config;
pub mod console;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod parser;
pub mod printer;
pub mod protocol;
pub mod record;
pub mod template;
pub mod tracking;
pub mod transport;

// Re-exports for convenience
pub use controller::{ModeController, Station, StationHandle};
pub use error::LabelfeedError;
pub use record::{DeviceFields, DeviceRecord, Fragment};
