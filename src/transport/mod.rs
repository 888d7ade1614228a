//! # Transport Layer
//!
//! Byte-level plumbing at both ends of the pipeline.
//!
//! ## Available Transports
//!
//! - [`serial`]: serial port byte source for ingestion
//! - [`device`]: raw device file print backend (USB, serial, RFCOMM printers)
//! - [`spool`]: one-file-per-job directory print backend

pub mod device;
pub mod serial;
pub mod spool;

pub use device::DeviceBackend;
pub use serial::{SerialSource, list_ports};
pub use spool::SpoolBackend;
