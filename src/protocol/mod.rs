//! # Label Protocol Helpers
//!
//! Builders and constants for the two label languages the printers speak.
//!
//! ## Module Structure
//!
//! - [`zpl`]: ZPL II for the primary printer (the full device label)
//! - [`tspl`]: TSPL for the secondary printer (the serial-only PCB label)
//!
//! ## Usage Example
//!
//! ```
//! use labelfeed::{printer::LabelStock, protocol::tspl};
//!
//! let payload = tspl::serial_label(LabelStock::PCB_40X20, "ATS542912923728");
//! assert!(payload.starts_with("SIZE 40 mm, 20 mm"));
//! ```

pub mod tspl;
pub mod zpl;
