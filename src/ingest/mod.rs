//! # Byte Stream Ingestion
//!
//! Turns the raw byte stream from the serial device into text fragments.
//!
//! ## Module Structure
//!
//! - [`buffer`]: pure flush rules (line ends, frame close, idle, size)
//! - [`reader`]: the polling loop over a [`ByteSource`]
//!
//! ## Pipeline
//!
//! ```text
//! ByteSource ──bytes──▶ FragmentBuffer ──text──▶ sink(Fragment)
//! ```
//!
//! Fragments carry no meaning yet; recognizing records is the parser's job.

pub mod buffer;
pub mod reader;

pub use buffer::FragmentBuffer;
pub use reader::{ByteSource, ReaderSettings, StreamReader};
