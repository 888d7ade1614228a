//! # Printer Module
//!
//! This module provides label media configuration.
//!
//! ## Modules
//!
//! - [`config`]: Label stock geometry

pub mod config;

pub use config::LabelStock;
