//! # Label Stock Configuration
//!
//! This module defines the label media the printers are loaded with.
//!
//! ## Built-in Stock
//!
//! | Name | Size | Gap | Resolution | Used by |
//! |------|------|-----|------------|---------|
//! | `device-50x30` | 50 × 30 mm | 2 mm | 203 DPI | primary (full device label) |
//! | `pcb-40x20` | 40 × 20 mm | 2 mm | 203 DPI | secondary (PCB serial label) |
//!
//! ## Usage
//!
//! ```
//! use labelfeed::printer::LabelStock;
//!
//! let stock = LabelStock::PCB_40X20;
//! println!("{}: {}x{} dots", stock.name, stock.width_dots(), stock.height_dots());
//! ```

/// # Label Stock
///
/// Physical geometry of one label roll.
///
/// ## Calculations
///
/// ```text
/// dots_per_mm = dpi / 25.4
///
/// For 203 DPI:
///   dots_per_mm = 203 / 25.4 ≈ 8
///   40mm label  = 40 * 8 = 320 dots
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelStock {
    /// Stock name as used in configuration files
    pub name: &'static str,

    /// Label width in millimeters
    pub width_mm: f32,

    /// Label height in millimeters
    pub height_mm: f32,

    /// Gap between labels in millimeters (for gap sensing)
    pub gap_mm: f32,

    /// Printer resolution in dots per inch
    pub dpi: u16,
}

impl LabelStock {
    /// # Device Label (50 × 30 mm)
    ///
    /// Carries the QR code and the five identifiers plus the tracking number.
    /// Matches the `^PW399 ^LL240` geometry of the default ZPL template.
    pub const DEVICE_50X30: Self = Self {
        name: "device-50x30",
        width_mm: 50.0,
        height_mm: 30.0,
        gap_mm: 2.0,
        dpi: 203,
    };

    /// # PCB Label (40 × 20 mm)
    ///
    /// Small label stuck on the board itself, serial number only.
    pub const PCB_40X20: Self = Self {
        name: "pcb-40x20",
        width_mm: 40.0,
        height_mm: 20.0,
        gap_mm: 2.0,
        dpi: 203,
    };

    /// Calculate dots per millimeter
    #[inline]
    pub fn dots_per_mm(&self) -> f32 {
        self.dpi as f32 / 25.4
    }

    /// Convert millimeters to dots
    #[inline]
    pub fn mm_to_dots(&self, mm: f32) -> u16 {
        (mm * self.dots_per_mm()).round() as u16
    }

    #[inline]
    pub fn width_dots(&self) -> u16 {
        self.mm_to_dots(self.width_mm)
    }

    #[inline]
    pub fn height_dots(&self) -> u16 {
        self.mm_to_dots(self.height_mm)
    }

    /// Look up a built-in stock by name (case-insensitive).
    pub fn by_name(name: &str) -> Option<Self> {
        Self::built_in()
            .into_iter()
            .find(|stock| stock.name.eq_ignore_ascii_case(name.trim()))
    }

    /// List all built-in stock.
    pub fn built_in() -> Vec<Self> {
        vec![Self::DEVICE_50X30, Self::PCB_40X20]
    }
}

impl Default for LabelStock {
    fn default() -> Self {
        Self::PCB_40X20
    }
}

// ============================================================================
// TESTS
// ============================================================================
