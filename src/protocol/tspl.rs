//! # TSPL Label Commands
//!
//! TSPL is the line-oriented command language spoken by TSC and XPrinter
//! desktop label printers. Each command is one ASCII line terminated by
//! CR LF; a label is composed in the image buffer and printed by `PRINT`.
//!
//! ## Job Structure
//!
//! ```text
//! SIZE 40 mm, 20 mm          ← label geometry
//! GAP 2 mm, 0 mm             ← gap sensing
//! DIRECTION 1
//! REFERENCE 0, 0
//! ...                        ← media options
//! CLEAR                      ← empty the image buffer
//! TEXT x, y, "font", rot, xmul, ymul, "content"
//! PRINT 1, 1                 ← one set, one copy
//! ```
//!
//! Only the subset needed for serial-number labels is implemented.

use crate::printer::LabelStock;

/// Command terminator
pub const EOL: &str = "\r\n";

/// Width of one character cell of built-in font "2" at 1x (dots)
pub const FONT_2_WIDTH: u16 = 12;

/// Height of one character cell of built-in font "2" at 1x (dots)
pub const FONT_2_HEIGHT: u16 = 20;

// ============================================================================
// SETUP COMMANDS
// ============================================================================

/// # Label Size (SIZE)
///
/// ```
/// use labelfeed::{printer::LabelStock, protocol::tspl};
///
/// assert_eq!(tspl::size(&LabelStock::PCB_40X20), "SIZE 40 mm, 20 mm");
/// ```
pub fn size(stock: &LabelStock) -> String {
    format!("SIZE {} mm, {} mm", stock.width_mm, stock.height_mm)
}

/// # Gap Between Labels (GAP)
pub fn gap(stock: &LabelStock) -> String {
    format!("GAP {} mm, 0 mm", stock.gap_mm)
}

/// Media options every job starts with: print direction, reference point and
/// tear-off mode (peel, cutter and partial cutter disabled).
pub fn media_setup() -> [&'static str; 7] {
    [
        "DIRECTION 1",
        "REFERENCE 0, 0",
        "OFFSET 0 mm",
        "SET PEEL OFF",
        "SET CUTTER OFF",
        "SET PARTIAL_CUTTER OFF",
        "SET TEAR ON",
    ]
}

// ============================================================================
// CONTENT COMMANDS
// ============================================================================

/// Escape a string for use inside a quoted TSPL parameter.
///
/// TSPL has no backslash escapes; a double quote is written as `\["]`.
pub fn escape_text(content: &str) -> String {
    content.replace('"', "\\[\"]")
}

/// # Print Text (TEXT)
///
/// | Parameter | Meaning |
/// |-----------|---------|
/// | `x`, `y` | origin in dots |
/// | `font` | built-in font name (`"1"` .. `"8"`) |
/// | `mul` | horizontal and vertical magnification |
pub fn text(x: u16, y: u16, font: &str, mul: u8, content: &str) -> String {
    format!(
        "TEXT {}, {}, \"{}\", 0, {}, {}, \"{}\"",
        x,
        y,
        font,
        mul,
        mul,
        escape_text(content)
    )
}

/// # Print Labels (PRINT)
pub fn print(copies: u16) -> String {
    format!("PRINT 1, {}", copies)
}

// ============================================================================
// LABEL BUILDER
// ============================================================================

/// A TSPL job under construction.
#[derive(Debug, Clone)]
pub struct TsplLabel {
    stock: LabelStock,
    commands: Vec<String>,
}

impl TsplLabel {
    /// Start a job: geometry, media options and `CLEAR`.
    pub fn new(stock: LabelStock) -> Self {
        let mut commands = vec![size(&stock), gap(&stock)];
        commands.extend(media_setup().iter().map(|c| c.to_string()));
        commands.push("CLEAR".to_string());
        Self { stock, commands }
    }

    pub fn text(mut self, x: u16, y: u16, font: &str, mul: u8, content: &str) -> Self {
        self.commands.push(text(x, y, font, mul, content));
        self
    }

    /// Add a line of font "2" text centered on the label.
    ///
    /// Uses 2x magnification when it fits the label width, 1x otherwise.
    pub fn centered_text(self, content: &str) -> Self {
        let width = self.stock.width_dots();
        let height = self.stock.height_dots();
        let chars = u16::try_from(content.chars().count()).unwrap_or(u16::MAX);
        let mul: u8 = if chars.saturating_mul(FONT_2_WIDTH * 2) <= width { 2 } else { 1 };
        let text_width = chars.saturating_mul(FONT_2_WIDTH * mul as u16);
        let text_height = FONT_2_HEIGHT * mul as u16;
        let x = width.saturating_sub(text_width) / 2;
        let y = height.saturating_sub(text_height) / 2;
        self.text(x, y, "2", mul, content)
    }

    /// Finish with `PRINT 1, copies` and join the job into one payload.
    pub fn build(mut self, copies: u16) -> String {
        self.commands.push(print(copies));
        let mut out = self.commands.join(EOL);
        out.push_str(EOL);
        out
    }
}

/// The minimal label sent to the secondary printer: the serial number only.
pub fn serial_label(stock: LabelStock, serial_number: &str) -> String {
    TsplLabel::new(stock).centered_text(serial_number).build(1)
}
