//! Loosely-typed cell values as they arrive from spreadsheet exports.
//!
//! Submissions carry rows exactly as scraped from a workbook: a mix of
//! blanks, numbers, booleans and strings. Everything is coerced to text
//! here, once, before recipient construction.

use serde::{Deserialize, Serialize};

/// One spreadsheet cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    /// Empty cell (JSON null)
    Blank,
    /// Boolean cell
    Bool(bool),
    /// Numeric cell
    Number(f64),
    /// Text cell
    Text(String),
}

impl Default for CellValue {
    fn default() -> Self {
        CellValue::Blank
    }
}

impl CellValue {
    /// Render the cell as trimmed text.
    ///
    /// Whole numbers lose their trailing `.0` so card numbers and cost
    /// centres read the way they did in the workbook.
    pub fn as_text(&self) -> String {
        match self {
            CellValue::Blank => String::new(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            CellValue::Text(s) => s.trim().to_string(),
        }
    }

    /// True when the cell holds nothing usable.
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Blank => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}
