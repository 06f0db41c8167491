use serde_json::Value;

use super::cell_to_string;

/// Joins the category, field and year parts of a composite label.
pub const SEPARATOR: &str = " | ";

/// How many raw rows make up a table's header block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderMode {
    /// One header row, cell text used as-is.
    Single,
    /// Three header rows: category, field, year.
    Composite,
}

impl HeaderMode {
    pub fn rows(self) -> usize {
        match self {
            HeaderMode::Single => 1,
            HeaderMode::Composite => 3,
        }
    }
}

/// Flatten the header block into one label per column.
///
/// The result is as wide as the widest header row. Repeated labels are not
/// deduplicated: when two columns share a label, the later column shadows the
/// earlier one inside each record.
pub fn flatten(rows: &[Vec<Value>], mode: HeaderMode) -> Vec<String> {
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    (0..width)
        .map(|col| {
            let label = match mode {
                HeaderMode::Single => single_label(rows, col),
                HeaderMode::Composite => composite_label(rows, col),
            };
            if label.trim().is_empty() {
                placeholder(col)
            } else {
                label
            }
        })
        .collect()
}

/// Positional label for a column with no header text.
pub fn placeholder(col: usize) -> String {
    format!("col_{}", col)
}

fn cell(rows: &[Vec<Value>], row: usize, col: usize) -> String {
    rows.get(row)
        .and_then(|r| r.get(col))
        .map(cell_to_string)
        .unwrap_or_default()
}

fn single_label(rows: &[Vec<Value>], col: usize) -> String {
    cell(rows, 0, col)
}

// empty parts are skipped so a blank category never leaves a dangling separator
fn composite_label(rows: &[Vec<Value>], col: usize) -> String {
    (0..HeaderMode::Composite.rows())
        .map(|row| cell(rows, row, col).trim().to_string())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(SEPARATOR)
}
