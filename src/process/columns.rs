use std::{fmt, str::FromStr};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use super::{header, key::locate_key_column, Dataset, HeaderMode, RawTable};

static RANGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([A-Za-z]+)\s*[:\-]\s*([A-Za-z]+)\s*$").expect("valid regex"));

/// Zero-based index of a spreadsheet column letter (`A` = 0, `AA` = 26).
pub fn column_index(letters: &str) -> Option<usize> {
    if letters.is_empty() {
        return None;
    }
    let mut n: usize = 0;
    for c in letters.chars() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        let digit = (c.to_ascii_uppercase() as u8 - b'A') as usize + 1;
        n = n.checked_mul(26)?.checked_add(digit)?;
    }
    Some(n - 1)
}

/// Inverse of [`column_index`].
pub fn column_letters(mut index: usize) -> String {
    let mut out = Vec::new();
    loop {
        out.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Inclusive span of columns, written `AB:AU`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnRange {
    pub start: usize,
    pub end: usize,
}

impl ColumnRange {
    pub fn contains(&self, col: usize) -> bool {
        (self.start..=self.end).contains(&col)
    }
}

impl FromStr for ColumnRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = RANGE_RE
            .captures(s)
            .ok_or_else(|| format!("invalid column range `{}`", s))?;
        let start = column_index(&caps[1]).ok_or_else(|| format!("bad column `{}`", &caps[1]))?;
        let end = column_index(&caps[2]).ok_or_else(|| format!("bad column `{}`", &caps[2]))?;
        if start > end {
            return Err(format!("column range `{}` runs backwards", s));
        }
        Ok(Self { start, end })
    }
}

impl fmt::Display for ColumnRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            column_letters(self.start),
            column_letters(self.end)
        )
    }
}

impl Serialize for ColumnRange {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Keep only `columns` (in that order) from every header and data row.
///
/// Cells a row never had stay absent at the end of the row, so a projected
/// row is never longer than its source data.
pub fn project(raw: &RawTable, columns: &[usize]) -> RawTable {
    let pick = |row: &Vec<Value>| -> Vec<Value> {
        let mut cells: Vec<Option<&Value>> = columns.iter().map(|&c| row.get(c)).collect();
        while matches!(cells.last(), Some(None)) {
            cells.pop();
        }
        cells
            .into_iter()
            .map(|c| c.cloned().unwrap_or_else(|| Value::String(String::new())))
            .collect()
    };
    RawTable {
        header_rows: raw.header_rows.iter().map(pick).collect(),
        data_rows: raw.data_rows.iter().map(pick).collect(),
    }
}

/// Performance view limited to the key column plus `range`, re-flattened.
pub fn key_subset(raw: &RawTable, range: ColumnRange) -> Dataset {
    let full = header::flatten(&raw.header_rows, HeaderMode::Composite);
    let mut columns = Vec::with_capacity(range.end - range.start + 2);
    if let Some(key) = locate_key_column(&full) {
        if !range.contains(key) {
            columns.push(key);
        }
    }
    columns.extend(range.start..=range.end);
    Dataset::from_raw(project(raw, &columns), HeaderMode::Composite)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn letters_round_trip_through_indices() {
        assert_eq!(column_index("A"), Some(0));
        assert_eq!(column_index("z"), Some(25));
        assert_eq!(column_index("AA"), Some(26));
        assert_eq!(column_index("AB"), Some(27));
        assert_eq!(column_index("AU"), Some(46));
        assert_eq!(column_index("A1"), None);
        assert_eq!(column_index(""), None);
        assert_eq!(column_letters(27), "AB");
        assert_eq!(column_letters(701), "ZZ");
    }

    #[test]
    fn parses_ranges() {
        let r: ColumnRange = "AB:AU".parse().unwrap();
        assert_eq!(r, ColumnRange { start: 27, end: 46 });
        assert_eq!(r.to_string(), "AB:AU");
        assert!("c-e".parse::<ColumnRange>().is_ok());
        assert!("AU:AB".parse::<ColumnRange>().is_err());
        assert!("A1:B2".parse::<ColumnRange>().is_err());
    }

    #[test]
    fn subset_prepends_key_column() {
        let raw = RawTable::new(
            vec![
                vec![json!("Info"), json!("Info"), json!("Scores"), json!("Scores")],
                vec![json!("School ID"), json!("Name"), json!("Maths"), json!("Reading")],
                vec![json!(""), json!(""), json!(2022), json!(2022)],
            ],
            vec![
                vec![json!("1"), json!("A"), json!(50), json!(60)],
                vec![json!("2"), json!("B"), json!(70)],
            ],
        );
        let range: ColumnRange = "C:D".parse().unwrap();
        let ds = key_subset(&raw, range);
        assert_eq!(
            ds.headers,
            vec![
                "Info | School ID",
                "Scores | Maths | 2022",
                "Scores | Reading | 2022"
            ]
        );
        assert_eq!(ds.rows[0], vec![json!("1"), json!(50), json!(60)]);
        assert_eq!(ds.rows[1], vec![json!("2"), json!(70)]);
        assert_eq!(ds.records[1]["Scores | Reading | 2022"], json!(""));
    }

    #[test]
    fn subset_without_key_column_keeps_range_only() {
        let raw = RawTable::new(
            vec![vec![json!("a"), json!("b"), json!("c")]],
            vec![vec![json!(1), json!(2), json!(3)]],
        );
        let ds = key_subset(&raw, "B:C".parse().unwrap());
        assert_eq!(ds.headers, vec!["b", "c"]);
        assert_eq!(ds.rows[0], vec![json!(2), json!(3)]);
    }

    #[test]
    fn key_inside_range_is_not_duplicated() {
        let raw = RawTable::new(
            vec![vec![json!("Name"), json!("School ID"), json!("Score")]],
            vec![vec![json!("A"), json!("1"), json!(9)]],
        );
        let ds = key_subset(&raw, "B:C".parse().unwrap());
        assert_eq!(ds.headers, vec!["School ID", "Score"]);
    }
}
