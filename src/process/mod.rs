// src/process/mod.rs
//! Turning raw sheet ranges into flat, keyed and joined record sets.

pub mod columns;
pub mod header;
pub mod index;
pub mod join;
pub mod key;
pub mod record;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use columns::ColumnRange;
pub use header::HeaderMode;
pub use index::KeyedIndex;
pub use join::{join, join_datasets, JoinKind, JoinResult, SCHOOL_ID};
pub use key::locate_key_column;

/// One data row, label → cell, iterated in header order.
pub type Record = IndexMap<String, Value>;

/// Header rows and data rows exactly as the upstream range returned them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub header_rows: Vec<Vec<Value>>,
    pub data_rows: Vec<Vec<Value>>,
}

impl RawTable {
    pub fn new(header_rows: Vec<Vec<Value>>, data_rows: Vec<Vec<Value>>) -> Self {
        Self {
            header_rows,
            data_rows,
        }
    }

    /// Split a single range response: the first `header_count` rows are headers.
    pub fn split(mut values: Vec<Vec<Value>>, header_count: usize) -> Self {
        let at = header_count.min(values.len());
        let data_rows = values.split_off(at);
        Self {
            header_rows: values,
            data_rows,
        }
    }
}

/// A flattened table as served by the API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub records: Vec<Record>,
}

impl Dataset {
    pub fn from_raw(raw: RawTable, mode: HeaderMode) -> Self {
        let headers = header::flatten(&raw.header_rows, mode);
        let records = record::materialize(&headers, &raw.data_rows);
        Self {
            headers,
            rows: raw.data_rows,
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Profile sheet: one header row.
pub fn build_profile(raw: RawTable) -> Dataset {
    Dataset::from_raw(raw, HeaderMode::Single)
}

/// Performance sheet: category / field / year header block.
pub fn build_performance(raw: RawTable) -> Dataset {
    Dataset::from_raw(raw, HeaderMode::Composite)
}

/// Render a cell the way it reads in the sheet. Strings are never trimmed,
/// whole floats drop their fraction, null is empty.
pub fn cell_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else {
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
                    Some(f) => f.to_string(),
                    None => n.to_string(),
                }
            }
        }
        other => other.to_string(),
    }
}
