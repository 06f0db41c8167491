use indexmap::IndexMap;
use serde_json::Value;

use super::{cell_to_string, key::locate_key_column, Dataset, Record};

/// Records of one dataset keyed by their stringified school id.
///
/// Keys keep first-insertion order. A later record with the same key replaces
/// the earlier one in place; callers rely on ids being unique in practice.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyedIndex {
    key_field: Option<String>,
    entries: IndexMap<String, Record>,
}

impl KeyedIndex {
    /// Empty when the dataset has no recognisable key column.
    pub fn build(dataset: &Dataset) -> Self {
        let Some(col) = locate_key_column(&dataset.headers) else {
            return Self::default();
        };
        let key_field = dataset.headers[col].clone();

        let mut entries = IndexMap::with_capacity(dataset.records.len());
        for record in &dataset.records {
            match record.get(&key_field) {
                None | Some(Value::Null) => continue,
                Some(Value::String(s)) if s.is_empty() => continue,
                Some(value) => {
                    entries.insert(cell_to_string(value), record.clone());
                }
            }
        }

        Self {
            key_field: Some(key_field),
            entries,
        }
    }

    /// Label of the column the keys were read from.
    pub fn key_field(&self) -> Option<&str> {
        self.key_field.as_deref()
    }

    pub fn get(&self, key: &str) -> Option<&Record> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
