use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Dataset, KeyedIndex, Record};

/// Field every joined record carries.
pub const SCHOOL_ID: &str = "School ID";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// Keys present on both sides.
    Inner,
    /// Keys present on either side.
    Outer,
}

impl JoinKind {
    pub fn from_only_matched(only_matched: bool) -> Self {
        if only_matched {
            JoinKind::Inner
        } else {
            JoinKind::Outer
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinResult {
    pub count: usize,
    pub records: Vec<Record>,
}

/// Join profile (left) with performance (right) records by school id.
///
/// Key order: left insertion order, then (outer only) right-only keys in
/// right insertion order. Right fields override left fields of the same name.
pub fn join(left: &KeyedIndex, right: &KeyedIndex, kind: JoinKind) -> JoinResult {
    let keys: Vec<&str> = match kind {
        JoinKind::Inner => left.keys().filter(|k| right.contains_key(k)).collect(),
        JoinKind::Outer => left
            .keys()
            .chain(right.keys().filter(|k| !left.contains_key(k)))
            .collect(),
    };

    let empty = Record::new();
    let records: Vec<Record> = keys
        .into_iter()
        .map(|key| {
            merge(
                key,
                left.get(key).unwrap_or(&empty),
                left.key_field(),
                right.get(key).unwrap_or(&empty),
                right.key_field(),
            )
        })
        .collect();

    JoinResult {
        count: records.len(),
        records,
    }
}

/// Index both datasets and join them.
pub fn join_datasets(profile: &Dataset, performance: &Dataset, kind: JoinKind) -> JoinResult {
    join(
        &KeyedIndex::build(profile),
        &KeyedIndex::build(performance),
        kind,
    )
}

fn merge(
    key: &str,
    left: &Record,
    left_field: Option<&str>,
    right: &Record,
    right_field: Option<&str>,
) -> Record {
    let mut merged = left.clone();
    for (label, value) in right {
        merged.insert(label.clone(), value.clone());
    }

    if merged.get(SCHOOL_ID).map_or(true, is_falsy) {
        let side = |record: &Record, field: Option<&str>| {
            field
                .and_then(|f| record.get(f))
                .filter(|v| !is_falsy(v))
                .cloned()
        };
        let id = side(left, left_field)
            .or_else(|| side(right, right_field))
            .unwrap_or_else(|| Value::String(key.to_string()));
        merged.insert(SCHOOL_ID.to_string(), id);
    }
    merged
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{build_performance, build_profile, RawTable};
    use serde_json::json;

    fn profile(ids: &[&str]) -> Dataset {
        let mut rows = vec![vec![json!("School ID"), json!("Name")]];
        rows.extend(ids.iter().map(|id| vec![json!(id), json!(format!("school {id}"))]));
        build_profile(RawTable::split(rows, 1))
    }

    fn performance(ids: &[&str]) -> Dataset {
        let header = vec![
            vec![json!("Info"), json!("Results")],
            vec![json!("School Id"), json!("Score")],
            vec![json!(""), json!(2023)],
        ];
        let data = ids
            .iter()
            .map(|id| vec![json!(id), json!(format!("score {id}"))])
            .collect();
        build_performance(RawTable::new(header, data))
    }

    fn ids(result: &JoinResult) -> Vec<String> {
        result
            .records
            .iter()
            .map(|r| r[SCHOOL_ID].as_str().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn inner_join_keeps_shared_keys() {
        let result = join_datasets(
            &profile(&["1", "2", "3"]),
            &performance(&["2", "3", "4"]),
            JoinKind::Inner,
        );
        assert_eq!(result.count, 2);
        assert_eq!(ids(&result), vec!["2", "3"]);
        assert_eq!(result.records[0]["Results | Score | 2023"], json!("score 2"));
        assert_eq!(result.records[0]["Name"], json!("school 2"));
    }

    #[test]
    fn outer_join_keeps_every_key() {
        let result = join_datasets(
            &profile(&["1", "2", "3"]),
            &performance(&["2", "3", "4"]),
            JoinKind::Outer,
        );
        assert_eq!(result.count, 4);
        assert_eq!(ids(&result), vec!["1", "2", "3", "4"]);

        let only_left = &result.records[0];
        assert!(only_left.contains_key("Name"));
        assert!(!only_left.contains_key("Results | Score | 2023"));

        let only_right = &result.records[3];
        assert!(!only_right.contains_key("Name"));
        assert_eq!(only_right["Info | School Id"], json!("4"));
        assert_eq!(only_right[SCHOOL_ID], json!("4"));
    }

    #[test]
    fn right_side_wins_on_collision() {
        let left = build_profile(RawTable::split(
            vec![
                vec![json!("School ID"), json!("Name")],
                vec![json!("1"), json!("A")],
            ],
            1,
        ));
        let right = build_profile(RawTable::split(
            vec![
                vec![json!("School ID"), json!("Name")],
                vec![json!("1"), json!("B")],
            ],
            1,
        ));
        let result = join_datasets(&left, &right, JoinKind::Inner);
        assert_eq!(result.records[0]["Name"], json!("B"));
        assert_eq!(result.records[0][SCHOOL_ID], json!("1"));
    }

    #[test]
    fn school_id_falls_back_to_key_field_value() {
        let left = build_profile(RawTable::split(
            vec![vec![json!("schoolid"), json!("Name")], vec![json!(5), json!("E")]],
            1,
        ));
        let result = join_datasets(&left, &Dataset::default(), JoinKind::Outer);
        assert_eq!(result.count, 1);
        // numeric cell keeps its type when copied from the key column
        assert_eq!(result.records[0][SCHOOL_ID], json!(5));
    }

    #[test]
    fn school_id_falls_back_to_join_key() {
        let mut left = KeyedIndex::default();
        let right = KeyedIndex::default();
        assert_eq!(join(&left, &right, JoinKind::Outer).count, 0);

        // blank "School ID" column is replaced with the key string
        let ds = build_profile(RawTable::split(
            vec![
                vec![json!("School ID"), json!("Name")],
                vec![json!("8"), json!("H")],
            ],
            1,
        ));
        left = KeyedIndex::build(&ds);
        let mut record = left.get("8").cloned().unwrap();
        record.insert(SCHOOL_ID.to_string(), json!(""));
        let merged = merge("8", &record, None, &Record::new(), None);
        assert_eq!(merged[SCHOOL_ID], json!("8"));
    }

    #[test]
    fn empty_sides_degrade_gracefully() {
        let no_key = build_profile(RawTable::split(
            vec![vec![json!("id")], vec![json!("1")]],
            1,
        ));
        let inner = join_datasets(&no_key, &performance(&["1"]), JoinKind::Inner);
        assert_eq!(inner.count, 0);
        let outer = join_datasets(&no_key, &performance(&["1"]), JoinKind::Outer);
        assert_eq!(outer.count, 1);
        assert_eq!(outer.records[0][SCHOOL_ID], json!("1"));
    }

    #[test]
    fn only_matched_selects_join_kind() {
        assert_eq!(JoinKind::from_only_matched(true), JoinKind::Inner);
        assert_eq!(JoinKind::from_only_matched(false), JoinKind::Outer);
    }
}
