use serde_json::Value;

use super::Record;

/// Zip each data row against the flat header.
pub fn materialize(headers: &[String], rows: &[Vec<Value>]) -> Vec<Record> {
    rows.iter().map(|row| materialize_row(headers, row)).collect()
}

/// Missing trailing cells become `""`; cells past the header width are dropped.
pub fn materialize_row(headers: &[String], row: &[Value]) -> Record {
    let mut record = Record::with_capacity(headers.len());
    for (i, label) in headers.iter().enumerate() {
        let value = row
            .get(i)
            .cloned()
            .unwrap_or_else(|| Value::String(String::new()));
        // a repeated label keeps its first position but takes the later value
        record.insert(label.clone(), value);
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn headers(labels: &[&str]) -> Vec<String> {
        labels.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn short_row_is_padded() {
        let rec = materialize_row(&headers(&["h0", "h1", "h2"]), &[json!("x")]);
        assert_eq!(rec["h0"], json!("x"));
        assert_eq!(rec["h1"], json!(""));
        assert_eq!(rec["h2"], json!(""));
        assert_eq!(rec.keys().collect::<Vec<_>>(), vec!["h0", "h1", "h2"]);
    }

    #[test]
    fn long_row_is_truncated() {
        let rec = materialize_row(&headers(&["a"]), &[json!(1), json!(2), json!(3)]);
        assert_eq!(rec.len(), 1);
        assert_eq!(rec["a"], json!(1));
    }

    #[test]
    fn later_duplicate_label_wins() {
        let rec = materialize_row(&headers(&["Name", "Name"]), &[json!("A"), json!("B")]);
        assert_eq!(rec.len(), 1);
        assert_eq!(rec["Name"], json!("B"));
    }

    #[test]
    fn one_record_per_row() {
        let recs = materialize(&headers(&["a"]), &[vec![json!(1)], vec![], vec![json!(3)]]);
        assert_eq!(recs.len(), 3);
        assert_eq!(recs[1]["a"], json!(""));
    }
}
