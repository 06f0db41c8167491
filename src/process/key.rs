/// True when a header label names the school identifier column.
pub fn is_key_label(label: &str) -> bool {
    let l = label.trim().to_lowercase();
    l == "school id" || l == "schoolid" || (l.contains("school") && l.contains("id"))
}

/// Index of the leftmost join-key column, if any.
pub fn locate_key_column(headers: &[String]) -> Option<usize> {
    headers.iter().position(|h| is_key_label(h))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(labels: &[&str]) -> Vec<String> {
        labels.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn finds_exact_label() {
        assert_eq!(
            locate_key_column(&headers(&["Name", "School ID", "Region"])),
            Some(1)
        );
        assert_eq!(locate_key_column(&headers(&["schoolid", "name"])), Some(0));
    }

    #[test]
    fn id_without_school_is_not_a_key() {
        assert_eq!(locate_key_column(&headers(&["id", "name"])), None);
    }

    #[test]
    fn substring_match_in_any_order() {
        assert!(is_key_label("  Info | School ID | "));
        assert!(is_key_label("ID of school"));
        assert!(!is_key_label("District"));
    }

    #[test]
    fn leftmost_match_wins() {
        assert_eq!(
            locate_key_column(&headers(&["Region", "School_Id", "School ID"])),
            Some(1)
        );
    }
}
