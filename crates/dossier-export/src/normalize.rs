use dossier_model::Row;

/// Fit `row` to exactly `width` fields: pad the tail with empty strings, or drop extra fields.
pub fn normalize_row(row: &[String], width: usize) -> Row {
    let mut out: Row = row.iter().take(width).cloned().collect();
    out.resize(width, String::new());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(fields: &[&str]) -> Row {
        fields.iter().map(|f| f.to_string()).collect()
    }

    #[test]
    fn pads_short_rows() {
        assert_eq!(normalize_row(&row(&["a"]), 3), row(&["a", "", ""]));
    }

    #[test]
    fn truncates_long_rows() {
        assert_eq!(normalize_row(&row(&["a", "b", "c", "d"]), 2), row(&["a", "b"]));
    }

    #[test]
    fn keeps_exact_rows_and_handles_zero_width() {
        assert_eq!(normalize_row(&row(&["a", "b"]), 2), row(&["a", "b"]));
        assert!(normalize_row(&row(&["a", "b"]), 0).is_empty());
    }
}
