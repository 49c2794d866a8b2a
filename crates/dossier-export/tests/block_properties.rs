use dossier_export::{normalize_row, parse_export_block, EXPORT_END_MARKER, EXPORT_START_MARKER};
use proptest::prelude::*;

fn line_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[A-Za-z ]{0,12}",
        "\\[[A-Za-z ]{1,8}\\]",
        "[a-z0-9 ]{0,6}(\\|[a-z0-9 ]{0,6}){1,4}",
        Just(String::new()),
    ]
}

fn lines_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(line_strategy(), 0..24)
}

proptest! {
    #[test]
    fn text_without_start_marker_parses_to_nothing(lines in lines_strategy()) {
        let text = lines.join("\n");
        prop_assume!(!text.lines().any(|l| l.trim() == EXPORT_START_MARKER));
        prop_assert!(parse_export_block(&text).is_empty());
    }

    #[test]
    fn end_marker_before_start_parses_to_nothing(
        before in lines_strategy(),
        after in lines_strategy(),
    ) {
        let mut lines = before;
        lines.push(format!("  {EXPORT_END_MARKER}  "));
        lines.push(EXPORT_START_MARKER.to_string());
        lines.extend(after);
        let text = lines.join("\n");
        prop_assume!(!text
            .lines()
            .take_while(|l| l.trim() != EXPORT_END_MARKER)
            .any(|l| l.trim() == EXPORT_START_MARKER));
        prop_assert!(parse_export_block(&text).is_empty());
    }

    #[test]
    fn every_parsed_row_came_from_a_separator_line(lines in lines_strategy()) {
        let mut text = String::from("[EXCEL_EXPORT]\n");
        text.push_str(&lines.join("\n"));
        let sections = parse_export_block(&text);
        for (_, rows) in sections.iter() {
            for row in rows {
                prop_assert!(row.len() >= 2);
                prop_assert!(row.iter().all(|f| f.trim() == f));
            }
        }
    }

    #[test]
    fn normalized_rows_have_exact_width_and_keep_prefix(
        row in prop::collection::vec("[a-z]{0,4}", 0..10),
        width in 0usize..10,
    ) {
        let out = normalize_row(&row, width);
        prop_assert_eq!(out.len(), width);
        let kept = row.len().min(width);
        prop_assert_eq!(&out[..kept], &row[..kept]);
        prop_assert!(out[kept..].iter().all(String::is_empty));
    }
}

#[test]
fn reopening_a_section_discards_earlier_rows() {
    let text = "[EXCEL_EXPORT]\n[A]\nfirst|row\n[A]\nsecond|row\n[/EXCEL_EXPORT]";
    let sections = parse_export_block(text);
    assert_eq!(sections.len(), 1);
    assert_eq!(
        sections.get("A").unwrap(),
        &[vec!["second".to_string(), "row".to_string()]][..]
    );
}
