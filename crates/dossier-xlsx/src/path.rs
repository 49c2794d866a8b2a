//! OPC part-name helpers.

/// `xl/workbook.xml` -> `xl/_rels/workbook.xml.rels`.
pub fn rels_for_part(part: &str) -> String {
    let (dir, file) = split_dir(part);
    if dir.is_empty() {
        format!("_rels/{file}.rels")
    } else {
        format!("{dir}/_rels/{file}.rels")
    }
}

/// Part name that a relationship `target` in the rels of `source_part` points at.
///
/// The fragment is dropped, a leading `/` roots the target at the package and backslash
/// separators are read as `/`. An empty target refers to the source part itself.
pub fn resolve_target(source_part: &str, target: &str) -> String {
    let target = match target.find('#') {
        Some(hash) => &target[..hash],
        None => target,
    };
    let target = target.replace('\\', "/");

    let mut segments: Vec<&str> = Vec::new();
    let relative = if target.is_empty() {
        source_part
    } else if let Some(rooted) = target.strip_prefix('/') {
        rooted
    } else {
        let (dir, _) = split_dir(source_part);
        push_segments(&mut segments, dir);
        target.as_str()
    };
    push_segments(&mut segments, relative);
    segments.join("/")
}

fn split_dir(part: &str) -> (&str, &str) {
    part.rsplit_once('/').unwrap_or(("", part))
}

/// Append the segments of `path` to `stack`, applying `.` and `..`.
fn push_segments<'a>(stack: &mut Vec<&'a str>, path: &'a str) {
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            name => stack.push(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rels_for_root_and_nested_parts() {
        assert_eq!(rels_for_part("workbook.xml"), "_rels/workbook.xml.rels");
        assert_eq!(rels_for_part("xl/workbook.xml"), "xl/_rels/workbook.xml.rels");
    }

    #[test]
    fn relative_targets_resolve_against_source_dir() {
        assert_eq!(
            resolve_target("xl/workbook.xml", "worksheets/sheet1.xml"),
            "xl/worksheets/sheet1.xml"
        );
        assert_eq!(
            resolve_target("xl/worksheets/sheet1.xml", "./../worksheets/./sheet2.xml"),
            "xl/worksheets/sheet2.xml"
        );
    }

    #[test]
    fn absolute_targets_are_rooted_at_package() {
        assert_eq!(
            resolve_target("xl/workbook.xml", "/xl/worksheets/sheet3.xml"),
            "xl/worksheets/sheet3.xml"
        );
    }

    #[test]
    fn fragments_are_stripped() {
        assert_eq!(
            resolve_target("xl/workbook.xml", "worksheets/sheet1.xml#rId1"),
            "xl/worksheets/sheet1.xml"
        );
        assert_eq!(resolve_target("xl/workbook.xml", "#rId1"), "xl/workbook.xml");
    }

    #[test]
    fn backslash_targets_are_accepted() {
        assert_eq!(
            resolve_target("xl/workbook.xml", "worksheets\\sheet4.xml"),
            "xl/worksheets/sheet4.xml"
        );
    }
}
