//! Parser for the `[EXCEL_EXPORT]` text block.
//!
//! The block is produced by a cooperating upstream generator that may emit stray lines, so the
//! parser never fails: anything it does not recognize is dropped.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use dossier_model::Row;
use regex::Regex;
use serde::Serialize;

/// Line that opens the export block.
pub const EXPORT_START_MARKER: &str = "[EXCEL_EXPORT]";
/// Line that ends parsing; nothing after it is read.
pub const EXPORT_END_MARKER: &str = "[/EXCEL_EXPORT]";
/// Separator between the fields of a data line.
pub const FIELD_SEPARATOR: char = '|';

/// Sections parsed from an export block, keyed by section name.
///
/// Rows keep the order in which they appeared in the block.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ExportSections {
    sections: BTreeMap<String, Vec<Row>>,
}

impl ExportSections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows of `name`, or `None` when the block has no such section.
    pub fn get(&self, name: &str) -> Option<&[Row]> {
        self.sections.get(name).map(Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sections.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Section names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.sections.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Row])> + '_ {
        self.sections
            .iter()
            .map(|(name, rows)| (name.as_str(), rows.as_slice()))
    }

    /// Open `name` with no rows. An existing section of the same name is discarded.
    pub fn open_section(&mut self, name: impl Into<String>) {
        self.sections.insert(name.into(), Vec::new());
    }

    /// Append `row` to `name`, opening the section if needed.
    pub fn push_row(&mut self, name: &str, row: Row) {
        self.sections.entry(name.to_string()).or_default().push(row);
    }
}

impl<N, R> FromIterator<(N, R)> for ExportSections
where
    N: Into<String>,
    R: IntoIterator<Item = Row>,
{
    fn from_iter<I: IntoIterator<Item = (N, R)>>(iter: I) -> Self {
        Self {
            sections: iter
                .into_iter()
                .map(|(name, rows)| (name.into(), rows.into_iter().collect()))
                .collect(),
        }
    }
}

/// Classification of a single trimmed line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BlockLine<'a> {
    Start,
    End,
    Header(&'a str),
    Data(&'a str),
    Other,
}

fn section_header_re() -> &'static Regex {
    static HEADER_RE: OnceLock<Regex> = OnceLock::new();
    HEADER_RE.get_or_init(|| Regex::new(r"^\[(.+?)\]").expect("section header regex is valid"))
}

fn classify_line(line: &str) -> BlockLine<'_> {
    if line == EXPORT_START_MARKER {
        return BlockLine::Start;
    }
    if line == EXPORT_END_MARKER {
        return BlockLine::End;
    }
    if let Some(name) = section_header_re()
        .captures(line)
        .and_then(|caps| caps.get(1))
    {
        return BlockLine::Header(name.as_str());
    }
    if line.contains(FIELD_SEPARATOR) {
        return BlockLine::Data(line);
    }
    BlockLine::Other
}

fn is_line_break(c: char) -> bool {
    matches!(
        c,
        '\n' | '\r' | '\x0b' | '\x0c' | '\x1c'..='\x1e' | '\u{85}' | '\u{2028}' | '\u{2029}'
    )
}

/// Lines of `text`, broken at every Unicode line boundary; `\r\n` counts as one break.
fn block_lines(text: &str) -> impl Iterator<Item = &str> + '_ {
    let mut rest = text;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        match rest.find(is_line_break) {
            Some(idx) => {
                let line = &rest[..idx];
                let tail = &rest[idx..];
                let width = if tail.starts_with("\r\n") {
                    2
                } else {
                    tail.chars().next().map_or(1, char::len_utf8)
                };
                rest = &tail[width..];
                Some(line)
            }
            None => Some(std::mem::take(&mut rest)),
        }
    })
}

/// Split a data line into trimmed fields.
pub fn split_fields(line: &str) -> Row {
    line.split(FIELD_SEPARATOR)
        .map(|field| field.trim().to_string())
        .collect()
}

/// Parse the sections of the first export block found in `text`.
///
/// - lines are trimmed before evaluation
/// - everything before [`EXPORT_START_MARKER`] is skipped
/// - [`EXPORT_END_MARKER`] stops parsing, even if no block was opened
/// - `[Name]` opens section `Name`; re-opening a name discards its earlier rows
/// - lines containing [`FIELD_SEPARATOR`] become rows of the current section
/// - anything else (including data before the first header) is dropped
pub fn parse_export_block(text: &str) -> ExportSections {
    let mut sections = ExportSections::new();
    let mut in_block = false;
    let mut current: Option<&str> = None;

    for (idx, raw) in block_lines(text).enumerate() {
        let line = raw.trim();
        match classify_line(line) {
            BlockLine::Start => in_block = true,
            BlockLine::End => break,
            _ if !in_block => {}
            BlockLine::Header(name) => {
                sections.open_section(name);
                current = Some(name);
            }
            BlockLine::Data(data) => match current {
                Some(name) => sections.push_row(name, split_fields(data)),
                None => log::trace!("line {}: data before any section header, dropped", idx + 1),
            },
            BlockLine::Other => {
                if !line.is_empty() {
                    log::trace!("line {}: not a header or data line, dropped", idx + 1);
                }
            }
        }
    }

    log::debug!(
        "parsed export block: {} section(s) [{}]",
        sections.len(),
        sections.names().collect::<Vec<_>>().join(", ")
    );
    sections
}
