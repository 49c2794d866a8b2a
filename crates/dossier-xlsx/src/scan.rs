//! Read-only pass over a worksheet part.

use std::collections::{HashMap, HashSet};

use dossier_model::CellRef;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::openxml::local_name;
use crate::shared_strings::read_string_item;
use crate::XlsxError;

/// What the merge needs to know about an existing worksheet.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct SheetScan {
    /// Display text of every cell that has a readable value.
    pub values: HashMap<CellRef, String>,
    /// Cells carrying a `<f>` element.
    pub formulas: HashSet<CellRef>,
    /// 1 + highest column index of a valued cell.
    pub column_count: u32,
    /// Highest 1-based row number of a valued cell.
    pub row_count: u32,
}

impl SheetScan {
    fn record_used(&mut self, cell: CellRef) {
        self.column_count = self.column_count.max(cell.col + 1);
        self.row_count = self.row_count.max(cell.row + 1);
    }
}

#[derive(Default)]
struct OpenCell {
    cell: Option<CellRef>,
    t: Option<String>,
    v: Option<String>,
    inline: Option<String>,
    has_formula: bool,
}

pub(crate) fn scan_worksheet(
    part: &str,
    xml: &[u8],
    shared_strings: &[String],
) -> Result<SheetScan, XlsxError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);

    let mut buf = Vec::new();
    let mut scan = SheetScan::default();
    let mut saw_sheet_data = false;
    let mut in_sheet_data = false;
    let mut cursor = RowCursor::default();
    let mut open: Option<OpenCell> = None;
    let mut in_v = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(e) if local_name(e.name().as_ref()) == b"sheetData" => {
                saw_sheet_data = true;
                in_sheet_data = true;
            }
            Event::Empty(e) if local_name(e.name().as_ref()) == b"sheetData" => {
                saw_sheet_data = true;
            }
            Event::End(e) if local_name(e.name().as_ref()) == b"sheetData" => {
                in_sheet_data = false;
            }
            Event::Start(e) | Event::Empty(e)
                if in_sheet_data && local_name(e.name().as_ref()) == b"row" =>
            {
                cursor.enter_row(&e)?;
            }
            Event::Start(e) if in_sheet_data && local_name(e.name().as_ref()) == b"c" => {
                let (cell, t) = cursor.enter_cell(part, &e)?;
                open = Some(OpenCell {
                    cell,
                    t,
                    ..OpenCell::default()
                });
            }
            Event::Empty(e) if in_sheet_data && local_name(e.name().as_ref()) == b"c" => {
                cursor.enter_cell(part, &e)?;
            }
            Event::End(e) if local_name(e.name().as_ref()) == b"c" => {
                if let Some(cell) = open.take() {
                    finish_cell(&mut scan, cell, shared_strings);
                }
                in_v = false;
            }
            Event::Start(e) | Event::Empty(e)
                if open.is_some() && local_name(e.name().as_ref()) == b"f" =>
            {
                if let Some(cell) = open.as_mut() {
                    cell.has_formula = true;
                }
            }
            Event::Start(e) if open.is_some() && local_name(e.name().as_ref()) == b"v" => {
                in_v = true;
                if let Some(cell) = open.as_mut() {
                    cell.v.get_or_insert_with(String::new);
                }
            }
            Event::End(e) if local_name(e.name().as_ref()) == b"v" => in_v = false,
            Event::Start(e) if open.is_some() && local_name(e.name().as_ref()) == b"is" => {
                let text = read_string_item(&mut reader)?;
                if let Some(cell) = open.as_mut() {
                    cell.inline = Some(text);
                }
            }
            Event::Text(text) if in_v => {
                let text = text.unescape()?;
                if let Some(v) = open.as_mut().and_then(|c| c.v.as_mut()) {
                    v.push_str(&text);
                }
            }
            _ => {}
        }
        buf.clear();
    }

    if !saw_sheet_data {
        return Err(XlsxError::MissingSheetData(part.to_string()));
    }
    Ok(scan)
}

fn finish_cell(scan: &mut SheetScan, open: OpenCell, shared_strings: &[String]) {
    let Some(cell) = open.cell else {
        return;
    };
    if open.has_formula {
        scan.formulas.insert(cell);
    }
    if !open.has_formula && open.v.is_none() && open.inline.is_none() {
        return;
    }
    scan.record_used(cell);

    let value = match (open.t.as_deref(), open.v, open.inline) {
        (Some("s"), Some(v), _) => match v.trim().parse::<usize>() {
            Ok(idx) if idx < shared_strings.len() => Some(shared_strings[idx].clone()),
            _ => {
                log::warn!("cell {cell} references missing shared string `{v}`");
                None
            }
        },
        (Some("inlineStr"), _, Some(text)) => Some(text),
        (Some("b"), Some(v), _) => {
            let text = if v.trim() == "1" { "TRUE" } else { "FALSE" };
            Some(text.to_string())
        }
        (_, Some(v), _) => Some(v),
        (_, None, Some(text)) => Some(text),
        (_, None, None) => None,
    };
    if let Some(value) = value {
        scan.values.insert(cell, value);
    }
}

/// Tracks the current row and column so cells that omit `r` still get an address.
#[derive(Default)]
pub(crate) struct RowCursor {
    row_1: u32,
    next_col: u32,
}

impl RowCursor {
    pub(crate) fn enter_row(&mut self, e: &BytesStart<'_>) -> Result<u32, XlsxError> {
        self.row_1 = match attr_value(e, b"r")?.and_then(|r| r.trim().parse::<u32>().ok()) {
            Some(row_1) if row_1 > 0 => row_1,
            _ => self.row_1 + 1,
        };
        self.next_col = 0;
        Ok(self.row_1)
    }

    /// Address of a `<c>` element plus its `t` attribute.
    ///
    /// Returns `None` for the address when `r` is present but unusable; such cells are left out
    /// of the scan.
    pub(crate) fn enter_cell(
        &mut self,
        part: &str,
        e: &BytesStart<'_>,
    ) -> Result<(Option<CellRef>, Option<String>), XlsxError> {
        let mut r = None;
        let mut t = None;
        for attr in e.attributes() {
            let attr = attr?;
            match attr.key.as_ref() {
                b"r" => r = Some(attr.unescape_value()?.into_owned()),
                b"t" => t = Some(attr.unescape_value()?.into_owned()),
                _ => {}
            }
        }

        let cell = match r {
            None if self.row_1 > 0 => Some(CellRef::new(self.row_1 - 1, self.next_col)),
            None => None,
            Some(a1) => match CellRef::from_a1(&a1) {
                Ok(cell) => Some(cell),
                Err(err) => {
                    log::warn!("{part}: skipping cell with unreadable reference `{a1}`: {err}");
                    None
                }
            },
        };
        if let Some(cell) = cell {
            self.next_col = cell.col + 1;
        }
        Ok((cell, t))
    }
}

pub(crate) fn attr_value(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, XlsxError> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == key {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}
