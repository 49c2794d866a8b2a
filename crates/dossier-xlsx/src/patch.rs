//! Streaming rewrite of a worksheet part with a set of cell writes.
//!
//! Everything that is not a written cell is passed through event by event, so row and cell
//! attributes, merged ranges, conditional formats, data validations and extensions survive.

use std::collections::BTreeMap;
use std::io::{BufRead, Write};

use dossier_model::CellRef;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::openxml::{element_prefix, local_name, prefixed_tag};
use crate::scan::{attr_value, RowCursor};
use crate::XlsxError;

/// Result of [`patch_worksheet_xml`].
#[derive(Debug)]
pub(crate) struct PatchedWorksheet {
    pub xml: Vec<u8>,
    /// True when a written cell previously held a formula.
    pub removed_formula: bool,
}

#[derive(Clone, Debug)]
struct CellWrite {
    col_0: u32,
    value: String,
}

struct RowState {
    row_0: u32,
    pending: Vec<CellWrite>,
    next_idx: usize,
    cell_prefix: Option<String>,
}

/// Apply `writes` to the worksheet XML of `part`.
///
/// Written cells become inline strings (or value-less cells for empty strings). Existing cells
/// keep every attribute except `t`; rows and cells that do not exist yet are inserted in order.
pub(crate) fn patch_worksheet_xml(
    part: &str,
    xml: &[u8],
    writes: &BTreeMap<CellRef, String>,
) -> Result<PatchedWorksheet, XlsxError> {
    let bounds = bounds_for_writes(writes);
    let mut writes_by_row: BTreeMap<u32, Vec<CellWrite>> = BTreeMap::new();
    for (cell, value) in writes {
        writes_by_row
            .entry(cell.row + 1)
            .or_default()
            .push(CellWrite {
                col_0: cell.col,
                value: value.clone(),
            });
    }

    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(xml.len() + 256 * writes.len()));

    let mut buf = Vec::new();
    let mut saw_sheet_data = false;
    let mut in_sheet_data = false;
    let mut patched_dimension = false;
    let mut sheet_prefix: Option<String> = None;
    let mut cursor = RowCursor::default();
    let mut row_state: Option<RowState> = None;
    let mut in_cell = false;
    let mut removed_formula = false;

    loop {
        let event = reader.read_event_into(&mut buf)?;
        match event {
            Event::Eof => break,

            Event::Start(ref e) if local_name(e.name().as_ref()) == b"sheetData" => {
                saw_sheet_data = true;
                in_sheet_data = true;
                sheet_prefix = owned_prefix(e);
                writer.write_event(Event::Start(e.to_owned()))?;
            }
            Event::Empty(ref e) if local_name(e.name().as_ref()) == b"sheetData" => {
                saw_sheet_data = true;
                if writes_by_row.is_empty() {
                    writer.write_event(Event::Empty(e.to_owned()))?;
                } else {
                    sheet_prefix = owned_prefix(e);
                    let tag = tag_name(e);
                    writer.write_event(Event::Start(e.to_owned()))?;
                    write_rows_before(
                        &mut writer,
                        &mut writes_by_row,
                        u32::MAX,
                        sheet_prefix.as_deref(),
                    )?;
                    writer.write_event(Event::End(BytesEnd::new(tag.as_str())))?;
                }
            }
            Event::End(ref e) if local_name(e.name().as_ref()) == b"sheetData" => {
                write_rows_before(
                    &mut writer,
                    &mut writes_by_row,
                    u32::MAX,
                    sheet_prefix.as_deref(),
                )?;
                in_sheet_data = false;
                writer.write_event(Event::End(e.to_owned()))?;
            }

            Event::Start(ref e) if local_name(e.name().as_ref()) == b"dimension" => {
                let updated = dimension_event(e, bounds, &mut patched_dimension)?;
                writer.write_event(Event::Start(updated))?;
            }
            Event::Empty(ref e) if local_name(e.name().as_ref()) == b"dimension" => {
                let updated = dimension_event(e, bounds, &mut patched_dimension)?;
                writer.write_event(Event::Empty(updated))?;
            }

            Event::Start(ref e) if in_sheet_data && local_name(e.name().as_ref()) == b"row" => {
                let row_1 = cursor.enter_row(e)?;
                in_cell = false;
                write_rows_before(
                    &mut writer,
                    &mut writes_by_row,
                    row_1,
                    sheet_prefix.as_deref(),
                )?;

                match writes_by_row.remove(&row_1) {
                    Some(pending) => {
                        writer.write_event(Event::Start(row_with_spans(e, &pending)?))?;
                        row_state = Some(RowState {
                            row_0: row_1 - 1,
                            pending,
                            next_idx: 0,
                            cell_prefix: None,
                        });
                    }
                    None => writer.write_event(Event::Start(e.to_owned()))?,
                }
            }
            Event::Empty(ref e) if in_sheet_data && local_name(e.name().as_ref()) == b"row" => {
                let row_1 = cursor.enter_row(e)?;
                in_cell = false;
                write_rows_before(
                    &mut writer,
                    &mut writes_by_row,
                    row_1,
                    sheet_prefix.as_deref(),
                )?;

                match writes_by_row.remove(&row_1) {
                    Some(pending) => {
                        // Expand `<row/>` so the written cells have somewhere to go.
                        let tag = tag_name(e);
                        let prefix = owned_prefix(e).or_else(|| sheet_prefix.clone());
                        writer.write_event(Event::Start(row_with_spans(e, &pending)?))?;
                        write_cells(&mut writer, row_1 - 1, &pending, prefix.as_deref())?;
                        writer.write_event(Event::End(BytesEnd::new(tag.as_str())))?;
                    }
                    None => writer.write_event(Event::Empty(e.to_owned()))?,
                }
            }
            Event::End(ref e) if in_sheet_data && local_name(e.name().as_ref()) == b"row" => {
                if let Some(state) = row_state.take() {
                    let prefix = state.cell_prefix.as_deref().or(sheet_prefix.as_deref());
                    let remaining = &state.pending[state.next_idx..];
                    write_cells(&mut writer, state.row_0, remaining, prefix)?;
                }
                in_cell = false;
                writer.write_event(Event::End(e.to_owned()))?;
            }

            Event::Start(ref e) if in_sheet_data && local_name(e.name().as_ref()) == b"c" => {
                match row_state.as_mut() {
                    Some(state) => {
                        let (cell, _) = cursor.enter_cell(part, e)?;
                        let cell_prefix = owned_prefix(e);
                        if state.cell_prefix.is_none() {
                            state.cell_prefix = cell_prefix.clone();
                        }
                        let prefix = cell_prefix.as_deref().or(sheet_prefix.as_deref());
                        let write = match cell {
                            Some(cell) => take_write_for_col(&mut writer, state, cell, prefix)?,
                            None => None,
                        };
                        match write {
                            Some((cell, write)) => {
                                removed_formula |= patch_existing_cell(
                                    &mut reader,
                                    &mut writer,
                                    e,
                                    cell,
                                    &write.value,
                                )?;
                            }
                            None => {
                                writer.write_event(Event::Start(e.to_owned()))?;
                                in_cell = true;
                            }
                        }
                    }
                    None => writer.write_event(Event::Start(e.to_owned()))?,
                }
            }
            Event::Empty(ref e) if in_sheet_data && local_name(e.name().as_ref()) == b"c" => {
                match row_state.as_mut() {
                    Some(state) => {
                        let (cell, _) = cursor.enter_cell(part, e)?;
                        let cell_prefix = owned_prefix(e);
                        if state.cell_prefix.is_none() {
                            state.cell_prefix = cell_prefix.clone();
                        }
                        let prefix = cell_prefix.as_deref().or(sheet_prefix.as_deref());
                        let write = match cell {
                            Some(cell) => take_write_for_col(&mut writer, state, cell, prefix)?,
                            None => None,
                        };
                        match write {
                            Some((cell, write)) => {
                                write_cell(&mut writer, Some(e), cell, &write.value, prefix)?;
                            }
                            None => writer.write_event(Event::Empty(e.to_owned()))?,
                        }
                    }
                    None => writer.write_event(Event::Empty(e.to_owned()))?,
                }
            }
            Event::End(ref e) if in_cell && local_name(e.name().as_ref()) == b"c" => {
                in_cell = false;
                writer.write_event(Event::End(e.to_owned()))?;
            }

            // Cells go before any non-cell child of the row (e.g. `extLst`).
            Event::Start(ref e) if row_state.is_some() && !in_cell => {
                flush_row_state(&mut writer, row_state.as_mut(), sheet_prefix.as_deref())?;
                writer.write_event(Event::Start(e.to_owned()))?;
            }
            Event::Empty(ref e) if row_state.is_some() && !in_cell => {
                flush_row_state(&mut writer, row_state.as_mut(), sheet_prefix.as_deref())?;
                writer.write_event(Event::Empty(e.to_owned()))?;
            }

            ev => writer.write_event(ev.into_owned())?,
        }
        buf.clear();
    }

    if !saw_sheet_data {
        return Err(XlsxError::MissingSheetData(part.to_string()));
    }

    Ok(PatchedWorksheet {
        xml: writer.into_inner(),
        removed_formula,
    })
}

/// Write pending cells left of `cell`, then take the write aimed at `cell` itself, if any.
fn take_write_for_col<W: Write>(
    writer: &mut Writer<W>,
    state: &mut RowState,
    cell: CellRef,
    prefix: Option<&str>,
) -> Result<Option<(CellRef, CellWrite)>, XlsxError> {
    while let Some(write) = state.pending.get(state.next_idx) {
        if write.col_0 >= cell.col {
            break;
        }
        write_cell(writer, None, CellRef::new(state.row_0, write.col_0), &write.value, prefix)?;
        state.next_idx += 1;
    }
    match state.pending.get(state.next_idx) {
        Some(write) if write.col_0 == cell.col => {
            state.next_idx += 1;
            Ok(Some((cell, write.clone())))
        }
        _ => Ok(None),
    }
}

fn flush_row_state<W: Write>(
    writer: &mut Writer<W>,
    state: Option<&mut RowState>,
    sheet_prefix: Option<&str>,
) -> Result<(), XlsxError> {
    let Some(state) = state else {
        return Ok(());
    };
    let prefix = state.cell_prefix.as_deref().or(sheet_prefix);
    write_cells(writer, state.row_0, &state.pending[state.next_idx..], prefix)?;
    state.next_idx = state.pending.len();
    Ok(())
}

/// Rewrite an existing `<c>` that has children. Returns true when a `<f>` was dropped.
fn patch_existing_cell<R: BufRead, W: Write>(
    reader: &mut Reader<R>,
    writer: &mut Writer<W>,
    cell_start: &BytesStart<'_>,
    cell: CellRef,
    value: &str,
) -> Result<bool, XlsxError> {
    let mut removed_formula = false;
    let mut kept: Vec<Event<'static>> = Vec::new();
    let mut inner_buf = Vec::new();
    let mut depth = 0usize;
    let mut skip_depth: Option<usize> = None;

    loop {
        let ev = reader.read_event_into(&mut inner_buf)?;
        let value_child = match &ev {
            Event::Start(e) | Event::Empty(e) if depth == 0 => value_child_kind(e.name().as_ref()),
            _ => None,
        };
        match ev {
            Event::Eof => break,
            Event::End(_) if depth == 0 => break,
            Event::Start(_) => {
                depth += 1;
                if let Some(is_formula) = value_child {
                    removed_formula |= is_formula;
                    skip_depth = Some(depth);
                } else if skip_depth.is_none() {
                    kept.push(ev.into_owned());
                }
            }
            Event::Empty(_) => {
                if let Some(is_formula) = value_child {
                    removed_formula |= is_formula;
                } else if skip_depth.is_none() {
                    kept.push(ev.into_owned());
                }
            }
            Event::End(_) => {
                if skip_depth == Some(depth) {
                    skip_depth = None;
                } else if skip_depth.is_none() {
                    kept.push(ev.into_owned());
                }
                depth -= 1;
            }
            _ if depth > 0 && skip_depth.is_none() => kept.push(ev.into_owned()),
            _ => {}
        }
        inner_buf.clear();
    }

    let tag = tag_name(cell_start);
    let prefix = tag.rsplit_once(':').map(|(p, _)| p);
    let c = cell_element(Some(cell_start), &tag, cell, value)?;
    if value.is_empty() && kept.is_empty() {
        writer.write_event(Event::Empty(c))?;
        return Ok(removed_formula);
    }

    writer.write_event(Event::Start(c))?;
    if !value.is_empty() {
        write_inline_string(writer, prefix, value)?;
    }
    for ev in kept {
        writer.write_event(ev)?;
    }
    writer.write_event(Event::End(BytesEnd::new(tag.as_str())))?;
    Ok(removed_formula)
}

/// `Some(true)` for `<f>`, `Some(false)` for `<v>`/`<is>`, `None` for anything else.
fn value_child_kind(name: &[u8]) -> Option<bool> {
    match local_name(name) {
        b"f" => Some(true),
        b"v" | b"is" => Some(false),
        _ => None,
    }
}

fn cell_element(
    original: Option<&BytesStart<'_>>,
    tag: &str,
    cell: CellRef,
    value: &str,
) -> Result<BytesStart<'static>, XlsxError> {
    let mut c = BytesStart::new(tag.to_string());
    let mut has_r = false;
    if let Some(original) = original {
        for attr in original.attributes() {
            let attr = attr?;
            match attr.key.as_ref() {
                b"t" => continue,
                b"r" => has_r = true,
                _ => {}
            }
            c.push_attribute((attr.key.as_ref(), attr.value.as_ref()));
        }
    }
    if !has_r {
        let a1 = cell.to_a1();
        c.push_attribute(("r", a1.as_str()));
    }
    if !value.is_empty() {
        c.push_attribute(("t", "inlineStr"));
    }
    Ok(c)
}

/// Write a value-only cell, optionally carrying over the attributes of an empty `<c/>`.
fn write_cell<W: Write>(
    writer: &mut Writer<W>,
    original: Option<&BytesStart<'_>>,
    cell: CellRef,
    value: &str,
    prefix: Option<&str>,
) -> Result<(), XlsxError> {
    let tag = match original {
        Some(original) => tag_name(original),
        None => prefixed_tag(prefix, "c"),
    };
    let c = cell_element(original, &tag, cell, value)?;
    if value.is_empty() {
        writer.write_event(Event::Empty(c))?;
        return Ok(());
    }
    let cell_prefix = tag.rsplit_once(':').map(|(p, _)| p);
    writer.write_event(Event::Start(c))?;
    write_inline_string(writer, cell_prefix, value)?;
    writer.write_event(Event::End(BytesEnd::new(tag.as_str())))?;
    Ok(())
}

fn write_cells<W: Write>(
    writer: &mut Writer<W>,
    row_0: u32,
    writes: &[CellWrite],
    prefix: Option<&str>,
) -> Result<(), XlsxError> {
    for write in writes {
        write_cell(writer, None, CellRef::new(row_0, write.col_0), &write.value, prefix)?;
    }
    Ok(())
}

fn write_inline_string<W: Write>(
    writer: &mut Writer<W>,
    prefix: Option<&str>,
    value: &str,
) -> Result<(), XlsxError> {
    let is_tag = prefixed_tag(prefix, "is");
    let t_tag = prefixed_tag(prefix, "t");
    let mut t = BytesStart::new(t_tag.as_str());
    if needs_space_preserve(value) {
        t.push_attribute(("xml:space", "preserve"));
    }
    writer.write_event(Event::Start(BytesStart::new(is_tag.as_str())))?;
    writer.write_event(Event::Start(t))?;
    writer.write_event(Event::Text(BytesText::new(value)))?;
    writer.write_event(Event::End(BytesEnd::new(t_tag.as_str())))?;
    writer.write_event(Event::End(BytesEnd::new(is_tag.as_str())))?;
    Ok(())
}

fn needs_space_preserve(s: &str) -> bool {
    s.starts_with(char::is_whitespace) || s.ends_with(char::is_whitespace)
}

/// Write every pending row numbered below `before_row_1`.
fn write_rows_before<W: Write>(
    writer: &mut Writer<W>,
    writes_by_row: &mut BTreeMap<u32, Vec<CellWrite>>,
    before_row_1: u32,
    prefix: Option<&str>,
) -> Result<(), XlsxError> {
    while let Some(entry) = writes_by_row.first_entry() {
        if *entry.key() >= before_row_1 {
            break;
        }
        let (row_1, pending) = entry.remove_entry();
        let row_tag = prefixed_tag(prefix, "row");
        let mut row = BytesStart::new(row_tag.as_str());
        let r = row_1.to_string();
        row.push_attribute(("r", r.as_str()));
        if let Some((min_col_1, max_col_1)) = spans_for_writes(&pending) {
            let spans = format!("{min_col_1}:{max_col_1}");
            row.push_attribute(("spans", spans.as_str()));
        }
        writer.write_event(Event::Start(row))?;
        write_cells(writer, row_1 - 1, &pending, prefix)?;
        writer.write_event(Event::End(BytesEnd::new(row_tag.as_str())))?;
    }
    Ok(())
}

fn spans_for_writes(writes: &[CellWrite]) -> Option<(u32, u32)> {
    let min = writes.iter().map(|w| w.col_0).min()?;
    let max = writes.iter().map(|w| w.col_0).max()?;
    Some((min + 1, max + 1))
}

/// Copy of a `<row>` start tag with `spans` widened to cover `pending`.
fn row_with_spans(
    original: &BytesStart<'_>,
    pending: &[CellWrite],
) -> Result<BytesStart<'static>, XlsxError> {
    let existing = attr_value(original, b"spans")?.and_then(|spans| {
        let (start, end) = spans.split_once(':')?;
        Some((start.trim().parse::<u32>().ok()?, end.trim().parse::<u32>().ok()?))
    });
    let (Some((min_w, max_w)), Some((min_e, max_e))) = (spans_for_writes(pending), existing) else {
        return Ok(original.to_owned());
    };
    let (min, max) = (min_e.min(min_w), max_e.max(max_w));
    if (min, max) == (min_e, max_e) {
        return Ok(original.to_owned());
    }

    let spans = format!("{min}:{max}");
    let mut out = BytesStart::new(tag_name(original));
    for attr in original.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == b"spans" {
            out.push_attribute(("spans", spans.as_str()));
        } else {
            out.push_attribute((attr.key.as_ref(), attr.value.as_ref()));
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Bounds {
    min: CellRef,
    max: CellRef,
}

fn bounds_for_writes(writes: &BTreeMap<CellRef, String>) -> Option<Bounds> {
    let mut cells = writes.keys();
    let first = *cells.next()?;
    Some(cells.fold(Bounds { min: first, max: first }, |b, c| Bounds {
        min: CellRef::new(b.min.row.min(c.row), b.min.col.min(c.col)),
        max: CellRef::new(b.max.row.max(c.row), b.max.col.max(c.col)),
    }))
}

/// The first `<dimension>` gets its `ref` widened to include `bounds`.
fn dimension_event(
    original: &BytesStart<'_>,
    bounds: Option<Bounds>,
    patched: &mut bool,
) -> Result<BytesStart<'static>, XlsxError> {
    let Some(mut bounds) = bounds.filter(|_| !*patched) else {
        return Ok(original.to_owned());
    };
    *patched = true;

    let existing = attr_value(original, b"ref")?;
    if let Some((start, end)) = existing.as_deref().and_then(parse_range) {
        bounds.min = CellRef::new(bounds.min.row.min(start.row), bounds.min.col.min(start.col));
        bounds.max = CellRef::new(bounds.max.row.max(end.row), bounds.max.col.max(end.col));
    }
    let updated = if bounds.min == bounds.max {
        bounds.min.to_a1()
    } else {
        format!("{}:{}", bounds.min.to_a1(), bounds.max.to_a1())
    };

    let mut out = BytesStart::new(tag_name(original));
    let mut wrote_ref = false;
    for attr in original.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == b"ref" {
            out.push_attribute(("ref", updated.as_str()));
            wrote_ref = true;
        } else {
            out.push_attribute((attr.key.as_ref(), attr.value.as_ref()));
        }
    }
    if !wrote_ref {
        out.push_attribute(("ref", updated.as_str()));
    }
    Ok(out)
}

fn parse_range(s: &str) -> Option<(CellRef, CellRef)> {
    let (start, end) = match s.split_once(':') {
        Some((start, end)) => (start, end),
        None => (s, s),
    };
    Some((CellRef::from_a1(start).ok()?, CellRef::from_a1(end).ok()?))
}

fn tag_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn owned_prefix(e: &BytesStart<'_>) -> Option<String> {
    element_prefix(e.name().as_ref())
        .and_then(|p| std::str::from_utf8(p).ok())
        .map(str::to_string)
}
