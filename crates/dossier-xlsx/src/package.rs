use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read, Seek, Write};

use dossier_model::{CellRef, Row, Workbook, WorkbookError, EXCEL_MAX_COLS, EXCEL_MAX_ROWS};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::openxml::{
    parse_relationships, parse_workbook_sheets, Relationship, REL_TYPE_CALC_CHAIN,
    REL_TYPE_OFFICE_DOCUMENT, REL_TYPE_SHARED_STRINGS, REL_TYPE_WORKSHEET,
};
use crate::patch::patch_worksheet_xml;
use crate::path::{rels_for_part, resolve_target};
use crate::recalc::{
    force_full_calc_on_load, remove_calc_chain_override, remove_calc_chain_relationship,
};
use crate::scan::{scan_worksheet, SheetScan};
use crate::shared_strings::parse_shared_strings;
use crate::zip_util::{find_entry, InflateBudget, PackageLimits};
use crate::XlsxError;

const DEFAULT_WORKBOOK_PART: &str = "xl/workbook.xml";
const CONTENT_TYPES_PART: &str = "[Content_Types].xml";

#[derive(Debug)]
struct SheetState {
    name: String,
    /// ZIP entry holding the worksheet XML.
    entry: String,
    scan: SheetScan,
    writes: BTreeMap<CellRef, String>,
    column_count: u32,
    row_count: u32,
}

impl SheetState {
    fn write(&mut self, cell: CellRef, value: String) {
        if !value.is_empty() {
            self.column_count = self.column_count.max(cell.col + 1);
            self.row_count = self.row_count.max(cell.row + 1);
        }
        self.writes.insert(cell, value);
    }
}

/// ZIP entries rewritten when a formula cell is overwritten.
#[derive(Debug, Default)]
struct CalcParts {
    workbook: String,
    workbook_rels: Option<String>,
    content_types: Option<String>,
    calc_chain: Option<String>,
}

/// An `.xlsx` package opened for in-place edits.
///
/// Edits are kept as pending cell writes per sheet. [`Workbook::write_to`] streams every
/// edited worksheet through the patcher and raw-copies all other entries, so styles, column
/// widths, merged cells, validation rules and untouched sheets come out byte-for-byte.
#[derive(Debug)]
pub struct XlsxWorkbook {
    source: Vec<u8>,
    parts: CalcParts,
    sheets: Vec<SheetState>,
}

impl XlsxWorkbook {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, XlsxError> {
        Self::from_bytes_with_limits(bytes, PackageLimits::default())
    }

    pub fn from_bytes_with_limits(bytes: &[u8], limits: PackageLimits) -> Result<Self, XlsxError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        let mut budget = InflateBudget::new(limits);

        let workbook_part = locate_workbook_part(&mut archive, &mut budget)?;
        let workbook_entry = find_entry(&archive, &workbook_part)
            .ok_or_else(|| XlsxError::MissingPart(workbook_part.clone()))?;
        let workbook_xml = budget.read_entry(&mut archive, &workbook_entry)?;
        let sheet_infos = parse_workbook_sheets(&workbook_xml)?;

        let rels_part = rels_for_part(&workbook_part);
        let rels_entry = find_entry(&archive, &rels_part)
            .ok_or_else(|| XlsxError::MissingPart(rels_part.clone()))?;
        let relationships = parse_relationships(&budget.read_entry(&mut archive, &rels_entry)?)?;
        let targets: HashMap<&str, &Relationship> = relationships
            .iter()
            .filter(|rel| !rel.is_external())
            .map(|rel| (rel.id.as_str(), rel))
            .collect();
        let part_of_type = |suffix: &str| {
            relationships
                .iter()
                .find(|rel| rel.has_type(suffix) && !rel.is_external())
                .map(|rel| resolve_target(&workbook_part, &rel.target))
        };

        let shared_strings = match part_of_type(REL_TYPE_SHARED_STRINGS)
            .and_then(|part| find_entry(&archive, &part))
        {
            Some(entry) => parse_shared_strings(&budget.read_entry(&mut archive, &entry)?)?,
            None => Vec::new(),
        };

        let mut sheets = Vec::with_capacity(sheet_infos.len());
        for info in sheet_infos {
            let rel = targets.get(info.rel_id.as_str()).ok_or_else(|| {
                XlsxError::Invalid(format!(
                    "sheet `{}` references unknown relationship {}",
                    info.name, info.rel_id
                ))
            })?;
            if !rel.has_type(REL_TYPE_WORKSHEET) {
                log::debug!("skipping `{}`: not a worksheet ({})", info.name, rel.type_uri);
                continue;
            }
            let part = resolve_target(&workbook_part, &rel.target);
            let entry = find_entry(&archive, &part).ok_or(XlsxError::MissingPart(part))?;
            let xml = budget.read_entry(&mut archive, &entry)?;
            let scan = scan_worksheet(&entry, &xml, &shared_strings)?;
            log::debug!(
                "sheet `{}` ({entry}): {} column(s), {} row(s) in use",
                info.name,
                scan.column_count,
                scan.row_count
            );
            sheets.push(SheetState {
                name: info.name,
                entry,
                column_count: scan.column_count,
                row_count: scan.row_count,
                scan,
                writes: BTreeMap::new(),
            });
        }

        let parts = CalcParts {
            workbook: workbook_entry,
            workbook_rels: Some(rels_entry),
            content_types: find_entry(&archive, CONTENT_TYPES_PART),
            calc_chain: part_of_type(REL_TYPE_CALC_CHAIN)
                .and_then(|part| find_entry(&archive, &part)),
        };

        Ok(Self {
            source: bytes.to_vec(),
            parts,
            sheets,
        })
    }

    /// Returns true when at least one cell write is pending.
    pub fn is_modified(&self) -> bool {
        self.sheets.iter().any(|sheet| !sheet.writes.is_empty())
    }

    fn sheet_index(&self, name: &str) -> Option<usize> {
        self.sheets.iter().position(|sheet| sheet.name == name)
    }

    fn sheet(&self, name: &str) -> Result<&SheetState, WorkbookError> {
        self.sheet_index(name)
            .map(|idx| &self.sheets[idx])
            .ok_or_else(|| WorkbookError::SheetNotFound(name.to_string()))
    }

    fn sheet_mut(&mut self, name: &str) -> Result<&mut SheetState, WorkbookError> {
        match self.sheet_index(name) {
            Some(idx) => Ok(&mut self.sheets[idx]),
            None => Err(WorkbookError::SheetNotFound(name.to_string())),
        }
    }

    fn write_package<W: Write + Seek>(&self, output: W) -> Result<W, XlsxError> {
        let mut patched: HashMap<&str, Vec<u8>> = HashMap::new();
        let mut removed_formula = false;
        let mut archive = ZipArchive::new(Cursor::new(self.source.as_slice()))?;

        for sheet in self.sheets.iter().filter(|sheet| !sheet.writes.is_empty()) {
            let mut xml = Vec::new();
            archive.by_name(&sheet.entry)?.read_to_end(&mut xml)?;
            let out = patch_worksheet_xml(&sheet.entry, &xml, &sheet.writes)?;
            removed_formula |= out.removed_formula;
            patched.insert(sheet.entry.as_str(), out.xml);
        }
        if removed_formula {
            log::debug!("formula cells were overwritten; dropping calc chain");
        }

        let mut zip = ZipWriter::new(output);
        let options = FileOptions::<()>::default().compression_method(CompressionMethod::Deflated);

        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();

            let rewrite: Option<fn(&[u8]) -> Result<Vec<u8>, XlsxError>> = if !removed_formula {
                None
            } else if self.parts.calc_chain.as_deref() == Some(name.as_str()) {
                continue;
            } else if name == self.parts.workbook {
                Some(force_full_calc_on_load)
            } else if self.parts.workbook_rels.as_deref() == Some(name.as_str()) {
                Some(remove_calc_chain_relationship)
            } else if self.parts.content_types.as_deref() == Some(name.as_str()) {
                Some(remove_calc_chain_override)
            } else {
                None
            };

            if let Some(xml) = patched.remove(name.as_str()) {
                zip.start_file(name, options)?;
                zip.write_all(&xml)?;
            } else if let Some(rewrite) = rewrite {
                let mut xml = Vec::new();
                file.read_to_end(&mut xml)?;
                let updated = rewrite(&xml)?;
                zip.start_file(name, options)?;
                zip.write_all(&updated)?;
            } else {
                zip.raw_copy_file(file)?;
            }
        }

        Ok(zip.finish()?)
    }
}

/// The main workbook part, from the package relationships when they name one.
fn locate_workbook_part<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    budget: &mut InflateBudget,
) -> Result<String, XlsxError> {
    let Some(entry) = find_entry(archive, "_rels/.rels") else {
        return Ok(DEFAULT_WORKBOOK_PART.to_string());
    };
    let rels = parse_relationships(&budget.read_entry(archive, &entry)?)?;
    Ok(rels
        .iter()
        .find(|rel| rel.has_type(REL_TYPE_OFFICE_DOCUMENT) && !rel.is_external())
        .map(|rel| resolve_target("", &rel.target))
        .unwrap_or_else(|| DEFAULT_WORKBOOK_PART.to_string()))
}

impl Workbook for XlsxWorkbook {
    fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|sheet| sheet.name.clone()).collect()
    }

    fn has_sheet(&self, name: &str) -> bool {
        self.sheet_index(name).is_some()
    }

    fn column_count(&self, sheet: &str) -> Result<usize, WorkbookError> {
        Ok(self.sheet(sheet)?.column_count as usize)
    }

    fn row_count(&self, sheet: &str) -> Result<usize, WorkbookError> {
        Ok(self.sheet(sheet)?.row_count as usize)
    }

    fn append_row(&mut self, sheet: &str, row: Row) -> Result<(), WorkbookError> {
        let state = self.sheet_mut(sheet)?;
        if state.row_count >= EXCEL_MAX_ROWS {
            return Err(WorkbookError::RowLimit {
                sheet: state.name.clone(),
            });
        }
        if row.len() > EXCEL_MAX_COLS as usize {
            return Err(XlsxError::Invalid(format!(
                "row of {} fields does not fit in sheet `{}`",
                row.len(),
                state.name
            ))
            .into());
        }

        let row_0 = state.row_count;
        for (col, value) in row.into_iter().enumerate() {
            if !value.is_empty() {
                state.write(CellRef::new(row_0, col as u32), value);
            }
        }
        // An all-empty row still takes its row number.
        state.row_count = row_0 + 1;
        Ok(())
    }

    fn cell_value(&self, sheet: &str, cell: CellRef) -> Result<Option<String>, WorkbookError> {
        let state = self.sheet(sheet)?;
        Ok(match state.writes.get(&cell) {
            Some(value) if value.is_empty() => None,
            Some(value) => Some(value.clone()),
            None => state.scan.values.get(&cell).cloned(),
        })
    }

    fn set_cell_value(
        &mut self,
        sheet: &str,
        cell: CellRef,
        value: String,
    ) -> Result<(), WorkbookError> {
        if cell.row >= EXCEL_MAX_ROWS || cell.col >= EXCEL_MAX_COLS {
            return Err(XlsxError::Invalid(format!("cell {cell} is outside the sheet")).into());
        }
        let state = self.sheet_mut(sheet)?;
        if state.scan.formulas.contains(&cell) {
            log::debug!("overwriting formula cell `{}`!{cell}", state.name);
        }
        state.write(cell, value);
        Ok(())
    }

    fn write_to(&self, out: &mut dyn Write) -> Result<(), WorkbookError> {
        if !self.is_modified() {
            out.write_all(&self.source)?;
            return Ok(());
        }
        let bytes = self.write_package(Cursor::new(Vec::new()))?.into_inner();
        out.write_all(&bytes)?;
        Ok(())
    }
}
