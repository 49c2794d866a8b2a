use dossier_model::{Workbook, WorkbookError};
use serde::Serialize;
use thiserror::Error;

use crate::block::ExportSections;
use crate::layout::MergeLayout;
use crate::normalize::normalize_row;

#[derive(Debug, Error)]
pub enum MergeError {
    /// The workbook lacks a sheet the layout writes to. Nothing was modified.
    #[error("workbook is missing required sheet `{sheet}`")]
    MissingSheet { sheet: String },
    #[error(transparent)]
    Workbook(#[from] WorkbookError),
}

/// Rows appended to one sheet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AppendedRows {
    pub sheet: String,
    pub rows: usize,
    /// Column count every appended row was fitted to.
    pub width: usize,
}

/// A fixed cell overwritten from a section.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WrittenCell {
    pub section: String,
    pub sheet: String,
    pub cell: String,
    pub value: String,
}

/// Summary of what a merge changed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub appended: Vec<AppendedRows>,
    pub cells: Vec<WrittenCell>,
    /// Sections present in the block that no table maps.
    pub ignored_sections: Vec<String>,
}

impl MergeReport {
    /// Returns true when the merge left the workbook untouched.
    pub fn is_noop(&self) -> bool {
        self.appended.is_empty() && self.cells.is_empty()
    }

    /// Total rows appended to `sheet`.
    pub fn appended_rows(&self, sheet: &str) -> usize {
        self.appended
            .iter()
            .filter(|a| a.sheet == sheet)
            .map(|a| a.rows)
            .sum()
    }
}

/// Merge `sections` into `workbook` using [`MergeLayout::patient_record`].
pub fn merge_sections<W: Workbook + ?Sized>(
    workbook: &mut W,
    sections: &ExportSections,
) -> Result<MergeReport, MergeError> {
    merge_sections_with_layout(workbook, sections, MergeLayout::patient_record())
}

/// Merge `sections` into `workbook` following `layout`.
///
/// Every sheet referenced by `layout` must exist; this is checked before the first mutation so
/// a [`MergeError::MissingSheet`] leaves the workbook as it was.
pub fn merge_sections_with_layout<W: Workbook + ?Sized>(
    workbook: &mut W,
    sections: &ExportSections,
    layout: &MergeLayout,
) -> Result<MergeReport, MergeError> {
    if let Some(missing) = layout.required_sheets().find(|s| !workbook.has_sheet(s)) {
        return Err(MergeError::MissingSheet {
            sheet: missing.to_string(),
        });
    }

    let mut report = MergeReport::default();

    for target in layout.appendable {
        let rows = match sections.get(target.section) {
            Some(rows) if !rows.is_empty() => rows,
            _ => continue,
        };
        let width = workbook.column_count(target.sheet)?;
        for row in rows {
            workbook.append_row(target.sheet, normalize_row(row, width))?;
        }
        log::debug!(
            "appended {} row(s) to `{}` (width {width})",
            rows.len(),
            target.sheet
        );
        report.appended.push(AppendedRows {
            sheet: target.sheet.to_string(),
            rows: rows.len(),
            width,
        });
    }

    for target in layout.fixed_cells {
        let Some(first) = sections.get(target.section).and_then(|rows| rows.first()) else {
            continue;
        };
        let value = first.last().cloned().unwrap_or_default();
        workbook.set_cell_value(layout.fixed_sheet, target.cell, value.clone())?;
        log::debug!(
            "set `{}`!{} from section `{}`",
            layout.fixed_sheet,
            target.cell,
            target.section
        );
        report.cells.push(WrittenCell {
            section: target.section.to_string(),
            sheet: layout.fixed_sheet.to_string(),
            cell: target.cell.to_a1(),
            value,
        });
    }

    report.ignored_sections = sections
        .names()
        .filter(|name| !layout.recognizes(name))
        .map(str::to_string)
        .collect();
    if !report.ignored_sections.is_empty() {
        log::debug!("ignored sections: {}", report.ignored_sections.join(", "));
    }

    Ok(report)
}
