//! Parse `[EXCEL_EXPORT]` text blocks and merge them into a patient record workbook.
//!
//! - [`parse_export_block`] turns the text into [`ExportSections`] and never fails
//! - [`merge_sections`] applies the sections to any [`dossier_model::Workbook`] following the
//!   static [`MergeLayout`]: list sections are appended as trailing rows (fitted to the sheet's
//!   column count by [`normalize_row`]), summary sections overwrite fixed cells

mod block;
mod layout;
mod merge;
mod normalize;

pub use block::{
    parse_export_block, split_fields, ExportSections, EXPORT_END_MARKER, EXPORT_START_MARKER,
    FIELD_SEPARATOR,
};
pub use layout::{AppendTarget, FixedCellTarget, MergeLayout};
pub use merge::{
    merge_sections, merge_sections_with_layout, AppendedRows, MergeError, MergeReport,
    WrittenCell,
};
pub use normalize::normalize_row;

/// Parse `text` and merge it into `workbook` with the patient record layout.
pub fn apply_export_block<W: dossier_model::Workbook + ?Sized>(
    workbook: &mut W,
    text: &str,
) -> Result<MergeReport, MergeError> {
    let sections = parse_export_block(text);
    merge_sections(workbook, &sections)
}
