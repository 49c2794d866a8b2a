use std::io::Write;

use thiserror::Error;

use crate::CellRef;

/// A single record: an ordered list of string fields.
pub type Row = Vec<String>;

/// Errors raised by [`Workbook`] operations.
#[derive(Debug, Error)]
pub enum WorkbookError {
    #[error("sheet not found: {0}")]
    SheetNotFound(String),
    #[error("sheet {sheet} has no room for another row")]
    RowLimit { sheet: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Failure reported by the concrete workbook implementation (file format layer).
    #[error(transparent)]
    Backend(Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl WorkbookError {
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Box::new(err))
    }
}

/// Capability interface over an already-opened workbook.
///
/// Implementations mutate their in-memory representation only; loading and saving bytes is
/// the caller's concern (`write_to` serializes whatever state the handle currently holds).
/// Untouched sheets must survive `write_to` unchanged.
pub trait Workbook {
    /// Sheet (tab) names in workbook order.
    fn sheet_names(&self) -> Vec<String>;

    /// Returns true when `name` resolves to a sheet of this workbook.
    ///
    /// Sheet names match exactly, case included. Every method taking a sheet name resolves it
    /// the same way.
    fn has_sheet(&self, name: &str) -> bool {
        self.sheet_names().iter().any(|s| s == name)
    }

    /// Number of columns currently in use on `sheet`.
    fn column_count(&self, sheet: &str) -> Result<usize, WorkbookError>;

    /// Number of rows currently in use on `sheet` (header rows included).
    fn row_count(&self, sheet: &str) -> Result<usize, WorkbookError>;

    /// Append `row` after the last used row of `sheet`. Field `i` lands in column `i`.
    fn append_row(&mut self, sheet: &str, row: Row) -> Result<(), WorkbookError>;

    /// Text of a single cell, `None` when the cell holds no value.
    fn cell_value(&self, sheet: &str, cell: CellRef) -> Result<Option<String>, WorkbookError>;

    /// Overwrite a single cell with a literal string value.
    fn set_cell_value(
        &mut self,
        sheet: &str,
        cell: CellRef,
        value: String,
    ) -> Result<(), WorkbookError>;

    /// Serialize the whole workbook.
    fn write_to(&self, out: &mut dyn Write) -> Result<(), WorkbookError>;

    fn save_to_vec(&self) -> Result<Vec<u8>, WorkbookError> {
        let mut out = Vec::new();
        self.write_to(&mut out)?;
        Ok(out)
    }
}
