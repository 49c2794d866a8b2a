use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::address::EXCEL_MAX_ROWS;
use crate::{CellRef, Row, Workbook, WorkbookError};

/// A worksheet held as a dense grid of strings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySheet {
    pub name: String,
    #[serde(default)]
    pub rows: Vec<Row>,
}

impl MemorySheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: Vec::new(),
        }
    }

    /// Widest row of the sheet.
    pub fn column_count(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }
}

/// In-memory [`Workbook`] with no file format behind it.
///
/// `write_to` emits the sheets as JSON, which is enough for tests and debugging dumps.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryWorkbook {
    #[serde(default)]
    pub sheets: Vec<MemorySheet>,
}

impl MemoryWorkbook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style helper: add a sheet with the given rows.
    pub fn with_sheet<R, F>(mut self, name: &str, rows: R) -> Self
    where
        R: IntoIterator<Item = F>,
        F: IntoIterator,
        F::Item: Into<String>,
    {
        self.add_sheet(name, rows);
        self
    }

    pub fn add_sheet<R, F>(&mut self, name: &str, rows: R) -> &mut MemorySheet
    where
        R: IntoIterator<Item = F>,
        F: IntoIterator,
        F::Item: Into<String>,
    {
        let rows = rows
            .into_iter()
            .map(|row| row.into_iter().map(Into::into).collect())
            .collect();
        let idx = self.sheets.len();
        self.sheets.push(MemorySheet {
            name: name.to_string(),
            rows,
        });
        &mut self.sheets[idx]
    }

    pub fn sheet(&self, name: &str) -> Option<&MemorySheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    fn sheet_or_err(&self, name: &str) -> Result<&MemorySheet, WorkbookError> {
        self.sheet(name)
            .ok_or_else(|| WorkbookError::SheetNotFound(name.to_string()))
    }

    fn sheet_mut_or_err(&mut self, name: &str) -> Result<&mut MemorySheet, WorkbookError> {
        self.sheets
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| WorkbookError::SheetNotFound(name.to_string()))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl Workbook for MemoryWorkbook {
    fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name.clone()).collect()
    }

    fn column_count(&self, sheet: &str) -> Result<usize, WorkbookError> {
        Ok(self.sheet_or_err(sheet)?.column_count())
    }

    fn row_count(&self, sheet: &str) -> Result<usize, WorkbookError> {
        Ok(self.sheet_or_err(sheet)?.rows.len())
    }

    fn append_row(&mut self, sheet: &str, row: Row) -> Result<(), WorkbookError> {
        let target = self.sheet_mut_or_err(sheet)?;
        if target.rows.len() >= EXCEL_MAX_ROWS as usize {
            return Err(WorkbookError::RowLimit {
                sheet: sheet.to_string(),
            });
        }
        target.rows.push(row);
        Ok(())
    }

    fn cell_value(&self, sheet: &str, cell: CellRef) -> Result<Option<String>, WorkbookError> {
        let sheet = self.sheet_or_err(sheet)?;
        Ok(sheet
            .rows
            .get(cell.row as usize)
            .and_then(|row| row.get(cell.col as usize))
            .filter(|value| !value.is_empty())
            .cloned())
    }

    fn set_cell_value(
        &mut self,
        sheet: &str,
        cell: CellRef,
        value: String,
    ) -> Result<(), WorkbookError> {
        let sheet = self.sheet_mut_or_err(sheet)?;
        let (row, col) = (cell.row as usize, cell.col as usize);
        if sheet.rows.len() <= row {
            sheet.rows.resize_with(row + 1, Vec::new);
        }
        let target = &mut sheet.rows[row];
        if target.len() <= col {
            target.resize(col + 1, String::new());
        }
        target[col] = value;
        Ok(())
    }

    fn write_to(&self, out: &mut dyn Write) -> Result<(), WorkbookError> {
        serde_json::to_writer_pretty(&mut *out, self).map_err(WorkbookError::backend)?;
        out.write_all(b"\n")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    fn sample() -> MemoryWorkbook {
        MemoryWorkbook::new()
            .with_sheet("Suivi", [vec!["Date", "Note"], vec!["2024-01-01", "ok"]])
            .with_sheet("Vide", Vec::<Vec<&str>>::new())
    }

    #[test]
    fn counts_follow_widest_row() {
        let mut wb = sample();
        assert_eq!(wb.column_count("Suivi").unwrap(), 2);
        assert_eq!(wb.row_count("Suivi").unwrap(), 2);
        assert_eq!(wb.column_count("Vide").unwrap(), 0);

        wb.append_row("Suivi", vec!["a".into(), "b".into(), "c".into()])
            .unwrap();
        assert_eq!(wb.column_count("Suivi").unwrap(), 3);
        assert_eq!(wb.row_count("Suivi").unwrap(), 3);
    }

    #[test]
    fn unknown_sheet_is_reported_by_name() {
        let mut wb = sample();
        let err = wb.append_row("Absent", Vec::new()).unwrap_err();
        assert!(matches!(err, WorkbookError::SheetNotFound(ref name) if name == "Absent"));
        assert!(!wb.has_sheet("Absent"));
        assert!(wb.has_sheet("Suivi"));
    }

    #[test]
    fn set_cell_grows_grid_and_reads_back() {
        let mut wb = sample();
        let b14 = CellRef::from_a1("B14").unwrap();
        assert_eq!(wb.cell_value("Vide", b14).unwrap(), None);

        wb.set_cell_value("Vide", b14, "motif".to_string()).unwrap();
        assert_eq!(wb.cell_value("Vide", b14).unwrap().as_deref(), Some("motif"));
        assert_eq!(wb.row_count("Vide").unwrap(), 14);
        assert_eq!(wb.cell_value("Vide", CellRef::new(13, 0)).unwrap(), None);
    }

    #[test]
    fn write_to_roundtrips_through_json() {
        let wb = sample();
        let bytes = wb.save_to_vec().unwrap();
        let back = MemoryWorkbook::from_json(&bytes).unwrap();
        assert_eq!(back, wb);
    }
}
