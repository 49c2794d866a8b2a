//! `dossier-model` defines the shared vocabulary of the patient record merge pipeline:
//!
//! - [`CellRef`]: 0-indexed cell addresses with A1 parsing/formatting
//! - [`Workbook`]: the capability interface the merge engine mutates
//! - [`MemoryWorkbook`]: an in-memory implementation with no file format behind it

mod address;
mod memory;
mod workbook;

pub use address::{A1ParseError, CellRef, EXCEL_MAX_COLS, EXCEL_MAX_ROWS};
pub use memory::{MemorySheet, MemoryWorkbook};
pub use workbook::{Row, Workbook, WorkbookError};
