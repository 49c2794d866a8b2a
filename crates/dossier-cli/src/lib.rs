//! `dossier-merge`: read an export block and a patient record workbook, merge, write the result.

mod cli;

pub use cli::{default_output_path, run, run_with_args, Args, ReportFormat};
