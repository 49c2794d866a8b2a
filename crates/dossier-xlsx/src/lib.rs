//! `.xlsx` backend for [`dossier_model::Workbook`].
//!
//! [`XlsxWorkbook`] reads just enough of the package to answer the merge engine (sheet names,
//! used ranges, cell text) and applies edits by streaming the affected worksheet parts through
//! a patcher. Every other ZIP entry is raw-copied on save.

mod error;
mod openxml;
mod package;
mod patch;
mod path;
mod recalc;
mod scan;
mod shared_strings;
mod zip_util;

pub use error::XlsxError;
pub use openxml::{local_name, parse_relationships, Relationship};
pub use package::XlsxWorkbook;
pub use path::{rels_for_part, resolve_target};
pub use zip_util::PackageLimits;
