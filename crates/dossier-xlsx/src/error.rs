use dossier_model::WorkbookError;

#[derive(Debug, thiserror::Error)]
pub enum XlsxError {
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("xml attribute error: {0}")]
    Attr(#[from] quick_xml::events::attributes::AttrError),
    #[error("missing required attribute: {0}")]
    MissingAttr(&'static str),
    #[error("missing xlsx part: {0}")]
    MissingPart(String),
    #[error("worksheet {0} has no <sheetData> element")]
    MissingSheetData(String),
    #[error("invalid xlsx: {0}")]
    Invalid(String),
    #[error(
        "xlsx package part is too large to load safely: {part} is {size} bytes (max {max} bytes)"
    )]
    PartTooLarge { part: String, size: u64, max: u64 },
    #[error("xlsx package is too large to load safely: {total} bytes uncompressed (max {max})")]
    PackageTooLarge { total: u64, max: u64 },
}

impl From<XlsxError> for WorkbookError {
    fn from(err: XlsxError) -> Self {
        match err {
            XlsxError::Io(err) => WorkbookError::Io(err),
            other => WorkbookError::backend(other),
        }
    }
}
