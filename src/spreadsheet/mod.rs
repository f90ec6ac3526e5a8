//! # Spreadsheet Module
//!
//! Reading and writing of workbook files. Office Open XML workbooks (`.xlsx`,
//! `.xlsm`) are parsed directly from their zip package with a streaming XML
//! reader; delimited text files (`.csv`, `.tsv`, `.txt`) are read as a
//! single-sheet workbook. Every reader materializes sheets as [`Sheet`]s of
//! raw [`Cell`](cell::Cell)s, which the pipeline turns into rows of
//! [`CellValue`]s.
pub(crate) mod cell;
pub(crate) mod criteria;
pub(crate) mod csv;
pub(crate) mod excel;
pub(crate) mod reference;
pub(crate) mod sheet;
pub(crate) mod writer;
pub(crate) mod xlsx;

pub use crate::spreadsheet::cell::CellValue;
pub use crate::spreadsheet::writer::Workbook;
pub use crate::spreadsheet::writer::Worksheet;

use crate::spreadsheet::criteria::Criteria;
use crate::spreadsheet::sheet::Sheet;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;

/// Errors raised while reading or writing spreadsheet files.
#[derive(Error, Debug)]
pub enum SpreadsheetError {
    #[error("{0}")]
    WithContext(String),

    #[error("Cannot detect file format for '{0}'")]
    UnsupportedFormat(String),

    #[error("Missing part '{0}' in workbook package")]
    FileError(String),

    #[error("Spreadsheet '{0}' contains no sheets")]
    SpreadsheetEmptyError(String),

    #[error("No sheet matches '{0}'")]
    SheetNotFound(String),

    #[error("Invalid shared string index {0}")]
    SharedStringIndexError(usize),

    // Standard library errors
    #[error("{0}")]
    IoError(#[from] std::io::Error),

    #[error("{0}")]
    ParseIntError(#[from] std::num::ParseIntError),

    #[error("{0}")]
    PatternError(#[from] glob::PatternError),

    // Third-party library errors
    #[error("{0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("{0}")]
    XmlError(#[from] quick_xml::Error),

    #[error("{0}")]
    XmlEncodingError(#[from] quick_xml::encoding::EncodingError),

    #[error("{0}")]
    XmlAttributeError(#[from] quick_xml::events::attributes::AttrError),

    #[error("{0}")]
    CsvError(#[from] ::csv::Error),

    // Helper module errors
    #[error("{0}")]
    XmlHelperError(#[from] crate::helpers::xml::XmlError),
}

pub(crate) trait ResultMessage {
    fn with_prefix(self, message: &str) -> Self;
}

impl<T> ResultMessage for Result<T, SpreadsheetError> {
    fn with_prefix(self, message: &str) -> Self {
        self.map_err(|e| match e {
            // already name the file
            SpreadsheetError::UnsupportedFormat(_)
            | SpreadsheetError::SpreadsheetEmptyError(_)
            | SpreadsheetError::SheetNotFound(_) => e,
            e => SpreadsheetError::WithContext(format!("{}: {}", message, e)),
        })
    }
}

/// Type alias for buffered file reader
pub(crate) type FileReader = BufReader<File>;

/// Common interface over the supported source formats.
pub(crate) trait Spreadsheet {
    /// Returns the file name of this spreadsheet
    fn name(&self) -> String;

    /// Returns the sheet names in workbook order
    fn sheet_names(&self) -> Vec<String>;

    /// Reads every sheet accepted by the criteria, in workbook order
    fn read_sheets(&mut self, criteria: &Criteria) -> Result<Vec<Sheet>, SpreadsheetError>;
}

/// Opens a spreadsheet, choosing the reader from the file extension.
pub(crate) fn open_spreadsheet(path: &Path) -> Result<Box<dyn Spreadsheet>, SpreadsheetError> {
    let extension = path
        .extension()
        .and_then(|extension| extension.to_str())
        .map(|extension| extension.to_ascii_lowercase())
        .unwrap_or_default();
    let file_name = path.to_string_lossy();
    let spreadsheet: Box<dyn Spreadsheet> = match extension.as_str() {
        "xlsx" | "xlsm" => Box::new(xlsx::XlsxSpreadsheet::open(path).with_prefix(&file_name)?),
        "csv" => Box::new(csv::CsvSpreadsheet::open(path, None).with_prefix(&file_name)?),
        "tsv" => Box::new(csv::CsvSpreadsheet::open(path, Some(b'\t')).with_prefix(&file_name)?),
        "txt" => Box::new(csv::CsvSpreadsheet::open(path, None).with_prefix(&file_name)?),
        _ => Err(SpreadsheetError::UnsupportedFormat(file_name.to_string()))?,
    };
    Ok(spreadsheet)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_extensions() {
        let result = open_spreadsheet(Path::new("report.pdf"));
        assert!(matches!(result, Err(SpreadsheetError::UnsupportedFormat(_))));
    }

    #[test]
    fn prefixes_error_messages() {
        let result: Result<(), SpreadsheetError> = Err(SpreadsheetError::FileError("xl/workbook.xml".to_owned()));
        let message = result.with_prefix("book.xlsx").unwrap_err().to_string();
        assert_eq!(message, "book.xlsx: Missing part 'xl/workbook.xml' in workbook package");
    }
}
