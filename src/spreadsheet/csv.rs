//! Delimited text reader. A text file is a workbook with a single sheet named
//! after the file stem.
use crate::spreadsheet::cell::looks_numeric;
use crate::spreadsheet::cell::Cell;
use crate::spreadsheet::cell::CellType;
use crate::spreadsheet::criteria::Criteria;
use crate::spreadsheet::sheet::Sheet;
use crate::spreadsheet::Spreadsheet;
use crate::spreadsheet::SpreadsheetError;
use csv::ReaderBuilder;
use encoding_rs::Encoding;
use encoding_rs::WINDOWS_1252;
use std::borrow::Cow;
use std::path::Path;

/// Delimiters tried when none is implied by the file extension
const DELIMITER_CANDIDATES: [u8; 4] = [b',', b';', b'\t', b'|'];

/// Number of lines inspected when sniffing the delimiter
const SNIFF_LINES: usize = 10;

pub(crate) struct CsvSpreadsheet {
    /// File name of the spreadsheet
    name: String,
    /// Name of the single sheet
    sheet_name: String,
    /// Decoded file content
    content: String,
    /// Field delimiter (sniffed when not given)
    delimiter: u8,
}

impl CsvSpreadsheet {
    /// Reads and decodes a delimited text file.
    pub(crate) fn open(path: &Path, delimiter: Option<u8>) -> Result<CsvSpreadsheet, SpreadsheetError> {
        let bytes = std::fs::read(path)?;
        let content = decode(&bytes).into_owned();
        let delimiter = delimiter.unwrap_or_else(|| detect_delimiter(&content));
        let sheet_name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .filter(|stem| !stem.is_empty())
            .unwrap_or_else(|| "Sheet1".to_owned());
        Ok(CsvSpreadsheet {
            name: path.to_string_lossy().to_string(),
            sheet_name,
            content,
            delimiter,
        })
    }
}

impl Spreadsheet for CsvSpreadsheet {
    fn name(&self) -> String {
        self.name.to_owned()
    }

    fn sheet_names(&self) -> Vec<String> {
        vec![self.sheet_name.to_owned()]
    }

    fn read_sheets(&mut self, criteria: &Criteria) -> Result<Vec<Sheet>, SpreadsheetError> {
        if !criteria.accept(&self.sheet_name) {
            return Ok(Vec::new());
        }

        let mut sheet = Sheet::new(&self.name, &self.sheet_name, 0);
        let mut reader = ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(self.content.as_bytes());
        for (row, result) in reader.records().enumerate() {
            let record = result?;
            for (col, field) in record.iter().enumerate() {
                if field.is_empty() {
                    continue;
                }
                let kind = if looks_numeric(field) {
                    CellType::Number
                } else {
                    CellType::InlineString
                };
                sheet.push(Cell {
                    row,
                    col,
                    kind,
                    value: field.to_owned(),
                });
            }
        }
        sheet.finish();
        Ok(vec![sheet])
    }
}

/// Decodes file bytes: BOM-marked encodings first, then UTF-8, then Windows-1252.
pub(crate) fn decode(bytes: &[u8]) -> Cow<'_, str> {
    if let Some((encoding, bom_length)) = Encoding::for_bom(bytes) {
        let (text, _) = encoding.decode_without_bom_handling(&bytes[bom_length..]);
        return text;
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => WINDOWS_1252.decode_without_bom_handling(bytes).0,
    }
}

/// Detects the delimiter by how consistently it splits the first lines.
pub(crate) fn detect_delimiter(content: &str) -> u8 {
    let sample_lines: Vec<&str> = content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .take(SNIFF_LINES)
        .collect();
    if sample_lines.is_empty() {
        return b',';
    }

    let mut best_delimiter = b',';
    let mut best_score = 0.0f64;
    for delimiter in DELIMITER_CANDIDATES {
        let counts: Vec<f64> = sample_lines
            .iter()
            .map(|line| line.bytes().filter(|byte| *byte == delimiter).count() as f64)
            .collect();
        let average = counts.iter().sum::<f64>() / counts.len() as f64;
        let variance = counts.iter().map(|count| (count - average).powi(2)).sum::<f64>() / counts.len() as f64;
        let score = average / (1.0 + variance.sqrt());
        if score > best_score {
            best_score = score;
            best_delimiter = delimiter;
        }
    }
    best_delimiter
}
