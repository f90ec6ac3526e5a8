//! In-memory output workbook and its `.xlsx` serialization.
use crate::helpers::xml::XmlWriterHelper;
use crate::helpers::zip::ZipWriterHelper;
use crate::spreadsheet::cell::date_to_serial;
use crate::spreadsheet::cell::datetime_to_serial;
use crate::spreadsheet::cell::time_to_serial;
use crate::spreadsheet::cell::CellValue;
use crate::spreadsheet::reference::index_to_reference;
use crate::spreadsheet::SpreadsheetError;
use quick_xml::Writer;
use serde::Serialize;
use std::borrow::Cow;
use std::io::BufWriter;
use std::io::Seek;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::warn;
use zip::ZipWriter;

const NS_MAIN: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const NS_RELATIONSHIPS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const NS_PACKAGE_RELATIONSHIPS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const NS_CONTENT_TYPES: &str = "http://schemas.openxmlformats.org/package/2006/content-types";

const TYPE_OFFICE_DOCUMENT: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument";
const TYPE_WORKSHEET: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet";
const TYPE_STYLES: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles";

const CONTENT_WORKBOOK: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml";
const CONTENT_WORKSHEET: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml";
const CONTENT_STYLES: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml";

/// Cell style indexes declared in `xl/styles.xml`
const STYLE_DATE: &str = "1";
const STYLE_DATETIME: &str = "2";
const STYLE_TIME: &str = "3";

/// Maximum sheet name length accepted by Excel
const MAX_SHEET_NAME_LENGTH: usize = 31;

/// A sheet of the output workbook.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Worksheet {
    pub name: String,
    pub rows: Vec<Vec<CellValue>>,
}

impl Worksheet {
    /// Number of rows written so far, blank rows included.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn push_row(&mut self, row: Vec<CellValue>) {
        self.rows.push(row);
    }
}

/// The output workbook, assembled in memory and saved in one step.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Workbook {
    sheets: Vec<Worksheet>,
}

impl Workbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sheets(&self) -> &[Worksheet] {
        &self.sheets
    }

    pub fn sheet(&self, index: usize) -> Option<&Worksheet> {
        self.sheets.get(index)
    }

    pub fn sheet_mut(&mut self, index: usize) -> Option<&mut Worksheet> {
        self.sheets.get_mut(index)
    }

    /// Adds a sheet, adjusting the name to one Excel accepts and that is
    /// unique in the workbook. Returns the index of the new sheet.
    pub fn add_sheet(&mut self, name: &str) -> usize {
        let name = self.unique_sheet_name(name);
        self.sheets.push(Worksheet { name, rows: Vec::new() });
        self.sheets.len() - 1
    }

    fn unique_sheet_name(&self, name: &str) -> String {
        let cleaned: String = name
            .chars()
            .filter(|c| !matches!(c, '[' | ']' | ':' | '*' | '?' | '/' | '\\'))
            .collect();
        let cleaned = cleaned.trim_matches('\'').trim();
        let base = if cleaned.is_empty() { "Sheet" } else { cleaned };
        let taken = |candidate: &str| {
            self.sheets.iter().any(|sheet| sheet.name.eq_ignore_ascii_case(candidate))
        };

        let candidate = truncate(base, MAX_SHEET_NAME_LENGTH);
        if !taken(&candidate) {
            return candidate;
        }
        let mut counter = 2usize;
        loop {
            let suffix = format!(" ({counter})");
            let candidate = format!("{}{}", truncate(base, MAX_SHEET_NAME_LENGTH - suffix.len()), suffix);
            if !taken(&candidate) {
                return candidate;
            }
            counter += 1;
        }
    }

    /// Saves the workbook atomically: the package is written to a temporary
    /// file next to `path`, which is renamed over `path` once complete.
    pub fn save(&self, path: &Path) -> Result<(), SpreadsheetError> {
        let directory = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut file = NamedTempFile::new_in(directory)?;
        let mut writer = self.write_to(BufWriter::new(file.as_file_mut()))?;
        writer.flush()?;
        drop(writer);
        file.persist(path).map_err(|error| error.error)?;
        Ok(())
    }

    /// Writes the workbook as an `.xlsx` package.
    pub(crate) fn write_to<W: Write + Seek>(&self, writer: W) -> Result<W, SpreadsheetError> {
        let mut zip = ZipWriter::new(writer);
        let placeholder = [Worksheet { name: "Sheet1".to_owned(), rows: Vec::new() }];
        let sheets: &[Worksheet] = if self.sheets.is_empty() { &placeholder } else { &self.sheets };

        zip.add_part("[Content_Types].xml", &content_types_xml(sheets.len())?)?;
        zip.add_part("_rels/.rels", &root_relationships_xml()?)?;
        zip.add_part("xl/workbook.xml", &workbook_xml(sheets)?)?;
        zip.add_part("xl/_rels/workbook.xml.rels", &workbook_relationships_xml(sheets.len())?)?;
        zip.add_part("xl/styles.xml", &styles_xml()?)?;
        for (index, sheet) in sheets.iter().enumerate() {
            zip.add_part(&format!("xl/worksheets/sheet{}.xml", index + 1), &worksheet_xml(sheet)?)?;
        }
        Ok(zip.finish()?)
    }
}

fn truncate(text: &str, length: usize) -> String {
    text.chars().take(length).collect()
}

fn content_types_xml(sheet_count: usize) -> Result<Vec<u8>, SpreadsheetError> {
    let mut writer = Writer::new(Vec::new());
    writer.declaration()?;
    writer.open("Types", &[("xmlns", NS_CONTENT_TYPES)])?;
    writer.empty("Default", &[("Extension", "rels"), ("ContentType", "application/vnd.openxmlformats-package.relationships+xml")])?;
    writer.empty("Default", &[("Extension", "xml"), ("ContentType", "application/xml")])?;
    writer.empty("Override", &[("PartName", "/xl/workbook.xml"), ("ContentType", CONTENT_WORKBOOK)])?;
    writer.empty("Override", &[("PartName", "/xl/styles.xml"), ("ContentType", CONTENT_STYLES)])?;
    for index in 1..=sheet_count {
        let part_name = format!("/xl/worksheets/sheet{index}.xml");
        writer.empty("Override", &[("PartName", part_name.as_str()), ("ContentType", CONTENT_WORKSHEET)])?;
    }
    writer.close("Types")?;
    Ok(writer.into_inner())
}

fn root_relationships_xml() -> Result<Vec<u8>, SpreadsheetError> {
    let mut writer = Writer::new(Vec::new());
    writer.declaration()?;
    writer.open("Relationships", &[("xmlns", NS_PACKAGE_RELATIONSHIPS)])?;
    writer.empty("Relationship", &[("Id", "rId1"), ("Type", TYPE_OFFICE_DOCUMENT), ("Target", "xl/workbook.xml")])?;
    writer.close("Relationships")?;
    Ok(writer.into_inner())
}

fn workbook_xml(sheets: &[Worksheet]) -> Result<Vec<u8>, SpreadsheetError> {
    let mut writer = Writer::new(Vec::new());
    writer.declaration()?;
    writer.open("workbook", &[("xmlns", NS_MAIN), ("xmlns:r", NS_RELATIONSHIPS)])?;
    writer.empty("workbookPr", &[("date1904", "0")])?;
    writer.open("sheets", &[])?;
    for (index, sheet) in sheets.iter().enumerate() {
        let sheet_id = (index + 1).to_string();
        let relationship_id = format!("rId{}", index + 1);
        writer.empty("sheet", &[("name", sheet.name.as_str()), ("sheetId", sheet_id.as_str()), ("r:id", relationship_id.as_str())])?;
    }
    writer.close("sheets")?;
    writer.close("workbook")?;
    Ok(writer.into_inner())
}

fn workbook_relationships_xml(sheet_count: usize) -> Result<Vec<u8>, SpreadsheetError> {
    let mut writer = Writer::new(Vec::new());
    writer.declaration()?;
    writer.open("Relationships", &[("xmlns", NS_PACKAGE_RELATIONSHIPS)])?;
    for index in 1..=sheet_count {
        let id = format!("rId{index}");
        let target = format!("worksheets/sheet{index}.xml");
        writer.empty("Relationship", &[("Id", id.as_str()), ("Type", TYPE_WORKSHEET), ("Target", target.as_str())])?;
    }
    let styles_id = format!("rId{}", sheet_count + 1);
    writer.empty("Relationship", &[("Id", styles_id.as_str()), ("Type", TYPE_STYLES), ("Target", "styles.xml")])?;
    writer.close("Relationships")?;
    Ok(writer.into_inner())
}

fn styles_xml() -> Result<Vec<u8>, SpreadsheetError> {
    let mut writer = Writer::new(Vec::new());
    writer.declaration()?;
    writer.open("styleSheet", &[("xmlns", NS_MAIN)])?;

    writer.open("fonts", &[("count", "1")])?;
    writer.open("font", &[])?;
    writer.empty("sz", &[("val", "11")])?;
    writer.empty("name", &[("val", "Calibri")])?;
    writer.close("font")?;
    writer.close("fonts")?;

    writer.open("fills", &[("count", "2")])?;
    for pattern in ["none", "gray125"] {
        writer.open("fill", &[])?;
        writer.empty("patternFill", &[("patternType", pattern)])?;
        writer.close("fill")?;
    }
    writer.close("fills")?;

    writer.open("borders", &[("count", "1")])?;
    writer.open("border", &[])?;
    for side in ["left", "right", "top", "bottom", "diagonal"] {
        writer.empty(side, &[])?;
    }
    writer.close("border")?;
    writer.close("borders")?;

    writer.open("cellStyleXfs", &[("count", "1")])?;
    writer.empty("xf", &[("numFmtId", "0"), ("fontId", "0"), ("fillId", "0"), ("borderId", "0")])?;
    writer.close("cellStyleXfs")?;

    // general, date, date-time, time
    writer.open("cellXfs", &[("count", "4")])?;
    writer.empty("xf", &[("numFmtId", "0"), ("fontId", "0"), ("fillId", "0"), ("borderId", "0"), ("xfId", "0")])?;
    for format_id in ["14", "22", "21"] {
        writer.empty("xf", &[
            ("numFmtId", format_id),
            ("fontId", "0"),
            ("fillId", "0"),
            ("borderId", "0"),
            ("xfId", "0"),
            ("applyNumberFormat", "1"),
        ])?;
    }
    writer.close("cellXfs")?;

    writer.open("cellStyles", &[("count", "1")])?;
    writer.empty("cellStyle", &[("name", "Normal"), ("xfId", "0"), ("builtinId", "0")])?;
    writer.close("cellStyles")?;

    writer.close("styleSheet")?;
    Ok(writer.into_inner())
}

fn worksheet_xml(sheet: &Worksheet) -> Result<Vec<u8>, SpreadsheetError> {
    let mut writer = Writer::new(Vec::new());
    writer.declaration()?;
    writer.open("worksheet", &[("xmlns", NS_MAIN)])?;
    writer.open("sheetData", &[])?;
    for (row_index, row) in sheet.rows.iter().enumerate() {
        if row.iter().all(CellValue::is_empty) {
            continue;
        }
        let row_number = (row_index + 1).to_string();
        writer.open("row", &[("r", row_number.as_str())])?;
        for (col_index, value) in row.iter().enumerate() {
            let reference = index_to_reference(row_index, col_index);
            write_cell(&mut writer, &reference, value)?;
        }
        writer.close("row")?;
    }
    writer.close("sheetData")?;
    writer.close("worksheet")?;
    Ok(writer.into_inner())
}

fn write_cell<W: Write>(writer: &mut Writer<W>, reference: &str, value: &CellValue) -> Result<(), SpreadsheetError> {
    let (style, number) = match value {
        CellValue::Empty => return Ok(()),
        CellValue::Text(text) if text.is_empty() => return Ok(()),
        CellValue::Text(text) => return write_inline_string(writer, reference, text),
        CellValue::Bool(flag) => {
            writer.open("c", &[("r", reference), ("t", "b")])?;
            writer.open("v", &[])?;
            writer.text(if *flag { "1" } else { "0" })?;
            writer.close("v")?;
            writer.close("c")?;
            return Ok(());
        }
        CellValue::Int(number) => (None, number.to_string()),
        CellValue::Float(number) if number.is_finite() => (None, number.to_string()),
        CellValue::Float(number) => {
            warn!(cell = reference, value = %number, "non-finite number written as text");
            return write_inline_string(writer, reference, &number.to_string());
        }
        CellValue::Date(date) => (Some(STYLE_DATE), date_to_serial(date).to_string()),
        CellValue::DateTime(datetime) => (Some(STYLE_DATETIME), datetime_to_serial(datetime).to_string()),
        CellValue::Time(time) => (Some(STYLE_TIME), time_to_serial(time).to_string()),
    };

    match style {
        Some(style) => writer.open("c", &[("r", reference), ("s", style)])?,
        None => writer.open("c", &[("r", reference)])?,
    }
    writer.open("v", &[])?;
    writer.text(&number)?;
    writer.close("v")?;
    writer.close("c")?;
    Ok(())
}

fn write_inline_string<W: Write>(writer: &mut Writer<W>, reference: &str, text: &str) -> Result<(), SpreadsheetError> {
    writer.open("c", &[("r", reference), ("t", "inlineStr")])?;
    writer.open("is", &[])?;
    if text.trim() != text {
        writer.open("t", &[("xml:space", "preserve")])?;
    } else {
        writer.open("t", &[])?;
    }
    writer.text(&escape_text(text))?;
    writer.close("t")?;
    writer.close("is")?;
    writer.close("c")?;
    Ok(())
}

/// Encodes characters that XML 1.0 cannot carry as `_xHHHH_`. The underscore
/// of a literal `_xHHHH_` sequence is itself encoded as `_x005F_`.
fn escape_text(text: &str) -> Cow<'_, str> {
    if !text.chars().any(is_illegal_xml_char) && !text.contains("_x") {
        return Cow::Borrowed(text);
    }
    let mut escaped = String::with_capacity(text.len() + 8);
    for (index, ch) in text.char_indices() {
        if is_encoded_char(&text.as_bytes()[index..]) {
            escaped.push_str("_x005F_");
        } else if is_illegal_xml_char(ch) {
            escaped.push_str(&format!("_x{:04X}_", ch as u32));
        } else {
            escaped.push(ch);
        }
    }
    Cow::Owned(escaped)
}

fn is_illegal_xml_char(ch: char) -> bool {
    matches!(ch, '\u{0}'..='\u{8}' | '\u{B}' | '\u{C}' | '\u{E}'..='\u{1F}' | '\u{FFFE}' | '\u{FFFF}')
}

fn is_encoded_char(bytes: &[u8]) -> bool {
    bytes.len() >= 7
        && bytes.starts_with(b"_x")
        && bytes[2..6].iter().all(u8::is_ascii_hexdigit)
        && bytes[6] == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spreadsheet::criteria::Criteria;
    use crate::spreadsheet::xlsx::XlsxSpreadsheet;
    use crate::spreadsheet::Spreadsheet;
    use chrono::NaiveDate;

    #[test]
    fn sheet_names_are_sanitized_and_unique() {
        let mut workbook = Workbook::new();
        workbook.add_sheet("Members");
        workbook.add_sheet("members");
        workbook.add_sheet("Q1/Q2: [draft]");
        workbook.add_sheet("");
        workbook.add_sheet("A very long sheet name that Excel would reject");

        let names: Vec<&str> = workbook.sheets().iter().map(|sheet| sheet.name.as_str()).collect();
        assert_eq!(names[0], "Members");
        assert_eq!(names[1], "members (2)");
        assert_eq!(names[2], "Q1Q2 draft");
        assert_eq!(names[3], "Sheet");
        assert_eq!(names[4].chars().count(), 31);
    }

    #[test]
    fn round_trip_through_xlsx() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("out.xlsx");
        let date = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();

        let mut workbook = Workbook::new();
        let index = workbook.add_sheet("Members");
        let sheet = workbook.sheet_mut(index).unwrap();
        sheet.push_row(vec!["member_id".into(), "value".into(), "joined".into(), "active".into()]);
        sheet.push_row(vec!["1001".into(), CellValue::Int(42), CellValue::Date(date), true.into()]);
        sheet.push_row(vec![]);
        sheet.push_row(vec!["1002".into(), CellValue::Float(2.5), CellValue::Empty, " padded ".into()]);
        workbook.save(&path).unwrap();

        let mut spreadsheet = XlsxSpreadsheet::open(&path).unwrap();
        assert_eq!(spreadsheet.sheet_names(), vec!["Members".to_owned()]);
        let sheets = spreadsheet.read_sheets(&Criteria::default()).unwrap();
        let rows = sheets[0].rows(None, None);
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0], vec!["member_id".into(), "value".into(), "joined".into(), "active".into()]);
        assert_eq!(rows[1], vec!["1001".into(), CellValue::Int(42), CellValue::Date(date), CellValue::Bool(true)]);
        assert!(rows[2].is_empty());
        assert_eq!(rows[3], vec!["1002".into(), CellValue::Float(2.5), CellValue::Empty, " padded ".into()]);
    }

    #[test]
    fn control_characters_are_encoded() {
        let mut workbook = Workbook::new();
        let index = workbook.add_sheet("Members");
        let sheet = workbook.sheet_mut(index).unwrap();
        sheet.push_row(vec!["a\u{1}b".into(), "tab\there".into(), "_x0041_".into()]);

        let cursor = workbook.write_to(std::io::Cursor::new(Vec::new())).unwrap();
        let mut zip = zip::ZipArchive::new(cursor).unwrap();
        let mut xml = Vec::new();
        std::io::Read::read_to_end(&mut zip.by_name("xl/worksheets/sheet1.xml").unwrap(), &mut xml).unwrap();

        assert!(!xml.contains(&0x01));
        let xml = String::from_utf8(xml).unwrap();
        assert!(xml.contains("a_x0001_b"));
        assert!(xml.contains("tab\there"));
        assert!(xml.contains("_x005F_x0041_"));
    }

    #[test]
    fn unusual_text_survives_a_round_trip() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("out.xlsx");
        let texts = ["a\u{1}b", "\u{1f}\u{b}", "café €", "_x0041_", "<tag> & \"quoted\""];

        let mut workbook = Workbook::new();
        let index = workbook.add_sheet("Members");
        workbook.sheet_mut(index).unwrap().push_row(texts.iter().map(|text| CellValue::from(*text)).collect());
        workbook.save(&path).unwrap();

        let mut spreadsheet = XlsxSpreadsheet::open(&path).unwrap();
        let sheets = spreadsheet.read_sheets(&Criteria::default()).unwrap();
        let rows = sheets[0].rows(None, None);
        let expected: Vec<CellValue> = texts.iter().map(|text| CellValue::from(*text)).collect();
        assert_eq!(rows, vec![expected]);
    }

    #[test]
    fn non_finite_numbers_are_written_as_text() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("out.xlsx");

        let mut workbook = Workbook::new();
        let index = workbook.add_sheet("Values");
        let sheet = workbook.sheet_mut(index).unwrap();
        sheet.push_row(vec![CellValue::Float(f64::NAN), CellValue::Float(f64::INFINITY), CellValue::Float(1.5)]);
        workbook.save(&path).unwrap();

        let mut spreadsheet = XlsxSpreadsheet::open(&path).unwrap();
        let sheets = spreadsheet.read_sheets(&Criteria::default()).unwrap();
        let rows = sheets[0].rows(None, None);
        assert_eq!(rows, vec![vec!["NaN".into(), "inf".into(), CellValue::Float(1.5)]]);
    }

    #[test]
    fn empty_workbook_still_has_a_sheet() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("empty.xlsx");
        Workbook::new().save(&path).unwrap();

        let spreadsheet = XlsxSpreadsheet::open(&path).unwrap();
        assert_eq!(spreadsheet.sheet_names(), vec!["Sheet1".to_owned()]);
    }
}
