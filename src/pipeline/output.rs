use crate::error::PipelineError;
use crate::manifest::WriterOptions;
use crate::model::NormalizedTable;
use crate::spreadsheet::CellValue;
use crate::spreadsheet::Workbook;
use serde::Serialize;
use std::collections::HashMap;

/// Where a table landed in the output workbook.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WrittenTable {
    pub sheet: String,
    /// Output row of the header (0-based)
    pub header_row: usize,
    /// Last output row of the table (the header row when it has no data)
    pub last_row: usize,
    pub columns: usize,
}

/// Output sheet of a source sheet, and how many tables it holds.
struct Placement {
    sheet: usize,
    tables: usize,
}

/// Lays normalized tables out in the output workbook.
///
/// Every source sheet that yields a table gets one output sheet of the same
/// name. Within it a row cursor only moves forward: each table writes its
/// header row then its data rows, separated from the previous table by
/// `blank_rows_between_tables` empty rows.
pub struct OutputWriter {
    options: WriterOptions,
    placements: HashMap<usize, Placement>,
}

impl OutputWriter {
    pub fn new(options: &WriterOptions) -> Self {
        Self {
            options: options.clone(),
            placements: HashMap::new(),
        }
    }

    pub fn write_table(&mut self, workbook: &mut Workbook, table: &NormalizedTable) -> Result<WrittenTable, PipelineError> {
        let origin = &table.origin;
        let placement = self
            .placements
            .entry(origin.sheet_index)
            .or_insert_with(|| Placement {
                sheet: workbook.add_sheet(&origin.sheet_name),
                tables: 0,
            });
        let sheet = workbook
            .sheet_mut(placement.sheet)
            .ok_or_else(|| PipelineError::Output(format!("output sheet #{} is missing", placement.sheet)))?;

        if placement.tables > 0 {
            for _ in 0..self.options.blank_rows_between_tables {
                sheet.push_row(Vec::new());
            }
        }
        placement.tables += 1;

        let append = self.options.append_unmapped_columns;
        let mut header: Vec<CellValue> = table.fields.iter().map(|field| CellValue::from(field.header.as_str())).collect();
        if append {
            header.extend(table.passthrough.iter().map(|column| CellValue::from(column.header.as_str())));
        }
        let columns = header.len();
        let header_row = sheet.row_count();
        sheet.push_row(header);

        for row in 0..table.row_count {
            let value = |values: &[CellValue]| values.get(row).cloned().unwrap_or_default();
            let mut cells: Vec<CellValue> = table.fields.iter().map(|field| value(&field.values)).collect();
            if append {
                cells.extend(table.passthrough.iter().map(|column| value(&column.values)));
            }
            sheet.push_row(cells);
        }

        Ok(WrittenTable {
            sheet: sheet.name.to_owned(),
            header_row,
            last_row: sheet.row_count() - 1,
            columns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NormalizedField;
    use crate::model::NormalizedPassthrough;
    use crate::model::TableOrigin;
    use crate::model::TableRegion;
    use std::path::PathBuf;

    fn normalized(sheet: &str, sheet_index: usize, table_index: usize, rows: &[(&str, i64, &str)]) -> NormalizedTable {
        NormalizedTable {
            origin: TableOrigin {
                source_path: PathBuf::from("in.xlsx"),
                sheet_name: sheet.to_owned(),
                sheet_index,
                table_index,
            },
            region: TableRegion { min_row: 0, max_row: rows.len(), min_col: 0, max_col: 2 },
            row_count: rows.len(),
            fields: vec![
                NormalizedField {
                    name: "member_id".to_owned(),
                    header: "Member ID".to_owned(),
                    column: Some(0),
                    values: rows.iter().map(|row| CellValue::from(row.0)).collect(),
                },
                NormalizedField {
                    name: "value".to_owned(),
                    header: "value".to_owned(),
                    column: Some(1),
                    values: rows.iter().map(|row| CellValue::from(row.1)).collect(),
                },
            ],
            passthrough: vec![NormalizedPassthrough {
                column: 2,
                header: "Notes".to_owned(),
                values: rows.iter().map(|row| CellValue::from(row.2)).collect(),
            }],
            issues: Vec::new(),
        }
    }

    #[test]
    fn tables_are_separated_by_blank_rows() {
        let mut workbook = Workbook::new();
        let mut writer = OutputWriter::new(&WriterOptions::default());

        let first = writer.write_table(&mut workbook, &normalized("Members", 0, 0, &[("1001", 42, "a"), ("1002", 24, "b")])).unwrap();
        let second = writer.write_table(&mut workbook, &normalized("Members", 0, 1, &[("1003", 7, "c")])).unwrap();

        assert_eq!(workbook.sheets().len(), 1);
        let rows = &workbook.sheets()[0].rows;
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0], vec![CellValue::from("Member ID"), CellValue::from("value")]);
        assert_eq!(rows[1], vec![CellValue::from("1001"), CellValue::Int(42)]);
        assert!(rows[3].is_empty());
        assert_eq!(rows[4][0], CellValue::from("Member ID"));
        assert_eq!((first.header_row, first.last_row), (0, 2));
        assert_eq!((second.header_row, second.last_row), (4, 5));
        assert_eq!(second.columns, 2);
    }

    #[test]
    fn passthrough_is_appended_when_enabled() {
        let mut workbook = Workbook::new();
        let options = WriterOptions {
            append_unmapped_columns: true,
            blank_rows_between_tables: 2,
        };
        let mut writer = OutputWriter::new(&options);
        writer.write_table(&mut workbook, &normalized("Members", 0, 0, &[("1001", 42, "a")])).unwrap();
        writer.write_table(&mut workbook, &normalized("Members", 0, 1, &[("1002", 24, "b")])).unwrap();

        let rows = &workbook.sheets()[0].rows;
        assert_eq!(rows[0].last(), Some(&CellValue::from("Notes")));
        assert_eq!(rows[1].last(), Some(&CellValue::from("a")));
        assert!(rows[2].is_empty() && rows[3].is_empty());
        assert_eq!(rows[4].len(), 3);
    }

    #[test]
    fn each_source_sheet_gets_its_own_output_sheet() {
        let mut workbook = Workbook::new();
        let mut writer = OutputWriter::new(&WriterOptions::default());
        writer.write_table(&mut workbook, &normalized("North", 0, 0, &[("1", 1, "")])).unwrap();
        let south = writer.write_table(&mut workbook, &normalized("South", 1, 0, &[("2", 2, "")])).unwrap();

        let names: Vec<&str> = workbook.sheets().iter().map(|sheet| sheet.name.as_str()).collect();
        assert_eq!(names, vec!["North", "South"]);
        assert_eq!(south.header_row, 0);
    }
}
