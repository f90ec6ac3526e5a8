use crate::spreadsheet::cell::Cell;
use crate::spreadsheet::cell::CellValue;
use std::collections::BTreeSet;

/// Represents a sheet read from a spreadsheet file, holding its non-empty cells.
pub(crate) struct Sheet {
    /// Source file name
    pub(crate) file_name: String,
    /// Sheet name
    pub(crate) name: String,
    /// Position of the sheet in its workbook (0-based)
    pub(crate) index: usize,
    /// All non-empty cells in the sheet
    pub(crate) cells: Vec<Cell>,
}

impl Sheet {
    /// Creates a new empty sheet.
    pub(super) fn new(file_name: &str, name: &str, index: usize) -> Self {
        Self {
            file_name: file_name.to_owned(),
            name: name.to_owned(),
            index,
            cells: Vec::new(),
        }
    }

    /// Returns true if the sheet contains no cells.
    pub(crate) fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub(super) fn push(&mut self, cell: Cell) {
        self.cells.push(cell);
    }

    /// Orders cells by position once all cells have been added.
    pub(super) fn finish(&mut self) {
        self.cells.sort_by_key(|cell| (cell.row, cell.col));
    }

    /// Materializes the sheet as rows of values.
    ///
    /// Leading empty rows are kept so row indexes match the source. Once content
    /// has been seen, a run of empty rows (columns) longer than the given limit
    /// cuts the extent at the start of that run. Every row is trimmed to its last
    /// non-empty cell.
    pub(crate) fn rows(&self, max_empty_rows_run: Option<usize>, max_empty_cols_run: Option<usize>) -> Vec<Vec<CellValue>> {
        let values: Vec<(usize, usize, CellValue)> = self.cells
            .iter()
            .map(|cell| (cell.row, cell.col, cell.to_value()))
            .filter(|(_, _, value)| !value.is_empty())
            .collect();

        let occupied_cols: BTreeSet<usize> = values.iter().map(|(_, col, _)| *col).collect();
        let col_limit = extent_limit(&occupied_cols, max_empty_cols_run);
        let occupied_rows: BTreeSet<usize> = values
            .iter()
            .filter(|(_, col, _)| *col < col_limit)
            .map(|(row, _, _)| *row)
            .collect();
        let row_limit = extent_limit(&occupied_rows, max_empty_rows_run);

        let row_count = occupied_rows.range(..row_limit).next_back().map(|row| row + 1).unwrap_or(0);
        let mut rows = vec![Vec::<CellValue>::new(); row_count];
        for (row, col, value) in values {
            if row < row_count && col < col_limit {
                let record = &mut rows[row];
                if record.len() <= col {
                    record.resize(col + 1, CellValue::Empty);
                }
                record[col] = value;
            }
        }
        rows
    }
}

/// Returns the exclusive index at which the extent is cut: the start of the
/// first gap (after the first occupied index) longer than `max_run`.
fn extent_limit(occupied: &BTreeSet<usize>, max_run: Option<usize>) -> usize {
    let mut previous: Option<usize> = None;
    for &index in occupied {
        if let (Some(previous), Some(max_run)) = (previous, max_run) {
            if index - previous - 1 > max_run {
                return previous + 1;
            }
        }
        previous = Some(index);
    }
    previous.map(|index| index + 1).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spreadsheet::cell::CellType;

    fn push(sheet: &mut Sheet, row: usize, col: usize, value: &str) {
        sheet.push(Cell {
            row,
            col,
            kind: CellType::InlineString,
            value: value.to_owned(),
        });
    }

    #[test]
    fn sheet_initial() {
        let sheet = Sheet::new("", "", 0);

        assert!(sheet.is_empty());
        assert!(sheet.rows(None, None).is_empty());
    }

    #[test]
    fn sheet_update() {
        let mut sheet = Sheet::new("", "", 0);
        push(&mut sheet, 3, 3, "d");
        push(&mut sheet, 1, 1, "a");
        push(&mut sheet, 1, 3, "b");
        push(&mut sheet, 3, 1, "c");
        sheet.finish();

        assert!(!sheet.is_empty());
        assert_eq!(sheet.cells[0].value, "a");
        assert_eq!(sheet.cells[3].value, "d");

        let rows = sheet.rows(None, None);
        assert_eq!(rows.len(), 4);
        assert!(rows[0].is_empty());
        assert_eq!(rows[1], vec![CellValue::Empty, "a".into(), CellValue::Empty, "b".into()]);
        assert!(rows[2].is_empty());
        assert_eq!(rows[3].len(), 4);
    }

    #[test]
    fn rows_are_trimmed_to_last_value() {
        let mut sheet = Sheet::new("", "", 0);
        push(&mut sheet, 0, 0, "a");
        push(&mut sheet, 0, 4, "  ");
        sheet.finish();

        assert_eq!(sheet.rows(None, None), vec![vec![CellValue::from("a")]]);
    }

    #[test]
    fn empty_row_run_cuts_extent() {
        let mut sheet = Sheet::new("", "", 0);
        push(&mut sheet, 2, 0, "a");
        push(&mut sheet, 4, 0, "b");
        push(&mut sheet, 9, 0, "c");
        sheet.finish();

        // the leading gap is kept, the 4-row gap exceeds the limit
        let rows = sheet.rows(Some(2), None);
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[4], vec![CellValue::from("b")]);

        assert_eq!(sheet.rows(Some(4), None).len(), 10);
    }

    #[test]
    fn empty_col_run_cuts_extent() {
        let mut sheet = Sheet::new("", "", 0);
        push(&mut sheet, 0, 1, "a");
        push(&mut sheet, 0, 2, "b");
        push(&mut sheet, 0, 6, "c");
        push(&mut sheet, 1, 6, "d");
        sheet.finish();

        let rows = sheet.rows(None, Some(1));
        assert_eq!(rows, vec![vec![CellValue::Empty, "a".into(), "b".into()]]);
    }
}
