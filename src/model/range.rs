use crate::spreadsheet::reference::col_to_letters;
use serde::Serialize;
use serde::Serializer;
use std::fmt::Display;

/// Bounding box of a detected table in source coordinates (0-based, inclusive).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TableRegion {
    pub min_row: usize,
    pub max_row: usize,
    pub min_col: usize,
    pub max_col: usize,
}

impl TableRegion {
    /// Number of rows covered, header row included.
    pub fn height(&self) -> usize {
        self.max_row - self.min_row + 1
    }

    pub fn width(&self) -> usize {
        self.max_col - self.min_col + 1
    }
}

impl Display for TableRegion {
    /// Renders the region as an A1-style range (e.g. "A3:D9").
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{}:{}{}",
            col_to_letters(self.min_col),
            self.min_row + 1,
            col_to_letters(self.max_col),
            self.max_row + 1
        )
    }
}

impl Serialize for TableRegion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
