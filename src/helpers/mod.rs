//! Low-level helpers shared by the spreadsheet readers and the workbook writer.

pub(crate) mod xml;
pub(crate) mod zip;
