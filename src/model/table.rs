use crate::error::PipelineError;
use crate::model::issue::ValidationIssue;
use crate::model::range::TableRegion;
use crate::spreadsheet::CellValue;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::ops::RangeInclusive;
use std::path::PathBuf;

/// Stable identity of a detected table across pipeline stages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TableOrigin {
    pub source_path: PathBuf,
    pub sheet_name: String,
    pub sheet_index: usize,
    /// Position of the table within its sheet (0-based)
    pub table_index: usize,
}

/// A table carved out of a sheet. Column indexes are source column indexes;
/// `header` and every data row are padded to `region.max_col + 1` cells.
#[derive(Clone, Debug, PartialEq)]
pub struct ExtractedTable {
    pub origin: TableOrigin,
    pub region: TableRegion,
    pub header_row_index: usize,
    pub header: Vec<CellValue>,
    pub rows: Vec<Vec<CellValue>>,
    /// Source row index of each data row
    pub row_indexes: Vec<usize>,
}

impl ExtractedTable {
    /// Source column indexes covered by the table.
    pub fn columns(&self) -> RangeInclusive<usize> {
        self.region.min_col..=self.region.max_col
    }

    pub fn contains_column(&self, column: usize) -> bool {
        self.columns().contains(&column)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Trimmed header text of a column (empty when the header cell is blank).
    pub fn header_text(&self, column: usize) -> String {
        self.header
            .get(column)
            .map(|value| value.to_text().trim().to_owned())
            .unwrap_or_default()
    }

    /// All data values of a column, top to bottom.
    pub fn column_values(&self, column: usize) -> Vec<CellValue> {
        self.rows
            .iter()
            .map(|row| row.get(column).cloned().unwrap_or_default())
            .collect()
    }
}

/// Where a source column ends up in the output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "field", rename_all = "lowercase")]
pub enum ColumnTarget {
    Field(String),
    Passthrough,
}

/// A source column resolved against the mapping, with its values materialized.
#[derive(Clone, Debug, PartialEq)]
pub struct MappedColumn {
    pub target: ColumnTarget,
    pub column: usize,
    pub header: String,
    pub values: Vec<CellValue>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FieldAssignment {
    pub field: String,
    pub column: Option<usize>,
    /// Aggregate detector score of the chosen column; `None` when set by a patch
    pub score: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PassthroughColumn {
    pub column: usize,
    /// Source header text
    pub header: String,
    /// Replacement header set by a mapping patch
    pub rename: Option<String>,
}

impl PassthroughColumn {
    /// Output header: the rename, then the source header, then `column_<n>` (1-based).
    pub fn output_header(&self) -> String {
        self.rename
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .map(str::to_owned)
            .or_else(|| Some(self.header.to_owned()).filter(|header| !header.is_empty()))
            .unwrap_or_else(|| format!("column_{}", self.column + 1))
    }
}

/// Column assignment of one table: one entry per canonical field in registry
/// order, plus the unclaimed columns.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ColumnMapping {
    pub fields: Vec<FieldAssignment>,
    pub passthrough: Vec<PassthroughColumn>,
}

/// Hook-supplied override applied after automatic mapping.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMappingPatch {
    pub assign: BTreeMap<String, usize>,
    pub rename_passthrough: BTreeMap<usize, String>,
    pub drop_passthrough: BTreeSet<usize>,
}

impl ColumnMappingPatch {
    pub fn assign(mut self, field: &str, column: usize) -> Self {
        self.assign.insert(field.to_owned(), column);
        self
    }

    pub fn rename(mut self, column: usize, name: &str) -> Self {
        self.rename_passthrough.insert(column, name.to_owned());
        self
    }

    pub fn drop(mut self, column: usize) -> Self {
        self.drop_passthrough.insert(column);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.assign.is_empty() && self.rename_passthrough.is_empty() && self.drop_passthrough.is_empty()
    }
}

impl ColumnMapping {
    pub fn column_for(&self, field: &str) -> Option<usize> {
        self.fields
            .iter()
            .find(|assignment| assignment.field == field)
            .and_then(|assignment| assignment.column)
    }

    pub fn field_for(&self, column: usize) -> Option<&str> {
        self.fields
            .iter()
            .find(|assignment| assignment.column == Some(column))
            .map(|assignment| assignment.field.as_str())
    }

    /// Merges a patch into the mapping.
    ///
    /// `assign` entries override automatic assignments: the column is released
    /// from any other field and from passthrough, and the field's previous
    /// column becomes passthrough. `drop_passthrough` then removes passthrough
    /// columns and `rename_passthrough` relabels the ones retained; entries for
    /// columns that are not passthrough are ignored.
    pub fn apply_patch(&mut self, patch: &ColumnMappingPatch, table: &ExtractedTable) -> Result<(), PipelineError> {
        for (field, column) in &patch.assign {
            if !self.fields.iter().any(|assignment| &assignment.field == field) {
                Err(PipelineError::InvalidPatch(format!("unknown field '{}'", field)))?
            }
            check_column(*column, table)?;
        }
        for column in patch.rename_passthrough.keys().chain(patch.drop_passthrough.iter()) {
            check_column(*column, table)?;
        }

        for (field, column) in &patch.assign {
            let column = *column;
            let mut released = None;
            for assignment in self.fields.iter_mut() {
                if &assignment.field == field {
                    released = assignment.column.filter(|previous| *previous != column);
                    assignment.column = Some(column);
                    assignment.score = None;
                } else if assignment.column == Some(column) {
                    assignment.column = None;
                    assignment.score = None;
                }
            }
            self.passthrough.retain(|passthrough| passthrough.column != column);
            if let Some(previous) = released {
                self.passthrough.push(PassthroughColumn {
                    column: previous,
                    header: table.header_text(previous),
                    rename: None,
                });
            }
        }

        self.passthrough
            .retain(|passthrough| !patch.drop_passthrough.contains(&passthrough.column));
        for passthrough in self.passthrough.iter_mut() {
            if let Some(name) = patch.rename_passthrough.get(&passthrough.column) {
                passthrough.rename = Some(name.to_owned());
            }
        }
        self.passthrough.sort_by_key(|passthrough| passthrough.column);
        Ok(())
    }

    /// Resolves the mapping against the table's data.
    pub fn mapped_columns(&self, table: &ExtractedTable) -> Vec<MappedColumn> {
        let fields = self.fields.iter().filter_map(|assignment| {
            assignment.column.map(|column| MappedColumn {
                target: ColumnTarget::Field(assignment.field.to_owned()),
                column,
                header: table.header_text(column),
                values: table.column_values(column),
            })
        });
        let passthrough = self.passthrough.iter().map(|passthrough| MappedColumn {
            target: ColumnTarget::Passthrough,
            column: passthrough.column,
            header: passthrough.output_header(),
            values: table.column_values(passthrough.column),
        });
        fields.chain(passthrough).collect()
    }
}

fn check_column(column: usize, table: &ExtractedTable) -> Result<(), PipelineError> {
    if table.contains_column(column) {
        Ok(())
    } else {
        Err(PipelineError::InvalidPatch(format!(
            "column index {} is outside the table columns {}..={}",
            column, table.region.min_col, table.region.max_col
        )))
    }
}

/// A canonical field's values after transforms.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NormalizedField {
    pub name: String,
    pub header: String,
    /// Source column, `None` when the field was not mapped
    pub column: Option<usize>,
    pub values: Vec<CellValue>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NormalizedPassthrough {
    pub column: usize,
    pub header: String,
    pub values: Vec<CellValue>,
}

/// A table ready for writing: every canonical field in registry order,
/// retained passthrough columns and the issues found while validating.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NormalizedTable {
    pub origin: TableOrigin,
    pub region: TableRegion,
    pub row_count: usize,
    pub fields: Vec<NormalizedField>,
    pub passthrough: Vec<NormalizedPassthrough>,
    pub issues: Vec<ValidationIssue>,
}

impl NormalizedTable {
    pub fn field(&self, name: &str) -> Option<&NormalizedField> {
        self.fields.iter().find(|field| field.name == name)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn table(header: &[&str], rows: &[&[&str]]) -> ExtractedTable {
        let to_row = |cells: &[&str]| -> Vec<CellValue> {
            cells.iter().map(|cell| if cell.is_empty() { CellValue::Empty } else { CellValue::from(*cell) }).collect()
        };
        let width = header.len();
        ExtractedTable {
            origin: TableOrigin {
                source_path: PathBuf::from("input.xlsx"),
                sheet_name: "Sheet1".to_owned(),
                sheet_index: 0,
                table_index: 0,
            },
            region: TableRegion { min_row: 0, max_row: rows.len(), min_col: 0, max_col: width - 1 },
            header_row_index: 0,
            header: to_row(header),
            rows: rows.iter().map(|row| to_row(row)).collect(),
            row_indexes: (1..=rows.len()).collect(),
        }
    }

    fn mapping(fields: &[(&str, Option<usize>)], passthrough: &[usize], table: &ExtractedTable) -> ColumnMapping {
        ColumnMapping {
            fields: fields
                .iter()
                .map(|(field, column)| FieldAssignment { field: field.to_string(), column: *column, score: Some(1.0) })
                .collect(),
            passthrough: passthrough
                .iter()
                .map(|column| PassthroughColumn { column: *column, header: table.header_text(*column), rename: None })
                .collect(),
        }
    }

    #[test]
    fn assign_overrides_automatic_mapping() {
        let table = table(&["Name", "Mail", "Contact"], &[&["a", "a@x", "b@x"]]);
        let mut mapping = mapping(&[("name", Some(0)), ("email", Some(1))], &[2], &table);

        mapping.apply_patch(&ColumnMappingPatch::default().assign("email", 2), &table).unwrap();

        assert_eq!(mapping.column_for("email"), Some(2));
        assert_eq!(mapping.column_for("name"), Some(0));
        assert_eq!(mapping.passthrough.len(), 1);
        assert_eq!(mapping.passthrough[0].column, 1);
        assert_eq!(mapping.passthrough[0].header, "Mail");
    }

    #[test]
    fn assign_releases_column_from_other_field() {
        let table = table(&["Name", "Mail"], &[&["a", "a@x"]]);
        let mut mapping = mapping(&[("name", Some(0)), ("email", Some(1))], &[], &table);

        mapping.apply_patch(&ColumnMappingPatch::default().assign("email", 0), &table).unwrap();

        assert_eq!(mapping.column_for("email"), Some(0));
        assert_eq!(mapping.column_for("name"), None);
        assert_eq!(mapping.passthrough.iter().map(|it| it.column).collect::<Vec<_>>(), vec![1]);
        let columns: BTreeSet<usize> = mapping.fields.iter().filter_map(|it| it.column).collect();
        assert_eq!(columns.len(), 1);
    }

    #[test]
    fn drop_and_rename_passthrough() {
        let table = table(&["Name", "", "Notes", "Extra"], &[&["a", "b", "c", "d"]]);
        let mut mapping = mapping(&[("name", Some(0))], &[1, 2, 3], &table);

        let patch = ColumnMappingPatch::default().drop(3).rename(2, "Remarks").rename(0, "ignored");
        mapping.apply_patch(&patch, &table).unwrap();

        let headers: Vec<String> = mapping.passthrough.iter().map(PassthroughColumn::output_header).collect();
        assert_eq!(headers, vec!["column_2".to_owned(), "Remarks".to_owned()]);
        assert_eq!(mapping.field_for(0), Some("name"));
    }

    #[test]
    fn rejects_unknown_field_and_out_of_range_column() {
        let table = table(&["Name"], &[&["a"]]);
        let mut mapping = mapping(&[("name", Some(0))], &[], &table);

        let unknown = mapping.apply_patch(&ColumnMappingPatch::default().assign("phone", 0), &table);
        assert!(matches!(unknown, Err(PipelineError::InvalidPatch(_))));

        let out_of_range = mapping.apply_patch(&ColumnMappingPatch::default().drop(5), &table);
        assert!(matches!(out_of_range, Err(PipelineError::InvalidPatch(_))));
        assert_eq!(mapping.column_for("name"), Some(0));
    }

    #[test]
    fn patch_deserializes_from_json() {
        let patch: ColumnMappingPatch = serde_json::from_str(r#"{"assign": {"email": 2}, "drop_passthrough": [4]}"#).unwrap();
        assert_eq!(patch.assign.get("email"), Some(&2));
        assert!(patch.drop_passthrough.contains(&4));
        assert!(patch.rename_passthrough.is_empty());
    }

    #[test]
    fn mapped_columns_materialize_values() {
        let table = table(&["Name", "Other"], &[&["a", "x"], &["b", ""]]);
        let mapping = mapping(&[("name", Some(0)), ("email", None)], &[1], &table);

        let columns = mapping.mapped_columns(&table);
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[0].target, ColumnTarget::Field("name".to_owned()));
        assert_eq!(columns[0].values, vec![CellValue::from("a"), CellValue::from("b")]);
        assert_eq!(columns[1].target, ColumnTarget::Passthrough);
        assert_eq!(columns[1].values, vec![CellValue::from("x"), CellValue::Empty]);
    }
}
