//! Context structs handed to plugins, and the values plugins hand back.
use crate::manifest::ManifestContext;
use crate::model::ColumnMapping;
use crate::model::ColumnMappingPatch;
use crate::model::ExtractedTable;
use crate::model::FieldDef;
use crate::model::NormalizedTable;
use crate::pipeline::Stage;
use crate::registry::HookKind;
use crate::spreadsheet::CellValue;
use crate::spreadsheet::Workbook;
use crate::telemetry::EventEmitter;
use serde::Serialize;
use std::fmt::Display;
use std::path::Path;
use std::path::PathBuf;

/// Per-run JSON object shared by hooks for cross-stage bookkeeping.
pub type RunState = serde_json::Map<String, serde_json::Value>;

/// Identity and artifact locations of the current run.
#[derive(Clone, Debug, Serialize)]
pub struct RunInfo {
    pub run_id: String,
    pub input: PathBuf,
    pub output: PathBuf,
    pub logs_dir: PathBuf,
}

/// The sheet being processed.
#[derive(Clone, Debug, Serialize)]
pub struct SheetInfo {
    pub name: String,
    pub index: usize,
    pub source_path: PathBuf,
    /// Materialized row count (leading empty rows included)
    pub row_count: usize,
}

/// Passed to row detectors once per non-empty row.
pub struct RowContext<'a> {
    pub run: &'a RunInfo,
    pub row_index: usize,
    pub values: &'a [CellValue],
    pub sheet_name: &'a str,
    pub sheet_index: usize,
    pub source_path: &'a Path,
    pub manifest: &'a ManifestContext,
    pub fields: &'a [FieldDef],
}

impl RowContext<'_> {
    /// Values with empty cells skipped.
    pub fn non_empty(&self) -> impl Iterator<Item = &CellValue> {
        self.values.iter().filter(|value| !value.is_empty())
    }
}

/// Passed to column detectors once per table column.
pub struct ColumnContext<'a> {
    pub column_index: usize,
    /// Trimmed header text of the column
    pub header: &'a str,
    /// Sample of non-empty values, top to bottom
    pub sample: &'a [CellValue],
    pub table: &'a ExtractedTable,
    /// Field the detector was registered for, if any
    pub field: Option<&'a FieldDef>,
    pub fields: &'a [FieldDef],
    pub manifest: &'a ManifestContext,
}

/// Passed to transforms and validators of a mapped field.
pub struct FieldContext<'a> {
    pub field: &'a FieldDef,
    pub column_index: usize,
    pub header: &'a str,
    pub table: &'a ExtractedTable,
    pub manifest: &'a ManifestContext,
}

/// Replacement of one value by a transform.
#[derive(Clone, Debug, PartialEq)]
pub struct RowPatch {
    pub row_index: usize,
    pub value: CellValue,
}

/// What a transform returns: a full replacement vector (same length as the
/// input) or partial overrides.
#[derive(Clone, Debug, PartialEq)]
pub enum TransformOutput {
    Values(Vec<CellValue>),
    Patches(Vec<RowPatch>),
}

/// What a hook returns. Only `on_table_mapped` hooks may return a patch.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum HookOutcome {
    #[default]
    Continue,
    Patch(ColumnMappingPatch),
}

/// Optional context fields a hook may declare as required.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HookParam {
    Sheet,
    Table,
    Mapping,
    Normalized,
    Output,
}

impl HookParam {
    pub const fn as_str(&self) -> &'static str {
        match self {
            HookParam::Sheet => "sheet",
            HookParam::Table => "table",
            HookParam::Mapping => "mapping",
            HookParam::Normalized => "normalized",
            HookParam::Output => "output",
        }
    }
}

impl Display for HookParam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Passed to every hook. The optional fields are filled according to the
/// lifecycle point.
pub struct HookContext<'a> {
    pub run: &'a RunInfo,
    pub manifest: &'a ManifestContext,
    pub state: &'a mut RunState,
    pub events: &'a dyn EventEmitter,
    pub stage: Stage,
    pub kind: HookKind,
    pub sheet: Option<&'a SheetInfo>,
    pub table: Option<&'a ExtractedTable>,
    pub mapping: Option<&'a ColumnMapping>,
    pub normalized: Option<&'a NormalizedTable>,
    pub output: Option<&'a mut Workbook>,
}

impl HookContext<'_> {
    pub fn has(&self, param: HookParam) -> bool {
        match param {
            HookParam::Sheet => self.sheet.is_some(),
            HookParam::Table => self.table.is_some(),
            HookParam::Mapping => self.mapping.is_some(),
            HookParam::Normalized => self.normalized.is_some(),
            HookParam::Output => self.output.is_some(),
        }
    }

    /// Names of the required fields absent from this context.
    pub fn missing(&self, requires: &[HookParam]) -> Vec<String> {
        requires
            .iter()
            .filter(|param| !self.has(**param))
            .map(|param| param.as_str().to_owned())
            .collect()
    }
}
