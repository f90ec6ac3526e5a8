//! # Registry
//!
//! Holds the canonical fields and every plugin callable of a run: row
//! detectors, column detectors, transforms, validators and lifecycle hooks.
//! Plugins are registered explicitly (see [`ConfigPackage`]), then
//! [`Registry::finalize`] orders each category by priority (descending, ties in
//! registration order) and freezes the registry for the rest of the run.
pub mod context;
pub mod package;

pub use context::ColumnContext;
pub use context::FieldContext;
pub use context::HookContext;
pub use context::HookOutcome;
pub use context::HookParam;
pub use context::RowContext;
pub use context::RowPatch;
pub use context::RunInfo;
pub use context::RunState;
pub use context::SheetInfo;
pub use context::TransformOutput;
pub use package::ConfigPackage;
pub use package::FnPlugin;
pub use package::Plugin;

use crate::error::ConfigError;
use crate::model::DetectorOutput;
use crate::model::FieldDef;
use crate::model::RowLabel;
use crate::model::ValidationIssue;
use crate::spreadsheet::CellValue;
use serde::Serialize;
use std::cmp::Reverse;
use std::fmt::Display;

pub type RowDetectorFn = Box<dyn Fn(&RowContext<'_>) -> DetectorOutput<RowLabel>>;
pub type ColumnDetectorFn = Box<dyn Fn(&ColumnContext<'_>) -> DetectorOutput<String>>;
pub type TransformFn = Box<dyn Fn(&FieldContext<'_>, &[CellValue]) -> anyhow::Result<TransformOutput>>;
pub type ValidatorFn = Box<dyn Fn(&FieldContext<'_>, &[CellValue]) -> anyhow::Result<Vec<ValidationIssue>>>;
pub type HookFn = Box<dyn Fn(&mut HookContext<'_>) -> anyhow::Result<HookOutcome>>;

/// Lifecycle points at which hooks are called.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum HookKind {
    #[serde(rename = "on_workbook_start")]
    WorkbookStart,
    #[serde(rename = "on_sheet_start")]
    SheetStart,
    #[serde(rename = "on_table_detected")]
    TableDetected,
    #[serde(rename = "on_table_mapped")]
    TableMapped,
    #[serde(rename = "on_table_written")]
    TableWritten,
    #[serde(rename = "on_before_save")]
    BeforeSave,
}

impl HookKind {
    pub const ALL: [HookKind; 6] = [
        HookKind::WorkbookStart,
        HookKind::SheetStart,
        HookKind::TableDetected,
        HookKind::TableMapped,
        HookKind::TableWritten,
        HookKind::BeforeSave,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            HookKind::WorkbookStart => "on_workbook_start",
            HookKind::SheetStart => "on_sheet_start",
            HookKind::TableDetected => "on_table_detected",
            HookKind::TableMapped => "on_table_mapped",
            HookKind::TableWritten => "on_table_written",
            HookKind::BeforeSave => "on_before_save",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl Display for HookKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered callable with its ordering keys.
pub struct Registered<T> {
    pub name: String,
    pub priority: i32,
    sequence: u64,
    pub item: T,
}

pub struct RowDetector {
    /// Label credited with bare-float scores
    pub label: Option<RowLabel>,
    pub detect: RowDetectorFn,
}

pub struct ColumnDetector {
    /// Field credited with bare-float scores
    pub field: Option<String>,
    pub detect: ColumnDetectorFn,
}

pub struct Transform {
    pub field: String,
    pub apply: TransformFn,
}

pub struct Validator {
    pub field: String,
    pub validate: ValidatorFn,
}

pub struct Hook {
    pub kind: HookKind,
    pub requires: Vec<HookParam>,
    pub call: HookFn,
}

#[derive(Default)]
pub struct Registry {
    fields: Vec<FieldDef>,
    row_detectors: Vec<Registered<RowDetector>>,
    column_detectors: Vec<Registered<ColumnDetector>>,
    transforms: Vec<Registered<Transform>>,
    validators: Vec<Registered<Validator>>,
    hooks: Vec<Registered<Hook>>,
    sequence: u64,
    finalized: bool,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_field(&mut self, field: FieldDef) -> Result<(), ConfigError> {
        self.check_open(&field.name)?;
        if field.name.trim().is_empty() {
            Err(ConfigError::InvalidPlugin {
                plugin: "field".to_owned(),
                message: "field name must not be empty".to_owned(),
            })?
        }
        if self.field(&field.name).is_some() {
            Err(ConfigError::DuplicateField(field.name.to_owned()))?
        }
        self.fields.push(field);
        Ok(())
    }

    pub fn register_row_detector<F>(&mut self, name: &str, label: Option<RowLabel>, priority: i32, detect: F) -> Result<(), ConfigError>
    where
        F: Fn(&RowContext<'_>) -> DetectorOutput<RowLabel> + 'static,
    {
        self.check_plugin(name)?;
        let item = RowDetector { label, detect: Box::new(detect) };
        let registered = self.entry(name, priority, item);
        self.row_detectors.push(registered);
        Ok(())
    }

    pub fn register_column_detector<F>(&mut self, name: &str, field: Option<&str>, priority: i32, detect: F) -> Result<(), ConfigError>
    where
        F: Fn(&ColumnContext<'_>) -> DetectorOutput<String> + 'static,
    {
        self.check_plugin(name)?;
        if let Some(field) = field {
            self.check_field(name, field)?;
        }
        let item = ColumnDetector { field: field.map(str::to_owned), detect: Box::new(detect) };
        let registered = self.entry(name, priority, item);
        self.column_detectors.push(registered);
        Ok(())
    }

    pub fn register_transform<F>(&mut self, name: &str, field: &str, priority: i32, apply: F) -> Result<(), ConfigError>
    where
        F: Fn(&FieldContext<'_>, &[CellValue]) -> anyhow::Result<TransformOutput> + 'static,
    {
        self.check_plugin(name)?;
        self.check_field(name, field)?;
        let item = Transform { field: field.to_owned(), apply: Box::new(apply) };
        let registered = self.entry(name, priority, item);
        self.transforms.push(registered);
        Ok(())
    }

    pub fn register_validator<F>(&mut self, name: &str, field: &str, priority: i32, validate: F) -> Result<(), ConfigError>
    where
        F: Fn(&FieldContext<'_>, &[CellValue]) -> anyhow::Result<Vec<ValidationIssue>> + 'static,
    {
        self.check_plugin(name)?;
        self.check_field(name, field)?;
        let item = Validator { field: field.to_owned(), validate: Box::new(validate) };
        let registered = self.entry(name, priority, item);
        self.validators.push(registered);
        Ok(())
    }

    pub fn register_hook<F>(&mut self, name: &str, kind: HookKind, priority: i32, requires: &[HookParam], call: F) -> Result<(), ConfigError>
    where
        F: Fn(&mut HookContext<'_>) -> anyhow::Result<HookOutcome> + 'static,
    {
        self.check_plugin(name)?;
        let item = Hook { kind, requires: requires.to_vec(), call: Box::new(call) };
        let registered = self.entry(name, priority, item);
        self.hooks.push(registered);
        Ok(())
    }

    /// Orders every category by priority (descending), then registration
    /// order, and freezes the registry.
    pub fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.row_detectors.sort_by_key(|entry| (Reverse(entry.priority), entry.sequence));
        self.column_detectors.sort_by_key(|entry| (Reverse(entry.priority), entry.sequence));
        self.transforms.sort_by_key(|entry| (Reverse(entry.priority), entry.sequence));
        self.validators.sort_by_key(|entry| (Reverse(entry.priority), entry.sequence));
        self.hooks.sort_by_key(|entry| (Reverse(entry.priority), entry.sequence));
        self.finalized = true;
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Canonical fields in declaration order.
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn row_detectors(&self) -> &[Registered<RowDetector>] {
        &self.row_detectors
    }

    pub fn column_detectors(&self) -> &[Registered<ColumnDetector>] {
        &self.column_detectors
    }

    pub fn transforms_for<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a Registered<Transform>> {
        self.transforms.iter().filter(move |entry| entry.item.field == field)
    }

    pub fn validators_for<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a Registered<Validator>> {
        self.validators.iter().filter(move |entry| entry.item.field == field)
    }

    pub fn hooks(&self, kind: HookKind) -> impl Iterator<Item = &Registered<Hook>> {
        self.hooks.iter().filter(move |entry| entry.item.kind == kind)
    }

    pub fn has_hook(&self, kind: HookKind, name: &str) -> bool {
        self.hooks(kind).any(|entry| entry.name == name)
    }

    fn entry<T>(&mut self, name: &str, priority: i32, item: T) -> Registered<T> {
        self.sequence += 1;
        Registered {
            name: name.to_owned(),
            priority,
            sequence: self.sequence,
            item,
        }
    }

    fn check_open(&self, name: &str) -> Result<(), ConfigError> {
        if self.finalized {
            Err(ConfigError::RegistryFrozen(name.to_owned()))?
        }
        Ok(())
    }

    fn check_plugin(&self, name: &str) -> Result<(), ConfigError> {
        self.check_open(name)?;
        if name.trim().is_empty() {
            Err(ConfigError::InvalidPlugin {
                plugin: name.to_owned(),
                message: "plugin name must not be empty".to_owned(),
            })?
        }
        Ok(())
    }

    fn check_field(&self, plugin: &str, field: &str) -> Result<(), ConfigError> {
        if self.field(field).is_none() {
            Err(ConfigError::UnknownField {
                plugin: plugin.to_owned(),
                field: field.to_owned(),
            })?
        }
        Ok(())
    }
}
