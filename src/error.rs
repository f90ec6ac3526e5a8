use crate::pipeline::Stage;
use crate::registry::HookKind;
use crate::spreadsheet::SpreadsheetError;
use std::path::PathBuf;
use thiserror::Error;

/// Manifest or plugin contract violations. Always fatal, raised before processing.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Manifest '{0}' not found")]
    ManifestNotFound(PathBuf),

    #[error("Unsupported manifest format '{0}' (expected .json or .toml)")]
    UnsupportedManifestFormat(PathBuf),

    #[error("Manifest is missing required section '{0}'")]
    MissingSection(String),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("Field '{0}' is already registered")]
    DuplicateField(String),

    #[error("Plugin '{plugin}' refers to unknown field '{field}'")]
    UnknownField { plugin: String, field: String },

    #[error("Registry is finalized, cannot register '{0}'")]
    RegistryFrozen(String),

    #[error("Invalid plugin '{plugin}': {message}")]
    InvalidPlugin { plugin: String, message: String },

    #[error("Manifest lists unknown hook '{hook}' for {kind}")]
    UnknownHook { kind: HookKind, hook: String },
}

/// Problems with the source file.
#[derive(Error, Debug)]
pub enum InputError {
    #[error("Input file '{0}' not found")]
    NotFound(PathBuf),

    #[error("Unsupported input format '{0}'")]
    UnsupportedFormat(String),

    #[error("Workbook '{0}' contains no sheets")]
    EmptyWorkbook(String),

    #[error("No sheet matches '{0}'")]
    SheetNotFound(String),

    #[error("Cannot read input: {0}")]
    Unreadable(String),
}

impl From<SpreadsheetError> for InputError {
    fn from(error: SpreadsheetError) -> Self {
        match error {
            SpreadsheetError::UnsupportedFormat(name) => InputError::UnsupportedFormat(name),
            SpreadsheetError::SpreadsheetEmptyError(name) => InputError::EmptyWorkbook(name),
            SpreadsheetError::SheetNotFound(name) => InputError::SheetNotFound(name),
            error => InputError::Unreadable(error.to_string()),
        }
    }
}

/// A hook returned an error. Tagged with the stage and hook that failed.
#[derive(Error, Debug, Clone)]
#[error("Hook '{hook}' ({kind}) failed during {stage}: {message}")]
pub struct HookError {
    pub stage: Stage,
    pub kind: HookKind,
    pub hook: String,
    pub message: String,
}

/// Internal contract violations by plugins or patches.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Registry must be finalized before running the pipeline")]
    RegistryNotFinalized,

    #[error("Row detector '{0}' returned a bare score but was registered without a label")]
    MissingLabel(String),

    #[error("Column detector '{0}' returned a bare score but was registered without a field")]
    MissingField(String),

    #[error("Column detector '{detector}' scored unknown field '{field}'")]
    UnknownFieldScore { detector: String, field: String },

    #[error("Transform '{transform}' on field '{field}' returned {actual} values, expected {expected}")]
    TransformLength { transform: String, field: String, expected: usize, actual: usize },

    #[error("Transform '{transform}' on field '{field}' patched row {row}, table has {rows} rows")]
    TransformRowOutOfRange { transform: String, field: String, row: usize, rows: usize },

    #[error("Transform '{transform}' on field '{field}' failed: {message}")]
    TransformFailed { transform: String, field: String, message: String },

    #[error("Validator '{validator}' on field '{field}' failed: {message}")]
    ValidatorFailed { validator: String, field: String, message: String },

    #[error("Validator '{validator}' on field '{field}' reported row {row}, table has {rows} rows")]
    IssueRowOutOfRange { validator: String, field: String, row: usize, rows: usize },

    #[error("Hook '{hook}' requires missing context fields: {}", missing.join(", "))]
    MissingHookParameters { hook: String, missing: Vec<String> },

    #[error("Hook '{hook}' returned a mapping patch from {kind}; only on_table_mapped may patch")]
    UnexpectedPatch { hook: String, kind: HookKind },

    #[error("Invalid mapping patch: {0}")]
    InvalidPatch(String),

    #[error("Cannot write output: {0}")]
    Output(String),
}

/// Every error a run can end with.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Input(#[from] InputError),

    #[error("{0}")]
    Hook(#[from] HookError),

    #[error("{0}")]
    Pipeline(#[from] PipelineError),
}

impl EngineError {
    /// Stable error code reported in the run result.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Config(_) => "config_error",
            EngineError::Input(_) => "input_error",
            EngineError::Hook(_) => "hook_error",
            EngineError::Pipeline(_) => "pipeline_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spreadsheet_errors_become_input_errors() {
        let error: InputError = SpreadsheetError::SheetNotFound("Data".to_owned()).into();
        assert!(matches!(error, InputError::SheetNotFound(name) if name == "Data"));

        let error: InputError = SpreadsheetError::FileError("xl/workbook.xml".to_owned()).into();
        assert!(matches!(error, InputError::Unreadable(_)));
    }

    #[test]
    fn engine_error_codes() {
        let error: EngineError = ConfigError::DuplicateField("email".to_owned()).into();
        assert_eq!(error.code(), "config_error");
        assert_eq!(error.to_string(), "Field 'email' is already registered");

        let error: EngineError = PipelineError::MissingHookParameters {
            hook: "audit".to_owned(),
            missing: vec!["table".to_owned(), "mapping".to_owned()],
        }
        .into();
        assert_eq!(error.code(), "pipeline_error");
        assert_eq!(error.to_string(), "Hook 'audit' requires missing context fields: table, mapping");
    }
}
