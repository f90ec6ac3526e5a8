//! # Manifest
//!
//! The declarative schema and configuration of a run, loaded from JSON or TOML
//! through `figment`. Values under `engine` can be overridden with
//! `SHEET_ENGINE_`-prefixed environment variables, nested keys separated by
//! `__` (e.g. `SHEET_ENGINE_ENGINE__DEFAULTS__MAPPING_SCORE_THRESHOLD=0.8`).
use crate::error::ConfigError;
use crate::model::FieldDef;
use crate::plugins::transforms::is_builtin_transform;
use crate::registry::HookKind;
use figment::error::Kind;
use figment::providers::Env;
use figment::providers::Format;
use figment::providers::Json;
use figment::providers::Toml;
use figment::Figment;
use regex::Regex;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::HashSet;
use std::fmt::Display;
use std::path::Path;

/// Prefix of environment variables merged over the manifest file
pub const ENV_PREFIX: &str = "SHEET_ENGINE_";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SchemaVersion {
    Number(i64),
    Text(String),
}

impl Display for SchemaVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaVersion::Number(number) => write!(f, "{}", number),
            SchemaVersion::Text(text) => f.write_str(text),
        }
    }
}

/// The parsed manifest. Immutable for the duration of a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ManifestContext {
    pub schema_version: SchemaVersion,
    pub engine: EngineSection,
    pub columns: ColumnsSection,
    /// Hook kind (`on_table_mapped`, ...) => names of the hooks enabled for it
    #[serde(default)]
    pub hooks: BTreeMap<String, Vec<String>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub defaults: EngineDefaults,
    pub writer: WriterOptions,
    pub telemetry: TelemetryOptions,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineDefaults {
    /// A column is assigned to a field only when its score exceeds this value
    pub mapping_score_threshold: f64,
    /// Maximum data rows a single table may collect
    pub detector_max_table_rows: Option<usize>,
    /// Non-empty values sampled per column for column detectors
    pub detector_column_sample_size: usize,
    pub max_empty_rows_run: Option<usize>,
    pub max_empty_cols_run: Option<usize>,
    /// Abort the run on any hook failure
    pub hook_failures_fatal: bool,
}

impl Default for EngineDefaults {
    fn default() -> Self {
        Self {
            mapping_score_threshold: 0.5,
            detector_max_table_rows: None,
            detector_column_sample_size: 50,
            max_empty_rows_run: None,
            max_empty_cols_run: None,
            hook_failures_fatal: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterOptions {
    pub append_unmapped_columns: bool,
    pub blank_rows_between_tables: usize,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            append_unmapped_columns: false,
            blank_rows_between_tables: 1,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryOptions {
    /// Emit a `row_detector.contribution` event for every non-zero detector score
    pub detector_contributions: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnsSection {
    pub order: Vec<String>,
    #[serde(default)]
    pub meta: BTreeMap<String, ColumnMeta>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMeta {
    pub label: Option<String>,
    pub required: bool,
    pub synonyms: Vec<String>,
    pub pattern: Option<String>,
    pub transforms: Vec<String>,
}

impl ManifestContext {
    /// Builds a manifest with default engine settings for the given fields.
    pub fn new(fields: &[FieldDef]) -> Self {
        let order = fields.iter().map(|field| field.name.to_owned()).collect();
        let meta = fields
            .iter()
            .map(|field| {
                let meta = ColumnMeta {
                    label: field.label.to_owned(),
                    required: field.required,
                    synonyms: field.synonyms.to_owned(),
                    pattern: field.pattern.to_owned(),
                    transforms: field.transforms.to_owned(),
                };
                (field.name.to_owned(), meta)
            })
            .collect();
        Self {
            schema_version: SchemaVersion::Text("1".to_owned()),
            engine: EngineSection::default(),
            columns: ColumnsSection { order, meta },
            hooks: BTreeMap::new(),
        }
    }

    /// Loads a manifest file (`.json` or `.toml`), merging environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            Err(ConfigError::ManifestNotFound(path.to_path_buf()))?
        }
        let extension = path
            .extension()
            .and_then(|extension| extension.to_str())
            .map(|extension| extension.to_ascii_lowercase());
        let figment = match extension.as_deref() {
            Some("json") => Figment::from(Json::file(path)),
            Some("toml") => Figment::from(Toml::file(path)),
            _ => Err(ConfigError::UnsupportedManifestFormat(path.to_path_buf()))?,
        };
        Self::extract(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Self::extract(Figment::from(Json::string(text)))
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Self::extract(Figment::from(Toml::string(text)))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let manifest: ManifestContext = figment.extract().map_err(to_config_error)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Checks the cross-field rules serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::InvalidManifest(message));

        if self.schema_version.to_string().trim().is_empty() {
            return invalid("schema_version must not be empty".to_owned());
        }
        if self.columns.order.is_empty() {
            return invalid("columns.order must list at least one field".to_owned());
        }
        let mut seen = HashSet::new();
        for name in &self.columns.order {
            if name.trim().is_empty() {
                return invalid("columns.order contains an empty field name".to_owned());
            }
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::DuplicateField(name.to_owned()));
            }
        }
        for (name, meta) in &self.columns.meta {
            if !seen.contains(name.as_str()) {
                return invalid(format!("columns.meta.{} is not listed in columns.order", name));
            }
            if let Some(pattern) = &meta.pattern {
                if let Err(error) = Regex::new(pattern) {
                    return invalid(format!("columns.meta.{}.pattern: {}", name, error));
                }
            }
            if let Some(transform) = meta.transforms.iter().find(|transform| !is_builtin_transform(transform)) {
                return invalid(format!("columns.meta.{}.transforms: unknown transform '{}'", name, transform));
            }
        }

        let defaults = &self.engine.defaults;
        if !defaults.mapping_score_threshold.is_finite() {
            return invalid("engine.defaults.mapping_score_threshold must be finite".to_owned());
        }
        if defaults.detector_column_sample_size == 0 {
            return invalid("engine.defaults.detector_column_sample_size must be positive".to_owned());
        }
        if let Some(kind) = self.hooks.keys().find(|kind| HookKind::parse(kind).is_none()) {
            return invalid(format!("hooks.{} is not a hook kind", kind));
        }
        Ok(())
    }

    /// Canonical fields in `columns.order`, with their metadata.
    pub fn fields(&self) -> Vec<FieldDef> {
        self.columns
            .order
            .iter()
            .map(|name| {
                let meta = self.columns.meta.get(name).cloned().unwrap_or_default();
                FieldDef {
                    name: name.to_owned(),
                    label: meta.label,
                    required: meta.required,
                    synonyms: meta.synonyms,
                    pattern: meta.pattern,
                    transforms: meta.transforms,
                }
            })
            .collect()
    }

    /// Hooks enabled for a kind, when the manifest restricts it.
    pub fn hook_selection(&self, kind: HookKind) -> Option<&[String]> {
        self.hooks.get(kind.as_str()).map(Vec::as_slice)
    }
}

fn to_config_error(error: figment::Error) -> ConfigError {
    match &error.kind {
        Kind::MissingField(name) => {
            let mut path = error.path.clone();
            path.push(name.to_string());
            ConfigError::MissingSection(path.join("."))
        }
        _ => ConfigError::InvalidManifest(error.to_string()),
    }
}
