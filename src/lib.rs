//! # Sheet Engine
//!
//! Turns messy spreadsheets into normalized workbooks. A run reads an input
//! workbook (`.xlsx`, `.xlsm`, `.csv`, `.tsv`), finds the tables hidden in
//! each sheet, maps their columns onto the canonical fields declared in a
//! manifest, transforms and validates the values, and writes one clean table
//! layout per source sheet to an `.xlsx` output.
//!
//! ## Features
//!
//! - **Plugin registry**: row detectors, column detectors, transforms,
//!   validators and lifecycle hooks registered explicitly through a
//!   [`ConfigPackage`], ordered by priority
//! - **Table detection**: rows are scored as header, data or other, and tables
//!   are carved out between header rows
//! - **Column mapping**: greedy, score-based assignment of columns to fields,
//!   adjustable by `on_table_mapped` hooks
//! - **Declarative manifest**: JSON or TOML, with environment overrides
//! - **Run artifacts**: an NDJSON event log and a JSON run result
//!
//! ## Usage
//!
//! ```no_run
//! use sheet_engine::{run, ManifestSource, RunRequest};
//!
//! let request = RunRequest::new("members.xlsx", "normalized.xlsx", ManifestSource::Path("manifest.toml".into()))
//!     .with_logs_dir("logs");
//! let result = run(&request);
//! assert!(result.succeeded());
//! ```
pub mod error;
mod helpers;
pub mod manifest;
pub mod model;
pub mod pipeline;
pub mod plugins;
pub mod registry;
mod spreadsheet;
pub mod telemetry;

pub use crate::error::EngineError;
pub use crate::manifest::ManifestContext;
pub use crate::pipeline::run::build_registry;
pub use crate::pipeline::run::ManifestSource;
pub use crate::pipeline::run::RESULT_FILE_NAME;
pub use crate::pipeline::run;
pub use crate::pipeline::run_with;
pub use crate::pipeline::RunError;
pub use crate::pipeline::RunRequest;
pub use crate::pipeline::RunResult;
pub use crate::pipeline::RunStatus;
pub use crate::pipeline::Stage;
pub use crate::pipeline::TableSummary;
pub use crate::plugins::builtin_package;
pub use crate::registry::ConfigPackage;
pub use crate::registry::Registry;
pub use crate::spreadsheet::CellValue;
pub use crate::spreadsheet::Workbook;
pub use crate::spreadsheet::Worksheet;
