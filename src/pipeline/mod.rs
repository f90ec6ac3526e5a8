//! # Pipeline
//!
//! The detection, mapping and normalization stages, in the order a run
//! applies them to each sheet:
//!
//! 1. [`classifier`] scores every row against the row labels,
//! 2. [`segmenter`] carves tables out of the classified rows,
//! 3. [`mapper`] assigns table columns to canonical fields,
//! 4. [`hooks`] calls the lifecycle hooks (and applies mapping patches),
//! 5. [`normalize`] runs transforms and validators,
//! 6. [`output`] lays the normalized tables out in the output workbook.
//!
//! [`run`] drives the stages and turns every outcome into a [`RunResult`].
pub mod classifier;
pub mod hooks;
pub mod mapper;
pub mod normalize;
pub mod output;
pub mod run;
pub mod segmenter;

pub use classifier::RowClassification;
pub use run::run;
pub use run::run_with;
pub use run::RunError;
pub use run::RunRequest;
pub use run::RunResult;
pub use run::RunStatus;
pub use run::TableSummary;

use crate::error::PipelineError;
use crate::registry::Registry;
use serde::Serialize;
use std::fmt::Display;

/// Stage of a run, attached to events, hook errors and run errors.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Load,
    Classify,
    Segment,
    Map,
    Normalize,
    Write,
    Save,
}

impl Stage {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Stage::Load => "load",
            Stage::Classify => "classify",
            Stage::Segment => "segment",
            Stage::Map => "map",
            Stage::Normalize => "normalize",
            Stage::Write => "write",
            Stage::Save => "save",
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn ensure_finalized(registry: &Registry) -> Result<(), PipelineError> {
    if registry.is_finalized() {
        Ok(())
    } else {
        Err(PipelineError::RegistryNotFinalized)
    }
}
