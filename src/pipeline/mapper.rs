use crate::error::PipelineError;
use crate::manifest::ManifestContext;
use crate::model::ColumnMapping;
use crate::model::DetectorOutput;
use crate::model::ExtractedTable;
use crate::model::FieldAssignment;
use crate::model::FieldDef;
use crate::model::PassthroughColumn;
use crate::model::ScoreMap;
use crate::pipeline::ensure_finalized;
use crate::registry::ColumnContext;
use crate::registry::Registry;
use crate::spreadsheet::CellValue;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::debug;

/// Aggregate field scores of one source column.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ColumnScores {
    pub column: usize,
    pub header: String,
    pub scores: ScoreMap<String>,
    /// False for columns with neither header text nor values
    pub occupied: bool,
}

/// Scores the table's columns and assigns them to fields.
pub fn map_columns(registry: &Registry, manifest: &ManifestContext, table: &ExtractedTable) -> Result<ColumnMapping, PipelineError> {
    let scores = score_columns(registry, manifest, table)?;
    Ok(assign_columns(registry.fields(), &scores, manifest.engine.defaults.mapping_score_threshold))
}

/// Runs every column detector against every column of the table.
pub fn score_columns(registry: &Registry, manifest: &ManifestContext, table: &ExtractedTable) -> Result<Vec<ColumnScores>, PipelineError> {
    ensure_finalized(registry)?;
    let sample_size = manifest.engine.defaults.detector_column_sample_size;
    let mut columns = Vec::with_capacity(table.region.width());
    for column in table.columns() {
        let header = table.header_text(column);
        let sample = sample(table, column, sample_size);
        let mut scores = ScoreMap::new();
        for detector in registry.column_detectors() {
            let field = detector.item.field.as_deref().and_then(|name| registry.field(name));
            let context = ColumnContext {
                column_index: column,
                header: &header,
                sample: &sample,
                table,
                field,
                fields: registry.fields(),
                manifest,
            };
            match (detector.item.detect)(&context) {
                DetectorOutput::Scores(votes) => {
                    for (name, score) in votes {
                        if registry.field(&name).is_none() {
                            Err(PipelineError::UnknownFieldScore {
                                detector: detector.name.to_owned(),
                                field: name.to_owned(),
                            })?
                        }
                        scores.add(name, score);
                    }
                }
                DetectorOutput::Score(score) => {
                    let Some(field) = field else {
                        return Err(PipelineError::MissingField(detector.name.to_owned()));
                    };
                    scores.add(field.name.to_owned(), score);
                }
            }
        }
        debug!(table = table.origin.table_index, column, %header, ?scores, "column scored");
        columns.push(ColumnScores {
            column,
            occupied: !header.is_empty() || !sample.is_empty(),
            header,
            scores,
        });
    }
    Ok(columns)
}

/// First non-empty values of a column, top to bottom.
fn sample(table: &ExtractedTable, column: usize, size: usize) -> Vec<CellValue> {
    table
        .rows
        .iter()
        .filter_map(|row| row.get(column))
        .filter(|value| !value.is_empty())
        .take(size)
        .cloned()
        .collect()
}

/// Greedy assignment: fields, in declaration order, each claim the unclaimed
/// column with the highest score strictly above `threshold` (lowest column on
/// ties). Occupied columns no field claimed become passthrough.
pub fn assign_columns(fields: &[FieldDef], columns: &[ColumnScores], threshold: f64) -> ColumnMapping {
    let mut claimed = BTreeSet::new();
    let mut assignments = Vec::with_capacity(fields.len());
    for field in fields {
        let mut best: Option<(usize, f64)> = None;
        for column in columns.iter().filter(|column| !claimed.contains(&column.column)) {
            let score = column.scores.get(&field.name);
            if score > threshold && best.map(|(_, top)| score > top).unwrap_or(true) {
                best = Some((column.column, score));
            }
        }
        if let Some((column, _)) = best {
            claimed.insert(column);
        }
        assignments.push(FieldAssignment {
            field: field.name.to_owned(),
            column: best.map(|(column, _)| column),
            score: best.map(|(_, score)| score),
        });
    }

    let passthrough = columns
        .iter()
        .filter(|column| column.occupied && !claimed.contains(&column.column))
        .map(|column| PassthroughColumn {
            column: column.column,
            header: column.header.to_owned(),
            rename: None,
        })
        .collect();
    ColumnMapping {
        fields: assignments,
        passthrough,
    }
}
