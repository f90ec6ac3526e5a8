use crate::error::PipelineError;
use crate::manifest::ManifestContext;
use crate::model::DetectorOutput;
use crate::model::RowKind;
use crate::model::RowLabel;
use crate::model::ScoreMap;
use crate::pipeline::ensure_finalized;
use crate::pipeline::Stage;
use crate::registry::Registry;
use crate::registry::RowContext;
use crate::registry::RunInfo;
use crate::registry::SheetInfo;
use crate::spreadsheet::CellValue;
use crate::telemetry::Event;
use crate::telemetry::EventEmitter;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

/// Minimum aggregate score for a row to classify as a header
pub const HEADER_SCORE_THRESHOLD: f64 = 0.5;

/// Minimum aggregate score for a row to classify as data
pub const DATA_SCORE_THRESHOLD: f64 = 0.5;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RowClassification {
    pub row_index: usize,
    pub kind: RowKind,
    pub scores: ScoreMap<RowLabel>,
}

/// Scores and classifies every row of a sheet, top to bottom.
pub fn classify_rows(
    registry: &Registry,
    manifest: &ManifestContext,
    run: &RunInfo,
    sheet: &SheetInfo,
    rows: &[Vec<CellValue>],
    events: &dyn EventEmitter,
) -> Result<Vec<RowClassification>, PipelineError> {
    ensure_finalized(registry)?;
    let contributions = manifest.engine.telemetry.detector_contributions;
    let mut classifications = Vec::with_capacity(rows.len());
    for (row_index, values) in rows.iter().enumerate() {
        let context = RowContext {
            run,
            row_index,
            values,
            sheet_name: &sheet.name,
            sheet_index: sheet.index,
            source_path: &sheet.source_path,
            manifest,
            fields: registry.fields(),
        };
        let scores = score_row(registry, &context, |detector, label, score| {
            if contributions {
                let payload = json!({
                    "sheet": sheet.name,
                    "row_index": row_index,
                    "detector": detector,
                    "label": label.as_str(),
                    "score": score,
                });
                events.emit(&Event::debug("row_detector.contribution", Stage::Classify, payload));
            }
        })?;
        let kind = decide(&scores);
        debug!(sheet = %sheet.name, row_index, ?kind, "row classified");
        classifications.push(RowClassification { row_index, kind, scores });
    }

    let count = |kind: RowKind| classifications.iter().filter(|row| row.kind == kind).count();
    let payload = json!({
        "sheet": sheet.name,
        "rows": classifications.len(),
        "header_rows": count(RowKind::Header),
        "data_rows": count(RowKind::Data),
    });
    events.emit(&Event::info("sheet.classified", Stage::Classify, payload));
    Ok(classifications)
}

/// Sums every row detector's votes for one row. Rows without any non-empty
/// value are never offered to detectors.
///
/// `observe` is called with each non-zero contribution.
pub fn score_row<F>(registry: &Registry, context: &RowContext<'_>, mut observe: F) -> Result<ScoreMap<RowLabel>, PipelineError>
where
    F: FnMut(&str, &RowLabel, f64),
{
    let mut scores = ScoreMap::new();
    if context.non_empty().next().is_none() {
        return Ok(scores);
    }
    for detector in registry.row_detectors() {
        match (detector.item.detect)(context) {
            DetectorOutput::Scores(votes) => {
                for (label, score) in votes {
                    if score.is_finite() && score != 0.0 {
                        observe(&detector.name, &label, score);
                    }
                    scores.add(label, score);
                }
            }
            DetectorOutput::Score(score) => {
                let Some(label) = &detector.item.label else {
                    return Err(PipelineError::MissingLabel(detector.name.to_owned()));
                };
                if score.is_finite() && score != 0.0 {
                    observe(&detector.name, label, score);
                }
                scores.add(label.clone(), score);
            }
        }
    }
    Ok(scores)
}

/// Kind of the best scoring label, when it reaches its threshold.
pub fn decide(scores: &ScoreMap<RowLabel>) -> RowKind {
    match scores.best() {
        Some((RowLabel::Header, score)) if score >= HEADER_SCORE_THRESHOLD => RowKind::Header,
        Some((RowLabel::Data, score)) if score >= DATA_SCORE_THRESHOLD => RowKind::Data,
        _ => RowKind::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::tests::manifest;
    use crate::telemetry::MemoryEmitter;
    use crate::telemetry::NoopEmitter;
    use std::path::PathBuf;

    fn run() -> RunInfo {
        RunInfo {
            run_id: "run-1".to_owned(),
            input: PathBuf::from("input.xlsx"),
            output: PathBuf::from("output.xlsx"),
            logs_dir: PathBuf::from("logs"),
        }
    }

    fn sheet(row_count: usize) -> SheetInfo {
        SheetInfo {
            name: "Sheet1".to_owned(),
            index: 0,
            source_path: PathBuf::from("input.xlsx"),
            row_count,
        }
    }

    fn row(cells: &[&str]) -> Vec<CellValue> {
        cells.iter().map(|cell| if cell.is_empty() { CellValue::Empty } else { CellValue::from(*cell) }).collect()
    }

    /// Header when the first cell is `H`, data when it is `D`.
    fn marker_registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .register_row_detector("marker", None, 0, |context| {
                let scores = match context.values.first().and_then(|value| value.as_str()) {
                    Some("H") => ScoreMap::new().with(RowLabel::Header, 1.0),
                    Some("D") => ScoreMap::new().with(RowLabel::Data, 1.0),
                    _ => ScoreMap::new().with(RowLabel::Other("note".to_owned()), 1.0),
                };
                DetectorOutput::Scores(scores)
            })
            .unwrap();
        registry
    }

    #[test]
    fn empty_rows_score_zero() {
        let mut registry = Registry::new();
        registry.register_row_detector("always", Some(RowLabel::Header), 0, |_| DetectorOutput::Score(5.0)).unwrap();
        registry.finalize();
        let manifest = manifest();
        let rows = vec![row(&[]), row(&["", " ", ""]), row(&["x"])];

        let classes = classify_rows(&registry, &manifest, &run(), &sheet(3), &rows, &NoopEmitter).unwrap();

        for classification in &classes[..2] {
            assert!(classification.scores.is_empty());
            assert_eq!(classification.scores.get(&RowLabel::Header), 0.0);
            assert_eq!(classification.scores.get(&RowLabel::Data), 0.0);
            assert_eq!(classification.kind, RowKind::Unknown);
        }
        assert_eq!(classes[2].kind, RowKind::Header);
    }

    #[test]
    fn scores_are_summed_and_negative_deltas_suppress() {
        let mut registry = Registry::new();
        registry
            .register_row_detector("tokens", None, 0, |_| {
                DetectorOutput::Scores(ScoreMap::new().with(RowLabel::Header, 0.6).with(RowLabel::Data, 0.4))
            })
            .unwrap();
        registry.register_row_detector("numbers", Some(RowLabel::Data), 0, |_| DetectorOutput::Score(0.5)).unwrap();
        registry
            .register_row_detector("suppress", None, 0, |_| {
                DetectorOutput::Scores(ScoreMap::new().with(RowLabel::Header, -0.3))
            })
            .unwrap();
        registry.finalize();
        let manifest = manifest();
        let classes = classify_rows(&registry, &manifest, &run(), &sheet(1), &[row(&["a", "1"])], &NoopEmitter).unwrap();

        let scores = &classes[0].scores;
        assert!((scores.get(&RowLabel::Header) - 0.3).abs() < 1e-9);
        assert!((scores.get(&RowLabel::Data) - 0.9).abs() < 1e-9);
        assert_eq!(classes[0].kind, RowKind::Data);
    }

    #[test]
    fn thresholds_and_extra_labels_yield_unknown() {
        assert_eq!(decide(&ScoreMap::new().with(RowLabel::Header, 0.49)), RowKind::Unknown);
        assert_eq!(decide(&ScoreMap::new().with(RowLabel::Header, 0.5)), RowKind::Header);
        assert_eq!(decide(&ScoreMap::new().with(RowLabel::Data, 0.3).with(RowLabel::Header, -1.0)), RowKind::Unknown);
        assert_eq!(
            decide(&ScoreMap::new().with(RowLabel::Other("total".to_owned()), 3.0).with(RowLabel::Header, 1.0)),
            RowKind::Unknown
        );
        // ties go to the label that sorts first
        assert_eq!(decide(&ScoreMap::new().with(RowLabel::Data, 1.0).with(RowLabel::Header, 1.0)), RowKind::Header);
    }

    #[test]
    fn non_finite_scores_are_dropped() {
        let mut registry = Registry::new();
        registry.register_row_detector("nan", Some(RowLabel::Header), 0, |_| DetectorOutput::Score(f64::NAN)).unwrap();
        registry.register_row_detector("inf", Some(RowLabel::Data), 0, |_| DetectorOutput::Score(f64::INFINITY)).unwrap();
        registry.register_row_detector("data", Some(RowLabel::Data), 0, |_| DetectorOutput::Score(0.7)).unwrap();
        registry.finalize();
        let manifest = manifest();
        let classes = classify_rows(&registry, &manifest, &run(), &sheet(1), &[row(&["x"])], &NoopEmitter).unwrap();
        assert_eq!(classes[0].scores.get(&RowLabel::Header), 0.0);
        assert_eq!(classes[0].kind, RowKind::Data);
    }

    #[test]
    fn detectors_see_the_run_and_sheet() {
        let mut registry = Registry::new();
        registry
            .register_row_detector("origin", Some(RowLabel::Header), 0, |context| {
                let known = context.run.run_id == "run-1" && context.sheet_name == "Sheet1";
                DetectorOutput::Score(if known { 1.0 } else { 0.0 })
            })
            .unwrap();
        registry.finalize();
        let manifest = manifest();
        let classes = classify_rows(&registry, &manifest, &run(), &sheet(1), &[row(&["x"])], &NoopEmitter).unwrap();
        assert_eq!(classes[0].kind, RowKind::Header);
    }

    #[test]
    fn bare_score_requires_a_label() {
        let mut registry = Registry::new();
        registry.register_row_detector("bare", None, 0, |_| DetectorOutput::Score(1.0)).unwrap();
        registry.finalize();
        let manifest = manifest();
        let result = classify_rows(&registry, &manifest, &run(), &sheet(1), &[row(&["x"])], &NoopEmitter);
        assert!(matches!(result, Err(PipelineError::MissingLabel(name)) if name == "bare"));
    }

    #[test]
    fn registry_must_be_finalized() {
        let registry = marker_registry();
        let manifest = manifest();
        let result = classify_rows(&registry, &manifest, &run(), &sheet(1), &[row(&["H"])], &NoopEmitter);
        assert!(matches!(result, Err(PipelineError::RegistryNotFinalized)));
    }

    #[test]
    fn contributions_are_reported_when_enabled() {
        let mut registry = marker_registry();
        registry.finalize();
        let mut manifest = manifest();
        manifest.engine.telemetry.detector_contributions = true;
        let events = MemoryEmitter::new();
        let rows = vec![row(&["H", "Name"]), row(&[]), row(&["D", "x"]), row(&["?"])];

        let classes = classify_rows(&registry, &manifest, &run(), &sheet(4), &rows, &events).unwrap();

        let kinds: Vec<RowKind> = classes.iter().map(|row| row.kind).collect();
        assert_eq!(kinds, vec![RowKind::Header, RowKind::Unknown, RowKind::Data, RowKind::Unknown]);
        let contributions = events.named("row_detector.contribution");
        assert_eq!(contributions.len(), 3);
        assert_eq!(contributions[0].payload["label"], "header");
        assert_eq!(contributions[2].payload["label"], "note");
        let summary = events.named("sheet.classified");
        assert_eq!(summary[0].payload["header_rows"], 1);
        assert_eq!(summary[0].payload["data_rows"], 1);
    }
}
