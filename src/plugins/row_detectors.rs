//! Built-in row detectors.
//!
//! * `header_keywords` votes for header rows whose cells spell canonical
//!   fields, and against data for the same rows.
//! * `text_shape` looks at the cell shapes alone: value-like cells (numbers,
//!   dates, text with digits or `@`, long text) suggest data, rows of short
//!   distinct labels suggest a header.
use crate::error::ConfigError;
use crate::manifest::ManifestContext;
use crate::model::normalize_header;
use crate::model::DetectorOutput;
use crate::model::RowLabel;
use crate::model::ScoreMap;
use crate::registry::Registry;
use crate::registry::RowContext;
use crate::spreadsheet::CellValue;
use std::collections::HashSet;

/// Text longer than this reads as a value rather than a label
const LONG_TEXT: usize = 40;

pub fn register_header_keywords(registry: &mut Registry, _manifest: &ManifestContext) -> Result<(), ConfigError> {
    let spellings: HashSet<String> = registry
        .fields()
        .iter()
        .flat_map(|field| field.spellings())
        .map(normalize_header)
        .filter(|spelling| !spelling.is_empty())
        .collect();
    registry.register_row_detector("header_keywords", None, 10, move |context| header_keywords(context, &spellings))
}

pub fn register_text_shape(registry: &mut Registry, _manifest: &ManifestContext) -> Result<(), ConfigError> {
    registry.register_row_detector("text_shape", None, 0, text_shape)
}

fn header_keywords(context: &RowContext<'_>, spellings: &HashSet<String>) -> DetectorOutput<RowLabel> {
    let cells: Vec<&CellValue> = context.non_empty().collect();
    let matches = cells
        .iter()
        .filter(|value| value.as_str().map(|text| spellings.contains(&normalize_header(text))).unwrap_or(false))
        .count();
    if matches == 0 {
        return DetectorOutput::Scores(ScoreMap::new());
    }
    let ratio = matches as f64 / cells.len() as f64;
    DetectorOutput::Scores(ScoreMap::new().with(RowLabel::Header, ratio).with(RowLabel::Data, -0.5 * ratio))
}

fn text_shape(context: &RowContext<'_>) -> DetectorOutput<RowLabel> {
    let cells: Vec<&CellValue> = context.non_empty().collect();
    let value_like = cells.iter().filter(|value| is_value_like(value)).count();
    let ratio = value_like as f64 / cells.len().max(1) as f64;

    let mut scores = ScoreMap::new().with(RowLabel::Data, 0.4 + 0.6 * ratio);
    if cells.len() > 1 {
        let distinct: HashSet<String> = cells.iter().map(|value| normalize_header(&value.to_text())).collect();
        if distinct.len() == cells.len() {
            scores.add(RowLabel::Header, 0.5 * (1.0 - ratio));
        }
    } else if value_like == 0 {
        // a lone label is a title or a note
        scores = ScoreMap::new().with(RowLabel::Other("title".to_owned()), 0.5);
    }
    DetectorOutput::Scores(scores)
}

fn is_value_like(value: &CellValue) -> bool {
    match value {
        CellValue::Text(text) => {
            let text = text.trim();
            text.parse::<f64>().is_ok()
                || text.contains('@')
                || text.chars().any(|c| c.is_ascii_digit())
                || text.chars().count() > LONG_TEXT
        }
        other => other.is_scalar(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::tests::manifest;
    use crate::model::FieldDef;
    use crate::model::RowKind;
    use crate::pipeline::classifier::decide;
    use crate::pipeline::classifier::score_row;
    use crate::registry::RunInfo;
    use std::path::Path;
    use std::path::PathBuf;

    fn classify(values: &[CellValue]) -> RowKind {
        let manifest = manifest();
        let mut registry = Registry::new();
        for field in manifest.fields() {
            registry.register_field(field).unwrap();
        }
        registry.register_field(FieldDef::new("value")).unwrap();
        register_header_keywords(&mut registry, &manifest).unwrap();
        register_text_shape(&mut registry, &manifest).unwrap();
        registry.finalize();
        let run = RunInfo {
            run_id: "run".to_owned(),
            input: PathBuf::from("input.csv"),
            output: PathBuf::from("output.xlsx"),
            logs_dir: PathBuf::from("logs"),
        };
        let context = RowContext {
            run: &run,
            row_index: 0,
            values,
            sheet_name: "Sheet1",
            sheet_index: 0,
            source_path: Path::new("input.csv"),
            manifest: &manifest,
            fields: registry.fields(),
        };
        decide(&score_row(&registry, &context, |_, _, _| {}).unwrap())
    }

    fn texts(cells: &[&str]) -> Vec<CellValue> {
        cells.iter().map(|cell| CellValue::from(*cell)).collect()
    }

    #[test]
    fn field_spellings_make_headers() {
        assert_eq!(classify(&texts(&["Member ID", "value"])), RowKind::Header);
        assert_eq!(classify(&texts(&["E-mail", "Comment"])), RowKind::Header);
    }

    #[test]
    fn values_make_data() {
        assert_eq!(classify(&[CellValue::from("1001"), CellValue::Int(42)]), RowKind::Data);
        assert_eq!(classify(&texts(&["Alice", "alice@example.org"])), RowKind::Data);
        assert_eq!(classify(&[CellValue::Int(7)]), RowKind::Data);
    }

    #[test]
    fn lone_labels_are_unknown() {
        assert_eq!(classify(&texts(&["Quarterly member report"])), RowKind::Unknown);
    }

    #[test]
    fn unmatched_label_rows_lean_header() {
        assert_eq!(classify(&texts(&["Region", "Notes"])), RowKind::Header);
        // repeated labels are not a header
        assert_eq!(classify(&texts(&["x", "x"])), RowKind::Unknown);
    }
}
