//! Built-in column detectors.
//!
//! * `header_names` compares the column header with every field's name, label
//!   and synonyms.
//! * `value_patterns` scores fields that declare a pattern by the share of
//!   sampled values matching it.
use crate::error::ConfigError;
use crate::manifest::ManifestContext;
use crate::model::normalize_header;
use crate::model::DetectorOutput;
use crate::model::ScoreMap;
use crate::registry::ColumnContext;
use crate::registry::Registry;
use regex::Regex;

/// Score of a header equal to a field spelling
const EXACT_HEADER: f64 = 1.0;

/// Score of a header containing a field spelling (or contained in one)
const PARTIAL_HEADER: f64 = 0.6;

/// Shortest spelling considered for partial matches
const MIN_PARTIAL_LENGTH: usize = 3;

/// Score of a column whose whole sample matches the field pattern
const PATTERN_WEIGHT: f64 = 0.8;

pub fn register_header_names(registry: &mut Registry, _manifest: &ManifestContext) -> Result<(), ConfigError> {
    let spellings: Vec<(String, Vec<String>)> = registry
        .fields()
        .iter()
        .map(|field| {
            let spellings = field
                .spellings()
                .map(normalize_header)
                .filter(|spelling| !spelling.is_empty())
                .collect();
            (field.name.to_owned(), spellings)
        })
        .collect();
    registry.register_column_detector("header_names", None, 10, move |context| header_names(context, &spellings))
}

pub fn register_value_patterns(registry: &mut Registry, _manifest: &ManifestContext) -> Result<(), ConfigError> {
    let mut patterns = Vec::new();
    for field in registry.fields() {
        if let Some(pattern) = &field.pattern {
            let regex = Regex::new(pattern).map_err(|error| ConfigError::InvalidPlugin {
                plugin: "value_patterns".to_owned(),
                message: format!("pattern of field '{}': {}", field.name, error),
            })?;
            patterns.push((field.name.to_owned(), regex));
        }
    }
    if patterns.is_empty() {
        return Ok(());
    }
    registry.register_column_detector("value_patterns", None, 0, move |context| value_patterns(context, &patterns))
}

fn header_names(context: &ColumnContext<'_>, spellings: &[(String, Vec<String>)]) -> DetectorOutput<String> {
    let header = normalize_header(context.header);
    let mut scores = ScoreMap::new();
    if header.is_empty() {
        return DetectorOutput::Scores(scores);
    }
    for (field, names) in spellings {
        let score = if names.iter().any(|name| *name == header) {
            EXACT_HEADER
        } else if names
            .iter()
            .filter(|name| name.len() >= MIN_PARTIAL_LENGTH && header.len() >= MIN_PARTIAL_LENGTH)
            .any(|name| header.contains(name.as_str()) || name.contains(header.as_str()))
        {
            PARTIAL_HEADER
        } else {
            continue;
        };
        scores.add(field.to_owned(), score);
    }
    DetectorOutput::Scores(scores)
}

fn value_patterns(context: &ColumnContext<'_>, patterns: &[(String, Regex)]) -> DetectorOutput<String> {
    let mut scores = ScoreMap::new();
    if context.sample.is_empty() {
        return DetectorOutput::Scores(scores);
    }
    for (field, regex) in patterns {
        let matching = context
            .sample
            .iter()
            .filter(|value| regex.is_match(value.to_text().trim()))
            .count();
        if matching > 0 {
            scores.add(field.to_owned(), PATTERN_WEIGHT * matching as f64 / context.sample.len() as f64);
        }
    }
    DetectorOutput::Scores(scores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::tests::manifest;
    use crate::model::table::tests::table;
    use crate::model::FieldDef;
    use crate::pipeline::mapper::map_columns;
    use crate::pipeline::mapper::score_columns;

    fn registry(fields: Vec<FieldDef>) -> Registry {
        let manifest = manifest();
        let mut registry = Registry::new();
        for field in fields {
            registry.register_field(field).unwrap();
        }
        register_header_names(&mut registry, &manifest).unwrap();
        register_value_patterns(&mut registry, &manifest).unwrap();
        registry.finalize();
        registry
    }

    #[test]
    fn headers_match_spellings() {
        let registry = registry(vec![
            FieldDef::new("member_id").with_label("Member ID"),
            FieldDef::new("email").with_synonyms(&["e-mail"]),
            FieldDef::new("phone"),
        ]);
        let table = table(&["MEMBER ID", "E-Mail", "Phone number", "Notes"], &[&["1", "a@x", "555", "-"]]);

        let columns = score_columns(&registry, &manifest(), &table).unwrap();
        assert_eq!(columns[0].scores.get(&"member_id".to_owned()), EXACT_HEADER);
        assert_eq!(columns[1].scores.get(&"email".to_owned()), EXACT_HEADER);
        assert_eq!(columns[2].scores.get(&"phone".to_owned()), PARTIAL_HEADER);
        assert!(columns[3].scores.is_empty());
    }

    #[test]
    fn patterns_identify_unlabelled_columns() {
        let registry = registry(vec![
            FieldDef::new("member_id"),
            FieldDef::new("email").with_pattern(r"^[^@\s]+@[^@\s]+$"),
        ]);
        let table = table(&["ID", "Contact"], &[&["1", "a@x.org"], &["2", "b@x.org"], &["3", "n/a"]]);

        let mapping = map_columns(&registry, &manifest(), &table).unwrap();
        assert_eq!(mapping.column_for("email"), Some(1));
        assert_eq!(mapping.column_for("member_id"), None);
    }

    #[test]
    fn invalid_pattern_is_a_config_error() {
        let manifest = manifest();
        let mut registry = Registry::new();
        registry.register_field(FieldDef::new("email").with_pattern("(")).unwrap();
        let result = register_value_patterns(&mut registry, &manifest);
        assert!(matches!(result, Err(ConfigError::InvalidPlugin { .. })));
    }
}
