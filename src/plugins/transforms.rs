//! Built-in transforms and validators, attached to fields through the
//! manifest: `columns.meta.<field>.transforms` lists transforms applied in
//! order, `required` adds a `missing_value` check and `pattern` a
//! `pattern_mismatch` check.
use crate::error::ConfigError;
use crate::manifest::ManifestContext;
use crate::model::ValidationIssue;
use crate::registry::FieldContext;
use crate::registry::Registry;
use crate::registry::TransformOutput;
use crate::spreadsheet::cell::parse_number;
use crate::spreadsheet::CellValue;
use regex::Regex;
use serde_json::json;

/// Names accepted in `columns.meta.<field>.transforms`
pub const BUILTIN_TRANSFORMS: [&str; 6] = ["trim", "lowercase", "uppercase", "digits", "to_text", "to_number"];

pub fn is_builtin_transform(name: &str) -> bool {
    BUILTIN_TRANSFORMS.contains(&name)
}

type ValueFn = fn(&CellValue) -> CellValue;

fn builtin(name: &str) -> Option<ValueFn> {
    let function: ValueFn = match name {
        "trim" => trim,
        "lowercase" => lowercase,
        "uppercase" => uppercase,
        "digits" => digits,
        "to_text" => to_text,
        "to_number" => to_number,
        _ => return None,
    };
    Some(function)
}

/// Registers the manifest-listed transforms of every field. The first listed
/// transform gets the highest priority so they run in the listed order.
pub fn register_field_transforms(registry: &mut Registry, _manifest: &ManifestContext) -> Result<(), ConfigError> {
    let fields: Vec<(String, Vec<String>)> = registry
        .fields()
        .iter()
        .map(|field| (field.name.to_owned(), field.transforms.to_owned()))
        .collect();
    for (field, transforms) in fields {
        for (position, name) in transforms.iter().enumerate() {
            let function = builtin(name).ok_or_else(|| ConfigError::InvalidPlugin {
                plugin: name.to_owned(),
                message: format!("unknown transform on field '{}'", field),
            })?;
            let priority = -(position as i32);
            registry.register_transform(name, &field, priority, move |_, values| {
                Ok(TransformOutput::Values(values.iter().map(function).collect()))
            })?;
        }
    }
    Ok(())
}

/// Registers `required` and `pattern` checks for the fields that declare them.
pub fn register_field_validators(registry: &mut Registry, _manifest: &ManifestContext) -> Result<(), ConfigError> {
    let fields: Vec<(String, bool, Option<String>)> = registry
        .fields()
        .iter()
        .map(|field| (field.name.to_owned(), field.required, field.pattern.to_owned()))
        .collect();
    for (field, required, pattern) in fields {
        if required {
            registry.register_validator("required", &field, 10, required_values)?;
        }
        if let Some(pattern) = pattern {
            let regex = Regex::new(&pattern).map_err(|error| ConfigError::InvalidPlugin {
                plugin: "pattern".to_owned(),
                message: format!("pattern of field '{}': {}", field, error),
            })?;
            registry.register_validator("pattern", &field, 0, move |context, values| Ok(pattern_mismatches(context, values, &regex)))?;
        }
    }
    Ok(())
}

fn required_values(context: &FieldContext<'_>, values: &[CellValue]) -> anyhow::Result<Vec<ValidationIssue>> {
    let message = format!("{} is required", context.field.header());
    Ok(values
        .iter()
        .enumerate()
        .filter(|(_, value)| value.is_empty())
        .map(|(row, _)| ValidationIssue::error(row, "missing_value", &message))
        .collect())
}

fn pattern_mismatches(context: &FieldContext<'_>, values: &[CellValue], regex: &Regex) -> Vec<ValidationIssue> {
    values
        .iter()
        .enumerate()
        .filter(|(_, value)| !value.is_empty())
        .filter(|(_, value)| !regex.is_match(value.to_text().trim()))
        .map(|(row, value)| {
            ValidationIssue::warning(row, "pattern_mismatch", &format!("{} does not match the expected format", context.field.header()))
                .with_details(json!({"value": value, "pattern": regex.as_str()}))
        })
        .collect()
}

fn map_text(value: &CellValue, f: impl Fn(&str) -> String) -> CellValue {
    match value {
        CellValue::Text(text) => CellValue::Text(f(text)),
        other => other.clone(),
    }
}

fn trim(value: &CellValue) -> CellValue {
    match value {
        CellValue::Text(text) if text.trim().is_empty() => CellValue::Empty,
        other => map_text(other, |text| text.trim().to_owned()),
    }
}

fn lowercase(value: &CellValue) -> CellValue {
    map_text(value, str::to_lowercase)
}

fn uppercase(value: &CellValue) -> CellValue {
    map_text(value, str::to_uppercase)
}

fn digits(value: &CellValue) -> CellValue {
    match value {
        CellValue::Empty => CellValue::Empty,
        other => CellValue::Text(other.to_text().chars().filter(char::is_ascii_digit).collect()),
    }
}

fn to_text(value: &CellValue) -> CellValue {
    match value {
        CellValue::Empty => CellValue::Empty,
        other => CellValue::Text(other.to_text().into_owned()),
    }
}

fn to_number(value: &CellValue) -> CellValue {
    match value {
        CellValue::Text(text) => parse_number(text).unwrap_or_else(|| value.clone()),
        CellValue::Bool(flag) => CellValue::Int(i64::from(*flag)),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::tests::manifest;
    use crate::model::table::tests::table;
    use crate::model::ColumnMapping;
    use crate::model::FieldAssignment;
    use crate::model::FieldDef;
    use crate::model::Severity;
    use crate::pipeline::normalize::normalize_table;

    #[test]
    fn value_functions() {
        assert_eq!(trim(&CellValue::from("  a ")), CellValue::from("a"));
        assert_eq!(trim(&CellValue::from("   ")), CellValue::Empty);
        assert_eq!(lowercase(&CellValue::from("A@X.ORG")), CellValue::from("a@x.org"));
        assert_eq!(uppercase(&CellValue::Int(3)), CellValue::Int(3));
        assert_eq!(digits(&CellValue::from("+1 (555) 010")), CellValue::from("1555010"));
        assert_eq!(to_text(&CellValue::Int(1001)), CellValue::from("1001"));
        assert_eq!(to_number(&CellValue::from(" 42 ")), CellValue::Int(42));
        assert_eq!(to_number(&CellValue::from("2.5")), CellValue::Float(2.5));
        assert_eq!(to_number(&CellValue::from("n/a")), CellValue::from("n/a"));
        assert!(is_builtin_transform("digits"));
        assert!(!is_builtin_transform("explode"));
    }

    fn field_registry(field: FieldDef) -> Registry {
        let manifest = manifest();
        let mut registry = Registry::new();
        registry.register_field(field).unwrap();
        register_field_transforms(&mut registry, &manifest).unwrap();
        register_field_validators(&mut registry, &manifest).unwrap();
        registry.finalize();
        registry
    }

    fn mapped(field: &str) -> ColumnMapping {
        ColumnMapping {
            fields: vec![FieldAssignment { field: field.to_owned(), column: Some(0), score: Some(1.0) }],
            passthrough: Vec::new(),
        }
    }

    #[test]
    fn manifest_transforms_run_in_listed_order() {
        let mut field = FieldDef::new("email").with_pattern(r"^\S+@\S+$");
        field.transforms = vec!["trim".to_owned(), "lowercase".to_owned()];
        let registry = field_registry(field);
        let names: Vec<&str> = registry.transforms_for("email").map(|entry| entry.name.as_str()).collect();
        assert_eq!(names, vec!["trim", "lowercase"]);

        let table = table(&["Email"], &[&[" A@X.org "], &["nope"], &[""]]);
        let normalized = normalize_table(&registry, &manifest(), &table, &mapped("email")).unwrap();
        assert_eq!(normalized.fields[0].values[0], CellValue::from("a@x.org"));
        assert_eq!(normalized.issues.len(), 1);
        assert_eq!(normalized.issues[0].code, "pattern_mismatch");
        assert_eq!(normalized.issues[0].row_index, Some(1));
        assert_eq!(normalized.issues[0].details["value"], "nope");
    }

    #[test]
    fn required_fields_flag_empty_values() {
        let registry = field_registry(FieldDef::new("member_id").required());
        let table = table(&["ID"], &[&["1"], &[""], &["3"]]);
        let normalized = normalize_table(&registry, &manifest(), &table, &mapped("member_id")).unwrap();
        assert_eq!(normalized.issues.len(), 1);
        assert_eq!(normalized.issues[0].code, "missing_value");
        assert_eq!(normalized.issues[0].severity, Severity::Error);
        assert_eq!(normalized.issues[0].field, "member_id");
    }
}
