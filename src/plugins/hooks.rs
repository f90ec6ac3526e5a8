use crate::error::ConfigError;
use crate::manifest::ManifestContext;
use crate::model::Severity;
use crate::registry::HookContext;
use crate::registry::HookKind;
use crate::registry::HookOutcome;
use crate::registry::HookParam;
use crate::registry::Registry;
use serde_json::json;
use serde_json::Value;

/// Run state key holding one entry per written table
pub const TABLE_SUMMARY_KEY: &str = "table_summary";

pub fn register_table_summary(registry: &mut Registry, _manifest: &ManifestContext) -> Result<(), ConfigError> {
    registry.register_hook(
        "table_summary",
        HookKind::TableWritten,
        0,
        &[HookParam::Sheet, HookParam::Mapping, HookParam::Normalized],
        table_summary,
    )
}

/// Appends the mapping and issue counts of the written table to the run state.
fn table_summary(context: &mut HookContext<'_>) -> anyhow::Result<HookOutcome> {
    let (Some(sheet), Some(mapping), Some(normalized)) = (context.sheet, context.mapping, context.normalized) else {
        return Ok(HookOutcome::Continue);
    };
    let count = |severity: Severity| normalized.issues.iter().filter(|issue| issue.severity == severity).count();
    let entry = json!({
        "sheet": sheet.name,
        "table_index": normalized.origin.table_index,
        "region": normalized.region,
        "rows": normalized.row_count,
        "mapped": mapping.fields.iter().filter(|assignment| assignment.column.is_some()).map(|assignment| &assignment.field).collect::<Vec<_>>(),
        "passthrough": mapping.passthrough.len(),
        "errors": count(Severity::Error),
        "warnings": count(Severity::Warning),
    });
    let tables = context
        .state
        .entry(TABLE_SUMMARY_KEY)
        .or_insert_with(|| Value::Array(Vec::new()));
    match tables {
        Value::Array(entries) => entries.push(entry),
        other => *other = Value::Array(vec![entry]),
    }
    Ok(HookOutcome::Continue)
}
