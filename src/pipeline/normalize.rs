use crate::error::PipelineError;
use crate::manifest::ManifestContext;
use crate::model::ColumnMapping;
use crate::model::ColumnTarget;
use crate::model::ExtractedTable;
use crate::model::FieldDef;
use crate::model::MappedColumn;
use crate::model::NormalizedField;
use crate::model::NormalizedPassthrough;
use crate::model::NormalizedTable;
use crate::model::Severity;
use crate::model::ValidationIssue;
use crate::pipeline::ensure_finalized;
use crate::registry::FieldContext;
use crate::registry::Registry;
use crate::registry::TransformOutput;
use crate::spreadsheet::CellValue;
use serde_json::json;
use std::collections::HashMap;
use tracing::debug;

/// Applies transforms then validators to every mapped field of a table.
///
/// Every canonical field appears in the result in registry order; unmapped
/// fields hold empty values, and a required one is reported with a
/// table-level `missing_required_field` issue.
pub fn normalize_table(
    registry: &Registry,
    manifest: &ManifestContext,
    table: &ExtractedTable,
    mapping: &ColumnMapping,
) -> Result<NormalizedTable, PipelineError> {
    ensure_finalized(registry)?;
    let row_count = table.row_count();
    let mut fields = Vec::with_capacity(registry.fields().len());
    let mut issues = Vec::new();

    let mut columns = HashMap::new();
    let mut passthrough = Vec::new();
    for mapped in mapping.mapped_columns(table) {
        match mapped.target.clone() {
            ColumnTarget::Field(name) => {
                columns.insert(name, mapped);
            }
            ColumnTarget::Passthrough => passthrough.push(NormalizedPassthrough {
                column: mapped.column,
                header: mapped.header,
                values: mapped.values,
            }),
        }
    }

    for field in registry.fields() {
        let mapped: Option<MappedColumn> = columns.remove(&field.name);
        let column = mapped.as_ref().map(|mapped| mapped.column);
        let values = match mapped {
            Some(mapped) => {
                let context = FieldContext {
                    field,
                    column_index: mapped.column,
                    header: &mapped.header,
                    table,
                    manifest,
                };
                let values = apply_transforms(registry, &context, mapped.values)?;
                issues.extend(run_validators(registry, &context, &values)?);
                values
            }
            None => {
                if field.required {
                    issues.push(missing_required(field));
                }
                vec![CellValue::Empty; row_count]
            }
        };
        fields.push(NormalizedField {
            name: field.name.to_owned(),
            header: field.header().to_owned(),
            column,
            values,
        });
    }

    debug!(table = table.origin.table_index, rows = row_count, issues = issues.len(), "table normalized");
    Ok(NormalizedTable {
        origin: table.origin.clone(),
        region: table.region,
        row_count,
        fields,
        passthrough,
        issues,
    })
}

/// Runs the field's transforms in priority order, each one receiving the
/// previous one's output.
fn apply_transforms(registry: &Registry, context: &FieldContext<'_>, mut values: Vec<CellValue>) -> Result<Vec<CellValue>, PipelineError> {
    let field = &context.field.name;
    for transform in registry.transforms_for(field) {
        let output = (transform.item.apply)(context, &values).map_err(|error| PipelineError::TransformFailed {
            transform: transform.name.to_owned(),
            field: field.to_owned(),
            message: format!("{:#}", error),
        })?;
        match output {
            TransformOutput::Values(replacement) => {
                if replacement.len() != values.len() {
                    Err(PipelineError::TransformLength {
                        transform: transform.name.to_owned(),
                        field: field.to_owned(),
                        expected: values.len(),
                        actual: replacement.len(),
                    })?
                }
                values = replacement;
            }
            TransformOutput::Patches(patches) => {
                let rows = values.len();
                for patch in patches {
                    let Some(slot) = values.get_mut(patch.row_index) else {
                        return Err(PipelineError::TransformRowOutOfRange {
                            transform: transform.name.to_owned(),
                            field: field.to_owned(),
                            row: patch.row_index,
                            rows,
                        });
                    };
                    *slot = patch.value;
                }
            }
        }
    }
    Ok(values)
}

fn run_validators(registry: &Registry, context: &FieldContext<'_>, values: &[CellValue]) -> Result<Vec<ValidationIssue>, PipelineError> {
    let field = &context.field.name;
    let mut issues = Vec::new();
    for validator in registry.validators_for(field) {
        let found = (validator.item.validate)(context, values).map_err(|error| PipelineError::ValidatorFailed {
            validator: validator.name.to_owned(),
            field: field.to_owned(),
            message: format!("{:#}", error),
        })?;
        for mut issue in found {
            if let Some(row) = issue.row_index.filter(|row| *row >= values.len()) {
                Err(PipelineError::IssueRowOutOfRange {
                    validator: validator.name.to_owned(),
                    field: field.to_owned(),
                    row,
                    rows: values.len(),
                })?
            }
            if issue.field.is_empty() {
                issue.field = field.to_owned();
            }
            issues.push(issue);
        }
    }
    Ok(issues)
}

fn missing_required(field: &FieldDef) -> ValidationIssue {
    ValidationIssue::new(
        Severity::Error,
        None,
        "missing_required_field",
        &format!("Required field '{}' was not found in the table", field.header()),
    )
    .with_field(&field.name)
    .with_details(json!({"field": field.name}))
}
