use serde::Serialize;
use serde_json::Value;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A problem found in a table's values. Issues are recorded, never raised.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ValidationIssue {
    /// Data row (0-based, within the table); `None` for table-level issues
    pub row_index: Option<usize>,
    pub field: String,
    pub code: String,
    pub severity: Severity,
    pub message: String,
    pub details: Value,
}

impl ValidationIssue {
    pub fn new(severity: Severity, row_index: Option<usize>, code: &str, message: &str) -> Self {
        Self {
            row_index,
            field: String::new(),
            code: code.to_owned(),
            severity,
            message: message.to_owned(),
            details: Value::Null,
        }
    }

    pub fn error(row_index: usize, code: &str, message: &str) -> Self {
        Self::new(Severity::Error, Some(row_index), code, message)
    }

    pub fn warning(row_index: usize, code: &str, message: &str) -> Self {
        Self::new(Severity::Warning, Some(row_index), code, message)
    }

    pub fn info(row_index: usize, code: &str, message: &str) -> Self {
        Self::new(Severity::Info, Some(row_index), code, message)
    }

    pub fn with_field(mut self, field: &str) -> Self {
        self.field = field.to_owned();
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_issue() {
        let issue = ValidationIssue::warning(3, "pattern_mismatch", "value does not match")
            .with_field("email")
            .with_details(json!({"value": "x"}));
        let value = serde_json::to_value(&issue).unwrap();
        assert_eq!(value["row_index"], 3);
        assert_eq!(value["severity"], "warning");
        assert_eq!(value["details"]["value"], "x");
        assert!(Severity::Error > Severity::Warning);
    }
}
