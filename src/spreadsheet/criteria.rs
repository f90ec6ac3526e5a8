use crate::spreadsheet::SpreadsheetError;
use glob::Pattern;

/// Criteria for selecting sheets from a workbook.
#[derive(Clone, Debug, Default)]
pub(crate) struct Criteria {
    /// Sheet selectors: exact names or glob patterns. `None` selects every sheet.
    pub(crate) sheet_name_patterns: Option<Vec<(String, Pattern)>>,

    /// Convert error cells (`#N/A`, `#DIV/0!`) to empty values instead of text.
    pub(crate) error_as_null: bool,
}

impl Criteria {
    /// Builds criteria from optional sheet selectors.
    pub(crate) fn new(selectors: Option<&[String]>, error_as_null: bool) -> Result<Self, SpreadsheetError> {
        let sheet_name_patterns = selectors
            .map(|selectors| {
                selectors
                    .iter()
                    .map(|selector| Ok((selector.to_owned(), Pattern::new(selector)?)))
                    .collect::<Result<Vec<_>, SpreadsheetError>>()
            })
            .transpose()?;
        Ok(Self { sheet_name_patterns, error_as_null })
    }

    /// Checks if a sheet name matches the criteria patterns.
    /// Returns true if no patterns are specified or if name matches any pattern.
    pub(crate) fn accept(&self, sheet_name: &str) -> bool {
        if let Some(patterns) = &self.sheet_name_patterns {
            patterns
                .iter()
                .any(|(selector, pattern)| selector == sheet_name || pattern.matches(sheet_name))
        } else {
            true
        }
    }

    /// Fails when a selector matches none of the given sheet names.
    pub(crate) fn check_selectors(&self, sheet_names: &[String]) -> Result<(), SpreadsheetError> {
        for (selector, pattern) in self.sheet_name_patterns.iter().flatten() {
            let matched = sheet_names
                .iter()
                .any(|name| selector == name || pattern.matches(name));
            if !matched {
                Err(SpreadsheetError::SheetNotFound(selector.to_owned()))?
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn accepts_everything_without_selectors() {
        let criteria = Criteria::default();
        assert!(criteria.accept("Sheet1"));
        assert!(criteria.check_selectors(&names(&["Sheet1"])).is_ok());
    }

    #[test]
    fn matches_names_and_patterns() {
        let criteria = Criteria::new(Some(&names(&["Members", "Q*"])), false).unwrap();
        assert!(criteria.accept("Members"));
        assert!(criteria.accept("Q1"));
        assert!(!criteria.accept("Notes"));
        assert!(criteria.check_selectors(&names(&["Members", "Q3"])).is_ok());
    }

    #[test]
    fn reports_unmatched_selector() {
        let criteria = Criteria::new(Some(&names(&["Missing"])), false).unwrap();
        let result = criteria.check_selectors(&names(&["Sheet1"]));
        assert!(matches!(result, Err(SpreadsheetError::SheetNotFound(name)) if name == "Missing"));
    }
}
