use serde::Deserialize;
use serde::Serialize;

/// A canonical output column declared by the manifest.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub required: bool,
    /// Alternative header spellings recognised by the built-in detectors
    #[serde(default)]
    pub synonyms: Vec<String>,
    /// Regular expression values of this field are expected to match
    #[serde(default)]
    pub pattern: Option<String>,
    /// Names of built-in transforms applied to this field, in order
    #[serde(default)]
    pub transforms: Vec<String>,
}

impl FieldDef {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..Self::default()
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_owned());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_synonyms(mut self, synonyms: &[&str]) -> Self {
        self.synonyms = synonyms.iter().map(|synonym| synonym.to_string()).collect();
        self
    }

    pub fn with_pattern(mut self, pattern: &str) -> Self {
        self.pattern = Some(pattern.to_owned());
        self
    }

    /// Header text written for this field: the label, falling back to the name.
    pub fn header(&self) -> &str {
        self.label
            .as_deref()
            .filter(|label| !label.trim().is_empty())
            .unwrap_or(&self.name)
    }

    /// Every spelling a source header may use for this field (name, label, synonyms).
    pub fn spellings(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str())
            .chain(self.label.as_deref())
            .chain(self.synonyms.iter().map(String::as_str))
    }
}

/// Normalizes header text for comparison: lowercase, runs of
/// non-alphanumeric characters collapsed to a single `_`.
pub fn normalize_header(text: &str) -> String {
    let mut normalized = String::with_capacity(text.len());
    for character in text.trim().chars().flat_map(char::to_lowercase) {
        if character.is_alphanumeric() {
            normalized.push(character);
        } else if !normalized.ends_with('_') {
            normalized.push('_');
        }
    }
    normalized.trim_matches('_').to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_falls_back_to_name() {
        assert_eq!(FieldDef::new("email").header(), "email");
        assert_eq!(FieldDef::new("email").with_label("E-mail").header(), "E-mail");
        assert_eq!(FieldDef::new("email").with_label(" ").header(), "email");
    }

    #[test]
    fn spellings_cover_name_label_and_synonyms() {
        let field = FieldDef::new("member_id").with_label("Member ID").with_synonyms(&["id", "member #"]);
        let spellings: Vec<&str> = field.spellings().collect();
        assert_eq!(spellings, vec!["member_id", "Member ID", "id", "member #"]);
    }

    #[test]
    fn normalizes_headers() {
        assert_eq!(normalize_header("  Member ID "), "member_id");
        assert_eq!(normalize_header("E-Mail / Address"), "e_mail_address");
        assert_eq!(normalize_header("member #"), "member");
        assert_eq!(normalize_header("---"), "");
    }
}
