use serde::Serialize;
use serde::Serializer;
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt::Display;

/// Final classification of a row.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RowKind {
    Header,
    Data,
    Unknown,
}

/// Label a row detector votes for. The core kinds are fixed; detectors may
/// add their own labels, which classify as [`RowKind::Unknown`].
///
/// The derived ordering (Header, Data, Unknown, then extras by name) breaks
/// ties between equally scored labels.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RowLabel {
    Header,
    Data,
    Unknown,
    Other(String),
}

impl RowLabel {
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "header" => Self::Header,
            "data" => Self::Data,
            "unknown" => Self::Unknown,
            _ => Self::Other(label.trim().to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Header => "header",
            Self::Data => "data",
            Self::Unknown => "unknown",
            Self::Other(label) => label,
        }
    }

    pub fn kind(&self) -> RowKind {
        match self {
            Self::Header => RowKind::Header,
            Self::Data => RowKind::Data,
            Self::Unknown | Self::Other(_) => RowKind::Unknown,
        }
    }
}

impl Display for RowLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for RowLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl From<&str> for RowLabel {
    fn from(label: &str) -> Self {
        Self::parse(label)
    }
}

/// Scores keyed by label. Only finite values are ever stored.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ScoreMap<K: Ord>(BTreeMap<K, f64>);

impl<K: Ord> Default for ScoreMap<K> {
    fn default() -> Self {
        Self(BTreeMap::new())
    }
}

impl<K: Ord> ScoreMap<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `score` to the label's running total. Non-finite scores are ignored.
    pub fn add(&mut self, key: K, score: f64) {
        if score.is_finite() {
            *self.0.entry(key).or_insert(0.0) += score;
        }
    }

    /// Builder form of [`ScoreMap::add`].
    pub fn with(mut self, key: K, score: f64) -> Self {
        self.add(key, score);
        self
    }

    /// Returns the label's score, 0 when it was never scored.
    pub fn get(&self, key: &K) -> f64 {
        self.0.get(key).copied().unwrap_or(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, K, f64> {
        self.0.iter()
    }

    pub fn keys(&self) -> btree_map::Keys<'_, K, f64> {
        self.0.keys()
    }

    /// Label with the highest score. Ties go to the label that sorts first.
    pub fn best(&self) -> Option<(&K, f64)> {
        let mut best: Option<(&K, f64)> = None;
        for (key, score) in &self.0 {
            if best.map(|(_, top)| *score > top).unwrap_or(true) {
                best = Some((key, *score));
            }
        }
        best
    }
}

impl<K: Ord> FromIterator<(K, f64)> for ScoreMap<K> {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        let mut scores = Self::new();
        for (key, score) in iter {
            scores.add(key, score);
        }
        scores
    }
}

impl<K: Ord> IntoIterator for ScoreMap<K> {
    type Item = (K, f64);
    type IntoIter = btree_map::IntoIter<K, f64>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// What a detector returns: a score map, or a single score credited to the
/// label (row detectors) or field (column detectors) it was registered with.
#[derive(Clone, Debug, PartialEq)]
pub enum DetectorOutput<K: Ord> {
    Scores(ScoreMap<K>),
    Score(f64),
}

impl<K: Ord> From<ScoreMap<K>> for DetectorOutput<K> {
    fn from(scores: ScoreMap<K>) -> Self {
        Self::Scores(scores)
    }
}

impl<K: Ord> From<f64> for DetectorOutput<K> {
    fn from(score: f64) -> Self {
        Self::Score(score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_finite_scores_are_dropped() {
        let scores = ScoreMap::new()
            .with(RowLabel::Header, 0.5)
            .with(RowLabel::Header, f64::NAN)
            .with(RowLabel::Data, f64::INFINITY)
            .with(RowLabel::Header, -0.2);
        assert_eq!(scores.len(), 1);
        assert!((scores.get(&RowLabel::Header) - 0.3).abs() < 1e-9);
        assert_eq!(scores.get(&RowLabel::Data), 0.0);
    }

    #[test]
    fn ties_prefer_label_order() {
        let scores: ScoreMap<RowLabel> = [
            (RowLabel::Other("note".to_owned()), 1.0),
            (RowLabel::Data, 1.0),
            (RowLabel::Header, 1.0),
        ]
        .into_iter()
        .collect();
        assert_eq!(scores.best(), Some((&RowLabel::Header, 1.0)));
    }

    #[test]
    fn labels_parse_and_collapse() {
        assert_eq!(RowLabel::parse("HEADER"), RowLabel::Header);
        assert_eq!(RowLabel::parse("note").kind(), RowKind::Unknown);
        assert_eq!(RowLabel::Data.to_string(), "data");
        let json = serde_json::to_string(&ScoreMap::new().with(RowLabel::Data, 1.5)).unwrap();
        assert_eq!(json, r#"{"data":1.5}"#);
    }
}
