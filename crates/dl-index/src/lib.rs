#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::fmt;

use dl_types::ErrorKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use unicode_casefold::UnicodeCaseFold;

/// A column name, optionally namespaced under a top-level label.
///
/// `Nested` is the two-level hierarchy produced when a table's columns are
/// attributed to their source dataset before a merge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ColumnLabel {
    Flat(String),
    Nested(String, String),
}

impl ColumnLabel {
    #[must_use]
    pub fn flat(name: impl Into<String>) -> Self {
        Self::Flat(name.into())
    }

    #[must_use]
    pub fn nested(level: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Nested(level.into(), name.into())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Flat(name) | Self::Nested(_, name) => name,
        }
    }

    #[must_use]
    pub fn level(&self) -> Option<&str> {
        match self {
            Self::Flat(_) => None,
            Self::Nested(level, _) => Some(level),
        }
    }

    /// Same label with the innermost name replaced.
    #[must_use]
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        match self {
            Self::Flat(_) => Self::Flat(name.into()),
            Self::Nested(level, _) => Self::Nested(level.clone(), name.into()),
        }
    }

    /// Same label with `suffix` appended to the innermost name.
    #[must_use]
    pub fn with_suffix(&self, suffix: &str) -> Self {
        self.with_name(format!("{}{suffix}", self.name()))
    }

    /// Wrap under `level`, replacing any existing top-level label.
    #[must_use]
    pub fn with_level(&self, level: impl Into<String>) -> Self {
        Self::Nested(level.into(), self.name().to_owned())
    }

    #[must_use]
    pub fn key(&self) -> LabelKey {
        LabelKey {
            level: self.level().map(fold),
            name: fold(self.name()),
        }
    }

    /// Case-insensitive equality.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl From<&str> for ColumnLabel {
    fn from(value: &str) -> Self {
        Self::Flat(value.to_owned())
    }
}

impl From<String> for ColumnLabel {
    fn from(value: String) -> Self {
        Self::Flat(value)
    }
}

impl From<&String> for ColumnLabel {
    fn from(value: &String) -> Self {
        Self::Flat(value.clone())
    }
}

impl From<(&str, &str)> for ColumnLabel {
    fn from((level, name): (&str, &str)) -> Self {
        Self::nested(level, name)
    }
}

impl From<&ColumnLabel> for ColumnLabel {
    fn from(value: &ColumnLabel) -> Self {
        value.clone()
    }
}

impl fmt::Display for ColumnLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flat(name) => write!(f, "{name}"),
            Self::Nested(level, name) => write!(f, "{level}.{name}"),
        }
    }
}

/// Case-folded form of a label; two labels collide iff their keys are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LabelKey {
    level: Option<String>,
    name: String,
}

fn fold(text: &str) -> String {
    text.chars().case_fold().collect()
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("duplicate column label {label} (labels are compared case-insensitively)")]
    DuplicateLabel { label: ColumnLabel },
}

impl IndexError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Shape
    }
}

/// Ordered column labels with case-insensitive positional lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnIndex {
    labels: Vec<ColumnLabel>,
    positions: HashMap<LabelKey, usize>,
}

impl ColumnIndex {
    pub fn new(labels: Vec<ColumnLabel>) -> Result<Self, IndexError> {
        let mut positions = HashMap::with_capacity(labels.len());
        for (idx, label) in labels.iter().enumerate() {
            if positions.insert(label.key(), idx).is_some() {
                return Err(IndexError::DuplicateLabel {
                    label: label.clone(),
                });
            }
        }
        Ok(Self { labels, positions })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[must_use]
    pub fn labels(&self) -> &[ColumnLabel] {
        &self.labels
    }

    #[must_use]
    pub fn position(&self, needle: &ColumnLabel) -> Option<usize> {
        self.positions.get(&needle.key()).copied()
    }

    /// The stored label (original casing) that `needle` resolves to.
    #[must_use]
    pub fn resolve(&self, needle: &ColumnLabel) -> Option<&ColumnLabel> {
        self.position(needle).and_then(|idx| self.labels.get(idx))
    }

    #[must_use]
    pub fn contains(&self, needle: &ColumnLabel) -> bool {
        self.positions.contains_key(&needle.key())
    }
}

/// Labels that appear (case-insensitively) in both slices, in `left` order.
#[must_use]
pub fn overlapping_labels(left: &[ColumnLabel], right: &[ColumnLabel]) -> Vec<ColumnLabel> {
    let right_keys = right
        .iter()
        .map(ColumnLabel::key)
        .collect::<std::collections::HashSet<_>>();
    left.iter()
        .filter(|label| right_keys.contains(&label.key()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{ColumnIndex, ColumnLabel, IndexError, overlapping_labels};

    #[test]
    fn lookup_is_case_insensitive_but_storage_keeps_casing() {
        let index = ColumnIndex::new(vec!["PIDN".into(), "DCDate".into()]).expect("index");
        assert_eq!(index.position(&"pidn".into()), Some(0));
        assert_eq!(
            index.resolve(&"dcdate".into()),
            Some(&ColumnLabel::flat("DCDate"))
        );
        assert!(!index.contains(&"visit".into()));
    }

    #[test]
    fn nested_labels_only_match_within_their_level() {
        let index = ColumnIndex::new(vec![("udsa", "PIDN").into(), "PIDN".into()]).expect("index");
        assert_eq!(index.position(&("UDSA", "pidn").into()), Some(0));
        assert_eq!(index.position(&"pidn".into()), Some(1));
        assert_eq!(index.position(&("other", "pidn").into()), None);
    }

    #[test]
    fn duplicate_labels_differing_only_in_case_are_rejected() {
        let err = ColumnIndex::new(vec!["Visit".into(), "VISIT".into()]).expect_err("dup");
        assert_eq!(
            err,
            IndexError::DuplicateLabel {
                label: ColumnLabel::flat("VISIT")
            }
        );
    }

    #[test]
    fn label_helpers_rewrite_inner_name() {
        let label = ColumnLabel::nested("cdr", "DCDate");
        assert_eq!(label.with_suffix("_link").to_string(), "cdr.DCDate_link");
        assert_eq!(
            ColumnLabel::flat("x").with_level("lab"),
            ColumnLabel::nested("lab", "x")
        );
    }

    #[test]
    fn overlap_detection_ignores_case() {
        let left = vec![ColumnLabel::flat("PIDN"), ColumnLabel::flat("score")];
        let right = vec![ColumnLabel::flat("pidn"), ColumnLabel::flat("other")];
        assert_eq!(overlapping_labels(&left, &right), vec![ColumnLabel::flat("PIDN")]);
    }
}
