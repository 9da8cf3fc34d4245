#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use dl_types::ErrorKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Defaults injected into datasets and operators.
///
/// This is a plain value: nothing in the workspace reads configuration from
/// process-wide state, so two graphs built with different configs never
/// interfere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub id_col: String,
    pub id2_col: String,
    pub date_col: String,
    pub suffixes: [String; 2],
    pub link_marker: String,
    pub diff_column: String,
    pub duplicate_indicator: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            id_col: "ID".to_owned(),
            id2_col: "PIDN".to_owned(),
            date_col: "DCDate".to_owned(),
            suffixes: ["_x".to_owned(), "_y".to_owned()],
            link_marker: "_link".to_owned(),
            diff_column: "date_diff".to_owned(),
            duplicate_indicator: "duplicate".to_owned(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ValueType
    }
}

impl LinkConfig {
    /// Parse a JSON config; absent fields keep their defaults.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let [left, right] = &self.suffixes;
        if left == right {
            return Err(ConfigError::Invalid(format!(
                "suffix pair must differ, got {left:?} twice"
            )));
        }
        for (field, value) in [
            ("id_col", &self.id_col),
            ("id2_col", &self.id2_col),
            ("date_col", &self.date_col),
            ("link_marker", &self.link_marker),
            ("diff_column", &self.diff_column),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{field} must not be empty")));
            }
        }
        Ok(())
    }
}

/// Identity snapshot of a dataset as it entered the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub name: String,
    pub id_col: String,
    pub date_col: Option<String>,
    pub id2_col: String,
    pub source: Option<String>,
    pub rows: usize,
    pub cols: usize,
}

/// Explicit parameter record carried by every graph operation, rendered into
/// the operation log instead of introspecting bound arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationParams(BTreeMap<String, serde_json::Value>);

impl OperationParams {
    #[must_use]
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `key=value` pairs in key order; strings are written bare.
    #[must_use]
    pub fn render(&self) -> String {
        self.0
            .iter()
            .map(|(key, value)| match value {
                serde_json::Value::String(text) => format!("{key}={text}"),
                other => format!("{key}={other}"),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub ts_unix_ms: u64,
    pub left: String,
    pub right: Option<String>,
    pub operation: String,
    pub params: OperationParams,
    pub shape: (usize, usize),
}

impl OperationRecord {
    #[must_use]
    pub fn new(
        left: impl Into<String>,
        right: Option<String>,
        operation: impl Into<String>,
        params: OperationParams,
        shape: (usize, usize),
    ) -> Self {
        Self {
            ts_unix_ms: now_unix_ms().unwrap_or_default(),
            left: left.into(),
            right,
            operation: operation.into(),
            params,
            shape,
        }
    }

    #[must_use]
    pub fn right_label(&self) -> &str {
        self.right.as_deref().unwrap_or("N/A")
    }

    #[must_use]
    pub fn shape_label(&self) -> String {
        format!("({}, {})", self.shape.0, self.shape.1)
    }
}

/// Append-only record of one `execute()` run.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLog {
    datasets: Vec<DatasetRecord>,
    operations: Vec<OperationRecord>,
}

impl ExecutionLog {
    #[must_use]
    pub fn new() -> Self {
        Self {
            datasets: Vec::new(),
            operations: Vec::new(),
        }
    }

    pub fn push_dataset(&mut self, record: DatasetRecord) {
        self.datasets.push(record);
    }

    pub fn push_operation(&mut self, record: OperationRecord) {
        self.operations.push(record);
    }

    #[must_use]
    pub fn datasets(&self) -> &[DatasetRecord] {
        &self.datasets
    }

    #[must_use]
    pub fn operations(&self) -> &[OperationRecord] {
        &self.operations
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("system clock is before UNIX_EPOCH")]
    ClockSkew,
}

fn now_unix_ms() -> Result<u64, RuntimeError> {
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| RuntimeError::ClockSkew)?
        .as_millis();
    Ok(ms as u64)
}

#[cfg(test)]
mod tests {
    use super::{ExecutionLog, LinkConfig, OperationParams, OperationRecord};

    #[test]
    fn config_json_overrides_only_named_fields() {
        let config =
            LinkConfig::from_json_str(r#"{"id2_col": "SubjectID", "suffixes": ["_a", "_b"]}"#)
                .expect("config parses");
        assert_eq!(config.id2_col, "SubjectID");
        assert_eq!(config.suffixes, ["_a".to_owned(), "_b".to_owned()]);
        assert_eq!(config.date_col, "DCDate");
    }

    #[test]
    fn config_rejects_identical_suffixes() {
        let err = LinkConfig::from_json_str(r#"{"suffixes": ["_a", "_a"]}"#).expect_err("dup");
        assert!(err.to_string().contains("suffix pair must differ"));
    }

    #[test]
    fn config_rejects_wrong_suffix_arity() {
        assert!(LinkConfig::from_json_str(r#"{"suffixes": ["_a"]}"#).is_err());
    }

    #[test]
    fn operation_record_renders_report_columns() {
        let params = OperationParams::new()
            .with("days", 90)
            .with("when", "earlier_or_later");
        let record = OperationRecord::new("anchor", None, "keep_one", params, (12, 4));
        assert_eq!(record.right_label(), "N/A");
        assert_eq!(record.shape_label(), "(12, 4)");
        assert_eq!(record.params.render(), "days=90, when=earlier_or_later");
    }

    #[test]
    fn log_serializes_both_tables() {
        let mut log = ExecutionLog::new();
        log.push_operation(OperationRecord::new(
            "a",
            Some("b".to_owned()),
            "proximity_join",
            OperationParams::new(),
            (1, 1),
        ));
        let json = log.to_json().expect("json");
        assert!(json.contains("\"datasets\": []"));
        assert!(json.contains("proximity_join"));
    }
}
