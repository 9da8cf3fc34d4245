use std::path::PathBuf;

use dl_columnar::Column;
use dl_runtime::{DatasetRecord, LinkConfig};

use crate::{ColumnLabel, FrameError, Table};

/// Per-dataset overrides of the configured key columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetOptions {
    pub id_col: Option<String>,
    pub id2_col: Option<String>,
    /// An explicit date column must exist; when `None` the configured date
    /// column is used if the table has it.
    pub date_col: Option<String>,
    pub tags: Vec<String>,
    pub source: Option<PathBuf>,
}

/// A table plus the metadata that makes it linkable.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    name: String,
    table: Table,
    id_col: String,
    id2_col: String,
    date_col: Option<String>,
    tags: Vec<String>,
    source: Option<PathBuf>,
}

impl Dataset {
    pub fn new(
        name: impl Into<String>,
        table: Table,
        options: DatasetOptions,
        config: &LinkConfig,
    ) -> Result<Self, FrameError> {
        let name = name.into();
        let mut table = table;

        let id_col = options.id_col.unwrap_or_else(|| config.id_col.clone());
        let id_col = match table.resolve(id_col.as_str()) {
            Ok(stored) => stored.name().to_owned(),
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    dataset = %name,
                    column = %id_col,
                    "adding synthetic row id column"
                );
                let ids = (0..table.nrows()).map(|row| Some(row as i64));
                table = table.with_column(id_col.as_str(), Column::from_optional_i64(ids))?;
                id_col
            }
        };

        let date_col = match options.date_col {
            Some(explicit) => Some(table.resolve(explicit.as_str())?),
            None => table.resolve(config.date_col.as_str()).ok(),
        };
        let date_col = match date_col {
            Some(label) => {
                let coerced = table.column(&label)?.to_datetime().map_err(|source| {
                    FrameError::InvalidDateColumn {
                        column: label.to_string(),
                        source,
                    }
                })?;
                table = table.with_column(&label, coerced)?;
                Some(label.name().to_owned())
            }
            None => None,
        };

        let id2_col = options.id2_col.unwrap_or_else(|| config.id2_col.clone());
        let id2_col = table
            .resolve(id2_col.as_str())
            .map_or(id2_col, |stored| stored.name().to_owned());

        let mut dataset = Self {
            name,
            table,
            id_col,
            id2_col,
            date_col,
            tags: Vec::new(),
            source: options.source,
        };
        for tag in options.tags {
            dataset.add_tag(tag);
        }
        Ok(dataset)
    }

    /// Build with the configured key columns and no tags.
    pub fn from_table(
        name: impl Into<String>,
        table: Table,
        config: &LinkConfig,
    ) -> Result<Self, FrameError> {
        Self::new(name, table, DatasetOptions::default(), config)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn table(&self) -> &Table {
        &self.table
    }

    #[must_use]
    pub fn id_col(&self) -> &str {
        &self.id_col
    }

    #[must_use]
    pub fn id2_col(&self) -> &str {
        &self.id2_col
    }

    #[must_use]
    pub fn date_col(&self) -> Option<&str> {
        self.date_col.as_deref()
    }

    #[must_use]
    pub fn has_id2(&self) -> bool {
        self.table.has_column(self.id2_col.as_str())
    }

    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Insert a tag, keeping first-insertion order and ignoring repeats.
    pub fn add_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }

    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|existing| existing == tag)
    }

    #[must_use]
    pub fn source(&self) -> Option<&PathBuf> {
        self.source.as_ref()
    }

    #[must_use]
    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Swap in a new table (e.g. an operator result), keeping the metadata.
    #[must_use]
    pub fn with_table(mut self, table: Table) -> Self {
        self.table = table;
        self
    }

    /// Anchors need a unique, fully populated id column.
    pub fn validate_anchor(&self) -> Result<(), FrameError> {
        let label = ColumnLabel::flat(self.id_col.as_str());
        let column = self.table.column(&label)?;
        let missing = column.values().iter().filter(|value| value.is_missing()).count();
        let duplicates = self.table.duplicate_key_count(&[label])?;
        if missing > 0 || duplicates > 0 {
            return Err(FrameError::NonUniqueId {
                column: self.id_col.clone(),
                duplicates,
                missing,
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn snapshot(&self) -> DatasetRecord {
        DatasetRecord {
            name: self.name.clone(),
            id_col: self.id_col.clone(),
            date_col: self.date_col.clone(),
            id2_col: self.id2_col.clone(),
            source: self.source.as_ref().map(|path| path.display().to_string()),
            rows: self.table.nrows(),
            cols: self.table.ncols(),
        }
    }
}

#[cfg(test)]
mod tests {
    use dl_columnar::Column;
    use dl_runtime::LinkConfig;
    use dl_types::{DType, ErrorKind, Scalar};

    use super::{Dataset, DatasetOptions};
    use crate::Table;

    fn text(values: &[&str]) -> Column {
        Column::from_values(
            values
                .iter()
                .map(|value| Scalar::Utf8((*value).to_owned()))
                .collect(),
        )
        .expect("text")
    }

    fn visits() -> Table {
        Table::from_columns([
            ("pidn", text(&["1", "1", "2"])),
            ("dcdate", text(&["2001-03-02", "2001-05-01", "2001-01-01"])),
        ])
        .expect("table")
    }

    #[test]
    fn missing_id_column_is_synthesized_and_dates_coerced() {
        let config = LinkConfig::default();
        let dataset = Dataset::from_table("udsa", visits(), &config).expect("dataset");
        assert_eq!(dataset.id_col(), "ID");
        assert_eq!(
            dataset.table().column("ID").expect("id").values(),
            &[Scalar::Int64(0), Scalar::Int64(1), Scalar::Int64(2)]
        );
        // stored casing wins over configured casing
        assert_eq!(dataset.date_col(), Some("dcdate"));
        assert_eq!(dataset.id2_col(), "pidn");
        assert_eq!(
            dataset.table().column("DCDate").expect("date").dtype(),
            DType::Datetime
        );
        dataset.validate_anchor().expect("synthetic ids are unique");
    }

    #[test]
    fn unparseable_dates_reject_the_dataset() {
        let table = Table::from_columns([("PIDN", text(&["1"])), ("DCDate", text(&["someday"]))])
            .expect("table");
        let err = Dataset::from_table("bad", table, &LinkConfig::default()).expect_err("bad date");
        assert_eq!(err.kind(), ErrorKind::ValueType);
    }

    #[test]
    fn explicit_date_column_must_exist() {
        let options = DatasetOptions {
            date_col: Some("VisitDate".to_owned()),
            ..DatasetOptions::default()
        };
        let err = Dataset::new("udsa", visits(), options, &LinkConfig::default())
            .expect_err("no such column");
        assert_eq!(err.kind(), ErrorKind::ColumnLookup);
    }

    #[test]
    fn duplicate_ids_fail_anchor_validation() {
        let options = DatasetOptions {
            id_col: Some("pidn".to_owned()),
            tags: vec!["anchor".to_owned(), "anchor".to_owned(), "uds".to_owned()],
            ..DatasetOptions::default()
        };
        let dataset =
            Dataset::new("udsa", visits(), options, &LinkConfig::default()).expect("dataset");
        assert_eq!(dataset.tags(), &["anchor".to_owned(), "uds".to_owned()]);
        let err = dataset.validate_anchor().expect_err("pidn repeats");
        assert_eq!(err.kind(), ErrorKind::Uniqueness);
    }

    #[test]
    fn snapshot_reports_identity_and_shape() {
        let dataset =
            Dataset::from_table("udsa", visits(), &LinkConfig::default()).expect("dataset");
        let record = dataset.snapshot();
        assert_eq!(record.name, "udsa");
        assert_eq!((record.rows, record.cols), (3, 3));
        assert_eq!(record.source, None);
    }
}
