#![forbid(unsafe_code)]

mod dataset;

use std::collections::HashSet;

use dl_columnar::{Column, ColumnError};
use dl_index::{ColumnIndex, IndexError};
use dl_types::{ErrorKind, KeyRef};
use thiserror::Error;

pub use dataset::{Dataset, DatasetOptions};
pub use dl_index::ColumnLabel;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("column {label} has {found} rows but the table has {expected}")]
    LengthMismatch {
        label: ColumnLabel,
        expected: usize,
        found: usize,
    },
    #[error("label count ({labels}) does not match column count ({columns})")]
    LabelCountMismatch { labels: usize, columns: usize },
    #[error("column {label} not found (lookup is case-insensitive)")]
    ColumnNotFound { label: ColumnLabel },
    #[error("date column {column} could not be coerced to date/time: {source}")]
    InvalidDateColumn {
        column: String,
        #[source]
        source: ColumnError,
    },
    #[error(
        "id column {column} must be unique and non-null: \
         {duplicates} duplicate and {missing} missing values"
    )]
    NonUniqueId {
        column: String,
        duplicates: usize,
        missing: usize,
    },
    #[error(transparent)]
    Column(#[from] ColumnError),
    #[error(transparent)]
    Index(#[from] IndexError),
}

impl FrameError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::LengthMismatch { .. } | Self::LabelCountMismatch { .. } => ErrorKind::Shape,
            Self::ColumnNotFound { .. } => ErrorKind::ColumnLookup,
            Self::InvalidDateColumn { .. } => ErrorKind::ValueType,
            Self::NonUniqueId { .. } => ErrorKind::Uniqueness,
            Self::Column(err) => err.kind(),
            Self::Index(err) => err.kind(),
        }
    }
}

/// In-memory columnar table with ordered, case-insensitively addressed columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    index: ColumnIndex,
    columns: Vec<Column>,
    nrows: usize,
}

impl Table {
    pub fn new(labels: Vec<ColumnLabel>, columns: Vec<Column>) -> Result<Self, FrameError> {
        if labels.len() != columns.len() {
            return Err(FrameError::LabelCountMismatch {
                labels: labels.len(),
                columns: columns.len(),
            });
        }

        let nrows = columns.first().map_or(0, Column::len);
        for (label, column) in labels.iter().zip(&columns) {
            if column.len() != nrows {
                return Err(FrameError::LengthMismatch {
                    label: label.clone(),
                    expected: nrows,
                    found: column.len(),
                });
            }
        }

        Ok(Self {
            index: ColumnIndex::new(labels)?,
            columns,
            nrows,
        })
    }

    pub fn from_columns<L>(
        columns: impl IntoIterator<Item = (L, Column)>,
    ) -> Result<Self, FrameError>
    where
        L: Into<ColumnLabel>,
    {
        let (labels, columns): (Vec<_>, Vec<_>) = columns
            .into_iter()
            .map(|(label, column)| (label.into(), column))
            .unzip();
        Self::new(labels, columns)
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    #[must_use]
    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    /// `(rows, cols)`, the shape recorded in operation logs.
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        (self.nrows, self.columns.len())
    }

    #[must_use]
    pub fn labels(&self) -> &[ColumnLabel] {
        self.index.labels()
    }

    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ColumnLabel, &Column)> {
        self.index.labels().iter().zip(&self.columns)
    }

    pub fn position(&self, label: &ColumnLabel) -> Result<usize, FrameError> {
        self.index
            .position(label)
            .ok_or_else(|| FrameError::ColumnNotFound {
                label: label.clone(),
            })
    }

    /// The stored label (original casing) a lookup resolves to.
    pub fn resolve(&self, label: impl Into<ColumnLabel>) -> Result<ColumnLabel, FrameError> {
        let label = label.into();
        self.index
            .resolve(&label)
            .cloned()
            .ok_or(FrameError::ColumnNotFound { label })
    }

    pub fn column(&self, label: impl Into<ColumnLabel>) -> Result<&Column, FrameError> {
        let label = label.into();
        let position = self.position(&label)?;
        self.columns
            .get(position)
            .ok_or(FrameError::ColumnNotFound { label })
    }

    #[must_use]
    pub fn has_column(&self, label: impl Into<ColumnLabel>) -> bool {
        self.index.contains(&label.into())
    }

    pub fn columns_for(&self, labels: &[ColumnLabel]) -> Result<Vec<&Column>, FrameError> {
        labels.iter().map(|label| self.column(label)).collect()
    }

    /// Gather rows by position; `None` produces an all-missing row.
    pub fn take(&self, positions: &[Option<usize>]) -> Result<Self, FrameError> {
        let columns = self
            .columns
            .iter()
            .map(|column| column.reindex_by_positions(positions))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            index: self.index.clone(),
            columns,
            nrows: positions.len(),
        })
    }

    pub fn take_rows(&self, positions: &[usize]) -> Result<Self, FrameError> {
        let positions = positions.iter().copied().map(Some).collect::<Vec<_>>();
        self.take(&positions)
    }

    pub fn select(&self, labels: &[ColumnLabel]) -> Result<Self, FrameError> {
        let mut out_labels = Vec::with_capacity(labels.len());
        let mut out_columns = Vec::with_capacity(labels.len());
        for label in labels {
            let position = self.position(label)?;
            out_labels.push(self.labels()[position].clone());
            out_columns.push(self.columns[position].clone());
        }
        let mut table = Self::new(out_labels, out_columns)?;
        table.nrows = self.nrows;
        Ok(table)
    }

    pub fn drop_columns(&self, labels: &[ColumnLabel]) -> Result<Self, FrameError> {
        let mut dropped = HashSet::with_capacity(labels.len());
        for label in labels {
            dropped.insert(self.position(label)?);
        }
        let (out_labels, out_columns): (Vec<_>, Vec<_>) = self
            .iter()
            .enumerate()
            .filter(|(idx, _)| !dropped.contains(idx))
            .map(|(_, (label, column))| (label.clone(), column.clone()))
            .unzip();
        let mut table = Self::new(out_labels, out_columns)?;
        table.nrows = self.nrows;
        Ok(table)
    }

    /// Relabel every column; the new labels must still be unique.
    pub fn map_labels(&self, f: impl Fn(&ColumnLabel) -> ColumnLabel) -> Result<Self, FrameError> {
        let labels = self.labels().iter().map(f).collect::<Vec<_>>();
        Ok(Self {
            index: ColumnIndex::new(labels)?,
            columns: self.columns.clone(),
            nrows: self.nrows,
        })
    }

    pub fn rename(
        &self,
        from: impl Into<ColumnLabel>,
        to: impl Into<ColumnLabel>,
    ) -> Result<Self, FrameError> {
        let target = self.position(&from.into())?;
        let to = to.into();
        let labels = self
            .labels()
            .iter()
            .enumerate()
            .map(|(idx, label)| if idx == target { to.clone() } else { label.clone() })
            .collect::<Vec<_>>();
        Ok(Self {
            index: ColumnIndex::new(labels)?,
            columns: self.columns.clone(),
            nrows: self.nrows,
        })
    }

    /// Wrap every column under a top-level label, producing two-level labels.
    pub fn with_level(&self, level: &str) -> Result<Self, FrameError> {
        self.map_labels(|label| label.with_level(level))
    }

    /// Replace the column at `label` or append it when absent.
    pub fn with_column(
        &self,
        label: impl Into<ColumnLabel>,
        column: Column,
    ) -> Result<Self, FrameError> {
        let label = label.into();
        if !self.columns.is_empty() && column.len() != self.nrows {
            return Err(FrameError::LengthMismatch {
                label,
                expected: self.nrows,
                found: column.len(),
            });
        }

        let mut labels = self.labels().to_vec();
        let mut columns = self.columns.clone();
        match self.index.position(&label) {
            Some(position) => columns[position] = column,
            None => {
                labels.push(label);
                columns.push(column);
            }
        }
        Self::new(labels, columns)
    }

    /// Place `other`'s columns to the right of this table's columns.
    pub fn hconcat(&self, other: &Self) -> Result<Self, FrameError> {
        let labels = self
            .labels()
            .iter()
            .chain(other.labels())
            .cloned()
            .collect::<Vec<_>>();
        let columns = self
            .columns
            .iter()
            .chain(&other.columns)
            .cloned()
            .collect::<Vec<_>>();
        Self::new(labels, columns)
    }

    /// Number of rows whose key over `labels` repeats an earlier row's key.
    pub fn duplicate_key_count(&self, labels: &[ColumnLabel]) -> Result<usize, FrameError> {
        let columns = self.columns_for(labels)?;
        let mut seen = HashSet::with_capacity(self.nrows);
        let mut duplicates = 0;
        for row in 0..self.nrows {
            if !seen.insert(row_key(&columns, row)) {
                duplicates += 1;
            }
        }
        Ok(duplicates)
    }
}

/// Hashable composite key of `row` across `columns`.
#[must_use]
pub fn row_key<'a>(columns: &[&'a Column], row: usize) -> Vec<KeyRef<'a>> {
    columns
        .iter()
        .map(|column| column.value(row).map_or(KeyRef::Missing, KeyRef::from_scalar))
        .collect()
}
