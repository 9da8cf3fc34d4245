#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use dl_columnar::{Column, ColumnError};
use dl_frame::{ColumnLabel, FrameError, Table};
use dl_types::{ErrorKind, Scalar};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which rows of each group survive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Keep {
    All,
    Earliest,
    Latest,
}

impl Keep {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Earliest => "earliest",
            Self::Latest => "latest",
        }
    }
}

impl fmt::Display for Keep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Keep {
    type Err = GroupByError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "all" => Ok(Self::All),
            "earliest" => Ok(Self::Earliest),
            "latest" => Ok(Self::Latest),
            other => Err(GroupByError::UnknownPolicy {
                value: other.to_owned(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepOneSpec {
    pub group_key: ColumnLabel,
    pub order_key: ColumnLabel,
    pub keep: Keep,
    pub tie_break_key: Option<ColumnLabel>,
}

impl KeepOneSpec {
    #[must_use]
    pub fn new(
        group_key: impl Into<ColumnLabel>,
        order_key: impl Into<ColumnLabel>,
        keep: Keep,
    ) -> Self {
        Self {
            group_key: group_key.into(),
            order_key: order_key.into(),
            keep,
            tie_break_key: None,
        }
    }

    #[must_use]
    pub fn with_tie_break(mut self, label: impl Into<ColumnLabel>) -> Self {
        self.tie_break_key = Some(label.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum GroupByError {
    #[error("unknown keep policy {value:?} (expected all, earliest or latest)")]
    UnknownPolicy { value: String },
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Column(#[from] ColumnError),
}

impl GroupByError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownPolicy { .. } => ErrorKind::ValueType,
            Self::Frame(err) => err.kind(),
            Self::Column(err) => err.kind(),
        }
    }
}

fn cmp_rows(
    group: &[Scalar],
    order: &[Scalar],
    tie: Option<&[Scalar]>,
    a: usize,
    b: usize,
) -> Ordering {
    group[a]
        .cmp_nulls_last(&group[b])
        .then_with(|| order[a].cmp_nulls_last(&order[b]))
        .then_with(|| match tie {
            Some(tie) => tie[a].cmp_nulls_last(&tie[b]),
            None => Ordering::Equal,
        })
}

/// Sort by (group, order, tie break) and keep the rows `spec.keep` selects
/// from each group.
///
/// Rows whose group or order value is missing never reach the output. With a
/// tie-break column exactly one row per group survives `earliest`/`latest`;
/// without one every row tied at the extreme order value survives.
pub fn keep_one(table: &Table, spec: &KeepOneSpec) -> Result<Table, GroupByError> {
    let group = table.column(&spec.group_key)?;
    let order = table.column(&spec.order_key)?;
    let tie = spec
        .tie_break_key
        .as_ref()
        .map(|label| table.column(label))
        .transpose()?;

    let positions = select_rows(group, order, tie, spec.keep);
    Ok(table.take_rows(&positions)?)
}

fn select_rows(group: &Column, order: &Column, tie: Option<&Column>, keep: Keep) -> Vec<usize> {
    let group = group.values();
    let order = order.values();
    let tie = tie.map(Column::values);

    let mut rows = (0..group.len())
        .filter(|&row| !group[row].is_missing() && !order[row].is_missing())
        .collect::<Vec<_>>();
    rows.sort_by(|&a, &b| cmp_rows(group, order, tie, a, b));

    if keep == Keep::All {
        return rows;
    }

    let mut kept = Vec::new();
    for run in rows.chunk_by(|&a, &b| group[a].cmp_nulls_last(&group[b]) == Ordering::Equal) {
        let Some((&first, &last)) = run.first().zip(run.last()) else {
            continue;
        };
        match (keep, tie.is_some()) {
            (Keep::Earliest, true) => kept.push(first),
            (Keep::Latest, true) => kept.push(last),
            (Keep::Earliest, false) | (Keep::Latest, false) => {
                let extreme = if keep == Keep::Earliest { first } else { last };
                let target = &order[extreme];
                kept.extend(
                    run.iter()
                        .copied()
                        .filter(|&row| order[row].cmp_nulls_last(target) == Ordering::Equal),
                );
            }
            (Keep::All, _) => kept.extend_from_slice(run),
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use dl_columnar::Column;
    use dl_frame::Table;
    use dl_types::{ErrorKind, NullKind, Scalar};

    use super::{Keep, KeepOneSpec, keep_one};

    fn ints(values: &[Option<i64>]) -> Column {
        Column::from_optional_i64(values.iter().copied())
    }

    fn visits() -> Table {
        Table::from_columns([
            ("PIDN", ints(&[Some(2), Some(1), Some(1), Some(1), None, Some(2)])),
            ("Visit", ints(&[Some(5), Some(3), Some(1), Some(1), Some(1), None])),
            ("InstrID", ints(&[Some(60), Some(30), Some(11), Some(10), Some(99), Some(61)])),
        ])
        .expect("table")
    }

    fn column(table: &Table, label: &str) -> Vec<Scalar> {
        table.column(label).expect("column").values().to_vec()
    }

    #[test]
    fn all_sorts_and_drops_rows_with_missing_keys() {
        let out = keep_one(&visits(), &KeepOneSpec::new("pidn", "visit", Keep::All)).expect("all");
        assert_eq!(
            column(&out, "InstrID"),
            vec![Scalar::Int64(11), Scalar::Int64(10), Scalar::Int64(30), Scalar::Int64(60)]
        );
    }

    #[test]
    fn earliest_without_tie_break_keeps_every_tied_row() {
        let out = keep_one(&visits(), &KeepOneSpec::new("PIDN", "Visit", Keep::Earliest))
            .expect("earliest");
        assert_eq!(
            column(&out, "InstrID"),
            vec![Scalar::Int64(11), Scalar::Int64(10), Scalar::Int64(60)]
        );
    }

    #[test]
    fn earliest_with_tie_break_keeps_first_sorted_row() {
        let spec = KeepOneSpec::new("PIDN", "Visit", Keep::Earliest).with_tie_break("InstrID");
        let out = keep_one(&visits(), &spec).expect("earliest");
        assert_eq!(column(&out, "InstrID"), vec![Scalar::Int64(10), Scalar::Int64(60)]);
    }

    #[test]
    fn latest_picks_maximum_order_per_group() {
        let out =
            keep_one(&visits(), &KeepOneSpec::new("PIDN", "Visit", Keep::Latest)).expect("latest");
        assert_eq!(column(&out, "InstrID"), vec![Scalar::Int64(30), Scalar::Int64(60)]);
    }

    #[test]
    fn tie_break_nulls_sort_last() {
        let table = Table::from_columns([
            ("PIDN", ints(&[Some(1), Some(1)])),
            ("Visit", ints(&[Some(1), Some(1)])),
            ("InstrID", ints(&[None, Some(7)])),
        ])
        .expect("table");
        let spec = KeepOneSpec::new("PIDN", "Visit", Keep::Latest).with_tie_break("InstrID");
        let out = keep_one(&table, &spec).expect("latest");
        assert_eq!(column(&out, "InstrID"), vec![Scalar::Null(NullKind::Null)]);
    }

    #[test]
    fn policy_names_parse_or_fail_with_value_error() {
        assert_eq!("latest".parse::<Keep>().expect("latest"), Keep::Latest);
        let err = "newest".parse::<Keep>().expect_err("unknown");
        assert_eq!(err.kind(), ErrorKind::ValueType);
    }

    #[test]
    fn unknown_columns_are_lookup_errors() {
        let err = keep_one(&visits(), &KeepOneSpec::new("PIDN", "DCDate", Keep::All))
            .expect_err("no DCDate");
        assert_eq!(err.kind(), ErrorKind::ColumnLookup);
    }
}
