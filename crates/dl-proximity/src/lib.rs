#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use dl_columnar::{Column, ColumnError};
use dl_frame::{ColumnLabel, FrameError, Table};
use dl_index::overlapping_labels;
use dl_join::{JoinKeys, JoinType, MergeError, join_positions};
use dl_runtime::LinkConfig;
use dl_types::{ErrorKind, Scalar};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which side of the anchor date a secondary row may fall on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum When {
    Earlier,
    Later,
    EarlierOrLater,
}

/// Keep every row in the window, or only the rows nearest the anchor date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Get {
    All,
    Closest,
}

/// How much of the anchor table travels with the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeScope {
    /// Secondary columns plus `<name><link_marker>` breadcrumbs to the anchor.
    Partial,
    /// Every anchor column beside every secondary column.
    Full,
}

macro_rules! policy_names {
    ($ty:ident, $option:literal, { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            #[must_use]
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = LinkError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($name => Ok(Self::$variant),)+
                    other => Err(LinkError::UnknownPolicy {
                        option: $option,
                        value: other.to_owned(),
                    }),
                }
            }
        }
    };
}

policy_names!(When, "when", {
    Earlier => "earlier",
    Later => "later",
    EarlierOrLater => "earlier_or_later",
});
policy_names!(Get, "get", { All => "all", Closest => "closest" });
policy_names!(MergeScope, "merge", { Partial => "partial", Full => "full" });

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("invalid join specification: {0}")]
    Specification(String),
    #[error("days must be a non-negative integer, got {days}")]
    NegativeDays { days: i64 },
    #[error("unknown {option} policy {value:?}")]
    UnknownPolicy { option: &'static str, value: String },
    #[error("suffix pair must differ, got {suffix:?} twice")]
    IdenticalSuffixes { suffix: String },
    #[error("anchor key ({columns}) is not unique: {duplicates} repeated rows")]
    NonUniqueAnchor { columns: String, duplicates: usize },
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Column(#[from] ColumnError),
}

impl LinkError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Specification(_) => ErrorKind::Specification,
            Self::NegativeDays { .. }
            | Self::UnknownPolicy { .. }
            | Self::IdenticalSuffixes { .. } => ErrorKind::ValueType,
            Self::NonUniqueAnchor { .. } => ErrorKind::Uniqueness,
            Self::Merge(err) => err.kind(),
            Self::Frame(err) => err.kind(),
            Self::Column(err) => err.kind(),
        }
    }
}

/// Parameters of a temporal proximity join.
///
/// `ids` and `dates` each take either a shared `on` list or per-side lists;
/// `dates` must name exactly one column per side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinSpec {
    pub ids: JoinKeys,
    pub dates: JoinKeys,
    pub days: i64,
    pub when: When,
    pub get: Get,
    /// Anchor column asserting row uniqueness instead of (ids, date).
    pub left_link_id: Option<ColumnLabel>,
    /// Drop anchors that end up with no secondary row.
    pub dropna: bool,
    /// Keep only the last row of every anchor with several matches.
    pub drop_duplicates: bool,
    pub duplicate_indicator: Option<String>,
    pub merge: MergeScope,
    pub suffixes: [String; 2],
    pub levels: [Option<String>; 2],
    pub diff_column: String,
    pub link_marker: String,
}

impl JoinSpec {
    /// A same-day, keep-everything join with names taken from `config`.
    #[must_use]
    pub fn new(ids: JoinKeys, dates: JoinKeys, config: &LinkConfig) -> Self {
        Self {
            ids,
            dates,
            days: 0,
            when: When::EarlierOrLater,
            get: Get::All,
            left_link_id: None,
            dropna: false,
            drop_duplicates: false,
            duplicate_indicator: Some(config.duplicate_indicator.clone())
                .filter(|name| !name.is_empty()),
            merge: MergeScope::Partial,
            suffixes: config.suffixes.clone(),
            levels: [None, None],
            diff_column: config.diff_column.clone(),
            link_marker: config.link_marker.clone(),
        }
    }

    #[must_use]
    pub fn with_days(mut self, days: i64) -> Self {
        self.days = days;
        self
    }

    #[must_use]
    pub fn with_when(mut self, when: When) -> Self {
        self.when = when;
        self
    }

    #[must_use]
    pub fn with_get(mut self, get: Get) -> Self {
        self.get = get;
        self
    }

    #[must_use]
    pub fn with_left_link_id(mut self, label: impl Into<ColumnLabel>) -> Self {
        self.left_link_id = Some(label.into());
        self
    }

    #[must_use]
    pub fn with_dropna(mut self, dropna: bool) -> Self {
        self.dropna = dropna;
        self
    }

    #[must_use]
    pub fn with_drop_duplicates(mut self, drop_duplicates: bool) -> Self {
        self.drop_duplicates = drop_duplicates;
        self
    }

    #[must_use]
    pub fn with_indicator(mut self, name: Option<String>) -> Self {
        self.duplicate_indicator = name;
        self
    }

    #[must_use]
    pub fn with_merge(mut self, merge: MergeScope) -> Self {
        self.merge = merge;
        self
    }

    #[must_use]
    pub fn with_suffixes(mut self, suffixes: [String; 2]) -> Self {
        self.suffixes = suffixes;
        self
    }

    #[must_use]
    pub fn with_levels(mut self, left: Option<String>, right: Option<String>) -> Self {
        self.levels = [left, right];
        self
    }

    fn admits(&self, diff: i64) -> bool {
        diff.abs() <= self.days
            && match self.when {
                When::Earlier => diff <= 0,
                When::Later => diff >= 0,
                When::EarlierOrLater => true,
            }
    }

    /// Check this join spec against both tables without moving any data.
    fn resolve(&self, left: &Table, right: &Table) -> Result<ResolvedJoin, LinkError> {
        let ids = self.ids.resolve()?;
        let dates = self.dates.resolve()?;
        let (left_date, right_date) = match (dates.left.as_slice(), dates.right.as_slice()) {
            ([left_date], [right_date]) => (left_date, right_date),
            _ => {
                return Err(LinkError::Specification(format!(
                    "exactly one date column per side is required, got {}",
                    dates.left.len()
                )));
            }
        };
        if self.days < 0 {
            return Err(LinkError::NegativeDays { days: self.days });
        }
        let [left_suffix, right_suffix] = &self.suffixes;
        if left_suffix == right_suffix {
            return Err(LinkError::IdenticalSuffixes {
                suffix: left_suffix.clone(),
            });
        }

        let left_ids = ids
            .left
            .iter()
            .map(|label| left.resolve(label))
            .collect::<Result<Vec<_>, _>>()?;
        let right_ids = ids
            .right
            .iter()
            .map(|label| right.resolve(label))
            .collect::<Result<Vec<_>, _>>()?;
        let left_date = left.resolve(left_date)?;
        let right_date = right.resolve(right_date)?;
        let link_id = self
            .left_link_id
            .as_ref()
            .map(|label| left.resolve(label))
            .transpose()?;

        let anchor_key = match &link_id {
            Some(link_id) => vec![link_id.clone()],
            None => {
                let mut key = left_ids.clone();
                key.push(left_date.clone());
                key
            }
        };

        let mut link_columns = left_ids.clone();
        for label in [Some(&left_date), link_id.as_ref()].into_iter().flatten() {
            if !link_columns.iter().any(|existing| existing.matches(label)) {
                link_columns.push(label.clone());
            }
        }

        Ok(ResolvedJoin {
            left_ids,
            right_ids,
            left_date,
            right_date,
            anchor_key,
            link_columns,
        })
    }
}

/// Anchor rows must be unique over `left_link_id`, or over (ids, date).
fn check_anchor_unique(left: &Table, anchor_key: &[ColumnLabel]) -> Result<(), LinkError> {
    let duplicates = left.duplicate_key_count(anchor_key)?;
    if duplicates > 0 {
        return Err(LinkError::NonUniqueAnchor {
            columns: anchor_key
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
            duplicates,
        });
    }
    Ok(())
}

#[derive(Debug)]
struct ResolvedJoin {
    left_ids: Vec<ColumnLabel>,
    right_ids: Vec<ColumnLabel>,
    left_date: ColumnLabel,
    right_date: ColumnLabel,
    anchor_key: Vec<ColumnLabel>,
    link_columns: Vec<ColumnLabel>,
}

/// Result of a proximity join.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkedTable {
    pub table: Table,
    /// Some anchor row still has more than one secondary row in `table`.
    pub duplicates: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Candidate {
    anchor: usize,
    secondary: Option<usize>,
    diff: Option<i64>,
}

/// Link every `left` (anchor) row to the `right` rows of the same subject whose
/// date falls inside the configured window.
///
/// Anchors are never disambiguated silently: under [`Get::Closest`] every row
/// at the minimal distance survives, and anchors left with several rows are
/// reported through [`LinkedTable::duplicates`] and the indicator column.
pub fn proximity_join(
    left: &Table,
    right: &Table,
    spec: &JoinSpec,
) -> Result<LinkedTable, LinkError> {
    let resolved = spec.resolve(left, right)?;
    let left = with_datetime(left, &resolved.left_date)?;
    let right = with_datetime(right, &resolved.right_date)?;
    check_anchor_unique(&left, &resolved.anchor_key)?;

    let mut candidates = candidates(&left, &right, &resolved, spec)?;
    if spec.get == Get::Closest {
        candidates = closest(&candidates);
    }
    if !spec.dropna {
        candidates = with_unmatched_anchors(left.nrows(), &candidates);
    }
    if spec.drop_duplicates {
        candidates = last_per_anchor(&candidates);
    }

    let group_sizes = anchor_group_sizes(&candidates);
    let duplicates = group_sizes.iter().any(|size| *size > 1);
    if duplicates {
        trace_ambiguous(&candidates);
    }

    let indicator = if spec.drop_duplicates {
        None
    } else {
        spec.duplicate_indicator.as_deref()
    };
    let table = finish(&left, &right, &resolved, spec, &candidates, &group_sizes, indicator)?;
    Ok(LinkedTable { table, duplicates })
}

#[cfg(feature = "tracing")]
fn trace_ambiguous(candidates: &[Candidate]) {
    let anchors = candidates
        .chunk_by(|a, b| a.anchor == b.anchor)
        .filter(|group| group.len() > 1)
        .count();
    tracing::debug!(anchors, rows = candidates.len(), "proximity join left ambiguous anchors");
}

#[cfg(not(feature = "tracing"))]
fn trace_ambiguous(_candidates: &[Candidate]) {}

fn with_datetime(table: &Table, label: &ColumnLabel) -> Result<Table, LinkError> {
    let coerced = table.column(label)?.to_datetime()?;
    Ok(table.with_column(label, coerced)?)
}

/// Steps 2 to 5: left-outer id join, signed day difference, window and
/// direction filters. Output stays grouped by anchor in anchor order.
fn candidates(
    left: &Table,
    right: &Table,
    resolved: &ResolvedJoin,
    spec: &JoinSpec,
) -> Result<Vec<Candidate>, LinkError> {
    let link = left.select(&resolved.link_columns)?;
    let positions = join_positions(
        &link,
        &resolved.left_ids,
        right,
        &resolved.right_ids,
        JoinType::Left,
    )?;

    let anchors = positions.left.iter().copied().map(Some).collect::<Vec<_>>();
    let anchor_dates = link
        .column(&resolved.left_date)?
        .reindex_by_positions(&anchors)?;
    let secondary_dates = right
        .column(&resolved.right_date)?
        .reindex_by_positions(&positions.right)?;
    let diffs = anchor_dates.days_until(&secondary_dates)?;

    Ok(positions
        .left
        .iter()
        .zip(&positions.right)
        .zip(diffs.values())
        .filter_map(|((&anchor, &secondary), diff)| match diff {
            Scalar::Int64(diff) if spec.admits(*diff) => Some(Candidate {
                anchor,
                secondary,
                diff: Some(*diff),
            }),
            _ => None,
        })
        .collect())
}

fn closest(candidates: &[Candidate]) -> Vec<Candidate> {
    let mut kept = Vec::with_capacity(candidates.len());
    for group in candidates.chunk_by(|a, b| a.anchor == b.anchor) {
        let best = group.iter().filter_map(|candidate| candidate.diff.map(i64::abs)).min();
        kept.extend(
            group
                .iter()
                .filter(|candidate| candidate.diff.map(i64::abs) == best)
                .copied(),
        );
    }
    kept
}

fn with_unmatched_anchors(anchors: usize, candidates: &[Candidate]) -> Vec<Candidate> {
    let mut out = Vec::with_capacity(candidates.len().max(anchors));
    let mut rest = candidates;
    for anchor in 0..anchors {
        let matched = rest.iter().take_while(|candidate| candidate.anchor == anchor).count();
        if matched == 0 {
            out.push(Candidate {
                anchor,
                secondary: None,
                diff: None,
            });
        } else {
            out.extend_from_slice(&rest[..matched]);
            rest = &rest[matched..];
        }
    }
    out
}

fn last_per_anchor(candidates: &[Candidate]) -> Vec<Candidate> {
    candidates
        .chunk_by(|a, b| a.anchor == b.anchor)
        .filter_map(|group| group.last().copied())
        .collect()
}

/// Size of the anchor group each candidate belongs to, row aligned.
fn anchor_group_sizes(candidates: &[Candidate]) -> Vec<usize> {
    candidates
        .chunk_by(|a, b| a.anchor == b.anchor)
        .flat_map(|group| std::iter::repeat_n(group.len(), group.len()))
        .collect()
}

/// Steps 9 and 10: pick and name the output columns.
fn finish(
    left: &Table,
    right: &Table,
    resolved: &ResolvedJoin,
    spec: &JoinSpec,
    candidates: &[Candidate],
    group_sizes: &[usize],
    indicator: Option<&str>,
) -> Result<Table, LinkError> {
    let anchors = candidates
        .iter()
        .map(|candidate| Some(candidate.anchor))
        .collect::<Vec<_>>();
    let secondaries = candidates
        .iter()
        .map(|candidate| candidate.secondary)
        .collect::<Vec<_>>();

    // Both scopes carry `<link column><link_marker>` breadcrumbs back to the
    // anchor row.
    let breadcrumbs = left
        .select(&resolved.link_columns)?
        .take(&anchors)?
        .map_labels(|label| label.with_suffix(&spec.link_marker))?;
    let [left_suffix, right_suffix] = &spec.suffixes;
    let mut secondary_side = right.take(&secondaries)?;
    let mut anchor_side = match spec.merge {
        MergeScope::Partial => breadcrumbs,
        MergeScope::Full => {
            let anchor_rows = left.take(&anchors)?;
            let overlap = overlapping_labels(anchor_rows.labels(), secondary_side.labels());
            secondary_side = suffix_matching(&secondary_side, &overlap, right_suffix)?;
            suffix_matching(&anchor_rows, &overlap, left_suffix)?.hconcat(&breadcrumbs)?
        }
    };

    // Input columns named like the generated ones keep their data under a
    // suffixed name.
    let generated = std::iter::once(spec.diff_column.as_str())
        .chain(indicator)
        .map(ColumnLabel::flat)
        .collect::<Vec<_>>();
    anchor_side = suffix_matching(&anchor_side, &generated, left_suffix)?;
    secondary_side = suffix_matching(&secondary_side, &generated, right_suffix)?;

    secondary_side = secondary_side.with_column(
        spec.diff_column.as_str(),
        Column::from_optional_i64(candidates.iter().map(|candidate| candidate.diff)),
    )?;
    if let Some(indicator) = indicator {
        secondary_side = secondary_side.with_column(
            indicator,
            Column::from_bools(group_sizes.iter().map(|size| *size > 1)),
        )?;
    }

    if let Some(level) = &spec.levels[0] {
        anchor_side = anchor_side.with_level(level)?;
    }
    if let Some(level) = &spec.levels[1] {
        secondary_side = secondary_side.with_level(level)?;
    }
    Ok(anchor_side.hconcat(&secondary_side)?)
}

fn suffix_matching(
    table: &Table,
    names: &[ColumnLabel],
    suffix: &str,
) -> Result<Table, FrameError> {
    table.map_labels(|label| {
        if names.iter().any(|name| name.matches(label)) {
            label.with_suffix(suffix)
        } else {
            label.clone()
        }
    })
}

#[cfg(test)]
mod tests {
    use dl_columnar::Column;
    use dl_frame::{ColumnLabel, Table};
    use dl_join::JoinKeys;
    use dl_runtime::LinkConfig;
    use dl_types::{DType, ErrorKind, NullKind, Scalar};

    use super::{Get, JoinSpec, LinkedTable, MergeScope, When, proximity_join};

    fn dates(values: &[&str]) -> Column {
        Column::new(
            DType::Datetime,
            values
                .iter()
                .map(|value| Scalar::Utf8((*value).to_owned()))
                .collect(),
        )
        .expect("dates")
    }

    fn ints(values: &[i64]) -> Column {
        Column::from_values(values.iter().copied().map(Scalar::Int64).collect()).expect("ints")
    }

    fn anchor() -> Table {
        Table::from_columns([
            ("ID", ints(&[0, 1])),
            ("PIDN", ints(&[1, 2])),
            ("DCDate", dates(&["2001-03-02", "2001-01-01"])),
        ])
        .expect("anchor")
    }

    fn secondary(pidns: &[i64], visit_dates: &[&str]) -> Table {
        let scores = (0..pidns.len() as i64).map(|idx| idx * 10).collect::<Vec<_>>();
        Table::from_columns([
            ("PIDN", ints(pidns)),
            ("DCDate", dates(visit_dates)),
            ("Score", ints(&scores)),
        ])
        .expect("secondary")
    }

    fn spec() -> JoinSpec {
        JoinSpec::new(
            JoinKeys::on(["PIDN"]),
            JoinKeys::on(["DCDate"]),
            &LinkConfig::default(),
        )
        .with_days(90)
        .with_get(Get::Closest)
        .with_left_link_id("ID")
    }

    fn diffs(linked: &LinkedTable) -> Vec<Scalar> {
        linked.table.column("date_diff").expect("diff").values().to_vec()
    }

    #[test]
    fn closest_keeps_unique_minimum() {
        let right = secondary(&[1, 1], &["2001-03-10", "2001-05-01"]);
        let linked = proximity_join(&anchor(), &right, &spec().with_dropna(true)).expect("join");
        assert_eq!(diffs(&linked), vec![Scalar::Int64(8)]);
        assert!(!linked.duplicates);
        assert_eq!(
            linked.table.column("DCDate").expect("secondary date").values(),
            dates(&["2001-03-10"]).values()
        );
    }

    #[test]
    fn closest_ties_survive_and_are_flagged() {
        let right = secondary(&[1, 1], &["2001-03-10", "2001-02-22"]);
        let linked = proximity_join(&anchor(), &right, &spec().with_dropna(true)).expect("join");
        assert_eq!(diffs(&linked), vec![Scalar::Int64(8), Scalar::Int64(-8)]);
        assert!(linked.duplicates);
        assert_eq!(
            linked.table.column("duplicate").expect("indicator").values(),
            &[Scalar::Bool(true), Scalar::Bool(true)]
        );

        let later_spec = spec().with_dropna(true).with_when(When::Later);
        let later = proximity_join(&anchor(), &right, &later_spec).expect("later");
        assert_eq!(diffs(&later), vec![Scalar::Int64(8)]);
        assert!(!later.duplicates);
    }

    #[test]
    fn dropna_controls_unmatched_anchors() {
        let right = secondary(&[1, 2], &["2001-03-10", "2001-03-01"]);
        let spec = spec().with_days(10);

        let kept =
            proximity_join(&anchor(), &right, &spec.clone().with_dropna(false)).expect("kept");
        assert_eq!(kept.table.nrows(), 2);
        assert_eq!(
            kept.table.column("PIDN_link").expect("link").values(),
            &[Scalar::Int64(1), Scalar::Int64(2)]
        );
        assert_eq!(
            kept.table.column("Score").expect("score").values()[1],
            Scalar::Null(NullKind::Null)
        );
        assert_eq!(
            kept.table.column("DCDate").expect("date").values()[1],
            Scalar::Null(NullKind::NaT)
        );

        let dropped = proximity_join(&anchor(), &right, &spec.with_dropna(true)).expect("dropped");
        assert_eq!(dropped.table.nrows(), 1);
        assert_eq!(
            dropped.table.column("ID_link").expect("link id").values(),
            &[Scalar::Int64(0)]
        );
    }

    #[test]
    fn zero_day_window_admits_only_same_day() {
        let right = secondary(&[1, 1], &["2001-03-02", "2001-03-03"]);
        let linked = proximity_join(
            &anchor(),
            &right,
            &spec().with_days(0).with_get(Get::All).with_dropna(true),
        )
        .expect("join");
        assert_eq!(diffs(&linked), vec![Scalar::Int64(0)]);
    }

    #[test]
    fn drop_duplicates_keeps_last_row_and_clears_flag() {
        let right = secondary(&[1, 1], &["2001-03-10", "2001-02-22"]);
        let linked = proximity_join(
            &anchor(),
            &right,
            &spec().with_dropna(true).with_drop_duplicates(true),
        )
        .expect("join");
        assert_eq!(diffs(&linked), vec![Scalar::Int64(-8)]);
        assert!(!linked.duplicates);
        assert!(!linked.table.has_column("duplicate"));
    }

    #[test]
    fn full_scope_suffixes_colliding_names() {
        let right = secondary(&[1], &["2001-03-10"]);
        let linked = proximity_join(
            &anchor(),
            &right,
            &spec().with_dropna(true).with_merge(MergeScope::Full),
        )
        .expect("join");
        let labels = linked.table.labels();
        assert_eq!(
            labels,
            &[
                ColumnLabel::flat("ID"),
                ColumnLabel::flat("PIDN_x"),
                ColumnLabel::flat("DCDate_x"),
                ColumnLabel::flat("PIDN_link"),
                ColumnLabel::flat("DCDate_link"),
                ColumnLabel::flat("ID_link"),
                ColumnLabel::flat("PIDN_y"),
                ColumnLabel::flat("DCDate_y"),
                ColumnLabel::flat("Score"),
                ColumnLabel::flat("date_diff"),
                ColumnLabel::flat("duplicate"),
            ]
        );
    }

    #[test]
    fn levels_attribute_columns_to_each_side() {
        let right = secondary(&[1], &["2001-03-10"]);
        let linked = proximity_join(
            &anchor(),
            &right,
            &spec()
                .with_dropna(true)
                .with_levels(Some("udsa".to_owned()), Some("cdr".to_owned())),
        )
        .expect("join");
        assert!(linked.table.has_column(("udsa", "PIDN_link")));
        assert!(linked.table.has_column(("cdr", "Score")));
        assert!(linked.table.has_column(("cdr", "date_diff")));
        assert!(linked.table.has_column(("cdr", "duplicate")));
    }

    #[test]
    fn repeated_anchor_pairs_are_rejected_before_joining() {
        let left = Table::from_columns([
            ("PIDN", ints(&[1, 1])),
            ("DCDate", dates(&["2001-03-02", "2001-03-02"])),
        ])
        .expect("left");
        let right = secondary(&[1], &["2001-03-10"]);
        let spec = JoinSpec::new(
            JoinKeys::on(["PIDN"]),
            JoinKeys::on(["DCDate"]),
            &LinkConfig::default(),
        );
        let err = proximity_join(&left, &right, &spec).expect_err("not unique");
        assert_eq!(err.kind(), ErrorKind::Uniqueness);
    }

    #[test]
    fn repeated_link_ids_are_rejected_before_joining() {
        let left = Table::from_columns([
            ("ID", ints(&[0, 0])),
            ("PIDN", ints(&[1, 2])),
            ("DCDate", dates(&["2001-03-02", "2001-01-01"])),
        ])
        .expect("left");
        let right = secondary(&[1], &["2001-03-10"]);
        let err = proximity_join(&left, &right, &spec()).expect_err("link id not unique");
        assert_eq!(err.kind(), ErrorKind::Uniqueness);
    }

    #[test]
    fn unique_link_id_allows_repeated_anchor_pairs() {
        let left = Table::from_columns([
            ("ID", ints(&[0, 1])),
            ("PIDN", ints(&[1, 1])),
            ("DCDate", dates(&["2001-03-02", "2001-03-02"])),
        ])
        .expect("left");
        let right = secondary(&[1], &["2001-03-10"]);
        let linked = proximity_join(&left, &right, &spec()).expect("join");
        assert_eq!(
            linked.table.column("ID_link").expect("link id").values(),
            &[Scalar::Int64(0), Scalar::Int64(1)]
        );
        assert_eq!(diffs(&linked), vec![Scalar::Int64(8), Scalar::Int64(8)]);
        assert!(!linked.duplicates);
    }

    #[test]
    fn input_columns_named_like_generated_ones_are_suffixed() {
        let right = secondary(&[1], &["2001-03-10"])
            .with_column("date_diff", ints(&[999]))
            .expect("secondary diff");
        let linked = proximity_join(&anchor(), &right, &spec().with_dropna(true)).expect("join");
        assert_eq!(diffs(&linked), vec![Scalar::Int64(8)]);
        assert_eq!(
            linked.table.column("date_diff_y").expect("kept").values(),
            &[Scalar::Int64(999)]
        );

        let left = anchor()
            .with_column("duplicate", Column::from_bools([false, true]))
            .expect("anchor flag");
        let full = proximity_join(
            &left,
            &right,
            &spec().with_dropna(true).with_merge(MergeScope::Full),
        )
        .expect("full");
        assert!(full.table.has_column("duplicate_x"));
        assert!(full.table.has_column("date_diff_y"));
        assert_eq!(
            full.table.column("duplicate").expect("indicator").values(),
            &[Scalar::Bool(false)]
        );
    }

    #[test]
    fn invalid_parameters_fail_fast() {
        let right = secondary(&[1], &["2001-03-10"]);
        let negative = proximity_join(&anchor(), &right, &spec().with_days(-1)).expect_err("days");
        assert_eq!(negative.kind(), ErrorKind::ValueType);

        let mut contradictory = spec();
        contradictory.ids.left_on = Some(vec!["PIDN".into()]);
        let err = proximity_join(&anchor(), &right, &contradictory).expect_err("on + left_on");
        assert_eq!(err.kind(), ErrorKind::Specification);

        let missing = spec().with_left_link_id("VisitID");
        let err = proximity_join(&anchor(), &right, &missing).expect_err("no column");
        assert_eq!(err.kind(), ErrorKind::ColumnLookup);

        assert_eq!(
            "sooner".parse::<When>().expect_err("policy").kind(),
            ErrorKind::ValueType
        );
        assert_eq!("closest".parse::<Get>().expect("get"), Get::Closest);
        assert_eq!("full".parse::<MergeScope>().expect("scope"), MergeScope::Full);
    }

    #[test]
    fn separate_key_names_and_text_dates() {
        let left = Table::from_columns([
            ("SubjectID", ints(&[7])),
            (
                "VisitDate",
                Column::from_values(vec![Scalar::Utf8("2001-03-02".to_owned())]).expect("text"),
            ),
        ])
        .expect("left");
        let right = secondary(&[7], &["2001-03-01"]);
        let spec = JoinSpec::new(
            JoinKeys::sides(["subjectid"], ["pidn"]),
            JoinKeys::sides(["visitdate"], ["dcdate"]),
            &LinkConfig::default(),
        )
        .with_days(1)
        .with_when(When::Earlier);
        let linked = proximity_join(&left, &right, &spec).expect("join");
        assert_eq!(diffs(&linked), vec![Scalar::Int64(-1)]);
        assert!(linked.table.has_column("SubjectID_link"));
        assert!(linked.table.has_column("VisitDate_link"));
    }
}
