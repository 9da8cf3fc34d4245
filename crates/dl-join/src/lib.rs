#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::mem::size_of;

use bumpalo::{Bump, collections::Vec as BumpVec};
use dl_columnar::ColumnError;
use dl_frame::{ColumnLabel, FrameError, Table, row_key};
use dl_index::overlapping_labels;
use dl_types::{ErrorKind, KeyRef};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinType {
    Inner,
    Left,
}

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("invalid join specification: {0}")]
    Specification(String),
    #[error("invalid option value: {0}")]
    ValueType(String),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Column(#[from] ColumnError),
}

impl MergeError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Specification(_) => ErrorKind::Specification,
            Self::ValueType(_) => ErrorKind::ValueType,
            Self::Frame(err) => err.kind(),
            Self::Column(err) => err.kind(),
        }
    }
}

/// Join keys given either as one shared list (`on`) or as one list per side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinKeys {
    pub on: Option<Vec<ColumnLabel>>,
    pub left_on: Option<Vec<ColumnLabel>>,
    pub right_on: Option<Vec<ColumnLabel>>,
}

/// Validated key lists of equal arity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedKeys {
    pub left: Vec<ColumnLabel>,
    pub right: Vec<ColumnLabel>,
    /// Keys came from `on`, so both sides name the same columns.
    pub shared: bool,
}

impl JoinKeys {
    #[must_use]
    pub fn on<L: Into<ColumnLabel>>(keys: impl IntoIterator<Item = L>) -> Self {
        Self {
            on: Some(keys.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn sides<L: Into<ColumnLabel>, R: Into<ColumnLabel>>(
        left: impl IntoIterator<Item = L>,
        right: impl IntoIterator<Item = R>,
    ) -> Self {
        Self {
            on: None,
            left_on: Some(left.into_iter().map(Into::into).collect()),
            right_on: Some(right.into_iter().map(Into::into).collect()),
        }
    }

    /// Enforce "exactly one of `on` or (`left_on`, `right_on`)".
    pub fn resolve(&self) -> Result<ResolvedKeys, MergeError> {
        let resolved = match (&self.on, &self.left_on, &self.right_on) {
            (Some(on), None, None) => ResolvedKeys {
                left: on.clone(),
                right: on.clone(),
                shared: true,
            },
            (None, Some(left), Some(right)) => {
                if left.len() != right.len() {
                    return Err(MergeError::Specification(format!(
                        "left_on has {} keys but right_on has {}",
                        left.len(),
                        right.len()
                    )));
                }
                ResolvedKeys {
                    left: left.clone(),
                    right: right.clone(),
                    shared: false,
                }
            }
            (Some(_), _, _) => {
                return Err(MergeError::Specification(
                    "`on` cannot be combined with `left_on`/`right_on`".to_owned(),
                ));
            }
            (None, None, None) => {
                return Err(MergeError::Specification(
                    "one of `on` or `left_on` + `right_on` is required".to_owned(),
                ));
            }
            (None, _, _) => {
                return Err(MergeError::Specification(
                    "`left_on` and `right_on` must be given together".to_owned(),
                ));
            }
        };

        if resolved.left.is_empty() {
            return Err(MergeError::Specification(
                "join keys must not be empty".to_owned(),
            ));
        }
        Ok(resolved)
    }
}

/// Build a two-element array from loosely shaped input.
pub fn string_pair<S: AsRef<str>>(values: &[S], what: &str) -> Result<[String; 2], MergeError> {
    match values {
        [left, right] => Ok([left.as_ref().to_owned(), right.as_ref().to_owned()]),
        _ => Err(MergeError::ValueType(format!(
            "{what} must have exactly 2 elements, got {}",
            values.len()
        ))),
    }
}

/// Build a per-side label pair from loosely shaped input.
pub fn level_pair<S: AsRef<str>>(values: &[Option<S>]) -> Result<[Option<String>; 2], MergeError> {
    match values {
        [left, right] => Ok([
            left.as_ref().map(|value| value.as_ref().to_owned()),
            right.as_ref().map(|value| value.as_ref().to_owned()),
        ]),
        _ => Err(MergeError::ValueType(format!(
            "index labels must have exactly 2 elements, got {}",
            values.len()
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSpec {
    pub keys: JoinKeys,
    pub how: JoinType,
    pub suffixes: [String; 2],
    /// Suffix every column (keys included) before joining. When false the
    /// suffixes only disambiguate non-key columns present on both sides.
    pub apply_suffixes: bool,
    /// Optional top-level label per side.
    pub levels: [Option<String>; 2],
}

impl MergeSpec {
    #[must_use]
    pub fn new(keys: JoinKeys) -> Self {
        Self {
            keys,
            how: JoinType::Left,
            suffixes: ["_x".to_owned(), "_y".to_owned()],
            apply_suffixes: false,
            levels: [None, None],
        }
    }

    #[must_use]
    pub fn suffixed(mut self, suffixes: [String; 2]) -> Self {
        self.suffixes = suffixes;
        self.apply_suffixes = true;
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

    #[must_use]
    pub fn with_how(mut self, how: JoinType) -> Self {
        self.how = how;
        self
    }

    pub fn validate(&self) -> Result<ResolvedKeys, MergeError> {
        let keys = self.keys.resolve()?;
        let [left, right] = &self.suffixes;
        if left == right {
            return Err(MergeError::ValueType(format!(
                "suffix pair must differ, got {left:?} twice"
            )));
        }
        Ok(keys)
    }

    fn side_label(&self, side: usize, label: &ColumnLabel) -> ColumnLabel {
        let mut out = label.clone();
        if self.apply_suffixes {
            out = out.with_suffix(&self.suffixes[side]);
        }
        if let Some(level) = &self.levels[side] {
            out = out.with_level(level.as_str());
        }
        out
    }
}

/// Row pairing produced by the hash join kernel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinPositions {
    pub left: Vec<usize>,
    pub right: Vec<Option<usize>>,
}

impl JoinPositions {
    #[must_use]
    pub fn len(&self) -> usize {
        self.left.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }
}

type KeyMap<'a> = HashMap<Vec<KeyRef<'a>>, Vec<usize>>;

fn key_rows<'a>(
    table: &'a Table,
    labels: &[ColumnLabel],
) -> Result<Vec<Vec<KeyRef<'a>>>, MergeError> {
    let columns = table.columns_for(labels)?;
    Ok((0..table.nrows()).map(|row| row_key(&columns, row)).collect())
}

fn build_right_map<'a>(right_keys: &[Vec<KeyRef<'a>>]) -> KeyMap<'a> {
    let mut right_map = KeyMap::with_capacity(right_keys.len());
    for (pos, key) in right_keys.iter().enumerate() {
        right_map.entry(key.clone()).or_default().push(pos);
    }
    right_map
}

/// Walk left rows in order, emitting every right match in right order; a
/// left row without matches is emitted once with `None` for left joins.
fn probe(
    left_keys: &[Vec<KeyRef<'_>>],
    right_map: &KeyMap<'_>,
    how: JoinType,
    mut emit: impl FnMut(usize, Option<usize>),
) {
    for (left_pos, key) in left_keys.iter().enumerate() {
        if let Some(matches) = right_map.get(key) {
            for right_pos in matches {
                emit(left_pos, Some(*right_pos));
            }
            continue;
        }

        if matches!(how, JoinType::Left) {
            emit(left_pos, None);
        }
    }
}

fn estimate_output_rows(
    left_keys: &[Vec<KeyRef<'_>>],
    right_map: &KeyMap<'_>,
    how: JoinType,
) -> usize {
    left_keys
        .iter()
        .map(|key| match right_map.get(key) {
            Some(matches) => matches.len(),
            None if matches!(how, JoinType::Left) => 1,
            None => 0,
        })
        .sum()
}

/// Equi-join kernel over (possibly composite) keys.
pub fn join_positions(
    left: &Table,
    left_on: &[ColumnLabel],
    right: &Table,
    right_on: &[ColumnLabel],
    how: JoinType,
) -> Result<JoinPositions, MergeError> {
    let left_keys = key_rows(left, left_on)?;
    let right_keys = key_rows(right, right_on)?;
    let right_map = build_right_map(&right_keys);

    let output_rows = estimate_output_rows(&left_keys, &right_map, how);
    let mut positions = JoinPositions {
        left: Vec::with_capacity(output_rows),
        right: Vec::with_capacity(output_rows),
    };
    probe(&left_keys, &right_map, how, |left_pos, right_pos| {
        positions.left.push(left_pos);
        positions.right.push(right_pos);
    });
    Ok(positions)
}

pub const DEFAULT_ARENA_BUDGET_BYTES: usize = 256 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinExecutionOptions {
    pub use_arena: bool,
    pub arena_budget_bytes: usize,
}

impl Default for JoinExecutionOptions {
    fn default() -> Self {
        Self {
            use_arena: true,
            arena_budget_bytes: DEFAULT_ARENA_BUDGET_BYTES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct JoinExecutionTrace {
    used_arena: bool,
    output_rows: usize,
}

/// Left-outer (by default) merge of two tables; see [`MergeSpec`].
pub fn merge(left: &Table, right: &Table, spec: &MergeSpec) -> Result<Table, MergeError> {
    merge_with_options(left, right, spec, JoinExecutionOptions::default())
}

pub fn merge_with_options(
    left: &Table,
    right: &Table,
    spec: &MergeSpec,
    options: JoinExecutionOptions,
) -> Result<Table, MergeError> {
    let (table, _) = merge_with_trace(left, right, spec, options)?;
    Ok(table)
}

fn merge_with_trace(
    left: &Table,
    right: &Table,
    spec: &MergeSpec,
    options: JoinExecutionOptions,
) -> Result<(Table, JoinExecutionTrace), MergeError> {
    let keys = spec.validate()?;
    let left_on = keys
        .left
        .iter()
        .map(|label| left.resolve(label))
        .collect::<Result<Vec<_>, _>>()?;
    let right_on = keys
        .right
        .iter()
        .map(|label| right.resolve(label))
        .collect::<Result<Vec<_>, _>>()?;

    // Relabel each side, then the keys are addressed through the same mapping.
    let left_side = left.map_labels(|label| spec.side_label(0, label))?;
    let right_side = right.map_labels(|label| spec.side_label(1, label))?;
    let left_key_labels = left_on
        .iter()
        .map(|label| spec.side_label(0, label))
        .collect::<Vec<_>>();
    let right_key_labels = right_on
        .iter()
        .map(|label| spec.side_label(1, label))
        .collect::<Vec<_>>();

    let left_keys = key_rows(&left_side, &left_key_labels)?;
    let right_keys = key_rows(&right_side, &right_key_labels)?;
    let right_map = build_right_map(&right_keys);
    let output_rows = estimate_output_rows(&left_keys, &right_map, spec.how);
    let estimated_bytes = output_rows.saturating_mul(size_of::<Option<usize>>().saturating_mul(2));
    let use_arena = options.use_arena && estimated_bytes <= options.arena_budget_bytes;

    let (left_taken, right_taken) = if use_arena {
        let arena = Bump::new();
        let mut left_positions = BumpVec::<Option<usize>>::with_capacity_in(output_rows, &arena);
        let mut right_positions = BumpVec::<Option<usize>>::with_capacity_in(output_rows, &arena);
        probe(&left_keys, &right_map, spec.how, |left_pos, right_pos| {
            left_positions.push(Some(left_pos));
            right_positions.push(right_pos);
        });
        (
            left_side.take(left_positions.as_slice())?,
            right_side.take(right_positions.as_slice())?,
        )
    } else {
        let mut left_positions = Vec::with_capacity(output_rows);
        let mut right_positions = Vec::with_capacity(output_rows);
        probe(&left_keys, &right_map, spec.how, |left_pos, right_pos| {
            left_positions.push(Some(left_pos));
            right_positions.push(right_pos);
        });
        (left_side.take(&left_positions)?, right_side.take(&right_positions)?)
    };

    // `on` keys that still share a label after relabeling are kept once.
    let coalesced = if keys.shared {
        left_key_labels
            .iter()
            .zip(&right_key_labels)
            .filter(|(left_label, right_label)| left_label.matches(right_label))
            .map(|(_, right_label)| right_label.clone())
            .collect::<Vec<_>>()
    } else {
        Vec::new()
    };
    let right_taken = right_taken.drop_columns(&coalesced)?;

    let overlap = overlapping_labels(left_taken.labels(), right_taken.labels());
    let (left_taken, right_taken) = if overlap.is_empty() {
        (left_taken, right_taken)
    } else {
        let [left_suffix, right_suffix] = &spec.suffixes;
        let collides = |label: &ColumnLabel| overlap.iter().any(|other| other.matches(label));
        (
            left_taken.map_labels(|label| {
                if collides(label) {
                    label.with_suffix(left_suffix)
                } else {
                    label.clone()
                }
            })?,
            right_taken.map_labels(|label| {
                if collides(label) {
                    label.with_suffix(right_suffix)
                } else {
                    label.clone()
                }
            })?,
        )
    };

    let table = left_taken.hconcat(&right_taken)?;
    Ok((
        table,
        JoinExecutionTrace {
            used_arena: use_arena,
            output_rows,
        },
    ))
}

#[cfg(test)]
mod tests {
    use dl_columnar::Column;
    use dl_frame::{ColumnLabel, Table};
    use dl_types::{ErrorKind, NullKind, Scalar};

    use super::{
        JoinExecutionOptions, JoinKeys, JoinType, MergeSpec, join_positions, level_pair, merge,
        merge_with_trace, string_pair,
    };

    fn ints(values: &[i64]) -> Column {
        Column::from_values(values.iter().copied().map(Scalar::Int64).collect()).expect("ints")
    }

    fn text(values: &[&str]) -> Column {
        Column::from_values(
            values
                .iter()
                .map(|value| Scalar::Utf8((*value).to_owned()))
                .collect(),
        )
        .expect("text")
    }

    fn left() -> Table {
        Table::from_columns([("PIDN", ints(&[1, 2, 3])), ("score", ints(&[10, 20, 30]))])
            .expect("left")
    }

    fn right() -> Table {
        Table::from_columns([
            ("pidn", ints(&[2, 1, 2])),
            ("score", ints(&[200, 100, 201])),
            ("site", text(&["b", "a", "b"])),
        ])
        .expect("right")
    }

    #[test]
    fn key_spec_rejects_contradictions() {
        let both = JoinKeys {
            on: Some(vec!["PIDN".into()]),
            left_on: Some(vec!["PIDN".into()]),
            right_on: Some(vec!["PIDN".into()]),
        };
        assert_eq!(
            both.resolve().expect_err("both").kind(),
            ErrorKind::Specification
        );
        assert!(JoinKeys::default().resolve().is_err());
        let uneven = JoinKeys::sides(["a", "b"], ["a"]);
        assert!(uneven.resolve().is_err());
        let half = JoinKeys {
            left_on: Some(vec!["a".into()]),
            ..JoinKeys::default()
        };
        assert!(half.resolve().is_err());
    }

    #[test]
    fn loose_pairs_must_have_two_elements() {
        assert_eq!(
            string_pair(&["_a", "_b", "_c"], "suffixes")
                .expect_err("three")
                .kind(),
            ErrorKind::ValueType
        );
        assert_eq!(
            level_pair(&[Some("anchor"), None]).expect("pair"),
            [Some("anchor".to_owned()), None]
        );
    }

    #[test]
    fn left_merge_on_shared_key_keeps_one_key_and_suffixes_overlap() {
        let out = merge(&left(), &right(), &MergeSpec::new(JoinKeys::on(["PIDN"]))).expect("merge");
        assert_eq!(
            out.labels(),
            &[
                ColumnLabel::flat("PIDN"),
                ColumnLabel::flat("score_x"),
                ColumnLabel::flat("score_y"),
                ColumnLabel::flat("site"),
            ]
        );
        assert_eq!(
            out.column("PIDN").expect("pidn").values(),
            &[Scalar::Int64(1), Scalar::Int64(2), Scalar::Int64(2), Scalar::Int64(3)]
        );
        assert_eq!(
            out.column("score_y").expect("score_y").values(),
            &[
                Scalar::Int64(100),
                Scalar::Int64(200),
                Scalar::Int64(201),
                Scalar::Null(NullKind::Null)
            ]
        );
    }

    #[test]
    fn requested_suffixes_apply_to_every_column_including_keys() {
        let spec =
            MergeSpec::new(JoinKeys::on(["PIDN"])).suffixed(["_l".to_owned(), "_r".to_owned()]);
        let out = merge(&left(), &right(), &spec).expect("merge");
        assert!(out.has_column("PIDN_l"));
        assert!(out.has_column("pidn_r"));
        assert!(out.has_column("site_r"));
        assert_eq!(out.nrows(), 4);
    }

    #[test]
    fn levels_namespace_each_side_and_address_keys_through_the_level() {
        let spec = MergeSpec::new(JoinKeys::sides(["PIDN"], ["pidn"]))
            .with_levels(Some("udsa".to_owned()), Some("cdr".to_owned()));
        let out = merge(&left(), &right(), &spec).expect("merge");
        assert!(out.has_column(("udsa", "score")));
        assert!(out.has_column(("cdr", "score")));
        assert!(out.has_column(("cdr", "pidn")));
        assert_eq!(out.ncols(), 5);
    }

    #[test]
    fn missing_key_column_is_a_lookup_error() {
        let err = merge(&left(), &right(), &MergeSpec::new(JoinKeys::on(["visit"])))
            .expect_err("no visit");
        assert_eq!(err.kind(), ErrorKind::ColumnLookup);
    }

    #[test]
    fn inner_kernel_multiplies_duplicate_matches() {
        let positions = join_positions(
            &left(),
            &["PIDN".into()],
            &right(),
            &["PIDN".into()],
            JoinType::Inner,
        )
        .expect("positions");
        assert_eq!(positions.left, vec![0, 1, 1]);
        assert_eq!(positions.right, vec![Some(1), Some(0), Some(2)]);
    }

    #[test]
    fn null_keys_match_each_other() {
        let left = Table::from_columns([(
            "k",
            Column::from_values(vec![Scalar::Null(NullKind::Null)]).expect("null"),
        )])
        .expect("left");
        let right = Table::from_columns([
            (
                "k",
                Column::from_values(vec![Scalar::Int64(1), Scalar::Null(NullKind::Null)])
                    .expect("k"),
            ),
            ("v", ints(&[1, 2])),
        ])
        .expect("right");
        let out = merge(&left, &right, &MergeSpec::new(JoinKeys::on(["k"]))).expect("merge");
        assert_eq!(out.column("v").expect("v").values(), &[Scalar::Int64(2)]);
    }

    #[test]
    fn arena_budget_controls_execution_path() {
        let spec = MergeSpec::new(JoinKeys::on(["PIDN"]));
        let (with_arena, trace) =
            merge_with_trace(&left(), &right(), &spec, JoinExecutionOptions::default())
                .expect("arena");
        assert!(trace.used_arena);
        assert_eq!(trace.output_rows, 4);

        let (without_arena, trace) = merge_with_trace(
            &left(),
            &right(),
            &spec,
            JoinExecutionOptions {
                use_arena: true,
                arena_budget_bytes: 1,
            },
        )
        .expect("global allocator");
        assert!(!trace.used_arena);
        assert_eq!(with_arena, without_arena);
    }
}
