use std::fmt;

use dl_frame::{ColumnLabel, FrameError, Table};
use dl_groupby::{GroupByError, KeepOneSpec, keep_one};
use dl_join::{JoinKeys, MergeError, MergeSpec, merge};
use dl_proximity::{JoinSpec, LinkError, LinkedTable, proximity_join};
use dl_runtime::OperationParams;
use dl_types::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error(transparent)]
    GroupBy(#[from] GroupByError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("{message}")]
    Other { kind: ErrorKind, message: String },
}

impl TransformError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Link(err) => err.kind(),
            Self::Merge(err) => err.kind(),
            Self::GroupBy(err) => err.kind(),
            Self::Frame(err) => err.kind(),
            Self::Other { kind, .. } => *kind,
        }
    }
}

/// Operation attached to a node: one table in, one table out.
pub trait UnaryTransform {
    fn name(&self) -> &str;

    /// Parameter record written to the operation log.
    fn params(&self) -> OperationParams;

    fn apply(&self, table: &Table) -> Result<Table, TransformError>;
}

/// Operation attached to an edge: (anchor, secondary) in, linked table out.
pub trait BinaryTransform {
    fn name(&self) -> &str;

    fn params(&self) -> OperationParams;

    fn apply(&self, left: &Table, right: &Table) -> Result<LinkedTable, TransformError>;
}

fn labels_param(labels: &[ColumnLabel]) -> String {
    labels
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn keys_params(params: OperationParams, prefix: &str, keys: &JoinKeys) -> OperationParams {
    match keys.resolve() {
        Ok(keys) if keys.shared => params.with(format!("{prefix}on"), labels_param(&keys.left)),
        Ok(keys) => params
            .with(format!("left_{prefix}on"), labels_param(&keys.left))
            .with(format!("right_{prefix}on"), labels_param(&keys.right)),
        // reported again, with context, when the operation runs
        Err(_) => params,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepOne {
    pub spec: KeepOneSpec,
}

impl KeepOne {
    #[must_use]
    pub fn new(spec: KeepOneSpec) -> Self {
        Self { spec }
    }
}

impl UnaryTransform for KeepOne {
    fn name(&self) -> &str {
        "keep_one"
    }

    fn params(&self) -> OperationParams {
        OperationParams::new()
            .with("group_key", self.spec.group_key.to_string())
            .with("order_key", self.spec.order_key.to_string())
            .with("keep", self.spec.keep.as_str())
            .with(
                "tie_break_key",
                self.spec.tie_break_key.as_ref().map(ToString::to_string),
            )
    }

    fn apply(&self, table: &Table) -> Result<Table, TransformError> {
        Ok(keep_one(table, &self.spec)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProximityLink {
    pub spec: JoinSpec,
}

impl ProximityLink {
    #[must_use]
    pub fn new(spec: JoinSpec) -> Self {
        Self { spec }
    }
}

impl BinaryTransform for ProximityLink {
    fn name(&self) -> &str {
        "proximity_join"
    }

    fn params(&self) -> OperationParams {
        let spec = &self.spec;
        let params = keys_params(OperationParams::new(), "", &spec.ids);
        keys_params(params, "date_", &spec.dates)
            .with("days", spec.days)
            .with("when", spec.when.as_str())
            .with("get", spec.get.as_str())
            .with(
                "left_link_id",
                spec.left_link_id.as_ref().map(ToString::to_string),
            )
            .with("dropna", spec.dropna)
            .with("drop_duplicates", spec.drop_duplicates)
            .with("duplicate_indicator", spec.duplicate_indicator.clone())
            .with("merge", spec.merge.as_str())
    }

    fn apply(&self, left: &Table, right: &Table) -> Result<LinkedTable, TransformError> {
        Ok(proximity_join(left, right, &self.spec)?)
    }
}

/// Plain merge as an edge operation; never reports duplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeTransform {
    pub spec: MergeSpec,
}

impl MergeTransform {
    #[must_use]
    pub fn new(spec: MergeSpec) -> Self {
        Self { spec }
    }
}

impl BinaryTransform for MergeTransform {
    fn name(&self) -> &str {
        "merge"
    }

    fn params(&self) -> OperationParams {
        let [left_suffix, right_suffix] = &self.spec.suffixes;
        keys_params(OperationParams::new(), "", &self.spec.keys)
            .with("suffixes", format!("{left_suffix},{right_suffix}"))
            .with("apply_suffixes", self.spec.apply_suffixes)
    }

    fn apply(&self, left: &Table, right: &Table) -> Result<LinkedTable, TransformError> {
        Ok(LinkedTable {
            table: merge(left, right, &self.spec)?,
            duplicates: false,
        })
    }
}

type UnaryOp = dyn Fn(&Table) -> Result<Table, TransformError>;
type BinaryOp = dyn Fn(&Table, &Table) -> Result<LinkedTable, TransformError>;

/// Ad-hoc node operation built from a closure and an explicit parameter record.
pub struct UnaryFn {
    name: String,
    params: OperationParams,
    op: Box<UnaryOp>,
}

impl UnaryFn {
    pub fn new(
        name: impl Into<String>,
        params: OperationParams,
        op: impl Fn(&Table) -> Result<Table, TransformError> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            params,
            op: Box::new(op),
        }
    }
}

impl fmt::Debug for UnaryFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnaryFn")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl UnaryTransform for UnaryFn {
    fn name(&self) -> &str {
        &self.name
    }

    fn params(&self) -> OperationParams {
        self.params.clone()
    }

    fn apply(&self, table: &Table) -> Result<Table, TransformError> {
        (self.op)(table)
    }
}

/// Ad-hoc edge operation built from a closure and an explicit parameter record.
pub struct BinaryFn {
    name: String,
    params: OperationParams,
    op: Box<BinaryOp>,
}

impl BinaryFn {
    pub fn new(
        name: impl Into<String>,
        params: OperationParams,
        op: impl Fn(&Table, &Table) -> Result<LinkedTable, TransformError> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            params,
            op: Box::new(op),
        }
    }
}

impl fmt::Debug for BinaryFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinaryFn")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl BinaryTransform for BinaryFn {
    fn name(&self) -> &str {
        &self.name
    }

    fn params(&self) -> OperationParams {
        self.params.clone()
    }

    fn apply(&self, left: &Table, right: &Table) -> Result<LinkedTable, TransformError> {
        (self.op)(left, right)
    }
}
