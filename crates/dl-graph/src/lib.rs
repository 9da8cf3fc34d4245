#![forbid(unsafe_code)]

mod plan;
mod report;
mod transform;

use std::fmt;

use dl_frame::{Dataset, FrameError, Table};
use dl_join::MergeError;
use dl_runtime::{ExecutionLog, OperationRecord};
use dl_types::ErrorKind;
use thiserror::Error;

pub use plan::{BuiltPlan, LinkOptions, LinkPlan, SkipReason, SkippedDataset};
pub use report::{
    AmbiguousLink, EdgeOutput, LinkReport, LogTables, NodeOutput, assemble_report, edge_outputs,
    log_tables, node_outputs,
};
pub use transform::{
    BinaryFn, BinaryTransform, KeepOne, MergeTransform, ProximityLink, TransformError, UnaryFn,
    UnaryTransform,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(usize);

impl EdgeId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "edge#{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("{0} does not belong to this graph")]
    UnknownNode(NodeId),
    #[error("{0} does not belong to this graph")]
    UnknownEdge(EdgeId),
    #[error("edge from {0} to itself")]
    SelfLoop(NodeId),
    #[error("edge {anchor} -> {secondary} would close a cycle")]
    Cycle { anchor: NodeId, secondary: NodeId },
    #[error("operation {operation} on {operand} failed: {source}")]
    Transform {
        operation: String,
        operand: String,
        #[source]
        source: TransformError,
    },
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Merge(#[from] MergeError),
}

impl GraphError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownNode(_)
            | Self::UnknownEdge(_)
            | Self::SelfLoop(_)
            | Self::Cycle { .. } => ErrorKind::Graph,
            Self::Transform { source, .. } => source.kind(),
            Self::Frame(err) => err.kind(),
            Self::Merge(err) => err.kind(),
        }
    }
}

/// A dataset plus an optional operation and the result of its last run.
pub struct Node {
    dataset: Dataset,
    operation: Option<Box<dyn UnaryTransform>>,
    operation_result: Option<Table>,
}

impl Node {
    #[must_use]
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.dataset.name()
    }

    #[must_use]
    pub fn operation_name(&self) -> Option<&str> {
        self.operation.as_deref().map(UnaryTransform::name)
    }

    #[must_use]
    pub fn operation_result(&self) -> Option<&Table> {
        self.operation_result.as_ref()
    }

    /// The table edges see: the cached operation result, else the raw table.
    #[must_use]
    pub fn effective_table(&self) -> &Table {
        self.operation_result
            .as_ref()
            .unwrap_or_else(|| self.dataset.table())
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("dataset", &self.dataset.name())
            .field("operation", &self.operation_name())
            .field(
                "operation_result",
                &self.operation_result.as_ref().map(Table::shape),
            )
            .finish()
    }
}

/// An ordered (anchor, secondary) pair named after the secondary dataset.
pub struct Edge {
    name: String,
    anchor: NodeId,
    secondary: NodeId,
    operation: Option<Box<dyn BinaryTransform>>,
    operation_result: Option<Table>,
    duplicates: bool,
}

impl Edge {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn anchor(&self) -> NodeId {
        self.anchor
    }

    #[must_use]
    pub fn secondary(&self) -> NodeId {
        self.secondary
    }

    #[must_use]
    pub fn operation_name(&self) -> Option<&str> {
        self.operation.as_deref().map(BinaryTransform::name)
    }

    #[must_use]
    pub fn operation_result(&self) -> Option<&Table> {
        self.operation_result.as_ref()
    }

    #[must_use]
    pub fn duplicates(&self) -> bool {
        self.duplicates
    }
}

impl fmt::Debug for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Edge")
            .field("name", &self.name)
            .field("anchor", &self.anchor)
            .field("secondary", &self.secondary)
            .field("operation", &self.operation_name())
            .field(
                "operation_result",
                &self.operation_result.as_ref().map(Table::shape),
            )
            .field("duplicates", &self.duplicates)
            .finish()
    }
}

/// Directed acyclic graph of datasets and the operations linking them.
///
/// `execute` runs every node operation before any edge operation, so edges
/// always observe the post-operation anchor table.
#[derive(Debug, Default)]
pub struct LinkGraph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl LinkGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(
        &mut self,
        dataset: Dataset,
        operation: Option<Box<dyn UnaryTransform>>,
    ) -> NodeId {
        self.nodes.push(Node {
            dataset,
            operation,
            operation_result: None,
        });
        NodeId(self.nodes.len() - 1)
    }

    pub fn add_edge(
        &mut self,
        anchor: NodeId,
        secondary: NodeId,
        operation: Option<Box<dyn BinaryTransform>>,
    ) -> Result<EdgeId, GraphError> {
        self.node(anchor)?;
        let name = self.node(secondary)?.name().to_owned();
        if anchor == secondary {
            return Err(GraphError::SelfLoop(anchor));
        }
        if self.reaches(secondary, anchor) {
            return Err(GraphError::Cycle { anchor, secondary });
        }

        self.edges.push(Edge {
            name,
            anchor,
            secondary,
            operation,
            operation_result: None,
            duplicates: false,
        });
        Ok(EdgeId(self.edges.len() - 1))
    }

    fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![from];
        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            if std::mem::replace(&mut visited[current.0], true) {
                continue;
            }
            stack.extend(self.edges_from(current).map(|(_, edge)| edge.secondary));
        }
        false
    }

    /// Swap a node's dataset; its cached result is discarded.
    pub fn replace_dataset(&mut self, id: NodeId, dataset: Dataset) -> Result<(), GraphError> {
        let node = self.nodes.get_mut(id.0).ok_or(GraphError::UnknownNode(id))?;
        node.dataset = dataset;
        node.operation_result = None;
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.nodes.get(id.0).ok_or(GraphError::UnknownNode(id))
    }

    pub fn edge(&self, id: EdgeId) -> Result<&Edge, GraphError> {
        self.edges.get(id.0).ok_or(GraphError::UnknownEdge(id))
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(idx, node)| (NodeId(idx), node))
    }

    pub fn edges(&self) -> impl Iterator<Item = (EdgeId, &Edge)> {
        self.edges.iter().enumerate().map(|(idx, edge)| (EdgeId(idx), edge))
    }

    pub fn edges_from(&self, anchor: NodeId) -> impl Iterator<Item = (EdgeId, &Edge)> {
        self.edges().filter(move |(_, edge)| edge.anchor == anchor)
    }

    pub fn effective_table(&self, id: NodeId) -> Result<&Table, GraphError> {
        Ok(self.node(id)?.effective_table())
    }

    /// Run all node operations, then all edge operations.
    ///
    /// Caches from a previous run are cleared first. The first failure aborts
    /// the run; results cached before it remain readable.
    pub fn execute(&mut self, log: &mut ExecutionLog) -> Result<(), GraphError> {
        for node in &mut self.nodes {
            node.operation_result = None;
        }
        for edge in &mut self.edges {
            edge.operation_result = None;
            edge.duplicates = false;
        }

        self.execute_nodes(log)?;
        self.execute_edges(log)
    }

    fn execute_nodes(&mut self, log: &mut ExecutionLog) -> Result<(), GraphError> {
        for node in &mut self.nodes {
            log.push_dataset(node.dataset.snapshot());
            #[cfg(feature = "tracing")]
            tracing::debug!(
                dataset = node.dataset.name(),
                shape = ?node.dataset.table().shape(),
                "executing node"
            );

            let Some(operation) = node.operation.as_deref() else {
                continue;
            };
            let result = operation
                .apply(node.dataset.table())
                .map_err(|source| GraphError::Transform {
                    operation: operation.name().to_owned(),
                    operand: node.dataset.name().to_owned(),
                    source,
                })?;

            let record = OperationRecord::new(
                node.dataset.name(),
                None,
                operation.name(),
                operation.params(),
                result.shape(),
            );
            trace_operation(&record);
            log.push_operation(record);
            node.operation_result = Some(result);
        }
        Ok(())
    }

    fn execute_edges(&mut self, log: &mut ExecutionLog) -> Result<(), GraphError> {
        let nodes = &self.nodes;
        for edge in &mut self.edges {
            let Some(operation) = edge.operation.as_deref() else {
                continue;
            };
            let endpoints = (nodes.get(edge.anchor.0), nodes.get(edge.secondary.0));
            let (anchor, secondary) = match endpoints {
                (Some(anchor), Some(secondary)) => (anchor, secondary),
                (None, _) => return Err(GraphError::UnknownNode(edge.anchor)),
                (_, None) => return Err(GraphError::UnknownNode(edge.secondary)),
            };

            let linked = operation
                .apply(anchor.effective_table(), secondary.effective_table())
                .map_err(|source| GraphError::Transform {
                    operation: operation.name().to_owned(),
                    operand: format!("{} -> {}", anchor.name(), secondary.name()),
                    source,
                })?;

            let record = OperationRecord::new(
                anchor.name(),
                Some(secondary.name().to_owned()),
                operation.name(),
                operation.params(),
                linked.table.shape(),
            );
            trace_operation(&record);
            log.push_operation(record);
            edge.operation_result = Some(linked.table);
            edge.duplicates = linked.duplicates;
        }
        Ok(())
    }
}

#[cfg(feature = "tracing")]
fn trace_operation(record: &OperationRecord) {
    tracing::info!(
        left = %record.left,
        right = record.right_label(),
        operation = %record.operation,
        params = %record.params.render(),
        shape = %record.shape_label(),
        "operation executed"
    );
}

#[cfg(not(feature = "tracing"))]
fn trace_operation(_record: &OperationRecord) {}
