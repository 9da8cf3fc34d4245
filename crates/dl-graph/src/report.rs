use dl_columnar::Column;
use dl_frame::{FrameError, Table};
use dl_join::{JoinKeys, MergeSpec, merge};
use dl_runtime::{ExecutionLog, LinkConfig};
use dl_types::{DType, NullKind, Scalar};

use crate::{GraphError, LinkGraph, NodeId};

/// What a report writer receives for one node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeOutput<'a> {
    pub name: &'a str,
    pub operation_result: Option<&'a Table>,
}

/// What a report writer receives for one executed edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeOutput<'a> {
    pub name: &'a str,
    pub operation_result: &'a Table,
    pub duplicates: bool,
}

#[must_use]
pub fn node_outputs(graph: &LinkGraph) -> Vec<NodeOutput<'_>> {
    graph
        .nodes()
        .map(|(_, node)| NodeOutput {
            name: node.name(),
            operation_result: node.operation_result(),
        })
        .collect()
}

/// Edges that ran in the last `execute`, in insertion order.
#[must_use]
pub fn edge_outputs(graph: &LinkGraph) -> Vec<EdgeOutput<'_>> {
    graph
        .edges()
        .filter_map(|(_, edge)| {
            edge.operation_result().map(|table| EdgeOutput {
                name: edge.name(),
                operation_result: table,
                duplicates: edge.duplicates(),
            })
        })
        .collect()
}

/// A linked result kept out of the wide table because some anchor matched
/// more than one secondary row.
#[derive(Debug, Clone, PartialEq)]
pub struct AmbiguousLink {
    pub name: String,
    pub table: Table,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkReport {
    /// Anchor columns under the anchor's name, then one block per
    /// unambiguous secondary under the secondary's name.
    pub wide: Table,
    pub ambiguous: Vec<AmbiguousLink>,
}

/// Fold every unambiguous edge result leaving `anchor` into one wide table.
///
/// Edge results are matched back to anchor rows through the
/// `<id_col><link_marker>` breadcrumb a partial proximity join leaves behind.
pub fn assemble_report(
    graph: &LinkGraph,
    anchor: NodeId,
    config: &LinkConfig,
) -> Result<LinkReport, GraphError> {
    let node = graph.node(anchor)?;
    let anchor_name = node.name();
    let id_col = node.dataset().id_col();
    let link_col = format!("{id_col}{}", config.link_marker);

    let mut wide = node.effective_table().with_level(anchor_name)?;
    let mut ambiguous = Vec::new();
    for (_, edge) in graph.edges_from(anchor) {
        let Some(result) = edge.operation_result() else {
            continue;
        };
        if edge.duplicates() {
            ambiguous.push(AmbiguousLink {
                name: edge.name().to_owned(),
                table: result.clone(),
            });
            continue;
        }

        let spec = MergeSpec::new(JoinKeys::sides(
            [(anchor_name, id_col)],
            [link_col.as_str()],
        ))
        .with_suffixes(config.suffixes.clone())
        .with_levels(None, Some(edge.name().to_owned()));
        wide = merge(&wide, result, &spec)?;
    }

    Ok(LinkReport { wide, ambiguous })
}

/// The two flat log tables a report writer renders.
#[derive(Debug, Clone, PartialEq)]
pub struct LogTables {
    pub datasets: Table,
    pub operations: Table,
}

fn text_column<'a>(values: impl Iterator<Item = Option<&'a str>>) -> Result<Column, FrameError> {
    let values = values
        .map(|value| {
            value.map_or(Scalar::Null(NullKind::Null), |text| {
                Scalar::Utf8(text.to_owned())
            })
        })
        .collect::<Vec<_>>();
    Ok(Column::new(DType::Utf8, values)?)
}

fn count_column(values: impl Iterator<Item = usize>) -> Column {
    Column::from_optional_i64(values.map(|value| i64::try_from(value).ok()))
}

pub fn log_tables(log: &ExecutionLog) -> Result<LogTables, FrameError> {
    let datasets = log.datasets();
    let datasets = Table::from_columns([
        ("name", text_column(datasets.iter().map(|record| Some(record.name.as_str())))?),
        ("id_col", text_column(datasets.iter().map(|record| Some(record.id_col.as_str())))?),
        ("date_col", text_column(datasets.iter().map(|record| record.date_col.as_deref()))?),
        ("id2_col", text_column(datasets.iter().map(|record| Some(record.id2_col.as_str())))?),
        ("source", text_column(datasets.iter().map(|record| record.source.as_deref()))?),
        ("rows", count_column(datasets.iter().map(|record| record.rows))),
        ("cols", count_column(datasets.iter().map(|record| record.cols))),
    ])?;

    let operations = log.operations();
    let params = operations
        .iter()
        .map(|record| record.params.render())
        .collect::<Vec<_>>();
    let shapes = operations
        .iter()
        .map(|record| record.shape_label())
        .collect::<Vec<_>>();
    let operations = Table::from_columns([
        ("left", text_column(operations.iter().map(|record| Some(record.left.as_str())))?),
        ("right", text_column(operations.iter().map(|record| Some(record.right_label())))?),
        (
            "operation",
            text_column(operations.iter().map(|record| Some(record.operation.as_str())))?,
        ),
        ("params", text_column(params.iter().map(|text| Some(text.as_str())))?),
        ("shape", text_column(shapes.iter().map(|text| Some(text.as_str())))?),
    ])?;

    Ok(LogTables {
        datasets,
        operations,
    })
}
