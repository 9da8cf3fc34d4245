#![forbid(unsafe_code)]

//! Link instrument exports to an anchor dataset by subject id and date
//! proximity.
//!
//! ```no_run
//! use datalink::{DatasetOptions, LinkConfig, LinkOptions, LinkPlan, read_dataset_path};
//!
//! # fn main() -> Result<(), datalink::Error> {
//! let config = LinkConfig::default();
//! let anchor = read_dataset_path("udsa.csv", DatasetOptions::default(), &config)?;
//! let cdr = read_dataset_path("cdr.csv", DatasetOptions::default(), &config)?;
//! let run = datalink::link(
//!     LinkPlan::new(anchor, &config)
//!         .options(LinkOptions { days: 90, ..LinkOptions::default() })
//!         .secondary(cdr),
//! )?;
//! datalink::write_report_csv(&run, "out")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use thiserror::Error;

pub use dl_columnar::{Column, ColumnError, ValidityMask};
pub use dl_frame::{ColumnLabel, Dataset, DatasetOptions, FrameError, Table, row_key};
pub use dl_graph::{
    AmbiguousLink, BinaryFn, BinaryTransform, BuiltPlan, Edge, EdgeId, EdgeOutput, GraphError,
    KeepOne, LinkGraph, LinkOptions, LinkPlan, LinkReport, LogTables, MergeTransform, Node,
    NodeId, NodeOutput, ProximityLink, SkipReason, SkippedDataset, TransformError, UnaryFn,
    UnaryTransform, assemble_report, edge_outputs, log_tables, node_outputs,
};
pub use dl_groupby::{GroupByError, Keep, KeepOneSpec, keep_one};
pub use dl_index::{ColumnIndex, IndexError, LabelKey, overlapping_labels};
pub use dl_io::{
    IoError, read_csv_path, read_csv_str, read_dataset_path, write_csv_path, write_csv_string,
};
pub use dl_join::{
    JoinExecutionOptions, JoinKeys, JoinPositions, JoinType, MergeError, MergeSpec,
    ResolvedKeys, join_positions, level_pair, merge, merge_with_options, string_pair,
};
pub use dl_proximity::{
    Get, JoinSpec, LinkError, LinkedTable, MergeScope, When, proximity_join,
};
pub use dl_runtime::{
    ConfigError, DatasetRecord, ExecutionLog, LinkConfig, OperationParams, OperationRecord,
};
pub use dl_types::{DType, ErrorKind, KeyRef, NullKind, Scalar, TypeError, days_between};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Io(#[from] IoError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Graph(err) => err.kind(),
            Self::Io(err) => err.kind(),
            Self::Frame(err) => err.kind(),
            Self::Config(err) => err.kind(),
        }
    }
}

/// Everything one linkage run produced.
#[derive(Debug)]
pub struct LinkRun {
    pub graph: LinkGraph,
    pub anchor: NodeId,
    pub report: LinkReport,
    pub log: ExecutionLog,
    pub skipped: Vec<SkippedDataset>,
}

/// Build, execute and report a plan in one call.
pub fn link(plan: LinkPlan) -> Result<LinkRun, Error> {
    let BuiltPlan {
        mut graph,
        anchor,
        skipped,
        config,
        ..
    } = plan.build()?;

    let mut log = ExecutionLog::new();
    graph.execute(&mut log)?;
    let report = assemble_report(&graph, anchor, &config)?;
    Ok(LinkRun {
        graph,
        anchor,
        report,
        log,
        skipped,
    })
}

/// Write `linked.csv`, one `<name>_ambiguous.csv` per ambiguous secondary,
/// and the two log tables into `dir`, creating it if needed.
pub fn write_report_csv(run: &LinkRun, dir: impl AsRef<Path>) -> Result<(), Error> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir).map_err(IoError::from)?;

    write_csv_path(&run.report.wide, dir.join("linked.csv"))?;
    for link in &run.report.ambiguous {
        write_csv_path(&link.table, dir.join(format!("{}_ambiguous.csv", link.name)))?;
    }

    let logs = log_tables(&run.log)?;
    write_csv_path(&logs.datasets, dir.join("log_datasets.csv"))?;
    write_csv_path(&logs.operations, dir.join("log_operations.csv"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{
        DatasetOptions, ErrorKind, Keep, KeepOneSpec, LinkConfig, LinkOptions, LinkPlan, SkipReason,
        link, read_csv_path, read_dataset_path, write_report_csv,
    };

    fn write(dir: &std::path::Path, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).expect("write fixture");
        path
    }

    #[test]
    fn csv_files_link_end_to_end() {
        let input = tempfile::tempdir().expect("input dir");
        let output = tempfile::tempdir().expect("output dir");
        let config = LinkConfig::default();

        let anchor = write(
            input.path(),
            "udsa.csv",
            "PIDN,DCDate,Visit\n1,2001-03-02,1\n1,2001-09-01,2\n2,2001-01-01,1\n",
        );
        let cdr = write(
            input.path(),
            "cdr.csv",
            "PIDN,DCDate,CDR\n1,2001-03-10,0.5\n2,2001-06-01,1\n",
        );
        let mri = write(
            input.path(),
            "mri.csv",
            "PIDN,DCDate,Scanner\n1,2001-03-10,A\n1,2001-02-22,B\n",
        );
        let demog = write(input.path(), "demog.csv", "PIDN,Sex\n1,F\n2,M\n");

        let dataset = |path| read_dataset_path(path, DatasetOptions::default(), &config);
        let plan = LinkPlan::new(dataset(&anchor).expect("anchor"), &config)
            .keep_one(KeepOneSpec::new("PIDN", "DCDate", Keep::Latest))
            .options(LinkOptions {
                days: 200,
                ..LinkOptions::default()
            })
            .secondary(dataset(&cdr).expect("cdr"))
            .secondary(dataset(&mri).expect("mri"))
            .secondary(dataset(&demog).expect("demog"));

        let run = link(plan).expect("link");
        assert_eq!(run.skipped.len(), 1);
        assert_eq!(run.skipped[0].reason, SkipReason::MissingDateColumn);
        assert_eq!(run.report.wide.nrows(), 2);
        assert!(run.report.ambiguous.is_empty());
        assert!(run.report.wide.has_column(("mri", "Scanner")));

        write_report_csv(&run, output.path()).expect("report");
        let linked = read_csv_path(output.path().join("linked.csv")).expect("linked");
        assert!(linked.has_column("udsa.PIDN"));
        assert!(linked.has_column("cdr.CDR"));
        let operations =
            read_csv_path(output.path().join("log_operations.csv")).expect("operations");
        assert_eq!(operations.nrows(), 3);
    }

    #[test]
    fn config_errors_surface_through_the_facade_error() {
        let err = super::Error::from(
            LinkConfig::from_json_str(r#"{"suffixes": ["_x", "_x"]}"#).expect_err("same suffix"),
        );
        assert_eq!(err.kind(), ErrorKind::ValueType);
    }
}
