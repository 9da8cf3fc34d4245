use std::fmt;

use dl_frame::{Dataset, FrameError};
use dl_groupby::KeepOneSpec;
use dl_join::JoinKeys;
use dl_proximity::{Get, JoinSpec, MergeScope, When};
use dl_runtime::LinkConfig;

use crate::{EdgeId, GraphError, KeepOne, LinkGraph, NodeId, ProximityLink, UnaryTransform};

/// Proximity-join settings shared by every anchor -> secondary edge of a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOptions {
    pub days: i64,
    pub when: When,
    pub get: Get,
    pub dropna: bool,
    pub drop_duplicates: bool,
    pub merge: MergeScope,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            days: 0,
            when: When::EarlierOrLater,
            get: Get::Closest,
            dropna: false,
            drop_duplicates: false,
            merge: MergeScope::Partial,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MissingDateColumn,
    MissingSubjectColumn { column: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingDateColumn => f.write_str("no date column"),
            Self::MissingSubjectColumn { column } => write!(f, "no {column} column"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedDataset {
    pub name: String,
    pub reason: SkipReason,
}

/// A graph ready to execute.
#[derive(Debug)]
pub struct BuiltPlan {
    pub graph: LinkGraph,
    pub anchor: NodeId,
    pub edges: Vec<EdgeId>,
    pub skipped: Vec<SkippedDataset>,
    /// Configuration the edges were built with, for report assembly.
    pub config: LinkConfig,
}

/// One anchor dataset linked to any number of secondaries.
///
/// Secondaries that cannot be linked (no date column, no subject column) are
/// left out of the graph and reported in [`BuiltPlan::skipped`]; a broken
/// anchor fails the build.
#[derive(Debug, Clone)]
pub struct LinkPlan {
    anchor: Dataset,
    keep_one: Option<KeepOneSpec>,
    options: LinkOptions,
    secondaries: Vec<Dataset>,
    config: LinkConfig,
}

impl LinkPlan {
    #[must_use]
    pub fn new(anchor: Dataset, config: &LinkConfig) -> Self {
        Self {
            anchor,
            keep_one: None,
            options: LinkOptions::default(),
            secondaries: Vec::new(),
            config: config.clone(),
        }
    }

    /// Reduce the anchor before linking.
    #[must_use]
    pub fn keep_one(mut self, spec: KeepOneSpec) -> Self {
        self.keep_one = Some(spec);
        self
    }

    #[must_use]
    pub fn options(mut self, options: LinkOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn secondary(mut self, dataset: Dataset) -> Self {
        self.secondaries.push(dataset);
        self
    }

    fn edge_spec(&self, anchor_date: &str, secondary: &Dataset, secondary_date: &str) -> JoinSpec {
        let options = &self.options;
        JoinSpec::new(
            JoinKeys::sides([self.anchor.id2_col()], [secondary.id2_col()]),
            JoinKeys::sides([anchor_date], [secondary_date]),
            &self.config,
        )
        .with_days(options.days)
        .with_when(options.when)
        .with_get(options.get)
        .with_dropna(options.dropna)
        .with_drop_duplicates(options.drop_duplicates)
        .with_merge(options.merge)
        .with_left_link_id(self.anchor.id_col())
    }

    pub fn build(mut self) -> Result<BuiltPlan, GraphError> {
        let anchor_date = self
            .anchor
            .date_col()
            .map(str::to_owned)
            .ok_or_else(|| FrameError::ColumnNotFound {
                label: self.config.date_col.as_str().into(),
            })?;
        self.anchor.table().resolve(self.anchor.id2_col())?;
        self.anchor.validate_anchor()?;

        let mut skipped = Vec::new();
        let mut linked = Vec::new();
        for dataset in std::mem::take(&mut self.secondaries) {
            let spec = match (dataset.date_col(), dataset.has_id2()) {
                (Some(date_col), true) => Ok(self.edge_spec(&anchor_date, &dataset, date_col)),
                (None, _) => Err(SkipReason::MissingDateColumn),
                (Some(_), false) => Err(SkipReason::MissingSubjectColumn {
                    column: dataset.id2_col().to_owned(),
                }),
            };
            match spec {
                Ok(spec) => linked.push((dataset, spec)),
                Err(reason) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(dataset = dataset.name(), %reason, "skipping secondary dataset");
                    skipped.push(SkippedDataset {
                        name: dataset.name().to_owned(),
                        reason,
                    });
                }
            }
        }

        let mut graph = LinkGraph::new();
        let operation = self
            .keep_one
            .map(|spec| Box::new(KeepOne::new(spec)) as Box<dyn UnaryTransform>);
        let anchor = graph.add_node(self.anchor, operation);
        let mut edges = Vec::with_capacity(linked.len());
        for (dataset, spec) in linked {
            let secondary = graph.add_node(dataset, None);
            let link = Box::new(ProximityLink::new(spec));
            edges.push(graph.add_edge(anchor, secondary, Some(link))?);
        }

        Ok(BuiltPlan {
            graph,
            anchor,
            edges,
            skipped,
            config: self.config,
        })
    }
}
