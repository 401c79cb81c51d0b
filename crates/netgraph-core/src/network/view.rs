//! Immutable filtered views over a base [`Network`].

use rustc_hash::FxHashSet;

use crate::graph::maxflow::{max_flow, MaxFlowResult};
use crate::graph::{NodeIndex, StrictMultiDigraph};
use crate::network::types::{Link, Node};
use crate::network::{Network, NetworkError, NodeGroups};

/// How endpoint selections combine into flow computations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowMode {
    /// One aggregate flow between the full source and sink selections.
    Combine,
    /// One flow per (source group, sink group) label pair.
    Pairwise,
}

impl FlowMode {
    /// The serialized name of the mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Combine => "combine",
            Self::Pairwise => "pairwise",
        }
    }
}

/// A read-only window over a base network that hides excluded entities.
///
/// Visible nodes are the base nodes minus disabled and excluded ones;
/// visible links additionally require both endpoints to be visible. Views
/// never mutate their base, so any number of them can coexist over the same
/// network across worker threads.
#[derive(Debug, Clone)]
pub struct NetworkView<'a> {
    base: &'a Network,
    excluded_nodes: FxHashSet<String>,
    excluded_links: FxHashSet<String>,
}

impl<'a> NetworkView<'a> {
    /// Creates a view hiding the given node and link ids. Unknown ids are
    /// tolerated and simply hide nothing.
    pub fn from_excluded_sets<N, L>(base: &'a Network, excluded_nodes: N, excluded_links: L) -> Self
    where
        N: IntoIterator,
        N::Item: Into<String>,
        L: IntoIterator,
        L::Item: Into<String>,
    {
        Self {
            base,
            excluded_nodes: excluded_nodes.into_iter().map(Into::into).collect(),
            excluded_links: excluded_links.into_iter().map(Into::into).collect(),
        }
    }

    /// A view over the unmodified base (the baseline iteration).
    pub fn unfiltered(base: &'a Network) -> Self {
        Self::from_excluded_sets(base, Vec::<String>::new(), Vec::<String>::new())
    }

    /// The base network this view filters.
    pub fn base(&self) -> &'a Network {
        self.base
    }

    /// Whether a node is visible through this view.
    pub fn is_node_visible(&self, node: &Node) -> bool {
        !node.disabled && !self.excluded_nodes.contains(&node.name)
    }

    /// Whether a link is visible through this view. Excluding a node hides
    /// every link touching it.
    pub fn is_link_visible(&self, link: &Link) -> bool {
        if link.disabled || self.excluded_links.contains(&link.id) {
            return false;
        }
        match (self.base.node(&link.source), self.base.node(&link.target)) {
            (Some(a), Some(b)) => self.is_node_visible(a) && self.is_node_visible(b),
            _ => false,
        }
    }

    /// Returns an iterator over visible nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &'a Node> + '_ {
        self.base.nodes().filter(move |n| self.is_node_visible(n))
    }

    /// Returns an iterator over visible links in insertion order.
    pub fn links(&self) -> impl Iterator<Item = &'a Link> + '_ {
        self.base.links().filter(move |l| self.is_link_visible(l))
    }

    /// Groups visible nodes whose names match `path`; same contract as
    /// [`Network::select_node_groups_by_path`].
    pub fn select_node_groups_by_path(&self, path: &str) -> Result<NodeGroups<'a>, NetworkError> {
        super::select_groups(self.nodes(), path)
    }

    /// Materializes the visible part of the view for the graph kernel.
    pub fn to_graph(&self) -> StrictMultiDigraph {
        super::build_graph(self.nodes(), self.links())
    }

    /// Computes max flow between the node selections, one result per label
    /// pair as dictated by `mode`.
    pub fn max_flow(
        &self,
        source_path: &str,
        sink_path: &str,
        mode: FlowMode,
        with_details: bool,
    ) -> Result<Vec<((String, String), MaxFlowResult)>, NetworkError> {
        let graph = self.to_graph();
        let src_groups = self.select_node_groups_by_path(source_path)?;
        let dst_groups = self.select_node_groups_by_path(sink_path)?;
        let resolve = |members: &[&Node]| -> Vec<NodeIndex> {
            members
                .iter()
                .filter_map(|n| graph.node_index(&n.name))
                .collect()
        };
        let mut results = Vec::new();
        match mode {
            FlowMode::Combine => {
                let sources: Vec<NodeIndex> = src_groups
                    .iter()
                    .flat_map(|(_, members)| resolve(members))
                    .collect();
                let sinks: Vec<NodeIndex> = dst_groups
                    .iter()
                    .flat_map(|(_, members)| resolve(members))
                    .collect();
                let result = max_flow(&graph, &sources, &sinks, with_details);
                results.push(((source_path.to_owned(), sink_path.to_owned()), result));
            }
            FlowMode::Pairwise => {
                for (src_label, src_members) in &src_groups {
                    for (dst_label, dst_members) in &dst_groups {
                        if src_label == dst_label {
                            continue;
                        }
                        let result = max_flow(
                            &graph,
                            &resolve(src_members),
                            &resolve(dst_members),
                            with_details,
                        );
                        results.push(((src_label.clone(), dst_label.clone()), result));
                    }
                }
            }
        }
        Ok(results)
    }
}
