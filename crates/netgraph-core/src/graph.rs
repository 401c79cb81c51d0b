//! The graph kernel: a strict directed multigraph with parallel-edge support,
//! plus the SPF and max-flow routines built on top of it.
//!
//! A [`StrictMultiDigraph`] is materialized from a
//! [`Network`](crate::network::Network) or a
//! [`NetworkView`](crate::network::NetworkView); each model-level link becomes
//! a pair of directed edges with independent identities. *Strict* means the
//! graph refuses undeclared endpoints and duplicate identifiers instead of
//! creating them implicitly.

pub mod maxflow;
pub mod spf;

use petgraph::graph::DiGraph;
use rustc_hash::{FxHashMap, FxHashSet};

pub use petgraph::graph::{EdgeIndex, NodeIndex};

/// Flow amounts at or below this threshold are treated as zero.
pub const MIN_FLOW: f64 = 1e-10;

/// Marker appended to a link id to form its reverse-direction edge id.
pub(crate) const REVERSE_EDGE_SUFFIX: &str = ":rev";

/// Node payload: the model-level node name. Virtual nodes attached by the
/// max-flow solver carry an empty name.
#[derive(Debug, Clone)]
pub struct GraphNode {
    /// The node name, or `""` for a virtual node.
    pub name: String,
}

/// Edge payload: a directed edge with its own identity, cost, and capacity.
/// Virtual edges attached by the max-flow solver carry an empty id.
#[derive(Debug, Clone)]
pub struct GraphEdge {
    /// The directed edge id, or `""` for a virtual edge.
    pub id: String,
    /// SPF weight. Non-negative.
    pub cost: f64,
    /// Capacity. Non-negative; virtual edges use `f64::INFINITY`.
    pub capacity: f64,
}

impl GraphEdge {
    pub(crate) fn is_virtual(&self) -> bool {
        self.id.is_empty()
    }

    /// The model-level link id this directed edge materializes: the
    /// reverse-direction marker, if any, is stripped. Reported statistics
    /// use this id so callers only ever see real link identifiers.
    pub fn link_id(&self) -> &str {
        self.id.strip_suffix(REVERSE_EDGE_SUFFIX).unwrap_or(&self.id)
    }
}

/// A directed multigraph with parallel edges as first-class citizens.
///
/// Out-adjacency is kept in insertion order so SPF relaxation scans edges
/// deterministically; `petgraph`'s own `edges()` iterator walks edges in
/// reverse insertion order and is not used for relaxation.
#[derive(Debug, Clone)]
pub struct StrictMultiDigraph {
    graph: DiGraph<GraphNode, GraphEdge>,
    id2idx: FxHashMap<String, NodeIndex>,
    edge_ids: FxHashSet<String>,
    out_adj: Vec<Vec<EdgeIndex>>,
}

impl Default for StrictMultiDigraph {
    fn default() -> Self {
        Self::new()
    }
}

impl StrictMultiDigraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            id2idx: FxHashMap::default(),
            edge_ids: FxHashSet::default(),
            out_adj: Vec::new(),
        }
    }

    /// Adds a named node. Duplicate names are an error.
    pub fn add_node(&mut self, name: impl Into<String>) -> Result<NodeIndex, GraphError> {
        let name = name.into();
        if self.id2idx.contains_key(&name) {
            return Err(GraphError::DuplicateNode(name));
        }
        let idx = self.graph.add_node(GraphNode { name: name.clone() });
        self.id2idx.insert(name, idx);
        self.out_adj.push(Vec::new());
        Ok(idx)
    }

    /// Adds a directed edge between two declared nodes. Undeclared endpoints,
    /// duplicate edge ids, and negative cost or capacity are errors.
    pub fn add_edge(
        &mut self,
        src: &str,
        dst: &str,
        id: impl Into<String>,
        cost: f64,
        capacity: f64,
    ) -> Result<EdgeIndex, GraphError> {
        let id = id.into();
        let a = *self
            .id2idx
            .get(src)
            .ok_or_else(|| GraphError::UndeclaredNode(src.to_owned()))?;
        let b = *self
            .id2idx
            .get(dst)
            .ok_or_else(|| GraphError::UndeclaredNode(dst.to_owned()))?;
        if self.edge_ids.contains(&id) {
            return Err(GraphError::DuplicateEdgeId(id));
        }
        if cost < 0.0 || !cost.is_finite() {
            return Err(GraphError::InvalidCost { id, cost });
        }
        if capacity < 0.0 {
            return Err(GraphError::InvalidCapacity { id, capacity });
        }
        self.edge_ids.insert(id.clone());
        let eidx = self.graph.add_edge(a, b, GraphEdge { id, cost, capacity });
        self.out_adj[a.index()].push(eidx);
        Ok(eidx)
    }

    /// Adds an anonymous node for use as a max-flow super-source or -sink.
    /// Virtual nodes are unnamed and never collide with model nodes.
    pub(crate) fn add_virtual_node(&mut self) -> NodeIndex {
        let idx = self.graph.add_node(GraphNode {
            name: String::new(),
        });
        self.out_adj.push(Vec::new());
        idx
    }

    /// Adds an anonymous zero-cost edge for super-source/sink attachment.
    /// Virtual edges carry no id and are skipped by flow statistics.
    pub(crate) fn add_virtual_edge(
        &mut self,
        src: NodeIndex,
        dst: NodeIndex,
        capacity: f64,
    ) -> EdgeIndex {
        let eidx = self.graph.add_edge(
            src,
            dst,
            GraphEdge {
                id: String::new(),
                cost: 0.0,
                capacity,
            },
        );
        self.out_adj[src.index()].push(eidx);
        eidx
    }

    /// Looks up a node index by name.
    pub fn node_index(&self, name: &str) -> Option<NodeIndex> {
        self.id2idx.get(name).copied()
    }

    /// Returns the name of a node.
    pub fn node_name(&self, idx: NodeIndex) -> &str {
        &self.graph[idx].name
    }

    /// Returns the payload of an edge.
    pub fn edge(&self, eidx: EdgeIndex) -> &GraphEdge {
        &self.graph[eidx]
    }

    /// Returns the endpoints of an edge.
    ///
    /// CORRECTNESS: edge indices handed out by this graph are never removed,
    /// so the lookup cannot fail.
    pub fn edge_endpoints(&self, eidx: EdgeIndex) -> (NodeIndex, NodeIndex) {
        self.graph.edge_endpoints(eidx).unwrap()
    }

    /// Returns the out-edges of a node in insertion order.
    pub fn out_edges(&self, node: NodeIndex) -> impl Iterator<Item = EdgeIndex> + '_ {
        self.out_adj[node.index()].iter().copied()
    }

    pub(crate) fn out_slice(&self, node: NodeIndex) -> &[EdgeIndex] {
        &self.out_adj[node.index()]
    }

    /// Returns the number of nodes, virtual nodes included.
    pub fn nr_nodes(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns the number of edges, virtual edges included.
    pub fn nr_edges(&self) -> usize {
        self.graph.edge_count()
    }

    /// Returns an iterator over all node indices.
    pub fn node_indices(&self) -> impl Iterator<Item = NodeIndex> {
        self.graph.node_indices()
    }

    /// Returns an iterator over all edge indices.
    pub fn edge_indices(&self) -> impl Iterator<Item = EdgeIndex> {
        self.graph.edge_indices()
    }

    pub(crate) fn inner(&self) -> &DiGraph<GraphNode, GraphEdge> {
        &self.graph
    }
}

/// An error type listing the reasons a graph mutation is invalid.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// Duplicate node name.
    #[error("duplicate node {0:?}")]
    DuplicateNode(String),

    /// An edge references a node that was never declared.
    #[error("node {0:?} is not declared")]
    UndeclaredNode(String),

    /// Duplicate directed edge id.
    #[error("duplicate edge id {0:?}")]
    DuplicateEdgeId(String),

    /// Edge cost is negative or non-finite.
    #[error("edge {id:?} has invalid cost {cost}")]
    InvalidCost {
        /// The offending edge id.
        id: String,
        /// The rejected cost.
        cost: f64,
    },

    /// Edge capacity is negative.
    #[error("edge {id:?} has invalid capacity {capacity}")]
    InvalidCapacity {
        /// The offending edge id.
        id: String,
        /// The rejected capacity.
        capacity: f64,
    },
}
