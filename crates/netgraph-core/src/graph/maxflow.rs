//! Shortest-path-constrained max flow between endpoint sets.
//!
//! The solver repeatedly runs SPF over forward residuals and pushes a
//! blocking flow through the *admissible subgraph* (edges on some currently
//! shortest path with positive residual). Reverse residual arcs are never
//! offered to SPF, so the returned value is the supremum of flow placeable
//! while only ever using currently-shortest residual paths. This is the
//! documented contract, not classical max flow; see
//! `contract_stays_on_shortest_paths` below for the pinning test.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use ordered_float::OrderedFloat;
use rustc_hash::FxHashSet;

use crate::graph::spf::{shortest_paths_filtered, ShortestPaths};
use crate::graph::{EdgeIndex, NodeIndex, StrictMultiDigraph, MIN_FLOW};

/// Flow volume placed per path-cost level.
pub type CostDistribution = BTreeMap<OrderedFloat<f64>, f64>;

/// The outcome of one capped push between a source and a sink.
#[derive(Debug, Clone, Default)]
pub struct Placement {
    /// Total volume placed.
    pub placed: f64,
    /// Placed volume keyed by the shortest-path cost it travelled at.
    pub cost_distribution: CostDistribution,
}

/// Compact per-flow statistics, produced on request. All edge lists and
/// maps are keyed by model link ids, never by the kernel's directed edge
/// ids.
#[derive(Debug, Clone, Default)]
pub struct FlowStats {
    /// Flow volume per path-cost level.
    pub cost_distribution: CostDistribution,
    /// Link ids of the saturated edges separating the source side from the
    /// sink side in the final residual graph.
    pub min_cut: Vec<String>,
    /// Utilized capacity per link id; zero-flow links are omitted.
    pub edge_flows: BTreeMap<String, f64>,
}

/// The result of a max-flow computation.
#[derive(Debug, Clone)]
pub struct MaxFlowResult {
    /// Total flow value.
    pub total: f64,
    /// Detailed statistics, when requested.
    pub stats: Option<FlowStats>,
}

/// Residual flow state over a graph. One solver may serve several sequential
/// pushes that share capacity, which is how demand placement works.
///
/// Virtual super-source/sink nodes must be attached to the graph *before*
/// the solver is created.
#[derive(Debug)]
pub struct FlowSolver<'a> {
    graph: &'a StrictMultiDigraph,
    flow: Vec<f64>,
}

impl<'a> FlowSolver<'a> {
    /// Creates a zero-flow solver over `graph`.
    pub fn new(graph: &'a StrictMultiDigraph) -> Self {
        Self {
            graph,
            flow: vec![0.0; graph.nr_edges()],
        }
    }

    /// Forward residual capacity of an edge.
    pub fn residual(&self, eidx: EdgeIndex) -> f64 {
        self.graph.edge(eidx).capacity - self.flow[eidx.index()]
    }

    /// Current flow per edge index.
    pub fn flows(&self) -> &[f64] {
        &self.flow
    }

    /// Pushes up to `limit` units from `src` to `dst` along currently
    /// shortest residual paths. Returns the amount placed and its cost
    /// decomposition. A `src == dst` push places nothing.
    pub fn push(&mut self, src: NodeIndex, dst: NodeIndex, limit: f64) -> Placement {
        let mut placement = Placement::default();
        if src == dst || limit <= MIN_FLOW {
            return placement;
        }
        loop {
            let remaining = limit - placement.placed;
            if remaining <= MIN_FLOW {
                break;
            }
            let sp =
                shortest_paths_filtered(self.graph, src, |e| self.residual(e) > MIN_FLOW);
            if !sp.is_reachable(dst) {
                break;
            }
            let cost = sp.dist(dst);
            let pushed = self.blocking_flow(&sp, src, dst, remaining);
            if pushed <= MIN_FLOW {
                break;
            }
            placement.placed += pushed;
            *placement
                .cost_distribution
                .entry(OrderedFloat(cost))
                .or_insert(0.0) += pushed;
        }
        placement
    }

    /// Saturates the admissible subgraph of `sp` by repeated DFS, pushing at
    /// most `limit` in total.
    fn blocking_flow(
        &mut self,
        sp: &ShortestPaths,
        src: NodeIndex,
        dst: NodeIndex,
        limit: f64,
    ) -> f64 {
        let mut total = 0.0;
        while limit - total > MIN_FLOW {
            match self.find_augmenting_path(sp, src, dst, limit - total) {
                Some((path, amount)) => {
                    for &e in &path {
                        self.flow[e.index()] += amount;
                    }
                    total += amount;
                }
                None => break,
            }
        }
        total
    }

    /// Depth-first search for one admissible path with positive bottleneck.
    fn find_augmenting_path(
        &self,
        sp: &ShortestPaths,
        src: NodeIndex,
        dst: NodeIndex,
        limit: f64,
    ) -> Option<(Vec<EdgeIndex>, f64)> {
        let mut visited = vec![false; self.graph.nr_nodes()];
        let mut path: Vec<EdgeIndex> = Vec::new();
        // One frame per node on the current path: (node, next out-edge slot).
        let mut stack: Vec<(NodeIndex, usize)> = vec![(src, 0)];
        visited[src.index()] = true;

        while let Some(&(u, pos)) = stack.last() {
            let edges = self.graph.out_slice(u);
            if pos >= edges.len() {
                // Dead end; backtrack.
                stack.pop();
                path.pop();
                continue;
            }
            // CORRECTNESS: the stack is non-empty here.
            stack.last_mut().unwrap().1 += 1;
            let e = edges[pos];
            if !self.is_admissible(sp, e) {
                continue;
            }
            let (_, v) = self.graph.edge_endpoints(e);
            if visited[v.index()] {
                continue;
            }
            visited[v.index()] = true;
            path.push(e);
            if v == dst {
                let bottleneck = path
                    .iter()
                    .map(|&e| self.residual(e))
                    .fold(limit, f64::min);
                return Some((path, bottleneck));
            }
            stack.push((v, 0));
        }
        None
    }

    fn is_admissible(&self, sp: &ShortestPaths, eidx: EdgeIndex) -> bool {
        if self.residual(eidx) <= MIN_FLOW {
            return false;
        }
        let (u, v) = self.graph.edge_endpoints(eidx);
        sp.dist(u) + self.graph.edge(eidx).cost == sp.dist(v)
    }

    /// Link ids of the min-cut edges: reachable source, unreachable target
    /// in the final residual graph (reverse residual arcs included).
    /// Virtual edges are skipped.
    pub fn min_cut(&self, src: NodeIndex) -> Vec<String> {
        let reachable = self.residual_reachable(src);
        let mut cut = Vec::new();
        for eidx in self.graph.edge_indices() {
            let edge = self.graph.edge(eidx);
            if edge.is_virtual() {
                continue;
            }
            let (u, v) = self.graph.edge_endpoints(eidx);
            if reachable[u.index()] && !reachable[v.index()] {
                // At most one direction of a link can cross the cut, so the
                // ids stay unique.
                cut.push(edge.link_id().to_owned());
            }
        }
        cut
    }

    /// Utilized capacity per link id, both directions merged; zero-flow
    /// links and virtual edges omitted.
    pub fn edge_flows(&self) -> BTreeMap<String, f64> {
        let mut flows = BTreeMap::new();
        for eidx in self.graph.edge_indices() {
            let edge = self.graph.edge(eidx);
            let f = self.flow[eidx.index()];
            if edge.is_virtual() || f <= MIN_FLOW {
                continue;
            }
            *flows.entry(edge.link_id().to_owned()).or_insert(0.0) += f;
        }
        flows
    }

    /// Link ids of the edges whose flow grew relative to a snapshot taken
    /// with [`FlowSolver::flows`]. Used for per-demand edge usage reporting.
    pub fn edges_used_since(&self, before: &[f64]) -> Vec<String> {
        let mut used = BTreeSet::new();
        for eidx in self.graph.edge_indices() {
            let edge = self.graph.edge(eidx);
            if edge.is_virtual() {
                continue;
            }
            if self.flow[eidx.index()] - before[eidx.index()] > MIN_FLOW {
                used.insert(edge.link_id().to_owned());
            }
        }
        used.into_iter().collect()
    }

    fn residual_reachable(&self, src: NodeIndex) -> Vec<bool> {
        let n = self.graph.nr_nodes();
        let mut in_adj: Vec<Vec<EdgeIndex>> = vec![Vec::new(); n];
        for eidx in self.graph.edge_indices() {
            let (_, v) = self.graph.edge_endpoints(eidx);
            in_adj[v.index()].push(eidx);
        }
        let mut reachable = vec![false; n];
        reachable[src.index()] = true;
        let mut queue = VecDeque::from([src]);
        while let Some(u) = queue.pop_front() {
            for eidx in self.graph.out_edges(u) {
                if self.residual(eidx) > MIN_FLOW {
                    let (_, v) = self.graph.edge_endpoints(eidx);
                    if !reachable[v.index()] {
                        reachable[v.index()] = true;
                        queue.push_back(v);
                    }
                }
            }
            for &eidx in &in_adj[u.index()] {
                // Reverse residual arc: the edge carries flow into `u`.
                if self.flow[eidx.index()] > MIN_FLOW {
                    let (v, _) = self.graph.edge_endpoints(eidx);
                    if !reachable[v.index()] {
                        reachable[v.index()] = true;
                        queue.push_back(v);
                    }
                }
            }
        }
        reachable
    }
}

/// Computes the shortest-path-constrained max flow from `sources` to
/// `sinks`.
///
/// Nodes appearing on both sides are removed from both sets (a group has no
/// capacity to itself); an empty remaining side yields zero flow. A single
/// remaining (s, t) pair runs directly on `graph`; larger sets run on a
/// clone augmented with a virtual super-source and super-sink connected by
/// zero-cost infinite-capacity edges, which never appear in the statistics.
pub fn max_flow(
    graph: &StrictMultiDigraph,
    sources: &[NodeIndex],
    sinks: &[NodeIndex],
    with_details: bool,
) -> MaxFlowResult {
    let (sources, sinks) = disjoint_endpoints(sources, sinks);
    if sources.is_empty() || sinks.is_empty() {
        return MaxFlowResult {
            total: 0.0,
            stats: with_details.then(FlowStats::default),
        };
    }
    if let ([s], [t]) = (&sources[..], &sinks[..]) {
        solve(Cow::Borrowed(graph), *s, *t, with_details)
    } else {
        let mut augmented = graph.clone();
        let s = augmented.add_virtual_node();
        let t = augmented.add_virtual_node();
        for &n in &sources {
            augmented.add_virtual_edge(s, n, f64::INFINITY);
        }
        for &n in &sinks {
            augmented.add_virtual_edge(n, t, f64::INFINITY);
        }
        solve(Cow::Owned(augmented), s, t, with_details)
    }
}

fn solve(
    graph: Cow<'_, StrictMultiDigraph>,
    src: NodeIndex,
    dst: NodeIndex,
    with_details: bool,
) -> MaxFlowResult {
    let mut solver = FlowSolver::new(graph.as_ref());
    let placement = solver.push(src, dst, f64::INFINITY);
    let stats = with_details.then(|| FlowStats {
        cost_distribution: placement.cost_distribution.clone(),
        min_cut: solver.min_cut(src),
        edge_flows: solver.edge_flows(),
    });
    MaxFlowResult {
        total: placement.placed,
        stats,
    }
}

/// Removes nodes appearing on both sides from both sets; a node has no
/// capacity to itself.
pub(crate) fn disjoint_endpoints(
    sources: &[NodeIndex],
    sinks: &[NodeIndex],
) -> (Vec<NodeIndex>, Vec<NodeIndex>) {
    let src_set: FxHashSet<_> = sources.iter().copied().collect();
    let dst_set: FxHashSet<_> = sinks.iter().copied().collect();
    let sources = sources
        .iter()
        .copied()
        .filter(|n| !dst_set.contains(n))
        .collect();
    let sinks = sinks
        .iter()
        .copied()
        .filter(|n| !src_set.contains(n))
        .collect();
    (sources, sinks)
}
