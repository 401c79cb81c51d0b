//! Single-source shortest paths with an equal-cost-multipath predecessor DAG.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use ordered_float::OrderedFloat;
use rustc_hash::FxHashMap;

use crate::graph::{EdgeIndex, NodeIndex, StrictMultiDigraph};

/// The result of an SPF run: per-node distances and the full ECMP
/// predecessor DAG.
///
/// Predecessors record *edges*, not just nodes: every edge `e:(p → v)` with
/// `dist[p] + cost(e) == dist[v]` appears in `preds(v)[p]`, so parallel
/// shortest edges contribute multiple entries.
#[derive(Debug, Clone)]
pub struct ShortestPaths {
    dist: Vec<f64>,
    preds: Vec<FxHashMap<NodeIndex, Vec<EdgeIndex>>>,
}

impl ShortestPaths {
    /// The minimum cost from the source to `node`, `f64::INFINITY` when
    /// unreachable.
    pub fn dist(&self, node: NodeIndex) -> f64 {
        self.dist[node.index()]
    }

    /// Whether `node` is reachable from the source.
    pub fn is_reachable(&self, node: NodeIndex) -> bool {
        self.dist[node.index()].is_finite()
    }

    /// All equally shortest predecessors of `node`, with the edges that
    /// realize each of them.
    pub fn preds(&self, node: NodeIndex) -> &FxHashMap<NodeIndex, Vec<EdgeIndex>> {
        &self.preds[node.index()]
    }
}

/// Computes shortest paths from `source` over all edges.
pub fn shortest_paths(graph: &StrictMultiDigraph, source: NodeIndex) -> ShortestPaths {
    shortest_paths_filtered(graph, source, |_| true)
}

/// Computes shortest paths from `source` over the edges accepted by
/// `usable`. The max-flow solver passes a positive-residual filter here.
///
/// Dijkstra with a binary heap keyed `(dist, node)`; adjacency is scanned in
/// insertion order, so predecessor edge lists come out in insertion order.
/// Distance equality is exact: a tie is recognized only when the relaxation
/// reproduces the stored distance bit-for-bit, which it does because every
/// distance is produced by the same `dist[u] + cost` arithmetic.
pub fn shortest_paths_filtered(
    graph: &StrictMultiDigraph,
    source: NodeIndex,
    usable: impl Fn(EdgeIndex) -> bool,
) -> ShortestPaths {
    let n = graph.nr_nodes();
    let mut dist = vec![f64::INFINITY; n];
    let mut preds: Vec<FxHashMap<NodeIndex, Vec<EdgeIndex>>> =
        vec![FxHashMap::default(); n];
    let mut heap = BinaryHeap::new();

    dist[source.index()] = 0.0;
    heap.push(Reverse((OrderedFloat(0.0), source)));

    while let Some(Reverse((OrderedFloat(d), u))) = heap.pop() {
        if d > dist[u.index()] {
            // Stale heap entry; `u` was settled at a lower distance.
            continue;
        }
        for eidx in graph.out_edges(u) {
            if !usable(eidx) {
                continue;
            }
            let edge = graph.edge(eidx);
            let (_, v) = graph.edge_endpoints(eidx);
            let candidate = d + edge.cost;
            let current = dist[v.index()];
            if candidate < current {
                dist[v.index()] = candidate;
                let mut ecmp = FxHashMap::default();
                ecmp.insert(u, vec![eidx]);
                preds[v.index()] = ecmp;
                heap.push(Reverse((OrderedFloat(candidate), v)));
            } else if candidate == current {
                preds[v.index()].entry(u).or_default().push(eidx);
            }
        }
    }

    ShortestPaths { dist, preds }
}

/// Reference distances computed with `petgraph`'s Dijkstra.
///
/// The kernel's own SPF must agree with this map exactly on any graph with
/// non-negative costs; the parity tests below pin that down.
pub fn reference_distances(
    graph: &StrictMultiDigraph,
    source: NodeIndex,
) -> std::collections::HashMap<NodeIndex, f64> {
    petgraph::algo::dijkstra(graph.inner(), source, None, |e| e.weight().cost)
}

#[cfg(test)]
mod tests {
    use rand::prelude::*;

    use super::*;

    /// Scenario: A—B via two parallel links (cost 2), B—C via one (cost 3).
    fn parallel_graph() -> StrictMultiDigraph {
        let mut g = StrictMultiDigraph::new();
        for name in ["A", "B", "C"] {
            g.add_node(name).unwrap();
        }
        g.add_edge("A", "B", "e1", 2.0, 1.0).unwrap();
        g.add_edge("A", "B", "e2", 2.0, 3.0).unwrap();
        g.add_edge("B", "C", "e3", 3.0, 5.0).unwrap();
        g
    }

    #[test]
    fn parallel_edges_share_the_predecessor_entry() {
        let g = parallel_graph();
        let (a, b, c) = (
            g.node_index("A").unwrap(),
            g.node_index("B").unwrap(),
            g.node_index("C").unwrap(),
        );
        let sp = shortest_paths(&g, a);
        assert_eq!(sp.dist(a), 0.0);
        assert_eq!(sp.dist(b), 2.0);
        assert_eq!(sp.dist(c), 5.0);

        let preds_b = sp.preds(b);
        assert_eq!(preds_b.len(), 1);
        let via_a = &preds_b[&a];
        let ids = via_a.iter().map(|&e| g.edge(e).id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["e1", "e2"]);

        let preds_c = sp.preds(c);
        assert_eq!(preds_c.len(), 1);
        assert_eq!(preds_c[&b].len(), 1);
    }

    #[test]
    fn source_has_no_predecessors() {
        let g = parallel_graph();
        let a = g.node_index("A").unwrap();
        let sp = shortest_paths(&g, a);
        assert!(sp.preds(a).is_empty());
    }

    #[test]
    fn unreachable_node_is_infinite() {
        let mut g = parallel_graph();
        g.add_node("D").unwrap();
        let a = g.node_index("A").unwrap();
        let d = g.node_index("D").unwrap();
        let sp = shortest_paths(&g, a);
        assert!(!sp.is_reachable(d));
        assert_eq!(sp.dist(d), f64::INFINITY);
    }

    #[test]
    fn single_node_graph() {
        let mut g = StrictMultiDigraph::new();
        let n = g.add_node("solo").unwrap();
        let sp = shortest_paths(&g, n);
        assert_eq!(sp.dist(n), 0.0);
        assert!(sp.preds(n).is_empty());
    }

    #[test]
    fn ecmp_records_all_shortest_predecessors() {
        // Diamond: s -> {x, y} -> t, all costs 1. t has two predecessors.
        let mut g = StrictMultiDigraph::new();
        for name in ["s", "x", "y", "t"] {
            g.add_node(name).unwrap();
        }
        g.add_edge("s", "x", "sx", 1.0, 1.0).unwrap();
        g.add_edge("s", "y", "sy", 1.0, 1.0).unwrap();
        g.add_edge("x", "t", "xt", 1.0, 1.0).unwrap();
        g.add_edge("y", "t", "yt", 1.0, 1.0).unwrap();
        let s = g.node_index("s").unwrap();
        let t = g.node_index("t").unwrap();
        let sp = shortest_paths(&g, s);
        assert_eq!(sp.dist(t), 2.0);
        assert_eq!(sp.preds(t).len(), 2);
    }

    #[test]
    fn filtered_spf_skips_unusable_edges() {
        let g = parallel_graph();
        let a = g.node_index("A").unwrap();
        let c = g.node_index("C").unwrap();
        let e3 = g
            .edge_indices()
            .find(|&e| g.edge(e).id == "e3")
            .unwrap();
        let sp = shortest_paths_filtered(&g, a, |e| e != e3);
        assert!(!sp.is_reachable(c));
    }

    #[test]
    fn parity_with_petgraph_dijkstra_on_random_graphs() {
        let mut rng = StdRng::seed_from_u64(7);
        for trial in 0..10 {
            let n = 20 + trial * 5;
            let mut g = StrictMultiDigraph::new();
            for i in 0..n {
                g.add_node(format!("n{i}")).unwrap();
            }
            let nr_edges = n * 3;
            for e in 0..nr_edges {
                let a = rng.gen_range(0..n);
                let mut b = rng.gen_range(0..n);
                if b == a {
                    b = (b + 1) % n;
                }
                let cost = f64::from(rng.gen_range(1..=20u32));
                g.add_edge(&format!("n{a}"), &format!("n{b}"), format!("e{e}"), cost, 1.0)
                    .unwrap();
            }
            let source = g.node_index("n0").unwrap();
            let sp = shortest_paths(&g, source);
            let reference = reference_distances(&g, source);
            for node in g.node_indices() {
                match reference.get(&node) {
                    Some(&d) => assert_eq!(sp.dist(node), d, "trial {trial}"),
                    None => assert!(!sp.is_reachable(node), "trial {trial}"),
                }
            }
        }
    }
}
