//! Per-iteration flow analyzers.
//!
//! The engine is generic over a [`FlowAnalyzer`]: given an iteration's
//! [`NetworkView`], an analyzer produces a list of [`FlowRecord`]s that the
//! aggregator folds into envelopes. Two analyzers exist: capacity envelopes
//! (max flow per pair) and traffic placement (demand placement ratios).

use crate::demand::{expand_demands, TrafficDemand};
use crate::failure::PolicyError;
use crate::graph::maxflow::{max_flow, CostDistribution, FlowSolver};
use crate::graph::NodeIndex;
use crate::network::view::FlowMode;
use crate::network::{Network, NetworkError, NetworkView, Node};
use crate::seed::SeedManager;

/// The metric a record reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Max-flow value between a pair.
    Capacity,
    /// Placed fraction of a demand, in `[0, 1]`.
    PlacementRatio,
}

impl Metric {
    /// The serialized metric name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Capacity => "capacity",
            Self::PlacementRatio => "placement_ratio",
        }
    }
}

/// What a record's edge list means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgesKind {
    /// Min-cut edges of a capacity computation.
    MinCut,
    /// Edges a placement actually used.
    Used,
}

impl EdgesKind {
    /// The serialized kind name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MinCut => "min_cut",
            Self::Used => "used",
        }
    }
}

/// Compact per-record flow details.
#[derive(Debug, Clone)]
pub struct RecordStats {
    /// Flow volume per path-cost level.
    pub cost_distribution: CostDistribution,
    /// Model link ids; meaning given by `edges_kind`.
    pub edges: Vec<String>,
    /// Meaning of the edge list.
    pub edges_kind: EdgesKind,
}

/// Normalized result record for one flow pair in one iteration.
#[derive(Debug, Clone)]
pub struct FlowRecord {
    /// Source label.
    pub src: String,
    /// Destination label.
    pub dst: String,
    /// The reported metric.
    pub metric: Metric,
    /// The metric value.
    pub value: f64,
    /// Demand priority; placement records only.
    pub priority: Option<i64>,
    /// Optional details.
    pub stats: Option<RecordStats>,
}

/// Per-iteration context handed to analyzers.
#[derive(Debug, Clone, Copy)]
pub struct IterationContext {
    /// The iteration index.
    pub iteration: usize,
    /// Whether this is the no-failure baseline iteration.
    pub is_baseline: bool,
    /// Seed derivation for analyzers that need their own randomness; the
    /// convention is `("analyzer", iteration, pair_index)`.
    pub seeds: SeedManager,
}

/// The capability the engine abstracts analyzers behind.
pub trait FlowAnalyzer: Sync {
    /// The analysis kind recorded in workflow metadata.
    fn kind(&self) -> &'static str;

    /// The flow mode recorded on finalized envelopes.
    fn flow_mode(&self) -> FlowMode {
        FlowMode::Combine
    }

    /// Checks analyzer parameters against the base network before the
    /// engine starts.
    fn validate(&self, network: &Network) -> Result<(), ValidationError>;

    /// Runs the analysis on one iteration's view.
    fn analyze(
        &self,
        view: &NetworkView<'_>,
        ctx: &IterationContext,
    ) -> Result<Vec<FlowRecord>, AnalysisError>;
}

impl<T: FlowAnalyzer> FlowAnalyzer for &T {
    fn kind(&self) -> &'static str {
        (*self).kind()
    }

    fn flow_mode(&self) -> FlowMode {
        (*self).flow_mode()
    }

    fn validate(&self, network: &Network) -> Result<(), ValidationError> {
        (*self).validate(network)
    }

    fn analyze(
        &self,
        view: &NetworkView<'_>,
        ctx: &IterationContext,
    ) -> Result<Vec<FlowRecord>, AnalysisError> {
        (*self).analyze(view, ctx)
    }
}

/// Computes max flow between regex selections, one record per pair.
///
/// Selection runs against the base network so envelope keys stay stable
/// across iterations; exclusions only shrink the materialized graph, and a
/// fully excluded side yields a zero-capacity record rather than an error.
#[derive(Debug, Clone, typed_builder::TypedBuilder)]
pub struct CapacityEnvelopeAnalyzer {
    /// Regex pattern selecting source nodes.
    #[builder(setter(into))]
    pub source_path: String,
    /// Regex pattern selecting sink nodes.
    #[builder(setter(into))]
    pub sink_path: String,
    /// How selections combine into flows.
    #[builder(default = FlowMode::Combine)]
    pub mode: FlowMode,
    /// Whether to attach cost distributions and min-cut edges to records.
    #[builder(default)]
    pub with_details: bool,
}

impl FlowAnalyzer for CapacityEnvelopeAnalyzer {
    fn kind(&self) -> &'static str {
        "CapacityEnvelopeAnalysis"
    }

    fn flow_mode(&self) -> FlowMode {
        self.mode
    }

    fn validate(&self, network: &Network) -> Result<(), ValidationError> {
        for path in [&self.source_path, &self.sink_path] {
            let groups = network.select_node_groups_by_path(path)?;
            if groups.is_empty() {
                return Err(ValidationError::UnresolvedSelection(path.clone()));
            }
        }
        Ok(())
    }

    fn analyze(
        &self,
        view: &NetworkView<'_>,
        _ctx: &IterationContext,
    ) -> Result<Vec<FlowRecord>, AnalysisError> {
        let graph = view.to_graph();
        let base = view.base();
        let src_groups = base.select_node_groups_by_path(&self.source_path)?;
        let dst_groups = base.select_node_groups_by_path(&self.sink_path)?;
        let resolve = |members: &[&Node]| -> Vec<NodeIndex> {
            // Excluded nodes are simply absent from the materialized graph.
            members
                .iter()
                .filter_map(|n| graph.node_index(&n.name))
                .collect()
        };
        let mut records = Vec::new();
        let mut emit = |src: String, dst: String, sources: Vec<NodeIndex>, sinks: Vec<NodeIndex>| {
            let result = max_flow(&graph, &sources, &sinks, self.with_details);
            records.push(FlowRecord {
                src,
                dst,
                metric: Metric::Capacity,
                value: result.total,
                priority: None,
                stats: result.stats.map(|s| RecordStats {
                    cost_distribution: s.cost_distribution,
                    edges: s.min_cut,
                    edges_kind: EdgesKind::MinCut,
                }),
            });
        };
        match self.mode {
            FlowMode::Combine => {
                let sources = src_groups
                    .iter()
                    .flat_map(|(_, m)| resolve(m))
                    .collect::<Vec<_>>();
                let sinks = dst_groups
                    .iter()
                    .flat_map(|(_, m)| resolve(m))
                    .collect::<Vec<_>>();
                emit(
                    self.source_path.clone(),
                    self.sink_path.clone(),
                    sources,
                    sinks,
                );
            }
            FlowMode::Pairwise => {
                for (src_label, src_members) in &src_groups {
                    for (dst_label, dst_members) in &dst_groups {
                        if src_label == dst_label {
                            continue;
                        }
                        emit(
                            src_label.clone(),
                            dst_label.clone(),
                            resolve(src_members),
                            resolve(dst_members),
                        );
                    }
                }
            }
        }
        Ok(records)
    }
}

/// Places traffic demands under capacity constraints and reports placement
/// ratios.
///
/// All sub-demands of an iteration share one residual-flow state: placement
/// order matters, and priority classes place in ascending numeric order
/// (input order within a class).
#[derive(Debug, Clone, typed_builder::TypedBuilder)]
pub struct TrafficPlacementAnalyzer {
    /// The demands to place.
    pub demands: Vec<TrafficDemand>,
    /// Whether to attach cost distributions and used edges to records.
    #[builder(default)]
    pub with_details: bool,
}

impl FlowAnalyzer for TrafficPlacementAnalyzer {
    fn kind(&self) -> &'static str {
        "TrafficMatrixPlacementAnalysis"
    }

    fn validate(&self, network: &Network) -> Result<(), ValidationError> {
        for demand in &self.demands {
            if demand.demand < 0.0 {
                return Err(ValidationError::NegativeDemand {
                    demand: demand.demand,
                });
            }
            for path in [&demand.source_path, &demand.sink_path] {
                let groups = network.select_node_groups_by_path(path)?;
                if groups.is_empty() {
                    return Err(ValidationError::UnresolvedSelection(path.clone()));
                }
            }
        }
        Ok(())
    }

    fn analyze(
        &self,
        view: &NetworkView<'_>,
        _ctx: &IterationContext,
    ) -> Result<Vec<FlowRecord>, AnalysisError> {
        let mut graph = view.to_graph();
        let mut expanded = expand_demands(view.base(), &self.demands)?;
        // Stable sort: input order is preserved within a priority class.
        expanded.sort_by_key(|d| d.priority);

        // Resolve endpoints and attach virtual super-endpoints before the
        // solver borrows the graph.
        let mut endpoints: Vec<Option<(NodeIndex, NodeIndex)>> = Vec::with_capacity(expanded.len());
        for demand in &expanded {
            let resolve = |names: &[String]| -> Vec<NodeIndex> {
                names.iter().filter_map(|n| graph.node_index(n)).collect()
            };
            let (sources, sinks) =
                crate::graph::maxflow::disjoint_endpoints(&resolve(&demand.sources), &resolve(&demand.sinks));
            if sources.is_empty() || sinks.is_empty() {
                endpoints.push(None);
            } else if let ([s], [t]) = (&sources[..], &sinks[..]) {
                endpoints.push(Some((*s, *t)));
            } else {
                let s = graph.add_virtual_node();
                let t = graph.add_virtual_node();
                for &n in &sources {
                    graph.add_virtual_edge(s, n, f64::INFINITY);
                }
                for &n in &sinks {
                    graph.add_virtual_edge(n, t, f64::INFINITY);
                }
                endpoints.push(Some((s, t)));
            }
        }

        let mut solver = FlowSolver::new(&graph);
        let mut records = Vec::with_capacity(expanded.len());
        for (demand, endpoint) in expanded.iter().zip(endpoints) {
            let before = self
                .with_details
                .then(|| solver.flows().to_vec());
            let placement = match endpoint {
                Some((s, t)) => solver.push(s, t, demand.volume),
                None => Default::default(),
            };
            let ratio = if demand.volume > 0.0 {
                (placement.placed / demand.volume).clamp(0.0, 1.0)
            } else {
                // Nothing demanded is trivially fully placed.
                1.0
            };
            let stats = before.map(|before| RecordStats {
                cost_distribution: placement.cost_distribution.clone(),
                edges: solver.edges_used_since(&before),
                edges_kind: EdgesKind::Used,
            });
            records.push(FlowRecord {
                src: demand.src_label.clone(),
                dst: demand.dst_label.clone(),
                metric: Metric::PlacementRatio,
                value: ratio,
                priority: Some(demand.priority),
                stats,
            });
        }
        Ok(records)
    }
}

/// Errors detected before the engine starts.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// The failure policy is malformed.
    #[error("invalid failure policy")]
    Policy(#[from] PolicyError),

    /// A selection pattern is malformed.
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// A selection pattern matches no nodes on the base network.
    #[error("pattern {0:?} does not select any nodes")]
    UnresolvedSelection(String),

    /// A demand volume is negative.
    #[error("demand volume {demand} is negative")]
    NegativeDemand {
        /// The rejected volume.
        demand: f64,
    },
}

/// Errors raised by an analyzer mid-iteration. These abort the run and are
/// reported with the iteration index and seed.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// A selection that validated against the base failed mid-iteration.
    #[error("selection failed mid-iteration")]
    Selection(#[from] NetworkError),

    /// An internal precondition was violated; the iteration is aborted and
    /// reported, never retried.
    #[error("iteration precondition violated: {0}")]
    Precondition(String),
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::*;
    use crate::demand::DemandMode;
    use crate::testing;

    fn ctx() -> IterationContext {
        IterationContext {
            iteration: 0,
            is_baseline: true,
            seeds: SeedManager::new(Some(42)),
        }
    }

    #[test]
    fn capacity_combine_over_clos() -> anyhow::Result<()> {
        let network = testing::clos_2x2().context("failed to build network")?;
        let analyzer = CapacityEnvelopeAnalyzer::builder()
            .source_path(r"S\d")
            .sink_path(r"L\d")
            .build();
        analyzer.validate(&network)?;
        let view = NetworkView::unfiltered(&network);
        let records = analyzer.analyze(&view, &ctx())?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].metric, Metric::Capacity);
        assert_eq!(records[0].value, 400.0);
        Ok(())
    }

    #[test]
    fn capacity_reflects_exclusions() -> anyhow::Result<()> {
        let network = testing::clos_2x2()?;
        let analyzer = CapacityEnvelopeAnalyzer::builder()
            .source_path(r"S\d")
            .sink_path(r"L\d")
            .build();
        let view = NetworkView::from_excluded_sets(&network, ["S1"], Vec::<String>::new());
        let records = analyzer.analyze(&view, &ctx())?;
        assert_eq!(records[0].value, 200.0);
        Ok(())
    }

    #[test]
    fn fully_excluded_sink_yields_a_zero_record() -> anyhow::Result<()> {
        let network = testing::risk_group_fabric()?;
        let analyzer = CapacityEnvelopeAnalyzer::builder()
            .source_path(r"S\d")
            .sink_path(r"L\d")
            .build();
        let view = NetworkView::from_excluded_sets(&network, ["L1", "L2"], Vec::<String>::new());
        let records = analyzer.analyze(&view, &ctx())?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, 0.0);
        Ok(())
    }

    #[test]
    fn pairwise_capacity_keys_stay_stable_under_exclusion() -> anyhow::Result<()> {
        let network = testing::clos_2x2()?;
        let analyzer = CapacityEnvelopeAnalyzer::builder()
            .source_path(r"(S\d)")
            .sink_path(r"(L\d)")
            .mode(FlowMode::Pairwise)
            .build();
        let view = NetworkView::from_excluded_sets(&network, ["S1"], Vec::<String>::new());
        let records = analyzer.analyze(&view, &ctx())?;
        // S1 pairs survive as zero-capacity records.
        assert_eq!(records.len(), 4);
        let zeroes = records.iter().filter(|r| r.value == 0.0).count();
        assert_eq!(zeroes, 2);
        Ok(())
    }

    #[test]
    fn capacity_details_report_the_min_cut() -> anyhow::Result<()> {
        let network = testing::parallel_edge_triangle()?;
        let analyzer = CapacityEnvelopeAnalyzer::builder()
            .source_path("A")
            .sink_path("C")
            .with_details(true)
            .build();
        let view = NetworkView::unfiltered(&network);
        let records = analyzer.analyze(&view, &ctx())?;
        assert_eq!(records[0].value, 4.0);
        let stats = records[0].stats.as_ref().unwrap();
        assert_eq!(stats.edges_kind, EdgesKind::MinCut);
        assert_eq!(stats.edges.len(), 2);
        Ok(())
    }

    #[test]
    fn unresolved_selection_fails_validation() -> anyhow::Result<()> {
        let network = testing::clos_2x2()?;
        let analyzer = CapacityEnvelopeAnalyzer::builder()
            .source_path("nothing-matches")
            .sink_path(r"L\d")
            .build();
        assert!(matches!(
            analyzer.validate(&network),
            Err(ValidationError::UnresolvedSelection(..))
        ));
        Ok(())
    }

    #[test]
    fn placement_clamps_to_available_capacity() -> anyhow::Result<()> {
        // One demand of 150 on a max-flow-100 pair places 2/3 of it.
        let network = testing::bottleneck_pair(100.0)?;
        let analyzer = TrafficPlacementAnalyzer::builder()
            .demands(vec![TrafficDemand::new("A", "B", 150.0)])
            .build();
        analyzer.validate(&network)?;
        let view = NetworkView::unfiltered(&network);
        let records = analyzer.analyze(&view, &ctx())?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].metric, Metric::PlacementRatio);
        assert!((records[0].value - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(records[0].priority, Some(0));
        Ok(())
    }

    #[test]
    fn lower_priority_class_places_first() -> anyhow::Result<()> {
        let network = testing::bottleneck_pair(10.0)?;
        let analyzer = TrafficPlacementAnalyzer::builder()
            .demands(vec![
                TrafficDemand::new("A", "B", 10.0).with_priority(1),
                TrafficDemand::new("A", "B", 6.0).with_priority(0),
            ])
            .build();
        let view = NetworkView::unfiltered(&network);
        let records = analyzer.analyze(&view, &ctx())?;
        // Priority 0 placed fully; priority 1 got the remaining 4 of 10.
        assert_eq!(records[0].priority, Some(0));
        assert_eq!(records[0].value, 1.0);
        assert_eq!(records[1].priority, Some(1));
        assert!((records[1].value - 0.4).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn placement_on_excluded_endpoints_is_zero() -> anyhow::Result<()> {
        let network = testing::bottleneck_pair(10.0)?;
        let analyzer = TrafficPlacementAnalyzer::builder()
            .demands(vec![TrafficDemand::new("A", "B", 5.0)])
            .build();
        let view = NetworkView::from_excluded_sets(&network, ["B"], Vec::<String>::new());
        let records = analyzer.analyze(&view, &ctx())?;
        assert_eq!(records[0].value, 0.0);
        Ok(())
    }

    #[test]
    fn zero_volume_demand_is_trivially_placed() -> anyhow::Result<()> {
        let network = testing::bottleneck_pair(10.0)?;
        let analyzer = TrafficPlacementAnalyzer::builder()
            .demands(vec![TrafficDemand::new("A", "B", 0.0)])
            .build();
        let view = NetworkView::unfiltered(&network);
        let records = analyzer.analyze(&view, &ctx())?;
        assert_eq!(records[0].value, 1.0);
        Ok(())
    }

    #[test]
    fn placement_details_list_used_edges() -> anyhow::Result<()> {
        let network = testing::bottleneck_pair(10.0)?;
        let analyzer = TrafficPlacementAnalyzer::builder()
            .demands(vec![TrafficDemand::new("A", "B", 5.0)])
            .with_details(true)
            .build();
        let view = NetworkView::unfiltered(&network);
        let records = analyzer.analyze(&view, &ctx())?;
        let stats = records[0].stats.as_ref().unwrap();
        assert_eq!(stats.edges_kind, EdgesKind::Used);
        assert_eq!(stats.edges.len(), 1);
        Ok(())
    }

    #[test]
    fn details_report_link_ids_for_reverse_direction_flow() -> anyhow::Result<()> {
        let mut network = Network::new();
        network.add_node(Node::new("A"))?;
        network.add_node(Node::new("B"))?;
        // Declared B -> A; the demand flows A -> B over the reverse edge.
        network.add_link(crate::network::Link::new("B", "A", 10.0, 1.0).with_id("ba"))?;
        let analyzer = TrafficPlacementAnalyzer::builder()
            .demands(vec![TrafficDemand::new("A", "B", 5.0)])
            .with_details(true)
            .build();
        let view = NetworkView::unfiltered(&network);
        let records = analyzer.analyze(&view, &ctx())?;
        assert_eq!(records[0].value, 1.0);
        assert_eq!(records[0].stats.as_ref().unwrap().edges, vec!["ba"]);
        Ok(())
    }

    #[test]
    fn full_mesh_demands_share_capacity() -> anyhow::Result<()> {
        let network = testing::clos_2x2()?;
        let analyzer = TrafficPlacementAnalyzer::builder()
            .demands(vec![TrafficDemand::new(r"S\d", r"L\d", 400.0)
                .with_mode(DemandMode::FullMesh)])
            .build();
        let view = NetworkView::unfiltered(&network);
        let records = analyzer.analyze(&view, &ctx())?;
        assert_eq!(records.len(), 4);
        // 100 per pair over four disjoint-capacity pairs all fits.
        assert!(records.iter().all(|r| r.value == 1.0));
        Ok(())
    }
}
