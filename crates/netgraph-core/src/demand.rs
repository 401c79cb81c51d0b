//! Traffic demands and their expansion into concrete sub-demands.

use crate::network::{AttrMap, Network, NetworkError};

/// How a demand's endpoint selections expand into sub-demands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DemandMode {
    /// One aggregate sub-demand between the full selections.
    #[default]
    Combine,
    /// One sub-demand per (source group, sink group) label pair, volume
    /// split evenly.
    Pairwise,
    /// One sub-demand per (source node, sink node) pair, volume split
    /// evenly.
    FullMesh,
}

/// A single traffic demand between two regex node selections.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TrafficDemand {
    /// Regex pattern selecting source nodes.
    pub source_path: String,
    /// Regex pattern selecting sink nodes.
    pub sink_path: String,
    /// Priority class; numerically lower classes place first.
    #[serde(default)]
    pub priority: i64,
    /// Total demand volume.
    #[serde(default)]
    pub demand: f64,
    /// Expansion mode.
    #[serde(default)]
    pub mode: DemandMode,
    /// Arbitrary scalar attributes.
    #[serde(default)]
    pub attrs: AttrMap,
}

impl TrafficDemand {
    /// Creates a combine-mode demand with priority 0.
    pub fn new(
        source_path: impl Into<String>,
        sink_path: impl Into<String>,
        demand: f64,
    ) -> Self {
        Self {
            source_path: source_path.into(),
            sink_path: sink_path.into(),
            priority: 0,
            demand,
            mode: DemandMode::Combine,
            attrs: AttrMap::new(),
        }
    }

    /// Sets the priority class, consuming and returning the demand.
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the expansion mode, consuming and returning the demand.
    pub fn with_mode(mut self, mode: DemandMode) -> Self {
        self.mode = mode;
        self
    }
}

/// A concrete sub-demand produced by expansion. Endpoints are node names on
/// the base network; analyzers intersect them with per-iteration visibility.
#[derive(Debug, Clone)]
pub struct ExpandedDemand {
    /// Source-side label (group label, node name, or the source pattern).
    pub src_label: String,
    /// Sink-side label.
    pub dst_label: String,
    /// Source node names.
    pub sources: Vec<String>,
    /// Sink node names.
    pub sinks: Vec<String>,
    /// Priority class inherited from the demand.
    pub priority: i64,
    /// Volume of this sub-demand.
    pub volume: f64,
}

/// Expands demands against the base network.
///
/// Expansion is independent of any view, so sub-demand labels are stable
/// across Monte Carlo iterations; exclusions only affect which endpoint
/// names survive materialization.
pub fn expand_demands(
    network: &Network,
    demands: &[TrafficDemand],
) -> Result<Vec<ExpandedDemand>, NetworkError> {
    let mut expanded = Vec::new();
    for demand in demands {
        let src_groups = network.select_node_groups_by_path(&demand.source_path)?;
        let dst_groups = network.select_node_groups_by_path(&demand.sink_path)?;
        match demand.mode {
            DemandMode::Combine => {
                let sources = member_names(&src_groups);
                let sinks = member_names(&dst_groups);
                expanded.push(ExpandedDemand {
                    src_label: demand.source_path.clone(),
                    dst_label: demand.sink_path.clone(),
                    sources,
                    sinks,
                    priority: demand.priority,
                    volume: demand.demand,
                });
            }
            DemandMode::Pairwise => {
                let pairs: Vec<_> = src_groups
                    .iter()
                    .flat_map(|s| dst_groups.iter().map(move |d| (s, d)))
                    .filter(|((s, _), (d, _))| s != d)
                    .collect();
                let share = per_pair_volume(demand.demand, pairs.len());
                for ((src_label, src_members), (dst_label, dst_members)) in pairs {
                    expanded.push(ExpandedDemand {
                        src_label: src_label.clone(),
                        dst_label: dst_label.clone(),
                        sources: src_members.iter().map(|n| n.name.clone()).collect(),
                        sinks: dst_members.iter().map(|n| n.name.clone()).collect(),
                        priority: demand.priority,
                        volume: share,
                    });
                }
            }
            DemandMode::FullMesh => {
                let sources = member_names(&src_groups);
                let sinks = member_names(&dst_groups);
                let pairs: Vec<_> = sources
                    .iter()
                    .flat_map(|s| sinks.iter().map(move |d| (s, d)))
                    .filter(|(s, d)| s != d)
                    .collect();
                let share = per_pair_volume(demand.demand, pairs.len());
                for (src, dst) in pairs {
                    expanded.push(ExpandedDemand {
                        src_label: src.clone(),
                        dst_label: dst.clone(),
                        sources: vec![src.clone()],
                        sinks: vec![dst.clone()],
                        priority: demand.priority,
                        volume: share,
                    });
                }
            }
        }
    }
    Ok(expanded)
}

fn member_names(groups: &crate::network::NodeGroups<'_>) -> Vec<String> {
    let mut names: Vec<String> = groups
        .iter()
        .flat_map(|(_, members)| members.iter().map(|n| n.name.clone()))
        .collect();
    names.sort();
    names.dedup();
    names
}

fn per_pair_volume(total: f64, nr_pairs: usize) -> f64 {
    if nr_pairs == 0 {
        0.0
    } else {
        total / nr_pairs as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn combine_keeps_one_aggregate() -> anyhow::Result<()> {
        let network = testing::clos_2x2()?;
        let demands = [TrafficDemand::new(r"S\d", r"L\d", 100.0)];
        let expanded = expand_demands(&network, &demands)?;
        assert_eq!(expanded.len(), 1);
        let d = &expanded[0];
        assert_eq!(d.src_label, r"S\d");
        assert_eq!(d.sources, vec!["S1", "S2"]);
        assert_eq!(d.sinks, vec!["L1", "L2"]);
        assert_eq!(d.volume, 100.0);
        Ok(())
    }

    #[test]
    fn pairwise_splits_volume_across_label_pairs() -> anyhow::Result<()> {
        let network = testing::clos_2x2()?;
        let demands =
            [TrafficDemand::new(r"S\d", r"L\d", 100.0).with_mode(DemandMode::Pairwise)];
        let expanded = expand_demands(&network, &demands)?;
        // Full-match labels: S1,S2 x L1,L2.
        assert_eq!(expanded.len(), 4);
        assert!(expanded.iter().all(|d| d.volume == 25.0));
        assert!(expanded.iter().all(|d| d.sources.len() == 1));
        Ok(())
    }

    #[test]
    fn full_mesh_skips_self_pairs() -> anyhow::Result<()> {
        let network = testing::clos_2x2()?;
        let demands =
            [TrafficDemand::new(r"\w\d", r"\w\d", 120.0).with_mode(DemandMode::FullMesh)];
        let expanded = expand_demands(&network, &demands)?;
        // 4 nodes -> 12 ordered pairs without self-pairs.
        assert_eq!(expanded.len(), 12);
        assert!(expanded.iter().all(|d| d.volume == 10.0));
        assert!(expanded.iter().all(|d| d.src_label != d.dst_label));
        Ok(())
    }

    #[test]
    fn expansion_is_view_independent() -> anyhow::Result<()> {
        let network = testing::clos_2x2()?;
        let demands =
            [TrafficDemand::new(r"S\d", r"L\d", 100.0).with_mode(DemandMode::Pairwise)];
        let a = expand_demands(&network, &demands)?;
        let b = expand_demands(&network, &demands)?;
        assert_eq!(a.len(), b.len());
        Ok(())
    }

    #[test]
    fn invalid_pattern_surfaces_the_error() {
        let network = Network::default();
        let demands = [TrafficDemand::new(r"(", r"x", 1.0)];
        assert!(expand_demands(&network, &demands).is_err());
    }
}
