//! Utilities for writing tests.

use crate::network::{Link, Network, NetworkError, Node};

/// Two nodes `A` and `B` joined by a single link of the given capacity
/// (cost 1).
pub fn bottleneck_pair(capacity: f64) -> Result<Network, NetworkError> {
    let mut network = Network::new();
    network.add_node(Node::new("A"))?;
    network.add_node(Node::new("B"))?;
    network.add_link(Link::new("A", "B", capacity, 1.0).with_id("ab"))?;
    Ok(network)
}

/// The parallel-edge triangle: `A—B` twice (capacities 1 and 3, cost 2) and
/// `B—C` once (capacity 5, cost 3).
pub fn parallel_edge_triangle() -> Result<Network, NetworkError> {
    let mut network = Network::new();
    for name in ["A", "B", "C"] {
        network.add_node(Node::new(name))?;
    }
    network.add_link(Link::new("A", "B", 1.0, 2.0).with_id("e1"))?;
    network.add_link(Link::new("A", "B", 3.0, 2.0).with_id("e2"))?;
    network.add_link(Link::new("B", "C", 5.0, 3.0).with_id("e3"))?;
    Ok(network)
}

/// Two spines (`S1`, `S2`) and two leaves (`L1`, `L2`), fully bipartite with
/// capacity 100 and cost 1 per link. Combine-mode max flow spines→leaves is
/// 400.
pub fn clos_2x2() -> Result<Network, NetworkError> {
    let mut network = Network::new();
    for name in ["S1", "S2", "L1", "L2"] {
        network.add_node(Node::new(name))?;
    }
    for (spine, leaf) in [("S1", "L1"), ("S1", "L2"), ("S2", "L1"), ("S2", "L2")] {
        network.add_link(
            Link::new(spine, leaf, 100.0, 1.0).with_id(format!("{spine}-{leaf}")),
        )?;
    }
    Ok(network)
}

/// The [`clos_2x2`] fabric with both leaves tagged into risk group `R`.
pub fn risk_group_fabric() -> Result<Network, NetworkError> {
    let mut network = Network::new();
    for name in ["S1", "S2"] {
        network.add_node(Node::new(name))?;
    }
    for name in ["L1", "L2"] {
        network.add_node(Node::new(name).with_risk_group("R"))?;
    }
    for (spine, leaf) in [("S1", "L1"), ("S1", "L2"), ("S2", "L1"), ("S2", "L2")] {
        network.add_link(
            Link::new(spine, leaf, 100.0, 1.0).with_id(format!("{spine}-{leaf}")),
        )?;
    }
    Ok(network)
}

/// A three-tier Clos-like fabric with `spines` spine nodes and `leaves` leaf
/// nodes, fully meshed with unit-cost links of the given capacity. Used by
/// the larger Monte Carlo tests.
pub fn clos_fabric(spines: usize, leaves: usize, capacity: f64) -> Result<Network, NetworkError> {
    let mut network = Network::new();
    for i in 1..=spines {
        network.add_node(Node::new(format!("S{i}")))?;
    }
    for i in 1..=leaves {
        network.add_node(Node::new(format!("L{i}")))?;
    }
    for i in 1..=spines {
        for j in 1..=leaves {
            network.add_link(
                Link::new(format!("S{i}"), format!("L{j}"), capacity, 1.0)
                    .with_id(format!("S{i}-L{j}")),
            )?;
        }
    }
    Ok(network)
}
