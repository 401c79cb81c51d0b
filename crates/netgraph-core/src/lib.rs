#![warn(unreachable_pub, missing_debug_implementations, missing_docs)]

//! The core NetGraph library: a Monte Carlo failure-analysis engine for
//! backbone and data-center topologies, together with the graph kernel it
//! runs on.
//!
//! The flow is: build a [`Network`] of nodes, links, and risk groups; choose
//! a [`FailurePolicy`] and an analyzer ([`CapacityEnvelopeAnalyzer`] or
//! [`TrafficPlacementAnalyzer`]); hand everything to a [`FailureManager`].
//! Each iteration samples a failure pattern, hides it behind a
//! [`NetworkView`], runs the analyzer on the filtered graph, and folds the
//! records into [envelopes](results::CapacityEnvelope) — empirical
//! distributions of per-pair metrics across iterations.

pub mod analysis;
pub mod demand;
pub mod failure;
pub mod graph;
pub mod manager;
pub mod network;
pub mod results;
pub mod seed;
pub mod testing;

pub use analysis::{
    AnalysisError, CapacityEnvelopeAnalyzer, FlowAnalyzer, FlowRecord, Metric,
    TrafficPlacementAnalyzer, ValidationError,
};
pub use demand::{DemandMode, TrafficDemand};
pub use failure::{FailureCondition, FailureMode, FailurePolicy, FailureRule, FailureSample};
pub use graph::StrictMultiDigraph;
pub use manager::{FailureAnalysisOpts, FailureManager, FailureManagerError};
pub use network::view::FlowMode;
pub use network::{Link, Network, NetworkError, NetworkView, Node, RiskGroup};
pub use results::{
    CapacityEnvelope, FailureAnalysis, FailurePatternRecord, PlacementEnvelope, Results,
};
pub use seed::SeedManager;
