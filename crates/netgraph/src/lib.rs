//! `NetGraph` is a network modeling and analysis toolkit for backbone and
//! data-center topologies. Given a materialized network, a declarative
//! failure policy, and an analyzer, it runs randomized failure iterations in
//! a worker pool and aggregates per-pair results into capacity and placement
//! envelopes. The most common entry point is [`run_failure_analysis`].

#![warn(unreachable_pub, missing_docs)]

pub use netgraph_core::*;

/// Runs a full Monte Carlo failure analysis: validates the inputs, executes
/// the configured iterations, and returns the aggregated envelopes.
///
/// This is a thin wrapper over [`FailureManager`]; construct the manager
/// directly to reuse a network across several analyses.
pub fn run_failure_analysis<A>(
    network: &Network,
    policy: Option<&FailurePolicy>,
    analyzer: A,
    opts: FailureAnalysisOpts,
) -> Result<FailureAnalysis, FailureManagerError>
where
    A: FlowAnalyzer,
{
    FailureManager::new(network, policy, analyzer, opts).run()
}
