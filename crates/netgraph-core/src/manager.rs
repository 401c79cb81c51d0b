//! The Monte Carlo failure-analysis engine.
//!
//! A [`FailureManager`] runs N independent iterations: each samples a
//! failure pattern from the policy, builds a [`NetworkView`] over the shared
//! base network, runs the configured analyzer on it, and emits records into
//! a channel. The main task drains the channel into the single-writer
//! aggregator. With a master seed set, per-iteration seeds are derived
//! independently of scheduling, so results are identical across runs and
//! across `parallelism` values.

use rayon::prelude::*;

use crate::analysis::{FlowAnalyzer, FlowRecord, IterationContext, ValidationError};
use crate::failure::{FailurePolicy, FailureSample};
use crate::network::{Network, NetworkView};
use crate::results::{Aggregator, AnalysisMetadata, FailureAnalysis, IterationFailure};
use crate::seed::SeedManager;

/// The seed-derivation tag for per-iteration policy sampling.
const POLICY_SAMPLE: &str = "policy_sample";

/// Engine options.
#[derive(Debug, Clone, typed_builder::TypedBuilder)]
pub struct FailureAnalysisOpts {
    /// Number of Monte Carlo iterations, baseline included.
    pub iterations: usize,
    /// Worker pool size.
    #[builder(default = num_cpus::get())]
    pub parallelism: usize,
    /// Whether iteration 0 runs with the empty exclusion set.
    #[builder(default)]
    pub baseline: bool,
    /// Whether to store one record per distinct failure pattern.
    #[builder(default)]
    pub store_patterns: bool,
    /// Master seed; absent means a non-deterministic run.
    #[builder(default)]
    pub seed: Option<u64>,
}

/// Orchestrates failure sampling, per-iteration analysis, and aggregation.
#[derive(Debug)]
pub struct FailureManager<'a, A> {
    network: &'a Network,
    policy: Option<&'a FailurePolicy>,
    analyzer: A,
    opts: FailureAnalysisOpts,
}

#[derive(Debug)]
struct IterationOutcome {
    is_baseline: bool,
    sample: FailureSample,
    records: Vec<FlowRecord>,
}

#[derive(Debug)]
struct WorkerFailure {
    iteration: usize,
    kind: &'static str,
    message: String,
}

impl<'a, A> FailureManager<'a, A>
where
    A: FlowAnalyzer,
{
    /// Creates an engine over a base network. `policy: None` means every
    /// iteration runs failure-free.
    pub fn new(
        network: &'a Network,
        policy: Option<&'a FailurePolicy>,
        analyzer: A,
        opts: FailureAnalysisOpts,
    ) -> Self {
        Self {
            network,
            policy,
            analyzer,
            opts,
        }
    }

    /// Runs the configured number of iterations and aggregates the results.
    ///
    /// Validation problems surface as `Err` before any iteration starts. A
    /// mid-run iteration failure cancels outstanding work and returns the
    /// partial aggregation with [`FailureAnalysis::error`] set.
    pub fn run(&self) -> Result<FailureAnalysis, FailureManagerError> {
        if let Some(policy) = self.policy {
            policy.validate().map_err(ValidationError::Policy)?;
        }
        self.analyzer.validate(self.network)?;

        let seeds = SeedManager::new(self.opts.seed);
        let parallelism = self.opts.parallelism.max(1);
        let metadata = AnalysisMetadata {
            iterations: self.opts.iterations,
            baseline: self.opts.baseline,
            parallelism,
            seed: self.opts.seed,
        };
        let mut aggregator = Aggregator::new(self.opts.store_patterns);
        if self.opts.iterations == 0 {
            return Ok(aggregator.finalize(self.analyzer.flow_mode(), metadata, None));
        }

        log::debug!(
            "running {} iterations across {} workers",
            self.opts.iterations,
            parallelism
        );
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(parallelism)
            .build()?;
        let (sender, receiver) = crossbeam_channel::unbounded();
        let outcome: Result<(), WorkerFailure> = pool.install(|| {
            (0..self.opts.iterations)
                .into_par_iter()
                .try_for_each_with(sender, |sender, iteration| {
                    let outcome = self.run_iteration(iteration, seeds).map_err(|err| {
                        WorkerFailure {
                            iteration,
                            kind: "analysis",
                            message: err.to_string(),
                        }
                    })?;
                    sender.send(outcome).map_err(|_| WorkerFailure {
                        iteration,
                        kind: "resource",
                        message: "result channel closed unexpectedly".to_owned(),
                    })
                })
        });

        // Aggregation is order-insensitive, so draining after the pool
        // finishes gives the same envelopes as folding records live.
        for IterationOutcome {
            is_baseline,
            sample,
            records,
        } in receiver.try_iter()
        {
            aggregator.fold(is_baseline, &sample, records);
        }

        let error = outcome.err().map(|failure| {
            log::warn!(
                "iteration {} failed ({}): {}",
                failure.iteration,
                failure.kind,
                failure.message
            );
            IterationFailure {
                iteration: failure.iteration,
                seed: seeds.derive_seed(&[&POLICY_SAMPLE, &failure.iteration]),
                kind: failure.kind.to_owned(),
                message: failure.message,
            }
        });
        Ok(aggregator.finalize(self.analyzer.flow_mode(), metadata, error))
    }

    /// One iteration end-to-end: sample → view → analyze.
    fn run_iteration(
        &self,
        iteration: usize,
        seeds: SeedManager,
    ) -> Result<IterationOutcome, crate::analysis::AnalysisError> {
        let is_baseline = self.opts.baseline && iteration == 0;
        let sample = match self.policy {
            Some(policy) if !is_baseline => {
                let mut rng = seeds.rng(&[&POLICY_SAMPLE, &iteration]);
                policy.apply(self.network, &mut rng)
            }
            _ => FailureSample::default(),
        };
        log::trace!(
            "iteration {iteration}: {} nodes and {} links excluded",
            sample.excluded_nodes.len(),
            sample.excluded_links.len()
        );
        let view = NetworkView::from_excluded_sets(
            self.network,
            sample.excluded_nodes.iter().cloned(),
            sample.excluded_links.iter().cloned(),
        );
        let ctx = IterationContext {
            iteration,
            is_baseline,
            seeds,
        };
        let records = self.analyzer.analyze(&view, &ctx)?;
        Ok(IterationOutcome {
            is_baseline,
            sample,
            records,
        })
    }
}

/// Errors that prevent or abort an engine run.
#[derive(Debug, thiserror::Error)]
pub enum FailureManagerError {
    /// Invalid policy or analyzer parameters; the engine never started.
    #[error("invalid analysis inputs")]
    Validation(#[from] ValidationError),

    /// The worker pool could not be created.
    #[error("failed to build the worker pool")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}
