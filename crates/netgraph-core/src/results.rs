//! Aggregation of per-iteration records into envelopes, failure-pattern
//! bookkeeping, and the JSON results artifact.
//!
//! Aggregation is order-insensitive: envelopes keep frequency histograms and
//! derive statistics from them in the `Σ v·c / Σ c` form, so final results
//! are identical no matter how iterations interleave across workers.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use itertools::Itertools;
use ordered_float::OrderedFloat;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::analysis::{EdgesKind, FlowRecord, Metric, RecordStats};
use crate::failure::FailureSample;
use crate::network::view::FlowMode;

/// A frequency histogram over exact metric values. Values are never
/// re-quantized; the float produced by the algorithm is the key.
pub type Frequencies = BTreeMap<OrderedFloat<f64>, u64>;

/// Summary statistics derived from a histogram. `stdev` is the population
/// standard deviation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HistogramStats {
    /// Smallest observed value.
    pub min: f64,
    /// Largest observed value.
    pub max: f64,
    /// Mean of the distribution.
    pub mean: f64,
    /// Population standard deviation.
    pub stdev: f64,
}

pub(crate) fn histogram_stats(frequencies: &Frequencies) -> HistogramStats {
    let total: u64 = frequencies.values().sum();
    if total == 0 {
        return HistogramStats::default();
    }
    let n = total as f64;
    let mean = frequencies
        .iter()
        .map(|(v, &c)| v.into_inner() * c as f64)
        .sum::<f64>()
        / n;
    let variance = frequencies
        .iter()
        .map(|(v, &c)| {
            let d = v.into_inner() - mean;
            d * d * c as f64
        })
        .sum::<f64>()
        / n;
    // CORRECTNESS: a non-empty BTreeMap has first and last keys.
    let min = frequencies.keys().next().unwrap().into_inner();
    let max = frequencies.keys().next_back().unwrap().into_inner();
    HistogramStats {
        min,
        max,
        mean,
        stdev: variance.sqrt(),
    }
}

/// Per-cost-level statistics inside [`FlowSummaryStats`].
#[derive(Debug, Clone)]
pub struct CostLevelStats {
    /// Summary over the per-iteration volumes at this cost level.
    pub stats: HistogramStats,
    /// Number of iterations contributing to this level.
    pub total_samples: u64,
    /// Histogram of per-iteration volumes at this level.
    pub frequencies: Frequencies,
}

/// Aggregated flow details for one envelope.
#[derive(Debug, Clone, Default)]
pub struct FlowSummaryStats {
    /// Number of records that carried details.
    pub total_flow_summaries: u64,
    /// Volume statistics keyed by path cost.
    pub cost_distribution_stats: BTreeMap<OrderedFloat<f64>, CostLevelStats>,
    /// How often each link appeared in a min cut, keyed by link id.
    pub min_cut_frequencies: BTreeMap<String, u64>,
    /// How often each link carried placed traffic, keyed by link id.
    pub edge_usage_frequencies: BTreeMap<String, u64>,
}

/// Empirical distribution of max-flow values for one source→sink pair.
#[derive(Debug, Clone)]
pub struct CapacityEnvelope {
    /// Source label.
    pub source: String,
    /// Sink label.
    pub sink: String,
    /// The flow mode the analysis ran in.
    pub mode: FlowMode,
    /// Number of iterations aggregated.
    pub total_samples: u64,
    /// Histogram of observed capacities.
    pub frequencies: Frequencies,
    /// Derived summary statistics.
    pub stats: HistogramStats,
    /// Aggregated flow details, when the analyzer produced them.
    pub flow_summary_stats: Option<FlowSummaryStats>,
}

/// Empirical distribution of placement ratios for one
/// (source, sink, priority) demand key.
#[derive(Debug, Clone)]
pub struct PlacementEnvelope {
    /// Source label.
    pub source: String,
    /// Sink label.
    pub sink: String,
    /// Demand priority class.
    pub priority: i64,
    /// Number of iterations aggregated.
    pub total_samples: u64,
    /// Histogram of observed ratios.
    pub frequencies: Frequencies,
    /// Derived summary statistics.
    pub stats: HistogramStats,
    /// Aggregated flow details, when the analyzer produced them.
    pub flow_summary_stats: Option<FlowSummaryStats>,
}

/// One distinct failure pattern and how often it was sampled.
#[derive(Debug, Clone)]
pub struct FailurePatternRecord {
    /// Excluded node names, sorted.
    pub excluded_nodes: Vec<String>,
    /// Excluded link ids, sorted.
    pub excluded_links: Vec<String>,
    /// Iterations that sampled exactly this pattern.
    pub count: u64,
    /// Whether any of those iterations was the baseline.
    pub is_baseline: bool,
    /// Per-pair capacities from the first iteration with this pattern.
    pub capacity_matrix: BTreeMap<String, f64>,
}

/// Coarse classification of a failure pattern, the interface consumed by
/// the external failure-mode distribution checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternClass {
    /// Nothing excluded.
    Baseline,
    /// Exactly one node excluded.
    NodeOnly,
    /// Exactly one link excluded.
    LinkOnly,
    /// Anything larger: risk-group or combined failures.
    RgRelated,
}

impl PatternClass {
    /// The serialized class name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::NodeOnly => "node_only",
            Self::LinkOnly => "link_only",
            Self::RgRelated => "rg_related",
        }
    }
}

/// Classifies a pattern by the cardinality of its exclusions.
pub fn classify_pattern(record: &FailurePatternRecord) -> PatternClass {
    match (record.excluded_nodes.len(), record.excluded_links.len()) {
        (0, 0) => PatternClass::Baseline,
        (1, 0) => PatternClass::NodeOnly,
        (0, 1) => PatternClass::LinkOnly,
        _ => PatternClass::RgRelated,
    }
}

/// Canonical hash of a failure pattern: SHA-256 over the sorted excluded
/// identifier lists, truncated to 16 hex characters.
pub fn pattern_hash(sample: &FailureSample) -> String {
    let input = format!(
        "nodes:{}|links:{}",
        sample.excluded_nodes.iter().join(","),
        sample.excluded_links.iter().join(","),
    );
    let digest = Sha256::digest(input.as_bytes());
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

/// Run-level metadata attached to every analysis result.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AnalysisMetadata {
    /// Requested iteration count.
    pub iterations: usize,
    /// Whether iteration 0 was a no-failure baseline.
    pub baseline: bool,
    /// Worker pool size.
    pub parallelism: usize,
    /// Master seed, if the run was seeded.
    pub seed: Option<u64>,
}

/// The error descriptor surfaced alongside partial results when an
/// iteration fails mid-run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct IterationFailure {
    /// The failing iteration.
    pub iteration: usize,
    /// The iteration's derived policy seed, if the run was seeded.
    pub seed: Option<u64>,
    /// Error kind (`"analysis"` or `"resource"`).
    pub kind: String,
    /// Human-readable message.
    pub message: String,
}

/// The complete output of one engine run.
#[derive(Debug, Clone)]
pub struct FailureAnalysis {
    /// Capacity envelopes keyed `"<src>-><dst>"`.
    pub capacity_envelopes: BTreeMap<String, CapacityEnvelope>,
    /// Placement envelopes keyed `"<src>-><dst>|prio=<p>"`.
    pub placement_envelopes: BTreeMap<String, PlacementEnvelope>,
    /// Distinct failure patterns keyed by [`pattern_hash`], when pattern
    /// storage was requested.
    pub failure_patterns: Option<BTreeMap<String, FailurePatternRecord>>,
    /// Run-level metadata.
    pub metadata: AnalysisMetadata,
    /// Set when the run aborted mid-way; envelopes then hold the partial
    /// aggregation accumulated before the failure.
    pub error: Option<IterationFailure>,
}

// ---------------------------------------------------------------------------
// Accumulation

#[derive(Debug, Default)]
struct EnvelopeAccumulator {
    total_samples: u64,
    frequencies: Frequencies,
    stats: Option<FlowSummaryStats>,
}

impl EnvelopeAccumulator {
    fn observe(&mut self, value: f64, stats: Option<&RecordStats>) {
        self.total_samples += 1;
        *self.frequencies.entry(OrderedFloat(value)).or_insert(0) += 1;
        if let Some(record_stats) = stats {
            observe_stats(self.stats.get_or_insert_with(Default::default), record_stats);
        }
    }
}

fn observe_stats(acc: &mut FlowSummaryStats, stats: &RecordStats) {
    acc.total_flow_summaries += 1;
    for (&cost, &volume) in &stats.cost_distribution {
        *acc.cost_distribution_stats
            .entry(cost)
            .or_insert_with(|| CostLevelStats {
                stats: HistogramStats::default(),
                total_samples: 0,
                frequencies: Frequencies::new(),
            })
            .frequencies
            .entry(OrderedFloat(volume))
            .or_insert(0) += 1;
    }
    let target = match stats.edges_kind {
        EdgesKind::MinCut => &mut acc.min_cut_frequencies,
        EdgesKind::Used => &mut acc.edge_usage_frequencies,
    };
    for edge in &stats.edges {
        *target.entry(edge.clone()).or_insert(0) += 1;
    }
}

fn finalize_stats(mut acc: FlowSummaryStats) -> FlowSummaryStats {
    for level in acc.cost_distribution_stats.values_mut() {
        level.total_samples = level.frequencies.values().sum();
        level.stats = histogram_stats(&level.frequencies);
    }
    acc
}

/// Folds iteration outcomes into envelope and pattern state. Single-writer:
/// the engine drains the record channel into one aggregator.
#[derive(Debug)]
pub(crate) struct Aggregator {
    capacity: BTreeMap<(String, String), EnvelopeAccumulator>,
    placement: BTreeMap<(String, String, i64), EnvelopeAccumulator>,
    patterns: Option<BTreeMap<String, FailurePatternRecord>>,
}

impl Aggregator {
    pub(crate) fn new(store_patterns: bool) -> Self {
        Self {
            capacity: BTreeMap::new(),
            placement: BTreeMap::new(),
            patterns: store_patterns.then(BTreeMap::new),
        }
    }

    pub(crate) fn fold(
        &mut self,
        is_baseline: bool,
        sample: &FailureSample,
        records: Vec<FlowRecord>,
    ) {
        if let Some(patterns) = &mut self.patterns {
            let hash = pattern_hash(sample);
            let entry = patterns.entry(hash).or_insert_with(|| FailurePatternRecord {
                excluded_nodes: sample.excluded_nodes.iter().cloned().collect(),
                excluded_links: sample.excluded_links.iter().cloned().collect(),
                count: 0,
                is_baseline: false,
                capacity_matrix: records
                    .iter()
                    .filter(|r| r.metric == Metric::Capacity)
                    .map(|r| (format!("{}->{}", r.src, r.dst), r.value))
                    .collect(),
            });
            entry.count += 1;
            entry.is_baseline |= is_baseline;
        }
        for record in records {
            match record.metric {
                Metric::Capacity => {
                    self.capacity
                        .entry((record.src, record.dst))
                        .or_default()
                        .observe(record.value, record.stats.as_ref());
                }
                Metric::PlacementRatio => {
                    let priority = record.priority.unwrap_or(0);
                    self.placement
                        .entry((record.src, record.dst, priority))
                        .or_default()
                        .observe(record.value, record.stats.as_ref());
                }
            }
        }
    }

    pub(crate) fn finalize(
        self,
        mode: FlowMode,
        metadata: AnalysisMetadata,
        error: Option<IterationFailure>,
    ) -> FailureAnalysis {
        let capacity_envelopes = self
            .capacity
            .into_iter()
            .map(|((source, sink), acc)| {
                let key = format!("{source}->{sink}");
                let envelope = CapacityEnvelope {
                    source,
                    sink,
                    mode,
                    total_samples: acc.total_samples,
                    stats: histogram_stats(&acc.frequencies),
                    frequencies: acc.frequencies,
                    flow_summary_stats: acc.stats.map(finalize_stats),
                };
                (key, envelope)
            })
            .collect();
        let placement_envelopes = self
            .placement
            .into_iter()
            .map(|((source, sink, priority), acc)| {
                let key = format!("{source}->{sink}|prio={priority}");
                let envelope = PlacementEnvelope {
                    source,
                    sink,
                    priority,
                    total_samples: acc.total_samples,
                    stats: histogram_stats(&acc.frequencies),
                    frequencies: acc.frequencies,
                    flow_summary_stats: acc.stats.map(finalize_stats),
                };
                (key, envelope)
            })
            .collect();
        FailureAnalysis {
            capacity_envelopes,
            placement_envelopes,
            failure_patterns: self.patterns,
            metadata,
            error,
        }
    }
}

// ---------------------------------------------------------------------------
// JSON serialization

/// Canonical string form of a float key: Rust's shortest-roundtrip display.
fn float_key(value: f64) -> String {
    format!("{value}")
}

fn frequencies_json(frequencies: &Frequencies) -> Value {
    let mut map = Map::new();
    for (value, &count) in frequencies {
        map.insert(float_key(value.into_inner()), json!(count));
    }
    Value::Object(map)
}

fn summary_stats_json(stats: &FlowSummaryStats) -> Value {
    let mut cost_stats = Map::new();
    for (cost, level) in &stats.cost_distribution_stats {
        cost_stats.insert(
            float_key(cost.into_inner()),
            json!({
                "min": level.stats.min,
                "mean": level.stats.mean,
                "max": level.stats.max,
                "total_samples": level.total_samples,
                "frequencies": frequencies_json(&level.frequencies),
            }),
        );
    }
    json!({
        "total_flow_summaries": stats.total_flow_summaries,
        "cost_distribution_stats": Value::Object(cost_stats),
        "min_cut_frequencies": stats.min_cut_frequencies,
        "edge_usage_frequencies": stats.edge_usage_frequencies,
    })
}

impl CapacityEnvelope {
    /// JSON form used by the results artifact.
    pub fn to_json(&self) -> Value {
        let mut obj = json!({
            "source": self.source,
            "sink": self.sink,
            "mode": self.mode.as_str(),
            "total_samples": self.total_samples,
            "frequencies": frequencies_json(&self.frequencies),
            "min": self.stats.min,
            "max": self.stats.max,
            "mean": self.stats.mean,
            "stdev": self.stats.stdev,
        });
        if let Some(stats) = &self.flow_summary_stats {
            obj["flow_summary_stats"] = summary_stats_json(stats);
        }
        obj
    }
}

impl PlacementEnvelope {
    /// JSON form used by the results artifact.
    pub fn to_json(&self) -> Value {
        let mut obj = json!({
            "src": self.source,
            "dst": self.sink,
            "priority": self.priority,
            "total_samples": self.total_samples,
            "frequencies": frequencies_json(&self.frequencies),
            "min": self.stats.min,
            "max": self.stats.max,
            "mean": self.stats.mean,
            "stdev": self.stats.stdev,
        });
        if let Some(stats) = &self.flow_summary_stats {
            obj["flow_summary_stats"] = summary_stats_json(stats);
        }
        obj
    }
}

impl FailurePatternRecord {
    /// JSON form used by the results artifact.
    pub fn to_json(&self) -> Value {
        let mut obj = json!({
            "excluded_nodes": self.excluded_nodes,
            "excluded_links": self.excluded_links,
            "count": self.count,
            "is_baseline": self.is_baseline,
        });
        if !self.capacity_matrix.is_empty() {
            obj["capacity_matrix"] = json!(self.capacity_matrix);
        }
        obj
    }
}

impl FailureAnalysis {
    /// JSON form of one analysis step's results.
    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        if !self.capacity_envelopes.is_empty() {
            let envelopes: Map<String, Value> = self
                .capacity_envelopes
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect();
            obj.insert("capacity_envelopes".to_owned(), Value::Object(envelopes));
        }
        if !self.placement_envelopes.is_empty() {
            let envelopes: Map<String, Value> = self
                .placement_envelopes
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect();
            obj.insert("placement_envelopes".to_owned(), Value::Object(envelopes));
        }
        if let Some(patterns) = &self.failure_patterns {
            let patterns: Map<String, Value> = patterns
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect();
            obj.insert(
                "failure_pattern_results".to_owned(),
                Value::Object(patterns),
            );
        }
        obj.insert(
            "metadata".to_owned(),
            serde_json::to_value(&self.metadata).unwrap_or(Value::Null),
        );
        if let Some(error) = &self.error {
            obj.insert(
                "error".to_owned(),
                serde_json::to_value(error).unwrap_or(Value::Null),
            );
        }
        Value::Object(obj)
    }
}

/// Metadata for one workflow step.
#[derive(Debug, Clone, derive_new::new, serde::Serialize)]
pub struct WorkflowStepMetadata {
    /// The analysis kind (e.g. `"CapacityEnvelopeAnalysis"`).
    pub step_type: String,
    /// The step's instance name.
    pub step_name: String,
    /// Zero-based execution order.
    pub execution_order: usize,
}

/// Accumulates analysis steps into the persisted `results.json` tree.
#[derive(Debug, Default)]
pub struct Results {
    workflow: BTreeMap<String, WorkflowStepMetadata>,
    steps: Vec<(String, Value)>,
}

impl Results {
    /// Creates an empty results store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one analysis step under `step_name`.
    pub fn add_step(&mut self, step_name: &str, step_type: &str, analysis: &FailureAnalysis) {
        let order = self.workflow.len();
        self.workflow.insert(
            step_name.to_owned(),
            WorkflowStepMetadata::new(step_type.to_owned(), step_name.to_owned(), order),
        );
        self.steps.push((step_name.to_owned(), analysis.to_json()));
    }

    /// The full results tree.
    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        let workflow: Map<String, Value> = self
            .workflow
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::to_value(v).unwrap_or(Value::Null)))
            .collect();
        obj.insert("workflow".to_owned(), Value::Object(workflow));
        for (name, step) in &self.steps {
            obj.insert(name.clone(), step.clone());
        }
        Value::Object(obj)
    }

    /// Writes the results tree to a `results.json` file.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ResultsError> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), &self.to_json())?;
        Ok(())
    }
}

/// Errors writing the results artifact.
#[derive(Debug, thiserror::Error)]
pub enum ResultsError {
    /// Filesystem error.
    #[error("failed to write results file")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("failed to serialize results")]
    Json(#[from] serde_json::Error),
}
