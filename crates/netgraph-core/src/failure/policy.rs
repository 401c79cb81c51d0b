//! Failure rules, weighted modes, and policy application.

use std::collections::BTreeSet;

use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::Value;

use crate::failure::conditions::{evaluate_conditions, FailureCondition, RuleLogic};
use crate::network::{AttrMap, Link, Network, Node};

/// What kind of entity a rule selects from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityScope {
    /// Rule candidates are nodes.
    Node,
    /// Rule candidates are links.
    Link,
    /// Rule candidates are risk groups, selected as atomic units.
    RiskGroup,
}

/// How a rule samples its matched candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    /// Select every matched entity.
    All,
    /// Select `count` matched entities without replacement, optionally
    /// weighted by a numeric attribute.
    Choice,
    /// Select each matched entity independently with `probability`.
    Random,
}

/// A single selection rule over nodes, links, or risk groups.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FailureRule {
    /// The candidate entity kind.
    pub entity_scope: EntityScope,
    /// Conditions over flattened entity attributes.
    #[serde(default)]
    pub conditions: Vec<FailureCondition>,
    /// How conditions combine.
    #[serde(default)]
    pub logic: RuleLogic,
    /// How the matched set is sampled.
    pub rule_type: RuleType,
    /// Number of picks for `choice` rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    /// Per-entity selection probability for `random` rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probability: Option<f64>,
    /// Numeric attribute to weight `choice` picks by.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_by: Option<String>,
}

/// A weighted bundle of rules. Exactly one mode fires per policy
/// application, drawn with probability proportional to its weight.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FailureMode {
    /// Relative weight of this mode. Must be positive.
    pub weight: f64,
    /// The rules applied when this mode fires.
    pub rules: Vec<FailureRule>,
}

/// An ordered list of weighted failure modes.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct FailurePolicy {
    /// The policy's modes. An empty list fails nothing.
    #[serde(default)]
    pub modes: Vec<FailureMode>,
}

/// One sampled failure pattern: the excluded node and link identifiers.
/// Sorted sets keep downstream hashing and serialization canonical.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureSample {
    /// Names of the excluded nodes.
    pub excluded_nodes: BTreeSet<String>,
    /// Ids of the excluded links.
    pub excluded_links: BTreeSet<String>,
}

impl FailureSample {
    /// Whether the sample excludes nothing.
    pub fn is_empty(&self) -> bool {
        self.excluded_nodes.is_empty() && self.excluded_links.is_empty()
    }
}

impl FailurePolicy {
    /// Checks the policy for structural errors before any sampling happens.
    pub fn validate(&self) -> Result<(), PolicyError> {
        for (index, mode) in self.modes.iter().enumerate() {
            if !(mode.weight > 0.0) || !mode.weight.is_finite() {
                return Err(PolicyError::NonPositiveWeight {
                    mode: index,
                    weight: mode.weight,
                });
            }
            for rule in &mode.rules {
                match rule.rule_type {
                    RuleType::Choice if rule.count.is_none() => {
                        return Err(PolicyError::MissingCount { mode: index });
                    }
                    RuleType::Random => match rule.probability {
                        None => return Err(PolicyError::MissingProbability { mode: index }),
                        Some(p) if !(0.0..=1.0).contains(&p) => {
                            return Err(PolicyError::InvalidProbability {
                                mode: index,
                                probability: p,
                            });
                        }
                        Some(_) => {}
                    },
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Samples one failure pattern from the network.
    ///
    /// All randomness flows through `rng`; callers seed it per iteration via
    /// the [`SeedManager`](crate::seed::SeedManager) for reproducibility.
    /// The policy must have passed [`FailurePolicy::validate`]; applying one
    /// with invalid mode weights panics.
    pub fn apply(&self, network: &Network, rng: &mut impl Rng) -> FailureSample {
        let mut sample = FailureSample::default();
        if self.modes.is_empty() {
            return sample;
        }
        let mode_index = self.sample_mode(rng);
        log::debug!("failure policy fired mode {mode_index}");
        for rule in &self.modes[mode_index].rules {
            let matched = match_candidates(network, rule);
            let selected = sample_rule(rule, matched, rng);
            match rule.entity_scope {
                EntityScope::Node => sample.excluded_nodes.extend(selected),
                EntityScope::Link => sample.excluded_links.extend(selected),
                EntityScope::RiskGroup => {
                    for group in selected {
                        let (nodes, links) = network.risk_group_members(&group);
                        sample
                            .excluded_nodes
                            .extend(nodes.into_iter().map(|n| n.name.clone()));
                        sample
                            .excluded_links
                            .extend(links.into_iter().map(|l| l.id.clone()));
                    }
                }
            }
        }
        sample
    }

    /// Draws a mode index proportionally to the mode weights.
    fn sample_mode(&self, rng: &mut impl Rng) -> usize {
        // CORRECTNESS: `validate` rejects non-positive and non-finite
        // weights, and `apply` returns before sampling with no modes.
        let weights = WeightedIndex::new(self.modes.iter().map(|m| m.weight)).unwrap();
        weights.sample(rng)
    }
}

/// Flattened attributes of a node: free-form attrs merged with the
/// top-level fields, top level winning on collision.
fn flatten_node(node: &Node) -> AttrMap {
    let mut attrs = node.attrs.clone();
    attrs.insert("name".to_owned(), Value::from(node.name.clone()));
    attrs.insert("disabled".to_owned(), Value::from(node.disabled));
    attrs.insert("risk_groups".to_owned(), tag_array(&node.risk_groups));
    attrs
}

fn flatten_link(link: &Link) -> AttrMap {
    let mut attrs = link.attrs.clone();
    attrs.insert("id".to_owned(), Value::from(link.id.clone()));
    attrs.insert("source".to_owned(), Value::from(link.source.clone()));
    attrs.insert("target".to_owned(), Value::from(link.target.clone()));
    attrs.insert("capacity".to_owned(), Value::from(link.capacity));
    attrs.insert("cost".to_owned(), Value::from(link.cost));
    attrs.insert("disabled".to_owned(), Value::from(link.disabled));
    attrs.insert("risk_groups".to_owned(), tag_array(&link.risk_groups));
    attrs
}

fn tag_array(tags: &BTreeSet<String>) -> Value {
    Value::Array(tags.iter().cloned().map(Value::from).collect())
}

/// Synthetic attributes for a risk-group candidate: the flattened attrs of
/// the first tagged entity (nodes scanned before links), with the group name
/// on top.
fn risk_group_attrs(network: &Network, group: &str) -> AttrMap {
    let (nodes, links) = network.risk_group_members(group);
    let mut attrs = nodes
        .first()
        .map(|n| flatten_node(n))
        .or_else(|| links.first().map(|l| flatten_link(l)))
        .unwrap_or_default();
    attrs.insert("name".to_owned(), Value::from(group.to_owned()));
    attrs
}

/// Builds the matched candidate list for a rule: `(id, flattened attrs)` in
/// network insertion order, filtered by the rule's conditions.
fn match_candidates(network: &Network, rule: &FailureRule) -> Vec<(String, AttrMap)> {
    let candidates: Vec<(String, AttrMap)> = match rule.entity_scope {
        EntityScope::Node => network
            .nodes()
            .map(|n| (n.name.clone(), flatten_node(n)))
            .collect(),
        EntityScope::Link => network
            .links()
            .map(|l| (l.id.clone(), flatten_link(l)))
            .collect(),
        EntityScope::RiskGroup => network
            .risk_group_names()
            .into_iter()
            .map(|g| {
                let attrs = risk_group_attrs(network, &g);
                (g, attrs)
            })
            .collect(),
    };
    candidates
        .into_iter()
        .filter(|(_, attrs)| evaluate_conditions(attrs, &rule.conditions, rule.logic))
        .collect()
}

/// Samples the matched set according to the rule type.
fn sample_rule(
    rule: &FailureRule,
    matched: Vec<(String, AttrMap)>,
    rng: &mut impl Rng,
) -> Vec<String> {
    match rule.rule_type {
        RuleType::All => matched.into_iter().map(|(id, _)| id).collect(),
        RuleType::Choice => {
            // Validation guarantees `count` is present.
            let count = rule.count.unwrap_or(0);
            if count >= matched.len() {
                return matched.into_iter().map(|(id, _)| id).collect();
            }
            match &rule.weight_by {
                Some(attr) => weighted_without_replacement(matched, attr, count, rng),
                None => {
                    let picks = rand::seq::index::sample(rng, matched.len(), count);
                    picks
                        .into_iter()
                        .map(|i| matched[i].0.clone())
                        .collect()
                }
            }
        }
        RuleType::Random => {
            let p = rule.probability.unwrap_or(0.0);
            matched
                .into_iter()
                .filter(|_| rng.gen::<f64>() < p)
                .map(|(id, _)| id)
                .collect()
        }
    }
}

/// Draws `count` entities without replacement, weighted by a numeric
/// attribute. Missing or non-numeric weights count as zero; when no positive
/// weight remains, the draw falls back to uniform.
fn weighted_without_replacement(
    matched: Vec<(String, AttrMap)>,
    weight_by: &str,
    count: usize,
    rng: &mut impl Rng,
) -> Vec<String> {
    let weighted: Vec<(String, f64)> = matched
        .into_iter()
        .map(|(id, attrs)| {
            let weight = attrs
                .get(weight_by)
                .and_then(Value::as_f64)
                .unwrap_or(0.0)
                .max(0.0);
            (id, weight)
        })
        .collect();
    let total: f64 = weighted.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        let picks = rand::seq::index::sample(rng, weighted.len(), count);
        return picks.into_iter().map(|i| weighted[i].0.clone()).collect();
    }
    // CORRECTNESS: weights are clamped non-negative and the caller takes
    // the whole matched set when `count` reaches it, so the draw cannot
    // fail.
    weighted
        .choose_multiple_weighted(rng, count, |(_, weight)| *weight)
        .unwrap()
        .map(|(id, _)| id.clone())
        .collect()
}

/// An error type listing the ways a policy can be malformed.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// A mode's weight is zero, negative, or non-finite.
    #[error("mode {mode} has non-positive weight {weight}")]
    NonPositiveWeight {
        /// The mode index.
        mode: usize,
        /// The rejected weight.
        weight: f64,
    },

    /// A `choice` rule has no `count`.
    #[error("'choice' rule in mode {mode} is missing 'count'")]
    MissingCount {
        /// The mode index.
        mode: usize,
    },

    /// A `random` rule has no `probability`.
    #[error("'random' rule in mode {mode} is missing 'probability'")]
    MissingProbability {
        /// The mode index.
        mode: usize,
    },

    /// A `random` rule's probability is outside `[0, 1]`.
    #[error("'random' rule in mode {mode} has probability {probability} outside [0, 1]")]
    InvalidProbability {
        /// The mode index.
        mode: usize,
        /// The rejected probability.
        probability: f64,
    },
}

#[cfg(test)]
mod tests {
    use rand::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::failure::conditions::ConditionOp;
    use crate::testing;

    fn rule(scope: EntityScope, rule_type: RuleType) -> FailureRule {
        FailureRule {
            entity_scope: scope,
            conditions: Vec::new(),
            logic: RuleLogic::And,
            rule_type,
            count: None,
            probability: None,
            weight_by: None,
        }
    }

    fn single_mode(rules: Vec<FailureRule>) -> FailurePolicy {
        FailurePolicy {
            modes: vec![FailureMode { weight: 1.0, rules }],
        }
    }

    #[test]
    fn empty_policy_fails_nothing() -> anyhow::Result<()> {
        let network = testing::clos_2x2()?;
        let policy = FailurePolicy::default();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(policy.apply(&network, &mut rng).is_empty());
        Ok(())
    }

    #[test]
    fn all_rule_selects_every_match() -> anyhow::Result<()> {
        let network = testing::clos_2x2()?;
        let mut r = rule(EntityScope::Node, RuleType::All);
        r.conditions.push(FailureCondition::new(
            "name".to_owned(),
            ConditionOp::Contains,
            json!("S"),
        ));
        let policy = single_mode(vec![r]);
        let mut rng = StdRng::seed_from_u64(1);
        let sample = policy.apply(&network, &mut rng);
        let nodes: Vec<_> = sample.excluded_nodes.iter().cloned().collect();
        assert_eq!(nodes, vec!["S1", "S2"]);
        assert!(sample.excluded_links.is_empty());
        Ok(())
    }

    #[test]
    fn choice_rule_picks_exactly_count() -> anyhow::Result<()> {
        let network = testing::clos_2x2()?;
        let mut r = rule(EntityScope::Link, RuleType::Choice);
        r.count = Some(2);
        let policy = single_mode(vec![r]);
        let mut rng = StdRng::seed_from_u64(3);
        let sample = policy.apply(&network, &mut rng);
        assert_eq!(sample.excluded_links.len(), 2);
        Ok(())
    }

    #[test]
    fn choice_count_beyond_matched_takes_all() -> anyhow::Result<()> {
        let network = testing::clos_2x2()?;
        let mut r = rule(EntityScope::Link, RuleType::Choice);
        r.count = Some(99);
        let policy = single_mode(vec![r]);
        let mut rng = StdRng::seed_from_u64(3);
        let sample = policy.apply(&network, &mut rng);
        assert_eq!(sample.excluded_links.len(), 4);
        Ok(())
    }

    #[test]
    fn weighted_choice_follows_the_weight_attribute() -> anyhow::Result<()> {
        let mut network = crate::network::Network::new();
        network.add_node(crate::network::Node::new("heavy").with_attr("load", 1e9))?;
        network.add_node(crate::network::Node::new("light").with_attr("load", 1e-9))?;
        let mut r = rule(EntityScope::Node, RuleType::Choice);
        r.count = Some(1);
        r.weight_by = Some("load".to_owned());
        let policy = single_mode(vec![r]);
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let sample = policy.apply(&network, &mut rng);
            assert!(sample.excluded_nodes.contains("heavy"));
        }
        Ok(())
    }

    #[test]
    fn random_rule_respects_probability_bounds() -> anyhow::Result<()> {
        let network = testing::clos_2x2()?;
        let mut never = rule(EntityScope::Node, RuleType::Random);
        never.probability = Some(0.0);
        let mut always = rule(EntityScope::Node, RuleType::Random);
        always.probability = Some(1.0);
        let mut rng = StdRng::seed_from_u64(5);
        let sample = single_mode(vec![never]).apply(&network, &mut rng);
        assert!(sample.is_empty());
        let sample = single_mode(vec![always]).apply(&network, &mut rng);
        assert_eq!(sample.excluded_nodes.len(), 4);
        Ok(())
    }

    #[test]
    fn risk_group_selection_expands_to_members() -> anyhow::Result<()> {
        let network = testing::risk_group_fabric()?;
        let policy = single_mode(vec![rule(EntityScope::RiskGroup, RuleType::All)]);
        let mut rng = StdRng::seed_from_u64(7);
        let sample = policy.apply(&network, &mut rng);
        let nodes: Vec<_> = sample.excluded_nodes.iter().cloned().collect();
        assert_eq!(nodes, vec!["L1", "L2"]);
        Ok(())
    }

    #[test]
    fn mode_draw_converges_to_the_weights() -> anyhow::Result<()> {
        let policy = FailurePolicy {
            modes: vec![
                FailureMode {
                    weight: 0.7,
                    rules: vec![rule(EntityScope::Node, RuleType::All)],
                },
                FailureMode {
                    weight: 0.3,
                    rules: Vec::new(),
                },
            ],
        };
        let network = testing::clos_2x2()?;
        let mut rng = StdRng::seed_from_u64(11);
        let runs = 2000;
        let mut first = 0;
        for _ in 0..runs {
            if !policy.apply(&network, &mut rng).is_empty() {
                first += 1;
            }
        }
        let observed = f64::from(first) / f64::from(runs);
        assert!((observed - 0.7).abs() < 0.05, "observed {observed}");
        Ok(())
    }

    #[test]
    fn validation_catches_malformed_rules() {
        let mut p = single_mode(vec![rule(EntityScope::Node, RuleType::Choice)]);
        assert!(matches!(p.validate(), Err(PolicyError::MissingCount { .. })));

        p = single_mode(vec![rule(EntityScope::Node, RuleType::Random)]);
        assert!(matches!(
            p.validate(),
            Err(PolicyError::MissingProbability { .. })
        ));

        let mut r = rule(EntityScope::Node, RuleType::Random);
        r.probability = Some(1.5);
        p = single_mode(vec![r]);
        assert!(matches!(
            p.validate(),
            Err(PolicyError::InvalidProbability { .. })
        ));

        p = single_mode(Vec::new());
        p.modes[0].weight = 0.0;
        assert!(matches!(
            p.validate(),
            Err(PolicyError::NonPositiveWeight { .. })
        ));
    }

    #[test]
    fn policy_deserializes_from_the_documented_shape() -> anyhow::Result<()> {
        let raw = json!({
            "modes": [{
                "weight": 1.0,
                "rules": [{
                    "entity_scope": "node",
                    "logic": "and",
                    "conditions": [{"attr": "name", "operator": "contains", "value": "S"}],
                    "rule_type": "choice",
                    "count": 1
                }]
            }]
        });
        let policy: FailurePolicy = serde_json::from_value(raw)?;
        policy.validate()?;
        assert_eq!(policy.modes.len(), 1);
        assert_eq!(policy.modes[0].rules[0].count, Some(1));
        Ok(())
    }
}
