//! Condition primitives shared by failure rules.
//!
//! Conditions are evaluated against a flat attribute mapping for an entity;
//! callers build that mapping by merging an entity's top-level fields with
//! its free-form `attrs` (top level wins on collision).

use serde_json::Value;

use crate::network::AttrMap;

/// A comparison operator over an entity attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ConditionOp {
    /// Value equality. A missing attribute equals `null`.
    #[serde(rename = "==")]
    Eq,
    /// Value inequality.
    #[serde(rename = "!=")]
    Ne,
    /// Numeric less-than; false when either side is missing or non-numeric.
    #[serde(rename = "<")]
    Lt,
    /// Numeric less-or-equal.
    #[serde(rename = "<=")]
    Le,
    /// Numeric greater-than.
    #[serde(rename = ">")]
    Gt,
    /// Numeric greater-or-equal.
    #[serde(rename = ">=")]
    Ge,
    /// Substring or array membership.
    #[serde(rename = "contains")]
    Contains,
    /// Negation of `contains`; true when the attribute is absent.
    #[serde(rename = "not_contains")]
    NotContains,
    /// True iff the attribute key exists.
    #[serde(rename = "any_value")]
    AnyValue,
    /// True iff the key is missing or its value is null.
    #[serde(rename = "no_value")]
    NoValue,
}

/// How a rule combines its conditions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleLogic {
    /// Every condition must pass. Vacuously true with no conditions.
    #[default]
    And,
    /// At least one condition must pass.
    Or,
}

/// A single condition over an entity attribute.
#[derive(Debug, Clone, PartialEq, derive_new::new, serde::Serialize, serde::Deserialize)]
pub struct FailureCondition {
    /// The attribute name to inspect.
    pub attr: String,
    /// The comparison operator.
    pub operator: ConditionOp,
    /// The right-hand operand; unused for `any_value`/`no_value`.
    #[serde(default)]
    pub value: Value,
}

/// Evaluates a single condition against a flat attribute mapping.
pub fn evaluate_condition(attrs: &AttrMap, cond: &FailureCondition) -> bool {
    let has_attr = attrs.contains_key(&cond.attr);
    let derived = attrs.get(&cond.attr).unwrap_or(&Value::Null);
    match cond.operator {
        ConditionOp::Eq => derived == &cond.value,
        ConditionOp::Ne => derived != &cond.value,
        ConditionOp::Lt => numeric(derived, &cond.value).map_or(false, |(a, b)| a < b),
        ConditionOp::Le => numeric(derived, &cond.value).map_or(false, |(a, b)| a <= b),
        ConditionOp::Gt => numeric(derived, &cond.value).map_or(false, |(a, b)| a > b),
        ConditionOp::Ge => numeric(derived, &cond.value).map_or(false, |(a, b)| a >= b),
        ConditionOp::Contains => contains(derived, &cond.value).unwrap_or(false),
        ConditionOp::NotContains => {
            if derived.is_null() {
                true
            } else {
                !contains(derived, &cond.value).unwrap_or(false)
            }
        }
        ConditionOp::AnyValue => has_attr,
        ConditionOp::NoValue => !has_attr || derived.is_null(),
    }
}

/// Evaluates a condition list with the given logic.
pub fn evaluate_conditions(attrs: &AttrMap, conds: &[FailureCondition], logic: RuleLogic) -> bool {
    match logic {
        RuleLogic::And => conds.iter().all(|c| evaluate_condition(attrs, c)),
        RuleLogic::Or => conds.iter().any(|c| evaluate_condition(attrs, c)),
    }
}

fn numeric(a: &Value, b: &Value) -> Option<(f64, f64)> {
    Some((a.as_f64()?, b.as_f64()?))
}

fn contains(derived: &Value, needle: &Value) -> Option<bool> {
    match derived {
        Value::String(s) => needle.as_str().map(|n| s.contains(n)),
        Value::Array(items) => Some(items.contains(needle)),
        _ => None,
    }
}
