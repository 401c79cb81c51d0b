//! Declarative failure policies: condition matching, rule sampling, and
//! weighted mode composition.

pub mod conditions;
pub mod policy;

pub use conditions::{evaluate_condition, evaluate_conditions, ConditionOp, FailureCondition, RuleLogic};
pub use policy::{
    EntityScope, FailureMode, FailurePolicy, FailureRule, FailureSample, PolicyError, RuleType,
};
