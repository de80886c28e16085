use crate::domain::template::{ConditionalSettings, OutputPort};
use crate::types::FactSet;
use crate::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single routing rule on a conditional node
///
/// Rules compare one named fact (a form field value or a prior approval
/// decision) and name the output port chosen when they match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionRule {
    /// Name of the fact to compare
    pub fact: String,

    /// Comparison applied to the fact value
    pub comparison: Comparison,

    /// Output port chosen when the comparison holds
    pub port: String,
}

/// Supported comparisons against a named fact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum Comparison {
    /// The fact equals the given value
    Equals(Value),
    /// The fact is a number strictly greater than the limit
    GreaterThan(f64),
    /// The fact is a number greater than or equal to the limit
    GreaterOrEqual(f64),
    /// The fact is a number strictly less than the limit
    LessThan(f64),
    /// The fact is a number less than or equal to the limit
    LessOrEqual(f64),
    /// The fact is one of the given values
    OneOf(Vec<Value>),
    /// The fact is present and truthy
    IsTruthy,
}

/// Evaluate a conditional node's rules against the accumulated fact set
///
/// Rules are evaluated in declared order and the first match wins; the
/// declared default port is chosen when no rule matches. Pure and
/// deterministic: the same rules and facts always select the same port.
/// With no match and no default port the caller gets `NoMatchingEdge` and
/// must leave the instance parked rather than guess.
pub fn evaluate_rules(
    settings: &ConditionalSettings,
    facts: &FactSet,
) -> Result<OutputPort, EngineError> {
    for rule in &settings.rules {
        if rule_matches(rule, facts) {
            return Ok(OutputPort::Rule(rule.port.clone()));
        }
    }

    if let Some(default_port) = &settings.default_port {
        return Ok(OutputPort::Rule(default_port.clone()));
    }

    Err(EngineError::NoMatchingEdge(
        "no conditional rule matched and no default port is declared".to_string(),
    ))
}

/// Check one rule against the fact set
///
/// A missing fact, or a non-numeric fact under a numeric comparison, simply
/// fails the rule; evaluation continues with the next rule.
fn rule_matches(rule: &ConditionRule, facts: &FactSet) -> bool {
    let fact = facts.get(&rule.fact);

    match &rule.comparison {
        Comparison::Equals(expected) => fact == Some(expected),
        Comparison::GreaterThan(limit) => fact_as_f64(fact).is_some_and(|n| n > *limit),
        Comparison::GreaterOrEqual(limit) => fact_as_f64(fact).is_some_and(|n| n >= *limit),
        Comparison::LessThan(limit) => fact_as_f64(fact).is_some_and(|n| n < *limit),
        Comparison::LessOrEqual(limit) => fact_as_f64(fact).is_some_and(|n| n <= *limit),
        Comparison::OneOf(values) => fact.is_some_and(|value| values.contains(value)),
        Comparison::IsTruthy => fact.is_some_and(is_truthy),
    }
}

fn fact_as_f64(fact: Option<&Value>) -> Option<f64> {
    fact.and_then(Value::as_f64)
}

/// Boolean interpretation of a fact value
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
