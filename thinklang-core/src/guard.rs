//! Guard rules evaluated against AI-call results

use crate::{ThinkError, ThinkResult};
use serde_json::Value;
use std::sync::Arc;

/// A guard's constraint operand.
#[derive(Clone)]
pub enum GuardConstraint {
    Number(f64),
    Str(String),
    StrList(Vec<String>),
    Predicate(Arc<dyn Fn(&Value) -> bool + Send + Sync>),
}

impl GuardConstraint {
    fn describe(&self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Str(s) => format!("{:?}", s),
            Self::StrList(items) => format!("{:?}", items),
            Self::Predicate(_) => "<predicate>".to_string(),
        }
    }
}

impl std::fmt::Debug for GuardConstraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GuardConstraint({})", self.describe())
    }
}

/// A single post-call guard rule.
#[derive(Debug, Clone)]
pub struct GuardRule {
    pub name: String,
    pub constraint: GuardConstraint,
    pub range_end: Option<f64>,
}

impl GuardRule {
    pub fn length(min: f64, max: f64) -> Self {
        Self {
            name: "length".to_string(),
            constraint: GuardConstraint::Number(min),
            range_end: Some(max),
        }
    }

    pub fn contains_none(forbidden: Vec<String>) -> Self {
        Self {
            name: "contains_none".to_string(),
            constraint: GuardConstraint::StrList(forbidden),
            range_end: None,
        }
    }

    pub fn passes(predicate: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        Self {
            name: "passes".to_string(),
            constraint: GuardConstraint::Predicate(Arc::new(predicate)),
            range_end: None,
        }
    }

    pub fn range(name: impl Into<String>, lo: f64, hi: f64) -> Self {
        Self {
            name: name.into(),
            constraint: GuardConstraint::Number(lo),
            range_end: Some(hi),
        }
    }

    /// Evaluate this rule against a result value.
    pub fn evaluate(&self, value: &Value) -> ThinkResult<()> {
        let ok = match (self.name.as_str(), &self.constraint) {
            ("length", GuardConstraint::Number(min)) => {
                let len = string_length(value) as f64;
                len >= *min && self.range_end.map_or(true, |max| len <= max)
            }
            ("contains_none", constraint) => {
                let haystack = stringify(value);
                let forbidden: Vec<&str> = match constraint {
                    GuardConstraint::Str(s) => vec![s.as_str()],
                    GuardConstraint::StrList(items) => items.iter().map(|s| s.as_str()).collect(),
                    _ => Vec::new(),
                };
                !forbidden.iter().any(|needle| haystack.contains(needle))
            }
            ("passes", GuardConstraint::Predicate(predicate)) => {
                let predicate = predicate.clone();
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| predicate(value)))
                    .unwrap_or(false)
            }
            (_, GuardConstraint::Number(lo)) if self.range_end.is_some() => match value.as_f64() {
                Some(n) => n >= *lo && n <= self.range_end.unwrap_or(f64::INFINITY),
                None => false,
            },
            _ => false,
        };

        if ok {
            Ok(())
        } else {
            Err(ThinkError::GuardFailed {
                guard_name: self.name.clone(),
                value: guard_failure_value(&self.name, value),
                constraint: self.describe_constraint(),
            })
        }
    }

    fn describe_constraint(&self) -> String {
        match self.range_end {
            Some(end) => format!("{}..{}", self.constraint.describe(), end),
            None => self.constraint.describe(),
        }
    }
}

/// The first failing rule short-circuits.
pub fn check_guards(rules: &[GuardRule], value: &Value) -> ThinkResult<()> {
    for rule in rules {
        rule.evaluate(value)?;
    }
    Ok(())
}

fn string_length(value: &Value) -> usize {
    match value {
        Value::String(s) => s.chars().count(),
        other => other.to_string().chars().count(),
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The `length` guard reports the measured length, not the raw payload;
/// other guards report the payload itself.
fn guard_failure_value(name: &str, value: &Value) -> Value {
    if name == "length" {
        Value::from(string_length(value) as u64)
    } else {
        value.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn length_guard_in_range() {
        let rule = GuardRule::length(1.0, 3.0);
        assert!(rule.evaluate(&json!("ab")).is_ok());
    }

    #[test]
    fn length_guard_reports_actual_length() {
        let rule = GuardRule::length(1.0, 3.0);
        let err = rule.evaluate(&json!("toolong")).unwrap_err();
        match err {
            ThinkError::GuardFailed {
                guard_name, value, ..
            } => {
                assert_eq!(guard_name, "length");
                assert_eq!(value, json!(7));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn contains_none_rejects_forbidden_substring() {
        let rule = GuardRule::contains_none(vec!["spam".to_string(), "junk".to_string()]);
        assert!(rule.evaluate(&json!("clean text")).is_ok());
        assert!(rule.evaluate(&json!("some junk here")).is_err());
    }

    #[test]
    fn passes_guard_runs_predicate() {
        let rule = GuardRule::passes(|v| v.as_i64().map_or(false, |n| n % 2 == 0));
        assert!(rule.evaluate(&json!(4)).is_ok());
        assert!(rule.evaluate(&json!(3)).is_err());
    }

    #[test]
    fn numeric_range_guard() {
        let rule = GuardRule::range("score", 0.0, 1.0);
        assert!(rule.evaluate(&json!(0.5)).is_ok());
        assert!(rule.evaluate(&json!(1.5)).is_err());
        assert!(rule.evaluate(&json!("not a number")).is_err());
    }

    #[test]
    fn first_failure_short_circuits() {
        let rules = vec![
            GuardRule::length(1.0, 2.0),
            GuardRule::contains_none(vec!["x".to_string()]),
        ];
        let err = check_guards(&rules, &json!("xyz")).unwrap_err();
        match err {
            ThinkError::GuardFailed { guard_name, .. } => assert_eq!(guard_name, "length"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
