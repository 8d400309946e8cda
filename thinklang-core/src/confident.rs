//! The `Confident<T>` wrapper type

use crate::{ThinkError, ThinkResult};
use serde::{Deserialize, Serialize};

/// Threshold used when `unwrap`, `or`, or `isConfident` are called without
/// an explicit one.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;

/// A value paired with the model's confidence in it and its reasoning.
///
/// This is the runtime shape of the language's `Confident<T>` type and of
/// any binding produced by an AI-call without an explicit `Confident`
/// annotation (such bindings are *uncertain* and only expose the closed
/// capability set the checker permits).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Confident<T> {
    pub value: T,
    pub confidence: f64,
    pub reasoning: String,
}

impl<T> Confident<T> {
    pub fn new(value: T, confidence: f64, reasoning: impl Into<String>) -> Self {
        Self {
            value,
            confidence: confidence.clamp(0.0, 1.0),
            reasoning: reasoning.into(),
        }
    }

    /// `unwrap(threshold?)` / `expect(threshold)`: take the value if the
    /// confidence clears the threshold, otherwise `ConfidenceTooLow`.
    pub fn checked(self, threshold: f64) -> ThinkResult<T> {
        if self.confidence >= threshold {
            Ok(self.value)
        } else {
            Err(ThinkError::ConfidenceTooLow {
                threshold,
                actual: self.confidence,
            })
        }
    }

    /// `unwrap()` without an explicit threshold.
    pub fn checked_default(self) -> ThinkResult<T> {
        self.checked(DEFAULT_CONFIDENCE_THRESHOLD)
    }

    /// `or(fallback)`: the value when confident, the fallback otherwise.
    pub fn or_fallback(self, fallback: T) -> T {
        if self.confidence >= DEFAULT_CONFIDENCE_THRESHOLD {
            self.value
        } else {
            fallback
        }
    }

    /// `map(fn)`: transform the value, keeping confidence and reasoning.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Confident<U> {
        Confident {
            value: f(self.value),
            confidence: self.confidence,
            reasoning: self.reasoning,
        }
    }

    /// `isConfident(threshold?)`.
    pub fn is_confident(&self, threshold: Option<f64>) -> bool {
        self.confidence >= threshold.unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD)
    }
}

impl Confident<serde_json::Value> {
    /// Parse the Confident projection `{value, confidence, reasoning}` out
    /// of a raw provider payload.
    pub fn from_payload(payload: serde_json::Value) -> ThinkResult<Self> {
        let obj = payload
            .as_object()
            .ok_or_else(|| ThinkError::SchemaViolation {
                reason: "expected an object for Confident payload".to_string(),
            })?;

        let value = obj
            .get("value")
            .cloned()
            .ok_or_else(|| ThinkError::SchemaViolation {
                reason: "Confident payload missing 'value'".to_string(),
            })?;

        let confidence = obj
            .get("confidence")
            .and_then(|c| c.as_f64())
            .ok_or_else(|| ThinkError::SchemaViolation {
                reason: "Confident payload missing numeric 'confidence'".to_string(),
            })?;

        let reasoning = obj
            .get("reasoning")
            .and_then(|r| r.as_str())
            .unwrap_or_default()
            .to_string();

        Ok(Self::new(value, confidence, reasoning))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checked_respects_threshold() {
        let c = Confident::new("pos", 0.9, "clear signal");
        assert_eq!(c.clone().checked(0.8).unwrap(), "pos");

        let err = c.checked(0.95).unwrap_err();
        assert_eq!(err.kind(), "ConfidenceTooLow");
    }

    #[test]
    fn or_fallback_uses_default_threshold() {
        let low = Confident::new(1, 0.3, "guessing");
        assert_eq!(low.or_fallback(7), 7);

        let high = Confident::new(1, 0.9, "sure");
        assert_eq!(high.or_fallback(7), 1);
    }

    #[test]
    fn map_preserves_confidence() {
        let c = Confident::new(2, 0.8, "r").map(|v| v * 10);
        assert_eq!(c.value, 20);
        assert_eq!(c.confidence, 0.8);
        assert_eq!(c.reasoning, "r");
    }

    #[test]
    fn from_payload_round_trips() {
        let payload = serde_json::json!({
            "value": {"label": "pos"},
            "confidence": 0.85,
            "reasoning": "matched tone"
        });
        let c = Confident::from_payload(payload).unwrap();
        assert_eq!(c.confidence, 0.85);
        assert_eq!(c.value["label"], "pos");
    }

    #[test]
    fn from_payload_rejects_missing_confidence() {
        let payload = serde_json::json!({"value": 1});
        assert!(Confident::from_payload(payload).is_err());
    }
}
