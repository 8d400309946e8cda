//! ThinkLang Test Utilities
//!
//! Centralized test infrastructure for the workspace:
//! - the scripted provider and snapshot types, re-exported
//! - proptest generators for type expressions and source programs
//! - fixture programs and a scripted-runtime builder

// Re-export the provider doubles from their source crate
pub use thinklang_llm::{
    ReplayProvider, ScriptedProvider, SnapshotEntry, SnapshotFile, SnapshotMetadata,
    SnapshotRequest, SnapshotResponse,
};

use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;
use thinklang_core::RuntimeConfig;
use thinklang_dsl::parser::ast::TypeExpr;
use thinklang_runtime::Runtime;

/// A runtime wired to a scripted provider, plus the provider handle for
/// scripting and assertions.
pub fn scripted_runtime() -> (Arc<Runtime>, Arc<ScriptedProvider>) {
    let provider = Arc::new(ScriptedProvider::new());
    let runtime = Arc::new(Runtime::with_provider(
        Arc::clone(&provider) as Arc<dyn thinklang_llm::Provider>,
        RuntimeConfig::default(),
    ));
    (runtime, provider)
}

/// A snapshot file with one entry per value, minimal metadata.
pub fn snapshot_of(values: &[Value]) -> SnapshotFile {
    SnapshotFile {
        version: 1,
        entries: values
            .iter()
            .map(|value| SnapshotEntry {
                request: SnapshotRequest {
                    system_prompt: String::new(),
                    user_message: String::new(),
                    json_schema: None,
                },
                response: SnapshotResponse {
                    value: value.clone(),
                },
                metadata: SnapshotMetadata {
                    input_tokens: 1,
                    output_tokens: 1,
                    model: "snapshot".to_string(),
                },
            })
            .collect(),
    }
}

/// A Confident envelope payload as providers return it.
pub fn confident_payload(value: Value, confidence: f64, reasoning: &str) -> Value {
    json!({
        "value": value,
        "confidence": confidence,
        "reasoning": reasoning,
    })
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub fn arb_type_name() -> impl Strategy<Value = String> {
    "[A-Z][a-zA-Z0-9]{0,6}".prop_map(|s| format!("T{}", s))
}

pub fn arb_type_expr() -> impl Strategy<Value = TypeExpr> {
    let leaf = prop_oneof![
        Just(TypeExpr::String),
        Just(TypeExpr::Int),
        Just(TypeExpr::Float),
        Just(TypeExpr::Bool),
        arb_type_name().prop_map(TypeExpr::Named),
    ];
    leaf.prop_recursive(3, 10, 3, |inner| {
        prop_oneof![
            inner.clone().prop_map(|t| TypeExpr::Array(Box::new(t))),
            inner.clone().prop_map(|t| TypeExpr::Optional(Box::new(t))),
            inner.prop_map(|t| TypeExpr::Confident(Box::new(t))),
        ]
    })
}

/// JSON values a schema-free provider could plausibly return.
pub fn arb_json_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (-1000i64..1000).prop_map(|n| json!(n)),
        "[a-zA-Z0-9 ]{0,12}".prop_map(|s| json!(s)),
    ];
    leaf.prop_recursive(2, 16, 4, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            proptest::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|m| json!(m)),
        ]
    })
}

// ============================================================================
// FIXTURES
// ============================================================================

/// A small program exercising types, think, guards, and match.
pub const SENTIMENT_PROGRAM: &str = r#"
type Sentiment {
    label: string description("positive, negative, or neutral")
    score: float range(0..1)
}

let review = "The battery life is outstanding."
let s = think<Sentiment>("Classify the sentiment of the review.")
    with context: review
    guard { length: 1..2000 }
    on_fail: retry(2)

let verdict = match s.unwrap(0.5) {
    { score: >= 0.5 } => "keeper",
    _ => "needs work"
}
print verdict
"#;

/// A test-file fixture with a replayed block.
pub const REPLAY_TEST_PROGRAM: &str = r#"
type Sentiment { label: string, score: float }

test "classification replays" {
    mode: replay("sentiment.snapshot.json")
    let s = think<Sentiment>("Classify: great value.")
    assert s.unwrap(0.5).label == "positive"
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use thinklang_dsl::{checker, parser};

    #[test]
    fn fixtures_parse_and_check_cleanly() {
        for source in [SENTIMENT_PROGRAM, REPLAY_TEST_PROGRAM] {
            let program = parser::parse(source).unwrap();
            let types = checker::collect_types(&program);
            let result = checker::check(&program, &types);
            assert!(result.errors.is_empty(), "errors: {:?}", result.errors);
        }
    }

    #[tokio::test]
    async fn scripted_runtime_round_trips() {
        let (runtime, provider) = scripted_runtime();
        provider.push_value(confident_payload(json!("ok"), 0.9, "sure"));

        let result = thinklang_runtime::think(
            &runtime,
            "go",
            thinklang_runtime::CallOptions {
                json_schema: Some(thinklang_core::JsonSchema::string()),
                uncertain: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        match result {
            thinklang_runtime::AiValue::Confident(confident) => {
                assert_eq!(confident.value, json!("ok"));
            }
            other => panic!("expected Confident, got {other:?}"),
        }
    }
}
