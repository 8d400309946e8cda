//! End-to-end pipeline tests
//!
//! Source → parse → check → lower → evaluate against a scripted provider,
//! covering the full compile-and-execute path including imports, cost
//! accounting, and the semantic assertion used by test blocks.

use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use thinklang_core::RuntimeConfig;
use thinklang_dsl::{compile_source, CompileMode, InMemoryLoader};
use thinklang_llm::ScriptedProvider;
use thinklang_runtime::{Evaluator, Runtime};

async fn run_program(
    source: &str,
    loader: &InMemoryLoader,
    provider: Arc<ScriptedProvider>,
) -> (Evaluator, Arc<Runtime>) {
    let compiled = compile_source(source, Path::new("main.tl"), loader, CompileMode::Program)
        .expect("compile failed");
    assert!(
        compiled.check.is_clean(),
        "check errors: {:?}",
        compiled.check.errors
    );

    let runtime = Arc::new(Runtime::with_provider(provider, RuntimeConfig::default()));
    let mut evaluator = Evaluator::new(Arc::clone(&runtime));
    evaluator.quiet = true;
    evaluator.run(&compiled.exec).await.expect("run failed");
    (evaluator, runtime)
}

#[tokio::test]
async fn sentiment_program_end_to_end() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.push_value(json!({
        "value": {"label": "positive", "score": 0.93},
        "confidence": 0.88,
        "reasoning": "strongly positive wording"
    }));

    let source = r#"
    type Sentiment {
        label: string description("positive, negative, or neutral")
        score: float range(0..1)
    }

    let review = "The battery life is outstanding."
    let s = think<Sentiment>("Classify the sentiment of the review.")
        with context: review
        on_fail: retry(2)

    let verdict = match s.unwrap(0.5) {
        { score: >= 0.5 } => "keeper",
        _ => "needs work"
    }
    print verdict
    "#;

    let (evaluator, runtime) = run_program(source, &InMemoryLoader::new(), provider.clone()).await;

    assert_eq!(evaluator.printed, vec!["keeper"]);
    assert_eq!(provider.call_count(), 1);

    // The context rode along under its flattened key.
    let request = provider.last_request().unwrap();
    assert!(request.user_message.contains("review"));
    assert!(request.user_message.contains("battery life"));

    // One usage record, tagged think.
    let summary = runtime.tracker.get_summary();
    assert_eq!(summary.total_calls, 1);
    assert!(summary.by_operation.contains_key("think"));
}

#[tokio::test]
async fn imported_types_and_functions_execute() {
    let loader = InMemoryLoader::new().with_file(
        "lib.tl",
        r#"
        type Reply { text: string }
        fn emphasize(s: string) -> string { s + "!" }
        "#,
    );

    let provider = Arc::new(ScriptedProvider::new());
    provider.push_value(json!({
        "value": {"text": "sure"},
        "confidence": 0.95,
        "reasoning": "simple question"
    }));

    let source = r#"
    import { Reply, emphasize } from "./lib"
    let r = think<Reply>("Answer briefly.")
    print emphasize(r.unwrap(0.5).text)
    "#;

    let (evaluator, _) = run_program(source, &loader, provider).await;
    assert_eq!(evaluator.printed, vec!["sure!"]);
}

#[tokio::test]
async fn infer_and_reason_via_the_language() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.push_value(json!({
        "value": "5 stars",
        "confidence": 0.9,
        "reasoning": "rating field"
    }));
    provider.push_value(json!({
        "value": "ship it",
        "confidence": 0.85,
        "reasoning": "worked through steps"
    }));

    let source = r#"
    let data = { rating: 5, text: "great" }
    let label = infer<string>(data, hint: "overall rating")
    print label.unwrap(0.5)

    let decision = reason<string> {
        goal: "decide whether to ship"
        steps:
        1. "weigh the rating"
        2. "decide"
    }
    print decision.unwrap(0.5)
    "#;

    let (evaluator, runtime) = run_program(source, &InMemoryLoader::new(), provider.clone()).await;
    assert_eq!(evaluator.printed, vec!["5 stars", "ship it"]);

    let requests = provider.requests();
    assert!(requests[0].user_message.starts_with("Analyze this value:"));
    assert!(requests[0].user_message.contains("Hint: overall rating"));
    assert!(requests[1].user_message.starts_with("Goal: decide whether to ship"));
    assert!(requests[1].user_message.contains("1. weigh the rating"));

    // Summary identities: totals equal the per-group sums.
    let summary = runtime.tracker.get_summary();
    let op_calls: u64 = summary.by_operation.values().map(|a| a.calls).sum();
    let model_calls: u64 = summary.by_model.values().map(|a| a.calls).sum();
    assert_eq!(summary.total_calls, 2);
    assert_eq!(summary.total_calls, op_calls);
    assert_eq!(summary.total_calls, model_calls);
}

#[tokio::test]
async fn semantic_assert_passes_and_fails() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.push_value(json!({"passes": true, "explanation": "matches"}));
    provider.push_value(json!({"passes": false, "explanation": "tone is negative"}));

    let compiled = compile_source(
        r#"
        assert.semantic("great product", "sounds positive")
        assert.semantic("terrible", "sounds positive")
        "#,
        Path::new("main.tl"),
        &InMemoryLoader::new(),
        CompileMode::Program,
    )
    .unwrap();

    let runtime = Arc::new(Runtime::with_provider(provider, RuntimeConfig::default()));
    let mut evaluator = Evaluator::new(runtime);
    evaluator.quiet = true;

    let err = evaluator.run(&compiled.exec).await.unwrap_err();
    assert!(err.to_string().contains("tone is negative"));
}

#[tokio::test]
async fn repl_mode_keeps_bindings_across_programs() {
    let provider = Arc::new(ScriptedProvider::new());
    let runtime = Arc::new(Runtime::with_provider(provider, RuntimeConfig::default()));
    let mut evaluator = Evaluator::new(runtime);
    evaluator.quiet = true;

    let loader = InMemoryLoader::new();
    for (source, expected) in [
        ("let x = 20", None),
        ("let y = x + 22", None),
        ("print y", Some("42")),
    ] {
        let compiled =
            compile_source(source, Path::new("<repl>"), &loader, CompileMode::Repl).unwrap();
        assert!(compiled.exec.repl_mode);
        evaluator.run(&compiled.exec).await.unwrap();
        if let Some(expected) = expected {
            assert_eq!(evaluator.printed.last().map(|s| s.as_str()), Some(expected));
        }
    }
}
