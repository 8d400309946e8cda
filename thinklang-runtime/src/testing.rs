//! Test framework
//!
//! Runs `.test.tl` files: the preamble (every non-test statement) executes
//! before each test block, optionally against a replay or recording
//! provider. A failing block does not stop the others.

use crate::{Evaluator, Runtime};
use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use thinklang_dsl::codegen::{ExecProgram, ExecStmt};
use thinklang_dsl::parser::ast::TestMode;
use thinklang_dsl::{compile_source, CompileMode, ModuleLoader};
use thinklang_core::{ThinkError, ThinkResult};
use thinklang_llm::{RecordingProvider, ReplayProvider};

/// One test block's outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct TestOutcome {
    pub name: String,
    pub passed: bool,
    pub duration_ms: u64,
    pub cost_usd: f64,
    pub error: Option<String>,
}

/// Flags from the CLI `test` command.
#[derive(Debug, Clone, Default)]
pub struct TestRunOptions {
    /// Re-record snapshots instead of replaying them.
    pub update_snapshots: bool,
    /// Force replay mode: blocks without a snapshot fail fast.
    pub replay_only: bool,
    /// Only run tests whose name matches.
    pub name_pattern: Option<String>,
}

/// Compile and run every test block of one `.test.tl` source.
pub async fn run_test_source(
    runtime: &Arc<Runtime>,
    source: &str,
    path: &Path,
    loader: &dyn ModuleLoader,
    options: &TestRunOptions,
) -> ThinkResult<Vec<TestOutcome>> {
    let compiled = compile_source(source, path, loader, CompileMode::Program)
        .map_err(|e| ThinkError::Runtime {
            message: e.to_string(),
        })?;

    if !compiled.check.is_clean() {
        let first = &compiled.check.errors[0];
        return Err(ThinkError::Runtime {
            message: format!(
                "type check failed at line {}: {}",
                first.span.line, first.message
            ),
        });
    }

    let pattern = match &options.name_pattern {
        Some(pattern) => Some(Regex::new(pattern).map_err(|e| ThinkError::Runtime {
            message: format!("invalid test pattern: {}", e),
        })?),
        None => None,
    };

    let (preamble, tests) = split_program(&compiled.exec);
    let mut outcomes = Vec::new();

    for test in &tests {
        let (name, mode, body) = match test {
            ExecStmt::Test { name, mode, body } => (name, mode, body),
            _ => continue,
        };

        if let Some(pattern) = &pattern {
            if !pattern.is_match(name) {
                continue;
            }
        }

        outcomes.push(run_one_test(runtime, path, &preamble, name, mode, body, options).await);
    }

    Ok(outcomes)
}

fn split_program(program: &ExecProgram) -> (Vec<ExecStmt>, Vec<ExecStmt>) {
    let mut preamble = Vec::new();
    let mut tests = Vec::new();
    for stmt in &program.statements {
        match stmt {
            ExecStmt::Test { .. } => tests.push(stmt.clone()),
            other => preamble.push(other.clone()),
        }
    }
    (preamble, tests)
}

async fn run_one_test(
    runtime: &Arc<Runtime>,
    path: &Path,
    preamble: &[ExecStmt],
    name: &str,
    mode: &Option<TestMode>,
    body: &[ExecStmt],
    options: &TestRunOptions,
) -> TestOutcome {
    let started = Instant::now();
    let cost_before = runtime.tracker.total_cost();

    let outcome = execute_test(runtime, path, preamble, mode, body, options).await;

    let duration_ms = started.elapsed().as_millis() as u64;
    let cost_usd = runtime.tracker.total_cost() - cost_before;

    match outcome {
        Ok(()) => TestOutcome {
            name: name.to_string(),
            passed: true,
            duration_ms,
            cost_usd,
            error: None,
        },
        Err(error) => TestOutcome {
            name: name.to_string(),
            passed: false,
            duration_ms,
            cost_usd,
            error: Some(error.to_string()),
        },
    }
}

async fn execute_test(
    runtime: &Arc<Runtime>,
    path: &Path,
    preamble: &[ExecStmt],
    mode: &Option<TestMode>,
    body: &[ExecStmt],
    options: &TestRunOptions,
) -> ThinkResult<()> {
    // Snapshot modes swap the provider for this block only.
    let test_runtime = match mode {
        Some(TestMode::Replay(snapshot)) if options.update_snapshots => {
            let live = runtime.provider()?;
            let recorder =
                RecordingProvider::new(live, snapshot_path(path, snapshot));
            Arc::new(runtime.override_provider(Arc::new(recorder)))
        }
        Some(TestMode::Replay(snapshot)) => {
            let replay = ReplayProvider::load(&snapshot_path(path, snapshot))?;
            Arc::new(runtime.override_provider(Arc::new(replay)))
        }
        Some(TestMode::Record(snapshot)) => {
            let target = snapshot
                .clone()
                .unwrap_or_else(|| default_snapshot_name(path));
            if options.replay_only {
                let replay = ReplayProvider::load(&snapshot_path(path, &target))?;
                Arc::new(runtime.override_provider(Arc::new(replay)))
            } else {
                let live = runtime.provider()?;
                let recorder = RecordingProvider::new(live, snapshot_path(path, &target));
                Arc::new(runtime.override_provider(Arc::new(recorder)))
            }
        }
        None => Arc::clone(runtime),
    };

    let mut evaluator = Evaluator::new(test_runtime);
    evaluator.quiet = true;
    evaluator.exec_stmts(preamble).await?;
    evaluator.exec_stmts(body).await?;
    Ok(())
}

/// Snapshot paths resolve relative to the test file.
fn snapshot_path(test_path: &Path, snapshot: &str) -> std::path::PathBuf {
    test_path
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join(snapshot)
}

fn default_snapshot_name(test_path: &Path) -> String {
    let stem = test_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("test");
    format!("{}.snapshot.json", stem)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use thinklang_core::RuntimeConfig;
    use thinklang_dsl::InMemoryLoader;
    use thinklang_llm::{
        ScriptedProvider, SnapshotEntry, SnapshotFile, SnapshotMetadata, SnapshotRequest,
        SnapshotResponse,
    };

    fn loader() -> InMemoryLoader {
        InMemoryLoader::new()
    }

    #[tokio::test]
    async fn passing_and_failing_blocks_are_independent() {
        let provider = Arc::new(ScriptedProvider::new());
        let runtime = Arc::new(Runtime::with_provider(provider, RuntimeConfig::default()));

        let source = r#"
        let base = 40

        test "adds" {
            assert base + 2 == 42
        }

        test "fails" {
            assert base == 0
        }

        test "still runs" {
            assert true
        }
        "#;

        let outcomes = run_test_source(
            &runtime,
            source,
            Path::new("math.test.tl"),
            &loader(),
            &TestRunOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].passed);
        assert!(!outcomes[1].passed);
        assert!(outcomes[1].error.as_deref().unwrap().contains("assertion"));
        assert!(outcomes[2].passed);
    }

    #[tokio::test]
    async fn pattern_filters_test_names() {
        let provider = Arc::new(ScriptedProvider::new());
        let runtime = Arc::new(Runtime::with_provider(provider, RuntimeConfig::default()));

        let source = r#"
        test "alpha one" { assert true }
        test "beta two" { assert true }
        "#;

        let outcomes = run_test_source(
            &runtime,
            source,
            Path::new("t.test.tl"),
            &loader(),
            &TestRunOptions {
                name_pattern: Some("alpha".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].name, "alpha one");
    }

    #[tokio::test]
    async fn replay_mode_serves_snapshot_values() {
        let dir = std::env::temp_dir().join("thinklang-replay-test");
        std::fs::create_dir_all(&dir).unwrap();
        let snapshot_file = dir.join("snap.json");

        let snapshot = SnapshotFile {
            version: 1,
            entries: vec![SnapshotEntry {
                request: SnapshotRequest {
                    system_prompt: String::new(),
                    user_message: String::new(),
                    json_schema: None,
                },
                response: SnapshotResponse {
                    value: json!({
                        "value": "replayed",
                        "confidence": 0.99,
                        "reasoning": "from snapshot"
                    }),
                },
                metadata: SnapshotMetadata {
                    input_tokens: 3,
                    output_tokens: 2,
                    model: "snap-model".to_string(),
                },
            }],
        };
        snapshot.save(&snapshot_file).unwrap();

        // No live provider needed: replay supplies everything.
        let runtime = Arc::new(Runtime::new(RuntimeConfig::default()));

        let source = r#"
        test "replayed think" {
            mode: replay("snap.json")
            let s = think<string>("anything")
            assert s.unwrap(0.9) == "replayed"
        }
        "#;

        let outcomes = run_test_source(
            &runtime,
            source,
            &dir.join("replay.test.tl"),
            &loader(),
            &TestRunOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].passed, "error: {:?}", outcomes[0].error);
        assert!(outcomes[0].cost_usd > 0.0);

        std::fs::remove_file(&snapshot_file).ok();
    }

    #[tokio::test]
    async fn replay_exhaustion_fails_the_test() {
        let dir = std::env::temp_dir().join("thinklang-replay-exhaust");
        std::fs::create_dir_all(&dir).unwrap();
        let snapshot_file = dir.join("one.json");

        let snapshot = SnapshotFile {
            version: 1,
            entries: vec![SnapshotEntry {
                request: SnapshotRequest {
                    system_prompt: String::new(),
                    user_message: String::new(),
                    json_schema: None,
                },
                response: SnapshotResponse {
                    value: json!({"value": "only", "confidence": 1.0, "reasoning": ""}),
                },
                metadata: SnapshotMetadata {
                    input_tokens: 1,
                    output_tokens: 1,
                    model: "snap".to_string(),
                },
            }],
        };
        snapshot.save(&snapshot_file).unwrap();

        let runtime = Arc::new(Runtime::new(RuntimeConfig::default()));

        let source = r#"
        test "two calls, one entry" {
            mode: replay("one.json")
            let a = think<string>("first")
            let b = think<string>("second")
            assert true
        }
        "#;

        let outcomes = run_test_source(
            &runtime,
            source,
            &dir.join("exhaust.test.tl"),
            &loader(),
            &TestRunOptions::default(),
        )
        .await
        .unwrap();

        assert!(!outcomes[0].passed);
        assert!(outcomes[0]
            .error
            .as_deref()
            .unwrap()
            .contains("exhausted"));

        std::fs::remove_file(&snapshot_file).ok();
    }
}
