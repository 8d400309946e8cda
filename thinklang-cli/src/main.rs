//! ThinkLang command-line driver
//!
//! Thin caller over the compiler front end and the runtime: `run`,
//! `compile`, `repl`, `test`, and `cost-report`. Failures print to stderr
//! and exit 1.

mod repl;

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use thinklang_core::{CostSummary, RuntimeConfig};
use thinklang_dsl::{compile_source, CompileMode, FsModuleLoader};
use thinklang_runtime::{run_test_source, Evaluator, Runtime, TestRunOptions};

#[derive(Parser)]
#[command(name = "thinklang", version, about = "The ThinkLang language toolchain")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile and execute a program
    Run {
        file: PathBuf,
        /// Print the session cost summary after the run
        #[arg(long)]
        show_cost: bool,
    },
    /// Emit the compiled host form
    Compile {
        file: PathBuf,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Interactive session
    Repl,
    /// Run `.test.tl` files
    Test {
        /// A test file or a directory to scan
        target: Option<PathBuf>,
        /// Re-record snapshots for replay tests
        #[arg(long)]
        update_snapshots: bool,
        /// Force replay mode
        #[arg(long)]
        replay: bool,
        /// Only run tests whose name matches this regex
        #[arg(long)]
        pattern: Option<String>,
    },
    /// Print the current session cost summary
    CostReport,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::Run { file, show_cost } => run_file(&file, show_cost).await,
        Command::Compile { file, output } => compile_file(&file, output.as_deref()),
        Command::Repl => repl::run_repl().await,
        Command::Test {
            target,
            update_snapshots,
            replay,
            pattern,
        } => {
            run_tests(
                target.as_deref(),
                TestRunOptions {
                    update_snapshots,
                    replay_only: replay,
                    name_pattern: pattern,
                },
            )
            .await
        }
        Command::CostReport => {
            print!("{}", render_cost_summary(&Runtime::global().tracker.get_summary()));
            Ok(())
        }
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{}", message);
            ExitCode::FAILURE
        }
    }
}

fn front_end(file: &Path, mode: CompileMode) -> Result<thinklang_dsl::Compiled, String> {
    let source =
        std::fs::read_to_string(file).map_err(|e| format!("cannot read {}: {}", file.display(), e))?;

    let compiled = compile_source(&source, file, &FsModuleLoader, mode)
        .map_err(|e| format!("{}: {}", file.display(), e))?;

    for warning in &compiled.check.warnings {
        eprintln!(
            "[warning] {}:{}:{}: {}",
            file.display(),
            warning.span.line,
            warning.span.column,
            warning.message
        );
    }

    if !compiled.check.is_clean() {
        let rendered: Vec<String> = compiled
            .check
            .errors
            .iter()
            .map(|e| {
                format!(
                    "{}:{}:{}: {}",
                    file.display(),
                    e.span.line,
                    e.span.column,
                    e.message
                )
            })
            .collect();
        return Err(rendered.join("\n"));
    }

    Ok(compiled)
}

async fn run_file(file: &Path, show_cost: bool) -> Result<(), String> {
    let compiled = front_end(file, CompileMode::Program)?;

    let runtime = Arc::new(Runtime::new(RuntimeConfig::from_env()));
    let mut evaluator = Evaluator::new(Arc::clone(&runtime));
    evaluator
        .run(&compiled.exec)
        .await
        .map_err(|e| e.to_string())?;

    if show_cost {
        print!("{}", render_cost_summary(&runtime.tracker.get_summary()));
    }
    Ok(())
}

fn compile_file(file: &Path, output: Option<&Path>) -> Result<(), String> {
    let compiled = front_end(file, CompileMode::Program)?;
    let emitted = compiled.exec.emit_source();

    match output {
        Some(path) => std::fs::write(path, emitted)
            .map_err(|e| format!("cannot write {}: {}", path.display(), e)),
        None => {
            println!("{}", emitted);
            Ok(())
        }
    }
}

async fn run_tests(target: Option<&Path>, options: TestRunOptions) -> Result<(), String> {
    let files = collect_test_files(target.unwrap_or_else(|| Path::new(".")))?;
    if files.is_empty() {
        return Err("no .test.tl files found".to_string());
    }

    let runtime = Arc::new(Runtime::new(RuntimeConfig::from_env()));
    let mut total = 0usize;
    let mut failed = 0usize;

    for file in &files {
        let source = std::fs::read_to_string(file)
            .map_err(|e| format!("cannot read {}: {}", file.display(), e))?;
        let outcomes = run_test_source(&runtime, &source, file, &FsModuleLoader, &options)
            .await
            .map_err(|e| format!("{}: {}", file.display(), e))?;

        for outcome in outcomes {
            total += 1;
            if outcome.passed {
                println!(
                    "  ok   {} ({} ms, ${:.4})",
                    outcome.name, outcome.duration_ms, outcome.cost_usd
                );
            } else {
                failed += 1;
                println!(
                    "  FAIL {} ({} ms): {}",
                    outcome.name,
                    outcome.duration_ms,
                    outcome.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }

    println!("\n{} test(s), {} failed", total, failed);
    if failed > 0 {
        Err(format!("{} test(s) failed", failed))
    } else {
        Ok(())
    }
}

fn collect_test_files(target: &Path) -> Result<Vec<PathBuf>, String> {
    if target.is_file() {
        return Ok(vec![target.to_path_buf()]);
    }

    let mut files = Vec::new();
    let mut stack = vec![target.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries =
            std::fs::read_dir(&dir).map_err(|e| format!("cannot read {}: {}", dir.display(), e))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(".test.tl"))
                .unwrap_or(false)
            {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

fn render_cost_summary(summary: &CostSummary) -> String {
    let mut out = String::new();
    out.push_str("Session cost summary\n");
    out.push_str(&format!(
        "  calls: {}  input tokens: {}  output tokens: {}  cost: ${:.4}\n",
        summary.total_calls,
        summary.total_input_tokens,
        summary.total_output_tokens,
        summary.total_cost_usd
    ));

    if !summary.by_operation.is_empty() {
        out.push_str("  by operation:\n");
        for (operation, aggregate) in &summary.by_operation {
            out.push_str(&format!(
                "    {:<16} {:>6} call(s)  ${:.4}\n",
                operation, aggregate.calls, aggregate.cost_usd
            ));
        }
    }
    if !summary.by_model.is_empty() {
        out.push_str("  by model:\n");
        for (model, aggregate) in &summary.by_model {
            out.push_str(&format!(
                "    {:<28} {:>6} call(s)  ${:.4}\n",
                model, aggregate.calls, aggregate.cost_usd
            ));
        }
    }
    out
}
