//! Interactive session
//!
//! Statements evaluate in a persistent scope (REPL compile mode omits the
//! program wrapper). Multi-line input collects until braces balance.
//! Dot-commands: `.exit`, `.clear`, `.help`.

use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use thinklang_core::RuntimeConfig;
use thinklang_dsl::{compile_source, CompileMode, FsModuleLoader};
use thinklang_runtime::{Evaluator, Runtime};

pub async fn run_repl() -> Result<(), String> {
    println!("ThinkLang REPL — .help for commands, .exit to quit");

    let runtime = Arc::new(Runtime::new(RuntimeConfig::from_env()));
    let mut evaluator = Evaluator::new(runtime);

    let stdin = std::io::stdin();
    let mut buffer = String::new();

    loop {
        let prompt = if buffer.is_empty() { "tl> " } else { "...> " };
        print!("{}", prompt);
        std::io::stdout().flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => return Err(format!("stdin error: {}", e)),
        }

        let trimmed = line.trim();
        if buffer.is_empty() {
            match trimmed {
                ".exit" => break,
                ".clear" => {
                    evaluator = Evaluator::new(Arc::new(Runtime::new(RuntimeConfig::from_env())));
                    println!("session cleared");
                    continue;
                }
                ".help" => {
                    println!(".exit   quit the session");
                    println!(".clear  reset bindings and cost state");
                    println!(".help   this message");
                    continue;
                }
                "" => continue,
                _ => {}
            }
        }

        buffer.push_str(&line);

        // Keep collecting until braces balance.
        if brace_depth(&buffer) > 0 {
            continue;
        }

        let source = std::mem::take(&mut buffer);
        match compile_source(&source, Path::new("<repl>"), &FsModuleLoader, CompileMode::Repl) {
            Ok(compiled) => {
                // The per-line checker cannot see earlier session bindings,
                // so its name-resolution errors are advisory here; the
                // evaluator still fails on genuinely unknown names.
                for warning in &compiled.check.warnings {
                    eprintln!("[warning] {}", warning.message);
                }
                for error in &compiled.check.errors {
                    if !error.message.starts_with("undefined") {
                        eprintln!("[warning] {}", error.message);
                    }
                }
                match evaluator.run(&compiled.exec).await {
                    Ok(Some(value)) => println!("{}", value.render()),
                    Ok(None) => {}
                    Err(e) => eprintln!("Error: {}", e),
                }
            }
            Err(e) => eprintln!("Error: {}", e),
        }
    }

    Ok(())
}

/// Net open-brace depth, ignoring braces inside string literals.
fn brace_depth(source: &str) -> i32 {
    let mut depth = 0i32;
    let mut in_string: Option<char> = None;
    let mut escaped = false;

    for c in source.chars() {
        if let Some(quote) = in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == quote {
                in_string = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => in_string = Some(c),
            '{' | '(' | '[' => depth += 1,
            '}' | ')' | ']' => depth -= 1,
            _ => {}
        }
    }
    depth
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brace_depth_tracks_nesting() {
        assert_eq!(brace_depth("let x = 1"), 0);
        assert_eq!(brace_depth("type A {"), 1);
        assert_eq!(brace_depth("type A { x: int }"), 0);
        assert_eq!(brace_depth("match x { { value: 1 } => \"}\" "), 1);
    }
}
