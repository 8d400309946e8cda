//! Module resolver
//!
//! Loads imported `.tl` modules relative to the importer, merging imported
//! type declarations into the importer's type table and collecting imported
//! functions and tools. Transitive imports are resolved for the consistency
//! of the imported file but are not re-exported.

use crate::parser::ast::*;
use crate::parser::parse;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while resolving imports.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResolveError {
    #[error("circular import detected at '{path}'")]
    CircularImport { path: String },

    #[error("'{name}' is not exported by '{path}'")]
    NotExported { name: String, path: String },

    #[error("failed to load module '{path}': {reason}")]
    Load { path: String, reason: String },

    #[error("{0}")]
    Parse(#[from] ParseError),
}

/// Source access for module loading; tests use the in-memory variant.
pub trait ModuleLoader {
    fn load(&self, path: &Path) -> Result<String, String>;
}

/// Loads modules from the filesystem.
#[derive(Debug, Default)]
pub struct FsModuleLoader;

impl ModuleLoader for FsModuleLoader {
    fn load(&self, path: &Path) -> Result<String, String> {
        std::fs::read_to_string(path).map_err(|e| e.to_string())
    }
}

/// In-memory module set keyed by normalized path.
#[derive(Debug, Default)]
pub struct InMemoryLoader {
    files: HashMap<PathBuf, String>,
}

impl InMemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>, source: impl Into<String>) -> Self {
        self.files.insert(path.into(), source.into());
        self
    }
}

impl ModuleLoader for InMemoryLoader {
    fn load(&self, path: &Path) -> Result<String, String> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| "file not found".to_string())
    }
}

/// Names and declarations an importer receives.
#[derive(Debug, Clone, Default)]
pub struct ResolvedModules {
    pub types: HashMap<String, TypeDecl>,
    pub functions: Vec<FnDecl>,
    pub tools: Vec<ToolDecl>,
}

/// Resolve every import of `program`, with `importer_path` as the base for
/// relative paths.
pub fn resolve_imports(
    importer_path: &Path,
    program: &Program,
    loader: &dyn ModuleLoader,
) -> Result<ResolvedModules, ResolveError> {
    let mut resolving = HashSet::new();
    resolving.insert(normalize(importer_path));
    resolve_into(importer_path, &program.imports, loader, &mut resolving)
}

fn resolve_into(
    importer_path: &Path,
    imports: &[Import],
    loader: &dyn ModuleLoader,
    resolving: &mut HashSet<PathBuf>,
) -> Result<ResolvedModules, ResolveError> {
    let mut resolved = ResolvedModules::default();

    for import in imports {
        let target = normalize(&resolve_path(importer_path, &import.path));

        if resolving.contains(&target) {
            return Err(ResolveError::CircularImport {
                path: import.path.clone(),
            });
        }

        let source = loader
            .load(&target)
            .map_err(|reason| ResolveError::Load {
                path: target.display().to_string(),
                reason,
            })?;
        let module = parse(&source)?;

        // Recurse for consistency of the imported file; nothing from the
        // transitive set is re-exported to this importer.
        resolving.insert(target.clone());
        resolve_into(&target, &module.imports, loader, resolving)?;
        resolving.remove(&target);

        for name in &import.names {
            let mut found = false;
            for stmt in &module.statements {
                match stmt {
                    Stmt::TypeDecl(decl) if &decl.name == name => {
                        resolved.types.insert(decl.name.clone(), decl.clone());
                        found = true;
                    }
                    Stmt::FnDecl(decl) if &decl.name == name => {
                        resolved.functions.push(decl.clone());
                        found = true;
                    }
                    Stmt::ToolDecl(decl) if &decl.name == name => {
                        resolved.tools.push(decl.clone());
                        found = true;
                    }
                    _ => {}
                }
            }
            if !found {
                return Err(ResolveError::NotExported {
                    name: name.clone(),
                    path: import.path.clone(),
                });
            }
        }
    }

    Ok(resolved)
}

/// Resolve an import path relative to the importer, appending the `.tl`
/// extension when missing.
fn resolve_path(importer: &Path, import_path: &str) -> PathBuf {
    let mut path = importer
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join(import_path);
    if path.extension().is_none() {
        path.set_extension("tl");
    }
    path
}

/// Lexically normalize `.` and `..` components so the same module reached
/// through different spellings collides in the resolving set.
fn normalize(path: &Path) -> PathBuf {
    let mut parts: Vec<std::ffi::OsString> = Vec::new();
    for component in path.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                if parts.is_empty() {
                    parts.push("..".into());
                } else {
                    parts.pop();
                }
            }
            other => parts.push(other.as_os_str().to_os_string()),
        }
    }
    parts.iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn imports_resolve_types_and_functions() {
        let loader = InMemoryLoader::new()
            .with_file(
                "lib.tl",
                r#"
                type Review { text: string }
                fn shout(s: string) -> string { s + "!" }
                "#,
            )
            .with_file("main.tl", "");

        let main = parse(r#"import { Review, shout } from "./lib""#).unwrap();
        let resolved = resolve_imports(Path::new("main.tl"), &main, &loader).unwrap();

        assert!(resolved.types.contains_key("Review"));
        assert_eq!(resolved.functions.len(), 1);
        assert_eq!(resolved.functions[0].name, "shout");
    }

    #[test]
    fn missing_name_is_not_exported() {
        let loader = InMemoryLoader::new().with_file("lib.tl", "type A { x: int }");
        let main = parse(r#"import { B } from "./lib""#).unwrap();
        let err = resolve_imports(Path::new("main.tl"), &main, &loader).unwrap_err();
        assert!(matches!(err, ResolveError::NotExported { name, .. } if name == "B"));
    }

    #[test]
    fn circular_import_is_exactly_one_error() {
        let loader = InMemoryLoader::new()
            .with_file("a.tl", r#"import { B } from "./b" type A { x: int }"#)
            .with_file("b.tl", r#"import { A } from "./a" type B { y: int }"#);

        let a = parse(r#"import { B } from "./b""#).unwrap();
        let err = resolve_imports(Path::new("a.tl"), &a, &loader).unwrap_err();
        assert!(matches!(err, ResolveError::CircularImport { .. }));
    }

    #[test]
    fn transitive_imports_are_not_reexported() {
        let loader = InMemoryLoader::new()
            .with_file("base.tl", "type Base { x: int }")
            .with_file(
                "mid.tl",
                r#"import { Base } from "./base" type Mid { b: Base }"#,
            );

        let main = parse(r#"import { Mid } from "./mid""#).unwrap();
        let resolved = resolve_imports(Path::new("main.tl"), &main, &loader).unwrap();

        assert!(resolved.types.contains_key("Mid"));
        assert!(!resolved.types.contains_key("Base"));
    }

    #[test]
    fn extension_is_appended() {
        assert_eq!(
            resolve_path(Path::new("dir/main.tl"), "./lib"),
            PathBuf::from("dir/./lib.tl")
        );
    }
}
