//! Codebase search used to resolve undefined names into imports.

use std::fs;
use std::path::{Component, Path, PathBuf};

use regex::Regex;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::core::recovery::SymbolLocator;

const SKIPPED_DIRS: &[&str] = &[
    "node_modules",
    "target",
    "__pycache__",
    "venv",
    "build",
    "dist",
];

/// Searches Python sources under a repository root.
#[derive(Debug, Clone)]
pub struct CodebaseLocator {
    root: PathBuf,
}

impl CodebaseLocator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn python_files(&self) -> impl Iterator<Item = PathBuf> + '_ {
        WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_skipped(e))
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(DirEntry::into_path)
            .filter(|p| p.extension().is_some_and(|ext| ext == "py"))
    }

    fn module_path(&self, file: &Path) -> Option<String> {
        let relative = file.strip_prefix(&self.root).ok()?;
        let mut parts: Vec<String> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => part.to_str().map(str::to_string),
                _ => None,
            })
            .collect();
        let last = parts.pop()?;
        let stem = last.strip_suffix(".py")?;
        if stem != "__init__" {
            parts.push(stem.to_string());
        }
        if parts.first().is_some_and(|p| p == "src") && parts.len() > 1 {
            parts.remove(0);
        }
        (!parts.is_empty()).then(|| parts.join("."))
    }
}

impl SymbolLocator for CodebaseLocator {
    fn find_definition(&self, symbol: &str) -> Option<String> {
        let pattern = format!(
            r"(?m)^(?:class|def|async\s+def)\s+{0}\b|^{0}\s*[:=]",
            regex::escape(symbol)
        );
        let re = Regex::new(&pattern).ok()?;
        let mut files: Vec<PathBuf> = self.python_files().collect();
        files.sort();
        let found = files.into_iter().find(|path| {
            fs::read_to_string(path)
                .map(|contents| re.is_match(&contents))
                .unwrap_or(false)
        })?;
        debug!(symbol, path = %found.display(), "definition found");
        self.module_path(&found)
    }

    fn find_module(&self, symbol: &str) -> Option<String> {
        let wanted = to_snake_case(symbol);
        let mut files: Vec<PathBuf> = self
            .python_files()
            .filter(|p| {
                let stem = p.file_stem().and_then(|s| s.to_str());
                let parent = p
                    .parent()
                    .and_then(|d| d.file_name())
                    .and_then(|s| s.to_str());
                stem == Some(wanted.as_str())
                    || (stem == Some("__init__") && parent == Some(wanted.as_str()))
            })
            .collect();
        files.sort();
        files.first().and_then(|p| self.module_path(p))
    }
}

fn is_skipped(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || (entry.file_type().is_dir() && SKIPPED_DIRS.contains(&name.as_ref()))
}

fn to_snake_case(name: &str) -> String {
    let mut out = String::new();
    for (idx, ch) in name.chars().enumerate() {
        if ch.is_uppercase() {
            if idx > 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}
