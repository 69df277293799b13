//! Project signals used to judge card relevance at session start.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

use crate::config::InjectConfig;
use crate::git::VcsProvider;

/// Dependency and VCS directories never worth scanning.
pub const SKIP_DIRS: &[&str] = &[
    ".git",
    ".venv",
    "node_modules",
    "__pycache__",
    ".claude-plugin",
    "venv",
    ".next",
    "dist",
    "build",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectContext {
    /// Dotted extensions, e.g. `.py`
    pub file_extensions: BTreeSet<String>,
    pub file_names: BTreeSet<String>,
    /// Project doc plus recent history, lowercased.
    pub text_context: String,
}

/// Gather file names and extensions down to depth 2, the project doc (capped)
/// and recent history one-liners. Every missing signal is silently empty.
pub fn extract(project_dir: &Path, vcs: &dyn VcsProvider, config: &InjectConfig) -> ProjectContext {
    let mut ctx = ProjectContext::default();
    if !project_dir.is_dir() {
        return ctx;
    }

    let walker = WalkDir::new(project_dir)
        .min_depth(1)
        .max_depth(2)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !(e.file_type().is_dir() && is_skipped(&e.file_name().to_string_lossy()))
        });

    for entry in walker.filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if let Some(ext) = path.extension() {
            let ext = ext.to_string_lossy();
            if !ext.is_empty() {
                ctx.file_extensions.insert(format!(".{ext}"));
            }
        }
        ctx.file_names.insert(entry.file_name().to_string_lossy().into_owned());
    }

    let mut parts: Vec<String> = Vec::new();
    if let Ok(doc) = fs::read_to_string(project_dir.join(&config.doc_file)) {
        parts.push(doc.chars().take(config.doc_char_cap).collect());
    }
    if let Some(log) = vcs.recent_log(project_dir, config.history_entries) {
        parts.push(log);
    }
    ctx.text_context = parts.join(" ").to_lowercase();

    ctx
}

fn is_skipped(name: &str) -> bool {
    SKIP_DIRS.contains(&name)
}
