//! Path resolution (C3): turning a written path, `@path`-bound alias, or
//! `@local/...`-prefixed reference into a concrete filesystem path, with
//! fuzzy suggestions when the exact file is missing.
//!
//! Grounded on the teacher's `GlobExpander` (`shell/glob_expander.rs`):
//! a small struct wrapping `Arc<dyn FileSystem>` plus the ambient cwd,
//! exposing async lookup methods rather than touching the real filesystem
//! directly. Fuzzy candidate scoring reuses `similar::TextDiff::ratio()`
//! instead of pulling in a dedicated string-distance crate, since the
//! teacher pack already depends on `similar` and this crate doesn't need
//! anything beyond a 0..1 similarity score.

use std::collections::HashMap;
use std::sync::Arc;

use similar::TextDiff;
use tokio::sync::OnceCell;

use crate::errors::InterpreterError;
use crate::fs::FileSystem;

/// Extensions tried, in order, when a bare basename without one is given
/// (§4.8 `import`/`path`).
pub const CANDIDATE_EXTENSIONS: &[&str] = &[".mld.md", ".mld", ".md"];

/// Above this similarity score a candidate is offered as "did you mean".
pub const FUZZY_MATCH_THRESHOLD: f64 = 0.6;

/// Marker files `project_root()` looks for, in search order, while
/// walking upward from `base_path` (§4.3).
const PROJECT_ROOT_MARKERS: &[&str] =
    &["mlld.config.json", "package.json", ".git", "pyproject.toml", "Cargo.toml", "pom.xml", "build.gradle", "Makefile"];

pub struct PathResolver {
    fs: Arc<dyn FileSystem>,
    project_root: String,
    aliases: HashMap<String, String>,
    discovered_root: OnceCell<String>,
}

impl PathResolver {
    pub fn new(fs: Arc<dyn FileSystem>, project_root: impl Into<String>) -> Self {
        Self { fs, project_root: project_root.into(), aliases: HashMap::new(), discovered_root: OnceCell::new() }
    }

    /// Register a `@<project-path-alias>` that [`expand_prefix`] maps
    /// straight to `path` without walking the marker search (§4.5
    /// Project-path strategy). Populating this from a config file is a
    /// configuration-loader concern and out of scope here; callers that
    /// have already resolved aliases some other way can still wire them
    /// in through this method.
    pub fn register_alias(&mut self, alias: impl Into<String>, path: impl Into<String>) {
        self.aliases.insert(alias.into(), path.into());
    }

    /// The configured root passed in at construction (e.g. the CLI
    /// `--root`), used as the starting point for [`project_root`]'s
    /// upward search.
    pub fn configured_root(&self) -> &str {
        &self.project_root
    }

    /// Walks upward from the configured root looking for
    /// `mlld.config.json`, `package.json`, `.git`, `pyproject.toml`,
    /// `Cargo.toml`, `pom.xml`, `build.gradle`, or `Makefile` (first hit
    /// wins), falling back to the configured root if none is found
    /// (§4.3). Resolved once and cached for the lifetime of this
    /// resolver.
    pub async fn project_root(&self) -> &str {
        self.discovered_root
            .get_or_init(|| async {
                let mut dir = self.project_root.clone();
                loop {
                    for marker in PROJECT_ROOT_MARKERS {
                        let candidate = self.fs.resolve_path(&dir, marker);
                        if self.fs.exists(&candidate).await {
                            return dir;
                        }
                    }
                    let parent = self.fs.resolve_path(&dir, "..");
                    if parent == dir {
                        break;
                    }
                    dir = parent;
                }
                self.project_root.clone()
            })
            .await
    }

    /// Join `path` against `base` the way the underlying filesystem would.
    pub fn join(&self, base: &str, path: &str) -> String {
        self.fs.resolve_path(base, path)
    }

    /// Expand a `@local/...` prefix, a `@.`/`@<project-path-alias>`
    /// project-path reference, or a bare project-relative prefix to an
    /// absolute-from-root path (§4.5 Project-path and Local strategies).
    /// Anything else is returned unchanged for the caller to try as a
    /// direct filesystem path or URL.
    pub async fn expand_prefix(&self, reference: &str) -> String {
        if let Some(rest) = reference.strip_prefix("@local/") {
            return self.fs.resolve_path(&self.project_root, rest);
        }
        if reference == "@." {
            return self.project_root().await.to_string();
        }
        if let Some(rest) = reference.strip_prefix("@.") {
            if let Some(rest) = rest.strip_prefix('/') {
                return self.fs.resolve_path(self.project_root().await, rest);
            }
        }
        if let Some(alias) = reference.strip_prefix('@') {
            let (name, rest) = alias.split_once('/').unwrap_or((alias, ""));
            if let Some(base) = self.aliases.get(name) {
                return if rest.is_empty() { base.clone() } else { self.fs.resolve_path(base, rest) };
            }
        }
        if reference.starts_with('/') {
            return reference.to_string();
        }
        self.fs.resolve_path(&self.project_root, reference)
    }

    /// Resolve a local (non-URL) reference to an existing file, trying
    /// the candidate extensions in order before falling back to fuzzy
    /// suggestion (§4.8). Errors with `FileNotFound`, optionally carrying
    /// a suggestion via a subsequent fuzzy-match call.
    pub async fn resolve_local(&self, base: &str, reference: &str) -> Result<String, InterpreterError> {
        let expanded = if reference.starts_with("@local/") || reference.starts_with("@.") || reference.starts_with('@') || reference.starts_with('/') {
            self.expand_prefix(reference).await
        } else {
            self.fs.resolve_path(base, reference)
        };

        if self.fs.exists(&expanded).await {
            return Ok(expanded);
        }

        for ext in CANDIDATE_EXTENSIONS {
            let candidate = format!("{expanded}{ext}");
            if self.fs.exists(&candidate).await {
                return Ok(candidate);
            }
        }

        Err(InterpreterError::FileNotFound { path: expanded })
    }

    /// Find the closest-matching sibling file when `missing` doesn't
    /// exist, used to enrich `FileNotFound`/`SectionNotFound` diagnostics.
    /// Case-insensitive basename comparison, scored by `similar`'s ratio.
    pub async fn fuzzy_suggest(&self, dir: &str, missing_basename: &str) -> Option<String> {
        let entries = self.fs.readdir(dir).await.ok()?;
        let target = missing_basename.to_lowercase();
        let mut best: Option<(String, f64)> = None;
        for entry in entries {
            let candidate = entry.to_lowercase();
            let score = TextDiff::from_chars(target.as_str(), candidate.as_str()).ratio() as f64;
            if best.as_ref().is_none_or(|(_, s)| score > *s) {
                best = Some((entry, score));
            }
        }
        best.filter(|(_, score)| *score >= FUZZY_MATCH_THRESHOLD).map(|(name, _)| name)
    }

    /// Score a single candidate heading/filename against a target, used
    /// by the section-matching fallback in the import engine (§4.8
    /// `file-content` with `# Section` selector).
    pub fn similarity(target: &str, candidate: &str) -> f64 {
        TextDiff::from_chars(target.to_lowercase().as_str(), candidate.to_lowercase().as_str()).ratio() as f64
    }

    /// Find the best-scoring heading among `candidates`, above threshold.
    pub fn best_section_match<'a>(target: &str, candidates: &'a [String]) -> Option<&'a str> {
        candidates
            .iter()
            .map(|c| (c.as_str(), Self::similarity(target, c)))
            .filter(|(_, score)| *score >= FUZZY_MATCH_THRESHOLD)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
            .map(|(c, _)| c)
    }
}
