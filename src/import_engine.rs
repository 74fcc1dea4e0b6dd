//! Import engine (C6): resolving an `import` directive's source to text,
//! parsing and evaluating it in an isolated child scope, and merging the
//! selected (or namespaced) bindings back into the importer's
//! environment with import provenance and taint attached (§4.6).
//!
//! Cycle detection rides on [`Environment`]'s shared import stack so it
//! works the same whether the cycle is two local files or a local file
//! importing a URL that (transitively) imports the local file back.
//! Integrity pinning and approval for URL imports are layered the same
//! way the teacher layers allow-list checking around its raw fetch
//! closure: fetch, hash, check/record in the lock file, only then merge
//! bindings into the caller's scope.

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::ast::{Document, ImportSelection, SourceLocation};
use crate::capabilities::{Approver, Fetcher, ImmutableCache, LockFile};
use crate::environment::Environment;
use crate::errors::InterpreterError;
use crate::fetcher::{content_hash, is_url};
use crate::fs::FileSystem;
use crate::path_resolver::PathResolver;
use crate::resolvers::ResolverRegistry;
use crate::value::Value;

/// Parses already-fetched source text into a [`Document`]. The concrete
/// Markdown/directive grammar is an external collaborator (§1); this
/// trait is the seam a real deployment plugs it into, and tests can
/// supply a fixture parser that deserializes a JSON AST directly.
pub trait DocumentParser: Send + Sync {
    fn parse(&self, source: &str) -> Result<Document, InterpreterError>;
}

/// Evaluates a parsed document against an environment, returning nothing
/// but leaving its bindings in that environment — implemented by
/// [`crate::interpreter::Interpreter`]. A trait rather than a direct
/// dependency on `Interpreter` so this module doesn't need to know the
/// interpreter's full capability set, only that it can run a document.
#[async_trait]
pub trait DocumentEvaluator: Send + Sync {
    async fn evaluate(&self, document: &Document, env: &Environment) -> Result<(), InterpreterError>;
}

pub struct ImportEngine {
    pub fs: Arc<dyn FileSystem>,
    pub path_resolver: Arc<PathResolver>,
    pub resolvers: Arc<ResolverRegistry>,
    pub fetcher: Arc<dyn Fetcher>,
    pub approver: Arc<dyn Approver>,
    pub lock_file: Arc<dyn LockFile>,
    pub cache: Arc<dyn ImmutableCache>,
    pub parser: Arc<dyn DocumentParser>,
    pub evaluator: Arc<dyn DocumentEvaluator>,
}

impl ImportEngine {
    /// Resolve `source` to text: a URL, a `@<project-alias>`/`@local/...`
    /// path, a `@user/module` registry reference, or a bare local path, in
    /// that priority order (§4.5).
    async fn load_source(&self, base: &str, source: &str) -> Result<(String, String), InterpreterError> {
        if is_url(source) {
            let text = self.load_url_source(source).await?;
            return Ok((source.to_string(), text));
        }
        if source.starts_with("@local/") || source == "@." || source.starts_with("@./") {
            let resolved = self.path_resolver.resolve_local(base, source).await?;
            let text = self
                .fs
                .read_file(&resolved)
                .await
                .map_err(|e| InterpreterError::DecodeError { path: resolved.clone(), message: e.to_string() })?;
            return Ok((resolved, text));
        }
        if let Some(resolver) = self.resolvers.find_for(source) {
            let value = resolver.resolve(source, None).await?;
            let text = crate::value::coerce_to_string(&value, crate::value::FormatContext::Inline);
            return Ok((source.to_string(), text));
        }
        let resolved = self.path_resolver.resolve_local(base, source).await?;
        let text = self
            .fs
            .read_file(&resolved)
            .await
            .map_err(|e| InterpreterError::DecodeError { path: resolved.clone(), message: e.to_string() })?;
        Ok((resolved, text))
    }

    async fn load_url_source(&self, url: &str) -> Result<String, InterpreterError> {
        if let Some(entry) = self.lock_file.lookup_import(url).await {
            if let Some(cached) = self.cache.get(&entry.integrity).await {
                return String::from_utf8(cached).map_err(|e| InterpreterError::DecodeError { path: url.to_string(), message: e.to_string() });
            }
            if entry.trust == "always" {
                let response = self.fetcher.fetch(url).await?;
                let hash = content_hash(&response.body);
                if hash != entry.integrity {
                    return Err(InterpreterError::IntegrityMismatch { url: url.to_string(), expected: entry.integrity, actual: hash });
                }
                self.cache.put(&hash, &response.body).await;
                return String::from_utf8(response.body).map_err(|e| InterpreterError::DecodeError { path: url.to_string(), message: e.to_string() });
            }
        }

        let response = self.fetcher.fetch(url).await?;
        let hash = content_hash(&response.body);
        if !self.approver.approve_import(url, &hash).await? {
            return Err(InterpreterError::ApprovalDenied { url: url.to_string() });
        }
        self.lock_file.record_import(url, &response.final_url, &hash, "user", "session", None).await?;
        self.cache.put(&hash, &response.body).await;
        String::from_utf8(response.body).map_err(|e| InterpreterError::DecodeError { path: url.to_string(), message: e.to_string() })
    }

    /// Execute an `import` directive: load, parse, evaluate in a fresh
    /// module scope, then merge the requested bindings into `importer`.
    pub async fn import(
        &self,
        importer: &Environment,
        source: &str,
        selection: &ImportSelection,
        location: &SourceLocation,
    ) -> Result<(), InterpreterError> {
        let is_local_path = !is_url(source) && !source.starts_with('@');
        let import_key = if is_local_path { self.path_resolver.join(&importer.base_path, source) } else { source.to_string() };

        importer.push_import(&import_key)?;
        let result = self.import_inner(importer, source, &import_key, selection, location).await;
        importer.pop_import();
        result
    }

    async fn import_inner(
        &self,
        importer: &Environment,
        source: &str,
        import_key: &str,
        selection: &ImportSelection,
        location: &SourceLocation,
    ) -> Result<(), InterpreterError> {
        let (resolved_path, text) = self.load_source(&importer.base_path, source).await?;
        let document = self.parser.parse(&text)?;

        let module_base = parent_dir(&resolved_path);
        let module_env = importer.create_module_child(module_base, resolved_path.clone());
        self.evaluator.evaluate(&document, &module_env).await?;

        let extra_taint: &[&str] = if is_url(source) { &["src:imported", "src:network"] } else { &["src:imported"] };

        match selection {
            ImportSelection::Selected(bindings) => {
                for binding in bindings {
                    let value = module_env.get(&binding.name).ok_or_else(|| InterpreterError::ImportExportMissing {
                        name: binding.name.clone(),
                        module: import_key.to_string(),
                    })?;
                    let bound_name = binding.alias.clone().unwrap_or_else(|| binding.name.clone());
                    let imported = value.into_imported(import_key, extra_taint);
                    importer.set_imported(&bound_name, imported, location)?;
                }
            }
            ImportSelection::Namespace { alias } => {
                let mut fields = IndexMap::new();
                for (name, value) in module_env.all() {
                    fields.insert(name, value);
                }
                let namespace = Value::of_object(alias.clone(), fields, location.clone()).into_imported(import_key, extra_taint);
                importer.set_imported(alias, namespace, location)?;
            }
        }
        Ok(())
    }
}

fn parent_dir(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => path[..idx].to_string(),
        None => ".".to_string(),
    }
}
