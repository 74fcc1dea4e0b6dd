//! Resolvers (C5): named providers for `@prefix/...` import sources and
//! ambient ``@now``/``@input``/``@base`` references (§4.2, §4.6).
//!
//! `ResolverRegistry` is grounded on the teacher's `CommandRegistry`
//! (`commands/registry.rs`): a name-keyed map of `Box<dyn Trait>`, with
//! `register`/`get`/`names`/`contains`. Unlike the teacher's registry,
//! names here are reserved at construction time against the same
//! `reserved_names` set the [`crate::environment::Environment`] enforces,
//! so a resolver can never silently shadow `now`/`input`/`debug`/`base`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::SecondsFormat;

use crate::ast::SourceLocation;
use crate::capabilities::{Clock, Fetcher};
use crate::errors::InterpreterError;
use crate::value::{JsonValue, Value};

/// A named provider invoked for `@name/...` import sources or for a bare
/// ambient reference like `@now`.
#[async_trait]
pub trait Resolver: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this resolver claims `reference` (its own name, or a
    /// `name/` prefix for namespaced resolvers).
    fn matches(&self, reference: &str) -> bool {
        reference == self.name() || reference.starts_with(&format!("{}/", self.name()))
    }

    async fn resolve(&self, reference: &str, input: Option<&str>) -> Result<Value, InterpreterError>;
}

pub struct ResolverRegistry {
    resolvers: HashMap<String, Arc<dyn Resolver>>,
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self { resolvers: HashMap::new() }
    }

    /// Register a resolver, rejecting one whose name is already taken.
    pub fn register(&mut self, resolver: Arc<dyn Resolver>) -> Result<(), InterpreterError> {
        let name = resolver.name().to_string();
        if self.resolvers.contains_key(&name) {
            return Err(InterpreterError::ReservedName { name });
        }
        self.resolvers.insert(name, resolver);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Resolver>> {
        self.resolvers.get(name).cloned()
    }

    pub fn find_for(&self, reference: &str) -> Option<Arc<dyn Resolver>> {
        self.resolvers.values().find(|r| r.matches(reference)).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.resolvers.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolvers.contains_key(name)
    }
}

impl Default for ResolverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// `@now` — the current timestamp, RFC3339 with second precision, via the
/// injected [`Clock`] so tests are deterministic.
pub struct NowResolver {
    pub clock: Arc<dyn Clock>,
}

#[async_trait]
impl Resolver for NowResolver {
    fn name(&self) -> &str {
        "now"
    }

    async fn resolve(&self, _reference: &str, _input: Option<&str>) -> Result<Value, InterpreterError> {
        let text = self.clock.now().to_rfc3339_opts(SecondsFormat::Secs, true);
        Ok(Value::of_simple_text("now", text, SourceLocation::default()))
    }
}

/// `@input` — the ambient input payload supplied to the interpretation
/// run (e.g. stdin or a CLI argument), auto-parsed as JSON when it looks
/// like an object/array (§4.2).
pub struct InputResolver {
    pub raw: String,
}

#[async_trait]
impl Resolver for InputResolver {
    fn name(&self) -> &str {
        "input"
    }

    async fn resolve(&self, _reference: &str, _input: Option<&str>) -> Result<Value, InterpreterError> {
        match JsonValue::try_parse(&self.raw) {
            Some(json) => Ok(Value::of_structured("input", json, SourceLocation::default())),
            None => Ok(Value::of_simple_text("input", self.raw.clone(), SourceLocation::default())),
        }
    }
}

/// `@base` — the project root path.
pub struct BaseResolver {
    pub project_root: String,
}

#[async_trait]
impl Resolver for BaseResolver {
    fn name(&self) -> &str {
        "base"
    }

    async fn resolve(&self, _reference: &str, _input: Option<&str>) -> Result<Value, InterpreterError> {
        Ok(Value::of_simple_text("base", self.project_root.clone(), SourceLocation::default()))
    }
}

/// Names already claimed by a non-registry strategy (§4.5 priority 1, 3,
/// 5): `@<seg>/...` references whose leading segment is one of these
/// never reach [`RegistryResolver`], since those strategies are tried
/// first and ambiguity resolution gives the first match the win.
const NON_REGISTRY_SEGMENTS: &[&str] = &["local", "now", "input", "base", "debug", "."];

/// `@user/<module>` — the lowest-priority "fetch from the configured
/// registry" strategy (§4.5 priority 2): any `@<segment>/<rest>`
/// reference whose leading segment isn't a project-path alias, `local`,
/// or a builtin name is treated as a registry module id and fetched
/// from a single configured registry index over HTTP, delegating the
/// actual transport/allow-list/integrity work to the injected
/// [`Fetcher`]. Resolving only returns the raw text; the import engine
/// is responsible for parsing/evaluating it.
pub struct RegistryResolver {
    pub registry_base_url: String,
    pub fetcher: Arc<dyn Fetcher>,
}

#[async_trait]
impl Resolver for RegistryResolver {
    fn name(&self) -> &str {
        "registry"
    }

    fn matches(&self, reference: &str) -> bool {
        let Some(rest) = reference.strip_prefix('@') else { return false };
        let Some((head, module)) = rest.split_once('/') else { return false };
        !head.is_empty() && !module.is_empty() && !NON_REGISTRY_SEGMENTS.contains(&head)
    }

    async fn resolve(&self, reference: &str, _input: Option<&str>) -> Result<Value, InterpreterError> {
        let module = reference
            .strip_prefix('@')
            .ok_or_else(|| InterpreterError::UrlValidation { url: reference.to_string(), message: "missing module path".into() })?;
        let url = format!("{}/{}", self.registry_base_url.trim_end_matches('/'), module);
        let response = self.fetcher.fetch(&url).await?;
        let text = String::from_utf8(response.body).map_err(|e| InterpreterError::DecodeError {
            path: url,
            message: e.to_string(),
        })?;
        let mut value = Value::of_file_content(module.to_string(), text, SourceLocation::default());
        value.metadata.resolver_name = Some("registry".to_string());
        Ok(value)
    }
}

/// A bare `https://...`/`http://...` reference, fetched directly.
pub struct HttpResolver {
    pub fetcher: Arc<dyn Fetcher>,
}

#[async_trait]
impl Resolver for HttpResolver {
    fn name(&self) -> &str {
        "http"
    }

    fn matches(&self, reference: &str) -> bool {
        crate::fetcher::is_url(reference)
    }

    async fn resolve(&self, reference: &str, _input: Option<&str>) -> Result<Value, InterpreterError> {
        let response = self.fetcher.fetch(reference).await?;
        let text = String::from_utf8(response.body).map_err(|e| InterpreterError::DecodeError {
            path: reference.to_string(),
            message: e.to_string(),
        })?;
        Ok(Value::of_file_content(reference.to_string(), text, SourceLocation::default()))
    }
}

/// Bind every ambient resolver's current value into a fresh child scope's
/// ``ctx`` surface, so interpolation can read `@now`/`@input`/`@base`
/// like any other reference without the environment needing to know how
/// each one is computed (§4.2). `@debug` is intentionally excluded: it is
/// served lazily straight out of [`crate::environment::Environment::get`].
pub async fn bind_ambient_context(
    env: &crate::environment::Environment,
    now: &NowResolver,
    input: &InputResolver,
    base: &BaseResolver,
) -> Result<(), InterpreterError> {
    let loc = SourceLocation::default();
    env.set("now", now.resolve("now", None).await?, &loc)?;
    env.set("input", input.resolve("input", None).await?, &loc)?;
    env.set("base", base.resolve("base", None).await?, &loc)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::SystemClock;

    struct FixedClock(chrono::DateTime<chrono::Utc>);
    impl Clock for FixedClock {
        fn now(&self) -> chrono::DateTime<chrono::Utc> {
            self.0
        }
    }

    #[tokio::test]
    async fn now_resolver_uses_injected_clock() {
        let fixed = chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&chrono::Utc);
        let resolver = NowResolver { clock: Arc::new(FixedClock(fixed)) };
        let v = resolver.resolve("now", None).await.unwrap();
        assert_eq!(crate::value::coerce_to_string(&v, crate::value::FormatContext::Inline), "2026-01-01T00:00:00Z");
    }

    #[tokio::test]
    async fn input_resolver_parses_json_object() {
        let resolver = InputResolver { raw: r#"{"a":1}"#.to_string() };
        let v = resolver.resolve("input", None).await.unwrap();
        assert_eq!(v.kind(), crate::value::ValueKind::StructuredValue);
    }

    #[tokio::test]
    async fn input_resolver_keeps_plain_text_as_text() {
        let resolver = InputResolver { raw: "hello".to_string() };
        let v = resolver.resolve("input", None).await.unwrap();
        assert_eq!(v.kind(), crate::value::ValueKind::SimpleText);
    }

    #[test]
    fn registry_rejects_duplicate_names() {
        let mut reg = ResolverRegistry::new();
        reg.register(Arc::new(NowResolver { clock: Arc::new(SystemClock) })).unwrap();
        let err = reg.register(Arc::new(NowResolver { clock: Arc::new(SystemClock) })).unwrap_err();
        assert!(matches!(err, InterpreterError::ReservedName { .. }));
    }

    #[test]
    fn find_for_matches_namespaced_reference() {
        let mut reg = ResolverRegistry::new();
        reg.register(Arc::new(BaseResolver { project_root: "/proj".into() })).unwrap();
        assert!(reg.find_for("base").is_some());
    }

    #[test]
    fn registry_resolver_matches_non_reserved_namespaced_refs() {
        let resolver = RegistryResolver { registry_base_url: "https://registry.example".into(), fetcher: Arc::new(NoopFetcher) };
        assert!(resolver.matches("@myorg/mod"));
        assert!(!resolver.matches("@local/mod"));
        assert!(!resolver.matches("@now"));
        assert!(!resolver.matches("@base"));
    }

    #[tokio::test]
    async fn registry_resolver_fetches_from_configured_base_url() {
        struct EchoFetcher;
        #[async_trait]
        impl Fetcher for EchoFetcher {
            async fn fetch(&self, url: &str) -> Result<crate::capabilities::FetchResponse, InterpreterError> {
                Ok(crate::capabilities::FetchResponse { body: url.as_bytes().to_vec(), final_url: url.to_string(), status: 200, headers: std::collections::HashMap::new() })
            }
        }
        let resolver = RegistryResolver { registry_base_url: "https://registry.example".into(), fetcher: Arc::new(EchoFetcher) };
        let value = resolver.resolve("@myorg/mod", None).await.unwrap();
        assert_eq!(crate::value::coerce_to_string(&value, crate::value::FormatContext::Inline), "https://registry.example/myorg/mod");
    }

    #[test]
    fn http_resolver_matches_only_urls() {
        let fetcher: Arc<dyn Fetcher> = Arc::new(NoopFetcher);
        let resolver = HttpResolver { fetcher };
        assert!(resolver.matches("https://example.com/a.mld"));
        assert!(!resolver.matches("@local/a.mld"));
    }

    struct NoopFetcher;
    #[async_trait]
    impl Fetcher for NoopFetcher {
        async fn fetch(&self, url: &str) -> Result<crate::capabilities::FetchResponse, InterpreterError> {
            Err(InterpreterError::UrlValidation { url: url.to_string(), message: "noop".into() })
        }
    }
}
