//! Interpreter (top-level C8 document walker): turns a parsed [`Document`]
//! into rendered text by walking its nodes in order, dispatching leaf
//! directives to [`crate::directives`] and handling the composite kinds
//! (`when`, `for`, `loop`, `hook`, `guard`) itself since they recurse into
//! a nested body that the directive dispatcher doesn't own.
//!
//! Mirrors the teacher's `Bash` facade: one struct holding every injected
//! capability, with a single public entry point (`run`) that a thin CLI
//! or an embedder calls once per document.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::ast::{Document, DocumentNode, DirectiveNode, DirectiveValues, RunSpec};
use crate::capabilities::{Approver, Clock, ImmutableCache, LockFile};
use crate::directives::{self, BodyEvaluator, DirectiveContext};
use crate::environment::Environment;
use crate::errors::{DirectiveError, InterpreterError};
use crate::executor::{DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_TIMEOUT_MS, ProcessRunner};
use crate::fetcher::Fetcher;
use crate::fs::FileSystem;
use crate::import_engine::{DocumentEvaluator, DocumentParser, ImportEngine};
use crate::path_resolver::PathResolver;
use crate::resolvers::{BaseResolver, InputResolver, NowResolver, RegistryResolver, ResolverRegistry, bind_ambient_context};
use crate::transform_stream::TransformStream;
use crate::value::AccessMode;

/// Tunables that don't belong to any single capability (§6.2's
/// `ExecutorConfig`/`ImportConfig`, concretized as plain fields rather than
/// a config-file struct since no config loader exists in this crate).
#[derive(Debug, Clone, Copy)]
pub struct InterpreterOptions {
    pub timeout_ms: u64,
    pub max_output_bytes: usize,
    pub access_mode: AccessMode,
    /// Hard ceiling on `loop` iterations, guarding against a condition that
    /// never turns falsy.
    pub max_loop_iterations: u32,
}

impl Default for InterpreterOptions {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            access_mode: AccessMode::Strict,
            max_loop_iterations: 10_000,
        }
    }
}

/// The interpretation entry point: owns every injected capability and
/// walks a document's nodes into rendered output, mirroring the teacher's
/// `Bash` struct wrapping its `FileSystem` over the interpreter loop.
pub struct Interpreter {
    pub import_engine: Arc<ImportEngine>,
    pub runner: Arc<dyn ProcessRunner>,
    pub resolvers: Arc<ResolverRegistry>,
    pub path_resolver: Arc<PathResolver>,
    pub options: InterpreterOptions,
}

impl Interpreter {
    /// Assemble an interpreter from its raw capabilities, wiring the
    /// built-in `@now`/`@input`/`@base`/`http(s)` resolvers the way
    /// [`bind_ambient_context`] expects them to already be registered.
    pub fn new(
        fs: Arc<dyn FileSystem>,
        fetcher: Arc<dyn Fetcher>,
        approver: Arc<dyn Approver>,
        lock_file: Arc<dyn LockFile>,
        cache: Arc<dyn ImmutableCache>,
        parser: Arc<dyn DocumentParser>,
        runner: Arc<dyn ProcessRunner>,
        clock: Arc<dyn Clock>,
        project_root: impl Into<String>,
        registry_base_url: impl Into<String>,
        options: InterpreterOptions,
    ) -> Arc<Self> {
        let project_root = project_root.into();
        let path_resolver = Arc::new(PathResolver::new(Arc::clone(&fs), project_root.clone()));

        let mut resolvers = ResolverRegistry::new();
        resolvers.register(Arc::new(NowResolver { clock })).expect("now resolver registers once");
        resolvers
            .register(Arc::new(crate::resolvers::HttpResolver { fetcher: Arc::clone(&fetcher) }))
            .expect("http resolver registers once");
        resolvers
            .register(Arc::new(RegistryResolver { registry_base_url: registry_base_url.into(), fetcher: Arc::clone(&fetcher) }))
            .expect("registry resolver registers once");
        let resolvers = Arc::new(resolvers);

        Arc::new_cyclic(|weak: &std::sync::Weak<Interpreter>| {
            let evaluator = WeakEvaluator { inner: weak.clone() };
            let import_engine = Arc::new(ImportEngine {
                fs,
                path_resolver: Arc::clone(&path_resolver),
                resolvers: Arc::clone(&resolvers),
                fetcher,
                approver,
                lock_file,
                cache,
                parser,
                evaluator: Arc::new(evaluator),
            });
            Self { import_engine, runner, resolvers, path_resolver, options }
        })
    }

    /// Interpret a document against a freshly bound root environment and
    /// return its rendered output.
    pub async fn run(&self, document: &Document, env: &Environment, input: &InputResolver) -> Result<String, DirectiveError> {
        let base = BaseResolver { project_root: self.path_resolver.project_root().await.to_string() };
        bind_ambient_context(env, &self.now_resolver(), input, &base).await?;
        self.render_nodes(&document.nodes, env).await
    }

    fn now_resolver(&self) -> NowResolver {
        NowResolver { clock: Arc::new(crate::capabilities::SystemClock) }
    }

    fn ctx<'a>(&'a self, env: &'a Environment) -> DirectiveContext<'a> {
        DirectiveContext {
            env,
            import_engine: &self.import_engine,
            runner: self.runner.as_ref(),
            resolvers: &self.resolvers,
            path_resolver: &self.path_resolver,
            body: self,
            timeout_ms: self.options.timeout_ms,
            max_output_bytes: self.options.max_output_bytes,
            access_mode: self.options.access_mode,
        }
    }

    /// Walk a sequence of document nodes into a rendered string, boxed
    /// because `when`/`for`/`loop` bodies recurse back into this same
    /// function through `dispatch_directive`.
    fn render_nodes<'a>(&'a self, nodes: &'a [DocumentNode], env: &'a Environment) -> Pin<Box<dyn Future<Output = Result<String, DirectiveError>> + 'a>> {
        Box::pin(async move {
            let mut stream = TransformStream::new();
            for node in nodes {
                match node {
                    DocumentNode::Text(text) => stream.push_text(text.clone()),
                    DocumentNode::CodeFence { language, source } => {
                        let lang = language.as_deref().unwrap_or("");
                        stream.push_text(format!("```{lang}\n{source}\n```\n"));
                    }
                    DocumentNode::Directive(directive) => {
                        stream.push_directive_placeholder(directive.id.clone(), directive.location.clone());
                        let rendered = self.dispatch_directive(directive, env).await?;
                        stream.resolve(&directive.id, &directive.location, rendered.unwrap_or_default());
                    }
                }
            }
            Ok(stream.render())
        })
    }

    async fn dispatch_directive(&self, node: &DirectiveNode, env: &Environment) -> Result<Option<String>, DirectiveError> {
        match &node.values {
            DirectiveValues::When { clauses } => {
                let ctx = self.ctx(env);
                for clause in clauses {
                    let matches = match &clause.condition {
                        Some(cond) => directives::evaluate_condition(&ctx, cond).await?,
                        None => true,
                    };
                    if matches {
                        let child = env.create_child();
                        let text = self.render_nodes(&clause.body, &child).await?;
                        env.merge_child(&child, &bound_names(&clause.body), &node.location)?;
                        return Ok(Some(text));
                    }
                }
                Ok(None)
            }
            DirectiveValues::For { binding, iterable, body } => {
                let ctx = self.ctx(env);
                let items = directives::evaluate_for_iterable(&ctx, iterable).await?;
                let mut out = String::new();
                for item in items {
                    let child = env.create_child();
                    child.set_parameter(binding, item)?;
                    out.push_str(&self.render_nodes(body, &child).await?);
                }
                Ok(Some(out))
            }
            DirectiveValues::Loop { condition, body } => {
                let mut out = String::new();
                let mut iterations = 0u32;
                loop {
                    let ctx = self.ctx(env);
                    if !directives::evaluate_condition(&ctx, condition).await? {
                        break;
                    }
                    iterations += 1;
                    if iterations > self.options.max_loop_iterations {
                        return Err(InterpreterError::ExecutionTimeout {
                            command: "loop".to_string(),
                            timeout_ms: self.options.timeout_ms,
                        }
                        .into());
                    }
                    let child = env.create_child();
                    out.push_str(&self.render_nodes(body, &child).await?);
                }
                Ok(Some(out))
            }
            DirectiveValues::Hook { body, .. } => {
                // Hook/guard wrapping of registered executables is
                // explicitly non-core (§4.10); a hook's body is parsed
                // and held as a definition-only placeholder, never run at
                // its document position.
                let _ = body;
                Ok(None)
            }
            DirectiveValues::Guard { condition, retry } => {
                let ctx = self.ctx(env);
                if directives::evaluate_condition(&ctx, condition).await? {
                    return Ok(None);
                }
                if let Some(spec) = retry {
                    let _ = run_retry(&ctx, spec).await;
                }
                Ok(None)
            }
            _ => {
                let ctx = self.ctx(env);
                directives::evaluate_directive(&ctx, node).await
            }
        }
    }
}

async fn run_retry(ctx: &DirectiveContext<'_>, spec: &RunSpec) -> Result<(), DirectiveError> {
    directives::evaluate_directive(
        ctx,
        &DirectiveNode {
            id: "__guard_retry__".to_string(),
            subtype: None,
            values: DirectiveValues::Run { spec: spec.clone(), pipeline: Vec::new(), bind_as: None },
            raw: String::new(),
            location: crate::ast::SourceLocation::default(),
        },
    )
    .await
    .map(|_| ())
}

/// Names a `when`/clause body binds at its own scope level (top-level
/// `var`/`exe`/`path`/`define` directives only — nested composite bodies
/// publish their own names through their own `merge_child` call).
fn bound_names(body: &[DirectiveNode]) -> Vec<String> {
    body.iter()
        .filter_map(|node| match &node.values {
            DirectiveValues::Var { name, .. } => Some(name.clone()),
            DirectiveValues::Exe { name, .. } => Some(name.clone()),
            DirectiveValues::Define { name, .. } => Some(name.clone()),
            DirectiveValues::Path { name, .. } => Some(name.clone()),
            _ => None,
        })
        .collect()
}

#[async_trait]
impl BodyEvaluator for Interpreter {
    async fn evaluate_body(&self, body: &[DirectiveNode], env: &Environment) -> Result<String, DirectiveError> {
        self.render_nodes(body, env).await
    }
}

/// Adapts `Interpreter` to the [`DocumentEvaluator`] seam `ImportEngine`
/// depends on, without `ImportEngine` needing to know about `Interpreter`
/// at all (the two modules would otherwise form a cycle). Holds a `Weak`
/// because `ImportEngine` is itself owned by `Interpreter`.
struct WeakEvaluator {
    inner: std::sync::Weak<Interpreter>,
}

#[async_trait]
impl DocumentEvaluator for WeakEvaluator {
    async fn evaluate(&self, document: &Document, env: &Environment) -> Result<(), InterpreterError> {
        let interpreter = self.inner.upgrade().expect("interpreter outlives its own import engine");
        interpreter.render_nodes(&document.nodes, env).await.map(|_| ()).map_err(|e| e.error)
    }
}
