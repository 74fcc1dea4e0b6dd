//! Directive evaluation (C8): per-kind handlers for directives that don't
//! themselves recurse into a nested body. Composite directives (`when`,
//! `for`, `loop`, `hook`, `guard`) walk their bodies through the injected
//! [`BodyEvaluator`] rather than calling back into this module directly,
//! so directive evaluation doesn't need to know about the top-level
//! document-walking loop that lives in `crate::interpreter`.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::ast::{
    DirectiveKind, DirectiveNode, DirectiveValues, ExecutableBody, FieldRef, Invocation,
    JsonLiteral, RhsValue, RunSpec, SourceLocation, Template, TemplatePart,
};
use crate::environment::Environment;
use crate::errors::{DirectiveError, InterpreterError};
use crate::executor::{bind_parameters, execute_shell, run_pipeline, FailurePolicy, ProcessRunner};
use crate::fetcher::is_url;
use crate::import_engine::ImportEngine;
use crate::interpolation::{render_template, resolve_reference};
use crate::path_resolver::PathResolver;
use crate::resolvers::ResolverRegistry;
use crate::value::{
    coerce_to_string, is_truthy, AccessMode, CommandResultValue, ExecutableValue, FormatContext,
    JsonValue, PathValue, Primitive, Value, ValuePayload,
};

/// Evaluates a directive body recursively, returning the document text it
/// rendered. Implemented by [`crate::interpreter::Interpreter`].
#[async_trait]
pub trait BodyEvaluator: Send + Sync {
    async fn evaluate_body(&self, body: &[DirectiveNode], env: &Environment) -> Result<String, DirectiveError>;
}

/// Everything a single directive's evaluation needs from the outside
/// world, bundled so handlers don't each take half a dozen parameters.
/// `Copy` because every field is a borrow or a plain scalar — rebinding
/// `env` for a call scope is just `let mut inner = *ctx; inner.env = &child;`.
#[derive(Clone, Copy)]
pub struct DirectiveContext<'a> {
    pub env: &'a Environment,
    pub import_engine: &'a ImportEngine,
    pub runner: &'a dyn ProcessRunner,
    pub resolvers: &'a ResolverRegistry,
    pub path_resolver: &'a PathResolver,
    pub body: &'a dyn BodyEvaluator,
    pub timeout_ms: u64,
    pub max_output_bytes: usize,
    pub access_mode: AccessMode,
}

/// Evaluate a leaf directive, returning the text it contributes to the
/// document (`None` for directives that produce no output, e.g. `var`).
pub async fn evaluate_directive(ctx: &DirectiveContext<'_>, node: &DirectiveNode) -> Result<Option<String>, DirectiveError> {
    evaluate_inner(ctx, &node.values, &node.location)
        .await
        .map_err(|e| e.with_context(node.kind(), node.location.clone()))
}

async fn evaluate_inner(ctx: &DirectiveContext<'_>, values: &DirectiveValues, location: &SourceLocation) -> Result<Option<String>, DirectiveError> {
    match values {
        DirectiveValues::Var { name, rhs } => {
            let mut value = eval_rhs(ctx, rhs).await?;
            value.name = name.clone();
            value.source.directive = Some(DirectiveKind::Var);
            ctx.env.set(name, value, location)?;
            Ok(None)
        }
        DirectiveValues::Exe { name, params, body } => {
            let exe = ExecutableValue { parameters: params.iter().map(|p| p.name.clone()).collect(), body: body.clone() };
            let mut value = Value::of_executable(name.clone(), exe, location.clone());
            value.source.directive = Some(DirectiveKind::Exe);
            ctx.env.set(name, value, location)?;
            Ok(None)
        }
        DirectiveValues::Define { name, params, template } => {
            let body = ExecutableBody::Template { template: template.clone() };
            let exe = ExecutableValue { parameters: params.iter().map(|p| p.name.clone()).collect(), body };
            let mut value = Value::of_executable(name.clone(), exe, location.clone());
            value.source.directive = Some(DirectiveKind::Define);
            ctx.env.set(name, value, location)?;
            Ok(None)
        }
        DirectiveValues::Run { spec, pipeline, bind_as } => {
            let stages = run_spec_stages(ctx, spec, pipeline).await?;
            let policy = FailurePolicy::FailFast;
            let outcomes = run_pipeline(ctx.runner, &stages, &ctx.env.base_path, ctx.timeout_ms, ctx.max_output_bytes, policy)
                .await
                .map_err(DirectiveError::from)?;
            let last = outcomes.into_iter().next_back().transpose().map_err(DirectiveError::from)?;
            let result = last.unwrap_or_else(|| CommandResultValue { stdout: String::new(), data: None, exit_code: 0 });
            match bind_as {
                Some(name) => {
                    let value = Value::of_command_result(name.clone(), result, location.clone());
                    ctx.env.set(name, value, location)?;
                    Ok(None)
                }
                None => Ok(Some(result.stdout)),
            }
        }
        DirectiveValues::Show { payload, pipeline } => {
            let value = eval_rhs(ctx, payload).await?;
            let text = coerce_to_string(&value, FormatContext::Block);
            let stages = pipeline.iter().map(|stage| stage_to_literal(ctx, &stage.command)).collect::<Result<Vec<_>, DirectiveError>>()?;
            if stages.is_empty() {
                return Ok(Some(text));
            }
            let mut all_stages = vec![bind_parameters("{{__MLD_PIPE__}}", &[("__MLD_PIPE__".to_string(), text)])];
            all_stages.extend(stages);
            let outcomes = run_pipeline(ctx.runner, &all_stages, &ctx.env.base_path, ctx.timeout_ms, ctx.max_output_bytes, FailurePolicy::FailFast)
                .await
                .map_err(DirectiveError::from)?;
            let last = outcomes.into_iter().next_back().transpose().map_err(DirectiveError::from)?;
            Ok(Some(last.map(|r| r.stdout).unwrap_or_default()))
        }
        DirectiveValues::Import { source, selection } => {
            let rendered = render_template(ctx.env, source, ctx.access_mode, FormatContext::Inline)?;
            ctx.import_engine.import(ctx.env, &rendered, selection, location).await?;
            Ok(None)
        }
        DirectiveValues::Path { name, target } => {
            let rendered = render_template(ctx.env, target, ctx.access_mode, FormatContext::Inline)?;
            let url = is_url(&rendered);
            let expanded = if url { rendered } else { ctx.path_resolver.expand_prefix(&rendered).await };
            let path_value = PathValue { raw: expanded, is_url: url, is_absolute: !url, allowed_protocols: Vec::new() };
            let mut value = Value::of_path(name.clone(), path_value, location.clone());
            value.source.directive = Some(DirectiveKind::Path);
            ctx.env.set(name, value, location)?;
            Ok(None)
        }
        DirectiveValues::Output { payload, sink } => {
            let value = eval_rhs(ctx, payload).await?;
            let text = coerce_to_string(&value, FormatContext::OutputLiteral);
            match sink {
                None => Ok(Some(text)),
                Some(sink_template) => {
                    let path = render_template(ctx.env, sink_template, ctx.access_mode, FormatContext::Inline)?;
                    let resolved = ctx.path_resolver.expand_prefix(&path).await;
                    ctx.import_engine
                        .fs
                        .write_file(&resolved, text.as_bytes())
                        .await
                        .map_err(|e| InterpreterError::DecodeError { path: resolved, message: e.to_string() })?;
                    Ok(None)
                }
            }
        }
        DirectiveValues::Comment { .. } => Ok(None),
        DirectiveValues::When { .. }
        | DirectiveValues::For { .. }
        | DirectiveValues::Loop { .. }
        | DirectiveValues::Hook { .. }
        | DirectiveValues::Guard { .. } => {
            unreachable!("composite directive bodies are walked by the document evaluator, not dispatched here")
        }
    }
}

/// Evaluate the `when` condition of a `when`/`guard` directive (§4.8).
pub async fn evaluate_condition(ctx: &DirectiveContext<'_>, condition: &RhsValue) -> Result<bool, DirectiveError> {
    Ok(is_truthy(&eval_rhs(ctx, condition).await?))
}

/// Evaluate the iterable of a `for` directive into the sequence of items
/// to bind one at a time (§4.8). Arrays iterate their elements, objects
/// iterate `{key, value}` pairs, everything else is treated as a single-
/// item sequence.
pub async fn evaluate_for_iterable(ctx: &DirectiveContext<'_>, iterable: &RhsValue) -> Result<Vec<Value>, DirectiveError> {
    let value = eval_rhs(ctx, iterable).await?;
    let inner = value.unwrap_imported();
    match &inner.payload {
        ValuePayload::Array(items) => Ok(items.clone()),
        ValuePayload::Object(fields) => Ok(fields
            .iter()
            .map(|(k, v)| {
                let mut pair = IndexMap::new();
                pair.insert("key".to_string(), Value::of_simple_text("key", k.clone(), SourceLocation::default()));
                pair.insert("value".to_string(), v.clone());
                Value::of_object(k.clone(), pair, SourceLocation::default())
            })
            .collect()),
        ValuePayload::StructuredValue(JsonValue::Array(items)) => Ok(items
            .iter()
            .map(|j| Value::of_structured("_item", j.clone(), SourceLocation::default()))
            .collect()),
        _ => Ok(vec![inner.clone()]),
    }
}

/// Evaluate a right-hand side expression to a [`Value`]. Boxed because
/// `Invocation`/`Run` RHS values can themselves contain nested RHS values
/// as call arguments — async fns can't recurse into themselves directly.
pub fn eval_rhs<'a>(ctx: &'a DirectiveContext<'a>, rhs: &'a RhsValue) -> Pin<Box<dyn Future<Output = Result<Value, DirectiveError>> + 'a>> {
    Box::pin(async move {
        match rhs {
            RhsValue::Literal(template) => eval_literal_template(ctx, template),
            RhsValue::Json(json) => Ok(json_literal_to_value("_", json, &SourceLocation::default())),
            RhsValue::Reference(reference) => resolve_reference(ctx.env, reference, ctx.access_mode).map_err(DirectiveError::from),
            RhsValue::CodeFence { language, source } => eval_code_fence(ctx, language.as_deref().unwrap_or("bash"), source).await,
            RhsValue::Invocation(invocation) => eval_invocation(ctx, invocation).await,
            RhsValue::Run(spec) => {
                let result = eval_run_spec(ctx, spec).await?;
                Ok(Value::of_command_result("_result", result, SourceLocation::default()))
            }
            RhsValue::FileContent { path, section } => eval_file_content(ctx, path, section.as_ref()).await,
        }
    })
}

fn eval_literal_template(ctx: &DirectiveContext<'_>, template: &Template) -> Result<Value, DirectiveError> {
    let rendered = render_template(ctx.env, template, ctx.access_mode, FormatContext::Inline)?;
    let value = if template.has_interpolation() {
        Value::of_interpolated_text("_", rendered, SourceLocation::default())
    } else {
        Value::of_simple_text("_", rendered, SourceLocation::default())
    };
    Ok(value)
}

fn json_literal_to_value(name: &str, literal: &JsonLiteral, at: &SourceLocation) -> Value {
    match literal {
        JsonLiteral::Null => Value::of_primitive(name, Primitive::Null, at.clone()),
        JsonLiteral::Bool(b) => Value::of_primitive(name, Primitive::Bool(*b), at.clone()),
        JsonLiteral::Number(n) => Value::of_primitive(name, Primitive::Number(*n), at.clone()),
        JsonLiteral::String(s) => Value::of_primitive(name, Primitive::Str(s.clone()), at.clone()),
        JsonLiteral::Array(items) => {
            let values = items.iter().enumerate().map(|(i, item)| json_literal_to_value(&i.to_string(), item, at)).collect();
            Value::of_array(name, values, at.clone())
        }
        JsonLiteral::Object(fields) => {
            let mut map = IndexMap::new();
            for (k, v) in fields {
                map.insert(k.clone(), json_literal_to_value(k, v, at));
            }
            Value::of_object(name, map, at.clone())
        }
    }
}

async fn eval_code_fence(ctx: &DirectiveContext<'_>, language: &str, source: &str) -> Result<Value, DirectiveError> {
    let timeout = std::time::Duration::from_millis(ctx.timeout_ms);
    let outcome = tokio::time::timeout(timeout, ctx.runner.run_code(language, source, &ctx.env.base_path, timeout))
        .await
        .map_err(|_| InterpreterError::ExecutionTimeout { command: source.to_string(), timeout_ms: ctx.timeout_ms })?
        .map_err(DirectiveError::from)?;
    let stdout = outcome.stdout;
    if outcome.exit_code != 0 {
        return Err(InterpreterError::CommandExecution {
            command: source.to_string(),
            exit_code: outcome.exit_code,
            stdout,
            stderr: outcome.stderr,
            duration_ms: 0,
        }
        .into());
    }
    let data = JsonValue::try_parse(&stdout);
    Ok(Value::of_command_result("_result", CommandResultValue { stdout, data, exit_code: outcome.exit_code }, SourceLocation::default()))
}

async fn eval_invocation(ctx: &DirectiveContext<'_>, invocation: &Invocation) -> Result<Value, DirectiveError> {
    if let Some(resolver) = ctx.resolvers.find_for(&invocation.name) {
        return resolver.resolve(&invocation.name, None).await.map_err(DirectiveError::from);
    }
    call_executable(ctx, &invocation.name, &invocation.args).await
}

async fn call_executable(ctx: &DirectiveContext<'_>, name: &str, args: &[RhsValue]) -> Result<Value, DirectiveError> {
    let callee = ctx.env.get(name).ok_or_else(|| InterpreterError::FieldNotFound { path: name.to_string(), step: name.to_string() })?;
    let exe = match callee.payload {
        ValuePayload::Executable(ref e) => e.clone(),
        other => {
            return Err(InterpreterError::InvalidArgumentType { name: name.to_string(), expected: "executable".into(), got: other.to_string() }.into());
        }
    };
    if exe.parameters.len() != args.len() {
        return Err(InterpreterError::InvalidArgumentCount { name: name.to_string(), expected: exe.parameters.len(), got: args.len() }.into());
    }

    let call_scope = ctx.env.create_child();
    {
        let mut call_ctx = *ctx;
        call_ctx.env = &call_scope;
        for (param, arg) in exe.parameters.iter().zip(args) {
            let value = eval_rhs(&call_ctx, arg).await?;
            call_scope.set_parameter(param, value)?;
        }
    }
    let mut call_ctx = *ctx;
    call_ctx.env = &call_scope;
    run_executable_body(&call_ctx, &exe.body).await
}

async fn run_executable_body(ctx: &DirectiveContext<'_>, body: &ExecutableBody) -> Result<Value, DirectiveError> {
    match body {
        ExecutableBody::Shell { template } => {
            let command = render_shell_template(ctx, template)?;
            let result = execute_shell(ctx.runner, &command, &ctx.env.base_path, ctx.timeout_ms, ctx.max_output_bytes).await?;
            Ok(Value::of_command_result("_result", result, SourceLocation::default()))
        }
        ExecutableBody::Code { language, source } => eval_code_fence(ctx, language, source).await,
        ExecutableBody::Template { template } => eval_literal_template(ctx, template),
        ExecutableBody::When { clauses } => {
            for clause in clauses {
                let matches = match &clause.condition {
                    Some(cond) => evaluate_condition(ctx, cond).await?,
                    None => true,
                };
                if matches {
                    let rendered = ctx.body.evaluate_body(&clause.body, ctx.env).await?;
                    return Ok(Value::of_simple_text("_result", rendered, SourceLocation::default()));
                }
            }
            Ok(Value::of_simple_text("_result", String::new(), SourceLocation::default()))
        }
    }
}

async fn eval_run_spec(ctx: &DirectiveContext<'_>, spec: &RunSpec) -> Result<CommandResultValue, DirectiveError> {
    match spec {
        RunSpec::Shell { template } => {
            let command = render_shell_template(ctx, template)?;
            execute_shell(ctx.runner, &command, &ctx.env.base_path, ctx.timeout_ms, ctx.max_output_bytes)
                .await
                .map_err(DirectiveError::from)
        }
        RunSpec::Exe { name, args } => {
            let result = call_executable(ctx, name, args).await?;
            match result.payload {
                ValuePayload::CommandResult(r) => Ok(r),
                _ => Ok(CommandResultValue { stdout: coerce_to_string(&result, FormatContext::Inline), data: None, exit_code: 0 }),
            }
        }
    }
}

/// Render the RunSpec stages of a `run`/`show` pipeline into literal shell
/// command strings, ready to hand to [`run_pipeline`]. The first stage of
/// a `run` directive is its own `spec`; each subsequent `|>` stage is
/// rendered the same way.
async fn run_spec_stages(ctx: &DirectiveContext<'_>, spec: &RunSpec, pipeline: &[crate::ast::PipelineStage]) -> Result<Vec<String>, DirectiveError> {
    let mut stages = vec![stage_to_literal(ctx, spec).await?];
    for stage in pipeline {
        stages.push(stage_to_literal(ctx, &stage.command).await?);
    }
    Ok(stages)
}

async fn stage_to_literal(ctx: &DirectiveContext<'_>, spec: &RunSpec) -> Result<String, DirectiveError> {
    match spec {
        RunSpec::Shell { template } => render_shell_template(ctx, template),
        RunSpec::Exe { name, args } => {
            let result = call_executable(ctx, name, args).await?;
            Ok(coerce_to_string(&result, FormatContext::Inline))
        }
    }
}

/// Render a shell command template, quoting each interpolated argument as
/// a single shell word (or heredoc-binding it, for large values) rather
/// than interpolating it as raw text (§4.9): literal parts pass through
/// unchanged, each interpolation becomes a `{{key}}` placeholder that
/// [`bind_parameters`] then substitutes with proper quoting.
fn render_shell_template(ctx: &DirectiveContext<'_>, template: &Template) -> Result<String, DirectiveError> {
    let mut literal = String::new();
    let mut params: Vec<(String, String)> = Vec::new();
    for part in &template.parts {
        match part {
            TemplatePart::Literal(text) => literal.push_str(text),
            TemplatePart::Interpolation(reference) => {
                let key = field_ref_key(reference);
                let value = resolve_reference(ctx.env, reference, ctx.access_mode)?;
                let text = coerce_to_string(&value, FormatContext::Inline);
                literal.push_str(&format!("{{{{{key}}}}}"));
                params.push((key, text));
            }
        }
    }
    Ok(bind_parameters(&literal, &params))
}

fn field_ref_key(r: &FieldRef) -> String {
    let mut out = r.identifier.clone();
    for step in &r.steps {
        out.push_str(&step.to_string());
    }
    out
}

async fn eval_file_content(ctx: &DirectiveContext<'_>, path: &Template, section: Option<&Template>) -> Result<Value, DirectiveError> {
    let rendered_path = render_template(ctx.env, path, ctx.access_mode, FormatContext::Inline)?;
    let resolved = if is_url(&rendered_path) {
        rendered_path.clone()
    } else {
        ctx.path_resolver.resolve_local(&ctx.env.base_path, &rendered_path).await?
    };
    let text = if is_url(&resolved) {
        let response = ctx.import_engine.fetcher.fetch(&resolved).await?;
        String::from_utf8(response.body).map_err(|e| InterpreterError::DecodeError { path: resolved.clone(), message: e.to_string() })?
    } else {
        ctx.import_engine
            .fs
            .read_file(&resolved)
            .await
            .map_err(|e| InterpreterError::DecodeError { path: resolved.clone(), message: e.to_string() })?
    };

    match section {
        None => Ok(Value::of_file_content(rendered_path, text, SourceLocation::default())),
        Some(heading_template) => {
            let heading = render_template(ctx.env, heading_template, ctx.access_mode, FormatContext::Inline)?;
            extract_section(&text, &heading).map(|body| Value::of_section_content(rendered_path.clone(), body, SourceLocation::default()))
        }
    }
}

/// Extract the body of the Markdown ATX heading matching `heading` (exact
/// match first, then the closest fuzzy match among the document's
/// headings), up to the next heading of the same or shallower depth.
fn extract_section(text: &str, heading: &str) -> Result<String, DirectiveError> {
    let lines: Vec<&str> = text.lines().collect();
    let headings: Vec<(usize, usize, String)> = lines
        .iter()
        .enumerate()
        .filter_map(|(i, line)| {
            let trimmed = line.trim_start();
            let depth = trimmed.chars().take_while(|c| *c == '#').count();
            (depth > 0 && trimmed[depth..].starts_with(' ')).then(|| (i, depth, trimmed[depth..].trim().to_string()))
        })
        .collect();

    let exact = headings.iter().find(|(_, _, text)| text == heading);
    let chosen = match exact {
        Some(h) => h,
        None => {
            let names: Vec<String> = headings.iter().map(|(_, _, t)| t.clone()).collect();
            let best = PathResolver::best_section_match(heading, &names);
            match best {
                Some(best_text) => headings.iter().find(|(_, _, t)| t == best_text).unwrap(),
                None => {
                    return Err(InterpreterError::SectionNotFound { heading: heading.to_string(), best_candidate: None }.into());
                }
            }
        }
    };

    let (start_line, depth, _) = chosen;
    let end = headings
        .iter()
        .find(|(i, d, _)| i > start_line && d <= depth)
        .map(|(i, _, _)| *i)
        .unwrap_or(lines.len());
    Ok(lines[(start_line + 1)..end].join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AccessStep, Parameter};
    use crate::capabilities::{Approver, Fetcher, LockFile};
    use crate::capabilities::FetchResponse as CoreFetchResponse;
    use crate::executor::ExecOutput;
    use crate::fs::InMemoryFs;
    use crate::import_engine::DocumentEvaluator;
    use std::sync::Arc;
    use std::time::Duration;

    struct FakeRunner;
    #[async_trait]
    impl ProcessRunner for FakeRunner {
        async fn run_shell(&self, command: &str, _cwd: &str, _timeout: Duration) -> Result<ExecOutput, InterpreterError> {
            Ok(ExecOutput { stdout: format!("ran: {command}"), stderr: String::new(), exit_code: 0 })
        }
        async fn run_code(&self, _language: &str, source: &str, _cwd: &str, _timeout: Duration) -> Result<ExecOutput, InterpreterError> {
            Ok(ExecOutput { stdout: format!("code: {source}"), stderr: String::new(), exit_code: 0 })
        }
    }

    struct NoFetch;
    #[async_trait]
    impl Fetcher for NoFetch {
        async fn fetch(&self, url: &str) -> Result<crate::capabilities::FetchResponse, InterpreterError> {
            Err(InterpreterError::UrlValidation { url: url.to_string(), message: "no network in test".into() })
        }
    }

    struct DenyApprover;
    #[async_trait]
    impl Approver for DenyApprover {
        async fn approve_import(&self, _url: &str, _hash: &str) -> Result<bool, InterpreterError> {
            Ok(false)
        }
        async fn approve_command(&self, _command: &str) -> Result<bool, InterpreterError> {
            Ok(false)
        }
    }

    struct NoLockFile;
    #[async_trait]
    impl LockFile for NoLockFile {
        async fn record_import(&self, _s: &str, _r: &str, _i: &str, _a: &str, _t: &str, _ttl: Option<u64>) -> Result<(), InterpreterError> {
            Ok(())
        }
        async fn lookup_import(&self, _source: &str) -> Option<crate::lock_file::ImportLockEntry> {
            None
        }
        async fn record_command_approval(&self, _hash: &str) -> Result<(), InterpreterError> {
            Ok(())
        }
        async fn is_command_approved(&self, _hash: &str) -> bool {
            false
        }
        async fn trusted_domains(&self) -> Vec<String> {
            vec![]
        }
    }

    struct NoopParser;
    impl crate::import_engine::DocumentParser for NoopParser {
        fn parse(&self, _source: &str) -> Result<crate::ast::Document, InterpreterError> {
            Ok(crate::ast::Document::default())
        }
    }

    struct NoopEvaluator;
    #[async_trait]
    impl DocumentEvaluator for NoopEvaluator {
        async fn evaluate(&self, _document: &crate::ast::Document, _env: &Environment) -> Result<(), InterpreterError> {
            Ok(())
        }
    }

    struct NoopBody;
    #[async_trait]
    impl BodyEvaluator for NoopBody {
        async fn evaluate_body(&self, _body: &[DirectiveNode], _env: &Environment) -> Result<String, DirectiveError> {
            Ok(String::new())
        }
    }

    struct NullCache;
    #[async_trait]
    impl crate::capabilities::ImmutableCache for NullCache {
        async fn get(&self, _content_hash: &str) -> Option<Vec<u8>> {
            None
        }
        async fn put(&self, _content_hash: &str, _data: &[u8]) {}
    }

    fn engine() -> ImportEngine {
        let fs: Arc<dyn crate::fs::FileSystem> = Arc::new(InMemoryFs::new());
        ImportEngine {
            path_resolver: Arc::new(PathResolver::new(Arc::clone(&fs), "/proj")),
            resolvers: Arc::new(ResolverRegistry::new()),
            fs,
            fetcher: Arc::new(NoFetch),
            approver: Arc::new(DenyApprover),
            lock_file: Arc::new(NoLockFile),
            cache: Arc::new(NullCache),
            parser: Arc::new(NoopParser),
            evaluator: Arc::new(NoopEvaluator),
        }
    }

    fn ctx<'a>(env: &'a Environment, engine: &'a ImportEngine, runner: &'a FakeRunner, resolvers: &'a ResolverRegistry, path_resolver: &'a PathResolver, body: &'a NoopBody) -> DirectiveContext<'a> {
        DirectiveContext {
            env,
            import_engine: engine,
            runner,
            resolvers,
            path_resolver,
            body,
            timeout_ms: 1000,
            max_output_bytes: 1024 * 1024,
            access_mode: AccessMode::Strict,
        }
    }

    fn loc() -> SourceLocation {
        SourceLocation::default()
    }

    #[tokio::test]
    async fn var_directive_binds_literal_text() {
        let env = Environment::root("/proj", None);
        let engine = engine();
        let runner = FakeRunner;
        let resolvers = ResolverRegistry::new();
        let path_resolver = PathResolver::new(Arc::new(InMemoryFs::new()), "/proj");
        let body = NoopBody;
        let c = ctx(&env, &engine, &runner, &resolvers, &path_resolver, &body);
        let node = DirectiveNode {
            id: "d1".into(),
            subtype: None,
            values: DirectiveValues::Var { name: "greeting".into(), rhs: RhsValue::Literal(Template::literal("hi")) },
            raw: String::new(),
            location: loc(),
        };
        let out = evaluate_directive(&c, &node).await.unwrap();
        assert_eq!(out, None);
        assert_eq!(coerce_to_string(&env.get("greeting").unwrap(), FormatContext::Inline), "hi");
    }

    #[tokio::test]
    async fn show_directive_renders_payload() {
        let env = Environment::root("/proj", None);
        env.set("name", Value::of_simple_text("name", "Alice", loc()), &loc()).unwrap();
        let engine = engine();
        let runner = FakeRunner;
        let resolvers = ResolverRegistry::new();
        let path_resolver = PathResolver::new(Arc::new(InMemoryFs::new()), "/proj");
        let body = NoopBody;
        let c = ctx(&env, &engine, &runner, &resolvers, &path_resolver, &body);
        let node = DirectiveNode {
            id: "d1".into(),
            subtype: None,
            values: DirectiveValues::Show { payload: RhsValue::Reference(FieldRef { identifier: "name".into(), steps: vec![] }), pipeline: vec![] },
            raw: String::new(),
            location: loc(),
        };
        let out = evaluate_directive(&c, &node).await.unwrap();
        assert_eq!(out, Some("Alice".to_string()));
    }

    #[tokio::test]
    async fn run_directive_binds_command_result() {
        let env = Environment::root("/proj", None);
        let engine = engine();
        let runner = FakeRunner;
        let resolvers = ResolverRegistry::new();
        let path_resolver = PathResolver::new(Arc::new(InMemoryFs::new()), "/proj");
        let body = NoopBody;
        let c = ctx(&env, &engine, &runner, &resolvers, &path_resolver, &body);
        let node = DirectiveNode {
            id: "d1".into(),
            subtype: None,
            values: DirectiveValues::Run {
                spec: RunSpec::Shell { template: Template::literal("echo hi") },
                pipeline: vec![],
                bind_as: Some("result".into()),
            },
            raw: String::new(),
            location: loc(),
        };
        evaluate_directive(&c, &node).await.unwrap();
        let bound = env.get("result").unwrap();
        assert!(matches!(bound.payload, ValuePayload::CommandResult(_)));
    }

    #[tokio::test]
    async fn exe_call_binds_parameters_into_call_scope() {
        let env = Environment::root("/proj", None);
        let exe = ExecutableValue {
            parameters: vec!["who".to_string()],
            body: ExecutableBody::Shell { template: Template { parts: vec![TemplatePart::Literal("echo ".into()), TemplatePart::Interpolation(FieldRef { identifier: "who".into(), steps: vec![] })], is_multi_line: false } },
        };
        env.set("greet", Value::of_executable("greet", exe, loc()), &loc()).unwrap();
        let engine = engine();
        let runner = FakeRunner;
        let resolvers = ResolverRegistry::new();
        let path_resolver = PathResolver::new(Arc::new(InMemoryFs::new()), "/proj");
        let body = NoopBody;
        let c = ctx(&env, &engine, &runner, &resolvers, &path_resolver, &body);
        let invocation = Invocation { name: "greet".into(), args: vec![RhsValue::Literal(Template::literal("world"))] };
        let result = eval_invocation(&c, &invocation).await.unwrap();
        match result.payload {
            ValuePayload::CommandResult(r) => assert_eq!(r.stdout, "ran: echo world"),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn exe_call_wrong_arg_count_errors() {
        let env = Environment::root("/proj", None);
        let exe = ExecutableValue { parameters: vec!["a".to_string(), "b".to_string()], body: ExecutableBody::Shell { template: Template::literal("echo hi") } };
        env.set("f", Value::of_executable("f", exe, loc()), &loc()).unwrap();
        let engine = engine();
        let runner = FakeRunner;
        let resolvers = ResolverRegistry::new();
        let path_resolver = PathResolver::new(Arc::new(InMemoryFs::new()), "/proj");
        let body = NoopBody;
        let c = ctx(&env, &engine, &runner, &resolvers, &path_resolver, &body);
        let err = call_executable(&c, "f", &[RhsValue::Literal(Template::literal("x"))]).await.unwrap_err();
        assert!(matches!(err.error, InterpreterError::InvalidArgumentCount { .. }));
    }

    #[tokio::test]
    async fn define_directive_creates_template_executable() {
        let env = Environment::root("/proj", None);
        let engine = engine();
        let runner = FakeRunner;
        let resolvers = ResolverRegistry::new();
        let path_resolver = PathResolver::new(Arc::new(InMemoryFs::new()), "/proj");
        let body = NoopBody;
        let c = ctx(&env, &engine, &runner, &resolvers, &path_resolver, &body);
        let node = DirectiveNode {
            id: "d1".into(),
            subtype: None,
            values: DirectiveValues::Define { name: "greeting".into(), params: vec![Parameter { name: "who".into() }], template: Template { parts: vec![TemplatePart::Literal("Hello, ".into()), TemplatePart::Interpolation(FieldRef { identifier: "who".into(), steps: vec![] })], is_multi_line: false } },
            raw: String::new(),
            location: loc(),
        };
        evaluate_directive(&c, &node).await.unwrap();
        let bound = env.get("greeting").unwrap();
        match bound.payload {
            ValuePayload::Executable(e) => assert!(matches!(e.body, ExecutableBody::Template { .. })),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn path_directive_expands_local_prefix() {
        let env = Environment::root("/proj", None);
        let engine = engine();
        let runner = FakeRunner;
        let resolvers = ResolverRegistry::new();
        let path_resolver = PathResolver::new(Arc::new(InMemoryFs::new()), "/proj");
        let body = NoopBody;
        let c = ctx(&env, &engine, &runner, &resolvers, &path_resolver, &body);
        let node = DirectiveNode {
            id: "d1".into(),
            subtype: None,
            values: DirectiveValues::Path { name: "docs".into(), target: Template::literal("docs/intro.md") },
            raw: String::new(),
            location: loc(),
        };
        evaluate_directive(&c, &node).await.unwrap();
        let bound = env.get("docs").unwrap();
        match bound.payload {
            ValuePayload::Path(p) => assert_eq!(p.raw, "/proj/docs/intro.md"),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn when_condition_evaluates_truthiness() {
        let env = Environment::root("/proj", None);
        env.set("flag", Value::of_primitive("flag", Primitive::Bool(true), loc()), &loc()).unwrap();
        let engine = engine();
        let runner = FakeRunner;
        let resolvers = ResolverRegistry::new();
        let path_resolver = PathResolver::new(Arc::new(InMemoryFs::new()), "/proj");
        let body = NoopBody;
        let c = ctx(&env, &engine, &runner, &resolvers, &path_resolver, &body);
        let matches = evaluate_condition(&c, &RhsValue::Reference(FieldRef { identifier: "flag".into(), steps: vec![] })).await.unwrap();
        assert!(matches);
    }

    #[tokio::test]
    async fn for_iterable_over_array_yields_elements() {
        let env = Environment::root("/proj", None);
        env.set("xs", Value::of_array("xs", vec![Value::of_primitive("_", Primitive::Number(1.0), loc()), Value::of_primitive("_", Primitive::Number(2.0), loc())], loc()), &loc()).unwrap();
        let engine = engine();
        let runner = FakeRunner;
        let resolvers = ResolverRegistry::new();
        let path_resolver = PathResolver::new(Arc::new(InMemoryFs::new()), "/proj");
        let body = NoopBody;
        let c = ctx(&env, &engine, &runner, &resolvers, &path_resolver, &body);
        let items = evaluate_for_iterable(&c, &RhsValue::Reference(FieldRef { identifier: "xs".into(), steps: vec![] })).await.unwrap();
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn for_iterable_over_object_yields_key_value_pairs() {
        let env = Environment::root("/proj", None);
        let mut fields = IndexMap::new();
        fields.insert("a".to_string(), Value::of_primitive("a", Primitive::Number(1.0), loc()));
        env.set("obj", Value::of_object("obj", fields, loc()), &loc()).unwrap();
        let engine = engine();
        let runner = FakeRunner;
        let resolvers = ResolverRegistry::new();
        let path_resolver = PathResolver::new(Arc::new(InMemoryFs::new()), "/proj");
        let body = NoopBody;
        let c = ctx(&env, &engine, &runner, &resolvers, &path_resolver, &body);
        let items = evaluate_for_iterable(&c, &RhsValue::Reference(FieldRef { identifier: "obj".into(), steps: vec![] })).await.unwrap();
        assert_eq!(items.len(), 1);
        let got = access_field_helper(&items[0], "key");
        assert_eq!(coerce_to_string(&got, FormatContext::Inline), "a");
    }

    fn access_field_helper(v: &Value, name: &str) -> Value {
        crate::value::access_field(v, &[AccessStep::Field(name.to_string())], AccessMode::Strict).unwrap()
    }

    #[test]
    fn extract_section_returns_body_up_to_next_heading() {
        let text = "# Intro\nhello\n\n# Usage\nhow to use\n";
        let body = extract_section(text, "Intro").unwrap();
        assert_eq!(body.trim(), "hello");
    }

    #[test]
    fn extract_section_fuzzy_matches_close_heading() {
        let text = "# Installation\nsteps here\n";
        let body = extract_section(text, "Instalation").unwrap();
        assert_eq!(body.trim(), "steps here");
    }

    #[test]
    fn extract_section_missing_heading_errors() {
        let text = "# Intro\nhello\n";
        let err = extract_section(text, "Zzzzzz").unwrap_err();
        assert!(matches!(err.error, InterpreterError::SectionNotFound { .. }));
    }

    #[test]
    fn json_literal_array_converts_to_value_array() {
        let literal = JsonLiteral::Array(vec![JsonLiteral::Number(1.0), JsonLiteral::Number(2.0)]);
        let v = json_literal_to_value("xs", &literal, &loc());
        assert_eq!(v.kind(), crate::value::ValueKind::Array);
    }

    #[test]
    fn render_shell_template_quotes_interpolated_value() {
        let env = Environment::root("/proj", None);
        env.set("name", Value::of_simple_text("name", "Alice Smith", loc()), &loc()).unwrap();
        let engine = engine();
        let runner = FakeRunner;
        let resolvers = ResolverRegistry::new();
        let path_resolver = PathResolver::new(Arc::new(InMemoryFs::new()), "/proj");
        let body = NoopBody;
        let c = ctx(&env, &engine, &runner, &resolvers, &path_resolver, &body);
        let template = Template { parts: vec![TemplatePart::Literal("echo ".into()), TemplatePart::Interpolation(FieldRef { identifier: "name".into(), steps: vec![] })], is_multi_line: false };
        let command = render_shell_template(&c, &template).unwrap();
        assert_eq!(command, "echo 'Alice Smith'");
    }

    // Referenced to keep the imports exercised in tests without pulling in
    // a real HTTP fetcher: avoids an unused-import warning on platforms
    // where only a subset of these tests is compiled.
    #[allow(dead_code)]
    fn _type_check(_r: CoreFetchResponse) {}
}
