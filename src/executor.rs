//! Executor (C9): running a `run`/`exe` shell template or an embedded
//! code block, with parameter substitution, output caps, and timeouts.
//!
//! Parameter quoting is ported from the teacher's
//! `interpreter::helpers::quoting::quote_value` (safe-character
//! passthrough, otherwise POSIX single-quote escaping) rather than the
//! `$'...'`/control-character path, since Meld never needs to round-trip
//! raw control bytes through a shell word — it only needs the substituted
//! value to survive as one argument.

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::InterpreterError;
use crate::value::{CommandResultValue, JsonValue};

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;
/// Parameters larger than this are passed via a heredoc/temp-file style
/// indirection instead of inline substitution (§4.9).
pub const LARGE_PARAM_THRESHOLD_BYTES: usize = 128 * 1024;

/// Quote a single shell word the way the teacher's `set`/`typeset`
/// builtins quote values: untouched if every character is already shell
/// safe, otherwise wrapped in single quotes with embedded quotes escaped.
pub fn quote_shell_word(value: &str) -> String {
    let is_safe = !value.is_empty()
        && value.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '_' | '/' | '.' | ':' | '-' | '@' | '%' | '+' | ',' | '=')
        });
    if is_safe {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Render a shell command template by substituting `{{param}}`-style
/// resolved argument text, quoting each substitution as a single word.
/// Parameters whose rendered text exceeds [`LARGE_PARAM_THRESHOLD_BYTES`]
/// are instead bound as a shell variable assigned from a heredoc prefix,
/// so a large file's contents don't blow out argv limits (§4.9).
pub fn bind_parameters(command_literal: &str, params: &[(String, String)]) -> String {
    let mut heredoc_prefix = String::new();
    let mut body = command_literal.to_string();
    for (name, value) in params {
        let placeholder = format!("{{{{{name}}}}}");
        if !body.contains(&placeholder) {
            continue;
        }
        if value.len() > LARGE_PARAM_THRESHOLD_BYTES {
            let marker = format!("__MLD_PARAM_{name}__");
            heredoc_prefix.push_str(&format!("read -r -d '' {name} <<'{marker}'\n{value}\n{marker}\n"));
            body = body.replace(&placeholder, &format!("\"${name}\""));
        } else {
            body = body.replace(&placeholder, &quote_shell_word(&value));
        }
    }
    if heredoc_prefix.is_empty() {
        body
    } else {
        format!("{heredoc_prefix}{body}")
    }
}

/// A spawned process's raw result, before `CommandResultValue` wrapping.
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// The process-spawning boundary, injected so the interpreter never calls
/// `std::process::Command` directly (§6.1 ambient stack: capability
/// injection keeps the core testable without a real shell).
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run_shell(&self, command: &str, cwd: &str, timeout: Duration) -> Result<ExecOutput, InterpreterError>;
    async fn run_code(&self, language: &str, source: &str, cwd: &str, timeout: Duration) -> Result<ExecOutput, InterpreterError>;
}

/// Marshals arguments for an embedded code block into the form that
/// language's runtime expects (e.g. JS gets a JSON blob on stdin, Python
/// gets `sys.argv`), without this crate knowing anything about that
/// runtime beyond how to invoke it. Kept as a policy boundary, not a real
/// VM: actual execution is delegated to [`ProcessRunner::run_code`].
pub trait LanguageAdapter: Send + Sync {
    fn language(&self) -> &str;
    fn marshal_args(&self, params: &[(String, JsonValue)]) -> String;
}

pub struct JsAdapter;
impl LanguageAdapter for JsAdapter {
    fn language(&self) -> &str {
        "js"
    }
    fn marshal_args(&self, params: &[(String, JsonValue)]) -> String {
        let mut obj = indexmap::IndexMap::new();
        for (k, v) in params {
            obj.insert(k.clone(), v.clone());
        }
        JsonValue::Object(obj).to_compact_json()
    }
}

pub struct PythonAdapter;
impl LanguageAdapter for PythonAdapter {
    fn language(&self) -> &str {
        "python"
    }
    fn marshal_args(&self, params: &[(String, JsonValue)]) -> String {
        let mut obj = indexmap::IndexMap::new();
        for (k, v) in params {
            obj.insert(k.clone(), v.clone());
        }
        JsonValue::Object(obj).to_compact_json()
    }
}

pub struct BashAdapter;
impl LanguageAdapter for BashAdapter {
    fn language(&self) -> &str {
        "bash"
    }
    fn marshal_args(&self, params: &[(String, JsonValue)]) -> String {
        params.iter().map(|(k, v)| format!("{}={}", k, quote_shell_word(&v.to_string()))).collect::<Vec<_>>().join("\n")
    }
}

/// How a batch of pipeline/command failures should be treated (§4.8
/// `run` with a pipeline): `FailFast` stops at the first non-zero exit,
/// `Batch` runs every stage regardless and reports all failures together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    FailFast,
    Batch,
}

/// Runs a shell command through the injected [`ProcessRunner`], applying
/// the timeout and output-size cap, and classifying a non-zero exit as a
/// `CommandExecution` error.
pub async fn execute_shell(
    runner: &dyn ProcessRunner,
    command: &str,
    cwd: &str,
    timeout_ms: u64,
    max_output_bytes: usize,
) -> Result<CommandResultValue, InterpreterError> {
    let timeout = Duration::from_millis(timeout_ms);
    let result = tokio::time::timeout(timeout, runner.run_shell(command, cwd, timeout))
        .await
        .map_err(|_| InterpreterError::ExecutionTimeout { command: command.to_string(), timeout_ms })??;

    let stdout = truncate(&result.stdout, max_output_bytes);
    if result.exit_code != 0 {
        return Err(InterpreterError::CommandExecution {
            command: command.to_string(),
            exit_code: result.exit_code,
            stdout: stdout.clone(),
            stderr: truncate(&result.stderr, max_output_bytes),
            duration_ms: 0,
        });
    }
    Ok(CommandResultValue { data: JsonValue::try_parse(&stdout), stdout, exit_code: result.exit_code })
}

fn truncate(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}

/// Taint labels a command's result should carry, derived from whatever
/// tainted inputs fed its parameters (§7 taint monotonicity): the result
/// is always at least as tainted as its most-tainted input, plus an
/// `src:exec` label marking it as command-derived.
pub fn derive_command_taint(input_taints: &[std::collections::HashSet<String>]) -> std::collections::HashSet<String> {
    let mut taint: std::collections::HashSet<String> = input_taints.iter().flatten().cloned().collect();
    taint.insert("src:exec".to_string());
    taint
}

/// Run every pipeline stage in sequence, feeding the previous stage's
/// stdout to the next via the `__MLD_PIPE__` parameter slot, honoring
/// `policy` for how a mid-pipeline failure is handled.
pub async fn run_pipeline(
    runner: &dyn ProcessRunner,
    stages: &[String],
    cwd: &str,
    timeout_ms: u64,
    max_output_bytes: usize,
    policy: FailurePolicy,
) -> Result<Vec<Result<CommandResultValue, InterpreterError>>, InterpreterError> {
    let mut results = Vec::with_capacity(stages.len());
    let mut previous_output = String::new();
    for stage in stages {
        let bound = bind_parameters(stage, &[("__MLD_PIPE__".to_string(), previous_output.clone())]);
        let outcome = execute_shell(runner, &bound, cwd, timeout_ms, max_output_bytes).await;
        match &outcome {
            Ok(result) => previous_output = result.stdout.clone(),
            Err(err) if policy == FailurePolicy::FailFast => return Err(err.clone()),
            Err(_) => {}
        }
        results.push(outcome);
    }
    Ok(results)
}
