use std::io::Read as _;
use std::sync::Arc;

use clap::Parser;
use mlc::ast::Document;
use mlc::capabilities::{Approver, FetchResponse, SystemClock};
use mlc::errors::InterpreterError;
use mlc::executor::{DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_TIMEOUT_MS, ExecOutput, ProcessRunner};
use mlc::fetcher::{Fetcher, FsImmutableCache};
use mlc::fs::LocalFs;
use mlc::import_engine::DocumentParser;
use mlc::interpreter::{Interpreter, InterpreterOptions};
use mlc::lock_file::YamlLockFile;
use mlc::resolvers::InputResolver;
use mlc::value::AccessMode;

#[derive(Parser)]
#[command(name = "mlc")]
#[command(about = "Core interpreter for the Meld declarative templating language")]
#[command(version)]
struct Cli {
    /// JSON AST document to interpret (§3.3/§3.4); reads stdin if omitted.
    document: Option<String>,

    /// Project root directory, used for `@base`, relative paths, and
    /// `project_root()` discovery.
    #[arg(long = "root", default_value = ".")]
    root: String,

    /// Raw `@input` payload made available to the document.
    #[arg(long = "input", default_value = "")]
    input: String,

    /// Base URL for the `@user/module` registry strategy (§4.5).
    #[arg(long = "registry", default_value = "https://registry.mlld.org")]
    registry: String,

    /// Auto-approve imports and shell commands instead of prompting.
    #[arg(long = "yes", short = 'y')]
    yes: bool,

    /// Command timeout in milliseconds.
    #[arg(long = "timeout-ms", default_value_t = DEFAULT_TIMEOUT_MS)]
    timeout_ms: u64,

    /// Evaluate field access/interpolation leniently (missing fields
    /// coerce to a placeholder) instead of erroring strictly.
    #[arg(long = "lenient")]
    lenient: bool,
}

/// Parses a JSON-serialized [`Document`] — the external Markdown/directive
/// grammar is out of scope for this crate (§1); this is the hand-off point
/// a real deployment's parser process would produce.
struct JsonDocumentParser;

impl DocumentParser for JsonDocumentParser {
    fn parse(&self, source: &str) -> Result<Document, InterpreterError> {
        serde_json::from_str(source).map_err(|e| InterpreterError::ParseError { message: e.to_string() })
    }
}

/// Refuses every fetch. Live network access is a deployment concern: a
/// real embedder plugs in `fetcher::PolicyFetcher` over an HTTP transport
/// of its choosing; this binary's purpose is to demonstrate interpretation
/// over already-resolved documents, not to ship an HTTP client dependency.
struct DenyNetworkFetcher;

#[async_trait::async_trait]
impl Fetcher for DenyNetworkFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, InterpreterError> {
        Err(InterpreterError::UrlValidation { url: url.to_string(), message: "network fetch is disabled in the demonstration binary".into() })
    }
}

/// Prompts on stdin for every import/command approval, or auto-approves
/// when `--yes` is given.
struct CliApprover {
    auto: bool,
}

impl CliApprover {
    fn prompt(&self, question: &str) -> bool {
        if self.auto {
            return true;
        }
        eprint!("{question} [y/N] ");
        let mut answer = String::new();
        if std::io::stdin().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
    }
}

#[async_trait::async_trait]
impl Approver for CliApprover {
    async fn approve_import(&self, url: &str, content_hash: &str) -> Result<bool, InterpreterError> {
        Ok(self.prompt(&format!("Approve import of {url} ({content_hash})?")))
    }

    async fn approve_command(&self, command: &str) -> Result<bool, InterpreterError> {
        Ok(self.prompt(&format!("Approve command `{command}`?")))
    }
}

/// Runs shell/embedded-code bodies via real subprocesses, using the
/// teacher's `sh -lc` convention for shell templates.
struct SubprocessRunner;

#[async_trait::async_trait]
impl ProcessRunner for SubprocessRunner {
    async fn run_shell(&self, command: &str, cwd: &str, _timeout: std::time::Duration) -> Result<ExecOutput, InterpreterError> {
        run_command(tokio::process::Command::new("sh").arg("-lc").arg(command), cwd).await
    }

    async fn run_code(&self, language: &str, source: &str, cwd: &str, _timeout: std::time::Duration) -> Result<ExecOutput, InterpreterError> {
        let interpreter = match language {
            "python" | "python3" => "python3",
            "js" | "node" | "javascript" => "node",
            _ => "sh",
        };
        let mut cmd = tokio::process::Command::new(interpreter);
        if interpreter == "sh" {
            cmd.arg("-lc").arg(source);
        } else {
            cmd.arg("-e").arg(source);
        }
        run_command(&mut cmd, cwd).await
    }
}

async fn run_command(cmd: &mut tokio::process::Command, cwd: &str) -> Result<ExecOutput, InterpreterError> {
    let output = cmd
        .current_dir(cwd)
        .output()
        .await
        .map_err(|e| InterpreterError::CommandExecution {
            command: format!("{cmd:?}"),
            exit_code: -1,
            stdout: String::new(),
            stderr: e.to_string(),
            duration_ms: 0,
        })?;
    Ok(ExecOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let source = match &cli.document {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                eprintln!("Error: cannot read document '{path}': {e}");
                std::process::exit(1);
            }
        },
        None => {
            let mut buf = String::new();
            if std::io::stdin().read_to_string(&mut buf).is_err() || buf.trim().is_empty() {
                eprintln!("Error: no document provided. Pass a JSON AST file or pipe one via stdin.");
                std::process::exit(1);
            }
            buf
        }
    };

    let parser = JsonDocumentParser;
    let document = match parser.parse(&source) {
        Ok(doc) => doc,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let fs: Arc<dyn mlc::fs::FileSystem> = Arc::new(LocalFs::new());
    let clock = Arc::new(SystemClock);
    let lock_file = Arc::new(YamlLockFile::load(Arc::clone(&fs), clock.clone(), format!("{}/mlc.lock.yaml", cli.root)).await);
    let cache = Arc::new(FsImmutableCache::new(Arc::clone(&fs), format!("{}/.mlc-cache", cli.root)));

    let interpreter = Interpreter::new(
        fs,
        Arc::new(DenyNetworkFetcher),
        Arc::new(CliApprover { auto: cli.yes }),
        lock_file,
        cache,
        Arc::new(JsonDocumentParser),
        Arc::new(SubprocessRunner),
        clock,
        cli.root.clone(),
        cli.registry.clone(),
        InterpreterOptions {
            timeout_ms: cli.timeout_ms,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            access_mode: if cli.lenient { AccessMode::Lenient } else { AccessMode::Strict },
            ..InterpreterOptions::default()
        },
    );

    let env = mlc::environment::Environment::root(cli.root, None);
    let input = InputResolver { raw: cli.input };

    match interpreter.run(&document, &env, &input).await {
        Ok(rendered) => print!("{rendered}"),
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    }
}
