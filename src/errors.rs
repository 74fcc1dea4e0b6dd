//! Interpreter error taxonomy.
//!
//! Every error kind named in the specification's error handling design is
//! represented here as its own small struct (mirroring the teacher's
//! `interpreter::errors` module, where `BreakError`, `ErrexitError`, etc.
//! are distinct structs unified by an enum) rather than as one opaque
//! error type. `DirectiveError` is the wrapper a handler attaches at each
//! boundary as the error propagates up to the evaluator (source location,
//! directive kind, and a human-readable cause chain).

use std::fmt;

use crate::ast::{DirectiveKind, SourceLocation};

/// Classification used by `VariableRedefinition` to distinguish a plain
/// same-scope redefinition from a cross-scope import conflict (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedefinitionKind {
    SameFile,
    ImportConflict,
}

impl fmt::Display for RedefinitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SameFile => write!(f, "same-file redefinition"),
            Self::ImportConflict => write!(f, "import conflict"),
        }
    }
}

/// A `{ file, line, column }` site used by redefinition/import-conflict
/// errors, which must carry both the original and the conflicting site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinedAt {
    pub file: Option<String>,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for DefinedAt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}:{}:{}", file, self.line, self.column),
            None => write!(f, "<unknown>:{}:{}", self.line, self.column),
        }
    }
}

/// The full error taxonomy from the specification's error handling design,
/// one variant per named kind, each fatal/recoverable per that section.
#[derive(Debug, Clone)]
pub enum InterpreterError {
    ParseError { message: String },
    ValidationFailed { message: String },
    ReservedName { name: String },
    VariableRedefinition {
        name: String,
        kind: RedefinitionKind,
        original: DefinedAt,
        conflicting: DefinedAt,
    },
    FieldNotFound { path: String, step: String },
    IndexOutOfBounds { path: String, index: i64, len: usize },
    InvalidAccess { path: String, step: String, on_kind: String },
    CircularImport { chain: Vec<String> },
    ImportExportMissing { name: String, module: String },
    FileNotFound { path: String },
    Permission { path: String },
    DecodeError { path: String, message: String },
    UrlValidation { url: String, message: String },
    ResponseTooLarge { url: String, limit: u64 },
    FetchTimeout { url: String, timeout_ms: u64 },
    FetchHttp { url: String, status: u16, message: String },
    ApprovalDenied { url: String },
    IntegrityMismatch { url: String, expected: String, actual: String },
    SectionNotFound { heading: String, best_candidate: Option<String> },
    InvalidArgumentCount { name: String, expected: usize, got: usize },
    InvalidArgumentType { name: String, expected: String, got: String },
    ExecutionTimeout { command: String, timeout_ms: u64 },
    CommandExecution {
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
        duration_ms: u64,
    },
    Cancelled,
}

impl fmt::Display for InterpreterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParseError { message } => write!(f, "parse error: {message}"),
            Self::ValidationFailed { message } => write!(f, "validation failed: {message}"),
            Self::ReservedName { name } => write!(f, "'{name}' is a reserved name"),
            Self::VariableRedefinition { name, kind, original, conflicting } => write!(
                f,
                "variable '{name}' redefined ({kind}): first defined at {original}, again at {conflicting}"
            ),
            Self::FieldNotFound { path, step } => write!(f, "field '{step}' not found on path '{path}'"),
            Self::IndexOutOfBounds { path, index, len } => write!(
                f,
                "index {index} out of bounds (len {len}) on path '{path}'"
            ),
            Self::InvalidAccess { path, step, on_kind } => write!(
                f,
                "cannot access '{step}' on {on_kind} value at path '{path}'"
            ),
            Self::CircularImport { chain } => write!(f, "circular import: {}", chain.join(" -> ")),
            Self::ImportExportMissing { name, module } => {
                write!(f, "import '{name}' not exported by '{module}'")
            }
            Self::FileNotFound { path } => write!(f, "file not found: {path}"),
            Self::Permission { path } => write!(f, "permission denied: {path}"),
            Self::DecodeError { path, message } => write!(f, "cannot decode '{path}': {message}"),
            Self::UrlValidation { url, message } => write!(f, "invalid URL '{url}': {message}"),
            Self::ResponseTooLarge { url, limit } => {
                write!(f, "response from '{url}' exceeds max size {limit} bytes")
            }
            Self::FetchTimeout { url, timeout_ms } => {
                write!(f, "fetch of '{url}' timed out after {timeout_ms}ms")
            }
            Self::FetchHttp { url, status, message } => {
                write!(f, "fetch of '{url}' failed with HTTP {status}: {message}")
            }
            Self::ApprovalDenied { url } => write!(f, "import of '{url}' was not approved"),
            Self::IntegrityMismatch { url, expected, actual } => write!(
                f,
                "integrity mismatch for '{url}': expected {expected}, got {actual}"
            ),
            Self::SectionNotFound { heading, best_candidate } => match best_candidate {
                Some(candidate) => write!(
                    f,
                    "section '{heading}' not found (closest match: '{candidate}')"
                ),
                None => write!(f, "section '{heading}' not found"),
            },
            Self::InvalidArgumentCount { name, expected, got } => write!(
                f,
                "'{name}' expects {expected} argument(s), got {got}"
            ),
            Self::InvalidArgumentType { name, expected, got } => write!(
                f,
                "'{name}' expects argument of type {expected}, got {got}"
            ),
            Self::ExecutionTimeout { command, timeout_ms } => {
                write!(f, "command '{command}' timed out after {timeout_ms}ms")
            }
            Self::CommandExecution { command, exit_code, .. } => write!(
                f,
                "command '{command}' exited with status {exit_code}"
            ),
            Self::Cancelled => write!(f, "interpretation cancelled"),
        }
    }
}

impl std::error::Error for InterpreterError {}

impl InterpreterError {
    /// Whether this error aborts the whole interpretation per §7, as
    /// opposed to being recoverable under a lenient field-access policy.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::FieldNotFound { .. } | Self::IndexOutOfBounds { .. } | Self::InvalidAccess { .. }
        )
    }
}

/// Wraps an [`InterpreterError`] with directive kind, source location, and
/// a cause chain, attached at each handler boundary as the error
/// propagates — the analogue of the teacher's `ControlFlowError::prepend_output`.
#[derive(Debug, Clone)]
pub struct DirectiveError {
    pub error: InterpreterError,
    pub directive: Option<DirectiveKind>,
    pub location: Option<SourceLocation>,
    pub chain: Vec<String>,
}

impl DirectiveError {
    pub fn new(error: InterpreterError) -> Self {
        Self { error, directive: None, location: None, chain: Vec::new() }
    }

    /// Attach context at a handler boundary; prepends rather than
    /// overwrites so an error can be annotated multiple times as it
    /// bubbles up through nested directive evaluation.
    pub fn with_context(mut self, directive: DirectiveKind, location: SourceLocation) -> Self {
        if self.directive.is_none() {
            self.directive = Some(directive);
        }
        if self.location.is_none() {
            self.location = Some(location);
        }
        self.chain.push(format!("{directive:?} at {location}"));
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.error.is_fatal()
    }
}

impl fmt::Display for DirectiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.directive, &self.location) {
            (Some(kind), Some(loc)) => write!(f, "[{kind:?} @ {loc}] {}", self.error),
            _ => write!(f, "{}", self.error),
        }
    }
}

impl std::error::Error for DirectiveError {}

impl From<InterpreterError> for DirectiveError {
    fn from(error: InterpreterError) -> Self {
        Self::new(error)
    }
}

pub type Result<T> = std::result::Result<T, DirectiveError>;
