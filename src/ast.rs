//! Directive AST (input only).
//!
//! The concrete Markdown/directive grammar and parser are external
//! collaborators (§1); this module defines the shape the core consumes.
//! Types here derive `serde::{Serialize, Deserialize}` so a real deployment
//! can hand the core a parsed document as JSON from an external parser
//! process, and so the demonstration binary and integration tests can
//! build fixtures without writing a grammar.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A `{ file, line, column }` source location, attached to every AST node
/// and to every `Value::metadata.definedAt` (§3.1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SourceLocation {
    pub file: Option<String>,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}:{}:{}", file, self.line, self.column),
            None => write!(f, "<input>:{}:{}", self.line, self.column),
        }
    }
}

/// The kind tag on a directive AST node (§3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectiveKind {
    Var,
    Exe,
    Run,
    Show,
    Import,
    Path,
    Define,
    Output,
    When,
    For,
    Loop,
    Hook,
    Guard,
    Comment,
}

impl fmt::Display for DirectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A reference to a named value with zero or more field-access steps,
/// e.g. `users.1.name` (§4.7). Parsed once by the external parser; the
/// interpreter only ever walks it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRef {
    pub identifier: String,
    pub steps: Vec<AccessStep>,
}

/// A single field-access step: a property name or a numeric index (§4.1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessStep {
    Field(String),
    Index(i64),
}

impl fmt::Display for AccessStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(name) => write!(f, ".{name}"),
            Self::Index(i) => write!(f, "[{i}]"),
        }
    }
}

/// A template segment: literal text, or an interpolation placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TemplatePart {
    Literal(String),
    Interpolation(FieldRef),
}

/// A template value, e.g. a backtick string with `@name` / `{{name}}`
/// placeholders, carrying whether it spans multiple lines (§3.1 `source`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Template {
    pub parts: Vec<TemplatePart>,
    pub is_multi_line: bool,
}

impl Template {
    pub fn literal(text: impl Into<String>) -> Self {
        Self { parts: vec![TemplatePart::Literal(text.into())], is_multi_line: false }
    }

    pub fn has_interpolation(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, TemplatePart::Interpolation(_)))
    }
}

/// A JSON-like literal used for `var` directives binding object/array/
/// primitive values directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JsonLiteral {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<JsonLiteral>),
    Object(Vec<(String, JsonLiteral)>),
}

/// The right-hand side of a `var` directive, or the payload of `show`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RhsValue {
    Literal(Template),
    Json(JsonLiteral),
    Reference(FieldRef),
    CodeFence { language: Option<String>, source: String },
    Invocation(Invocation),
    Run(RunSpec),
    FileContent { path: Template, section: Option<Template> },
}

/// A call to a user-declared executable or a resolver function,
/// e.g. `@greet("world")` or `@now()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub name: String,
    pub args: Vec<RhsValue>,
}

/// The body of an `exe`/`define` directive (§4.8). `Template` is a plain
/// text macro (what `define` produces): rendered through normal
/// interpolation, never executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutableBody {
    Shell { template: Template },
    Code { language: String, source: String },
    When { clauses: Vec<WhenClause> },
    Template { template: Template },
}

/// One clause of a `when` body or `when` directive: an optional condition
/// (`None` denotes the trailing else-like clause) and a directive body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhenClause {
    pub condition: Option<RhsValue>,
    pub body: Vec<DirectiveNode>,
}

/// An ordered, positional parameter declaration for an executable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
}

/// What `run` (or the RHS of `var = run ...`) invokes: either a bare shell
/// command template, or a call to a previously-declared executable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunSpec {
    Shell { template: Template },
    Exe { name: String, args: Vec<RhsValue> },
}

/// A single pipeline stage, chained with `|>` (§4.8 "Directive pipelines").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStage {
    pub command: RunSpec,
}

/// The `import` directive's selection mode (§4.6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ImportSelection {
    Selected(Vec<ImportBinding>),
    Namespace { alias: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportBinding {
    pub name: String,
    pub alias: Option<String>,
}

/// The directive-specific payload, one variant per `DirectiveKind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DirectiveValues {
    Var { name: String, rhs: RhsValue },
    Exe { name: String, params: Vec<Parameter>, body: ExecutableBody },
    Run { spec: RunSpec, pipeline: Vec<PipelineStage>, bind_as: Option<String> },
    Show { payload: RhsValue, pipeline: Vec<PipelineStage> },
    Import { source: Template, selection: ImportSelection },
    Path { name: String, target: Template },
    Define { name: String, params: Vec<Parameter>, template: Template },
    Output { payload: RhsValue, sink: Option<Template> },
    When { clauses: Vec<WhenClause> },
    For { binding: String, iterable: RhsValue, body: Vec<DirectiveNode> },
    Loop { condition: RhsValue, body: Vec<DirectiveNode> },
    Hook { name: String, body: Vec<DirectiveNode> },
    Guard { condition: RhsValue, retry: Option<RunSpec> },
    Comment { text: String },
}

impl DirectiveValues {
    pub fn kind(&self) -> DirectiveKind {
        match self {
            Self::Var { .. } => DirectiveKind::Var,
            Self::Exe { .. } => DirectiveKind::Exe,
            Self::Run { .. } => DirectiveKind::Run,
            Self::Show { .. } => DirectiveKind::Show,
            Self::Import { .. } => DirectiveKind::Import,
            Self::Path { .. } => DirectiveKind::Path,
            Self::Define { .. } => DirectiveKind::Define,
            Self::Output { .. } => DirectiveKind::Output,
            Self::When { .. } => DirectiveKind::When,
            Self::For { .. } => DirectiveKind::For,
            Self::Loop { .. } => DirectiveKind::Loop,
            Self::Hook { .. } => DirectiveKind::Hook,
            Self::Guard { .. } => DirectiveKind::Guard,
            Self::Comment { .. } => DirectiveKind::Comment,
        }
    }
}

/// A directive AST node: kind, optional subtype, values, raw text form,
/// and location (§3.3). Immutable once produced by the parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectiveNode {
    pub id: String,
    pub subtype: Option<String>,
    pub values: DirectiveValues,
    pub raw: String,
    pub location: SourceLocation,
}

impl DirectiveNode {
    pub fn kind(&self) -> DirectiveKind {
        self.values.kind()
    }
}

/// A document node: plain text, a directive, a code fence, or a comment
/// passthrough (§3.3/§3.4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DocumentNode {
    Text(String),
    CodeFence { language: Option<String>, source: String },
    Directive(DirectiveNode),
}

/// The parsed document: an ordered sequence of nodes, as produced by the
/// external parser (§1, §3.3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Document {
    pub nodes: Vec<DocumentNode>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_ref_display_steps() {
        assert_eq!(AccessStep::Field("name".into()).to_string(), ".name");
        assert_eq!(AccessStep::Index(1).to_string(), "[1]");
    }

    #[test]
    fn template_literal_has_no_interpolation() {
        let t = Template::literal("hello");
        assert!(!t.has_interpolation());
    }

    #[test]
    fn template_with_interpolation() {
        let t = Template {
            parts: vec![
                TemplatePart::Literal("Hello, ".into()),
                TemplatePart::Interpolation(FieldRef { identifier: "name".into(), steps: vec![] }),
                TemplatePart::Literal("!".into()),
            ],
            is_multi_line: false,
        };
        assert!(t.has_interpolation());
    }

    #[test]
    fn directive_values_kind_roundtrip() {
        let v = DirectiveValues::Var {
            name: "x".into(),
            rhs: RhsValue::Literal(Template::literal("1")),
        };
        assert_eq!(v.kind(), DirectiveKind::Var);
    }

    #[test]
    fn document_json_roundtrip() {
        let doc = Document {
            nodes: vec![DocumentNode::Text("hi\n".into())],
        };
        let json = serde_json::to_string(&doc).unwrap();
        let back: Document = serde_json::from_str(&json).unwrap();
        assert_eq!(doc, back);
    }
}
