//! Value Model (C1).
//!
//! Every binding in the environment is an immutable [`Value`]. This module
//! defines its shape, the tagged `kind`/payload pairing from §3.1, the
//! deterministic stringification rules (`coerce_to_string`), and typed
//! field access over nested data (`access_field`).
//!
//! The JSON-shaped payload used by `Object`/`Array`/`Primitive`/
//! `StructuredValue` is grounded directly on the teacher's jq query engine
//! value type (`commands/query_engine/value.rs`): a small `Null | Bool |
//! Number(f64) | String | Array | Object(IndexMap)` enum with the same
//! compact/pretty JSON serialization split. `IndexMap` (not `HashMap`) is
//! used so object field order is stable and reproducible, matching
//! §8 Determinism.

use std::collections::HashSet;
use std::fmt;

use indexmap::IndexMap;

use crate::ast::{AccessStep, ExecutableBody, SourceLocation};
use crate::errors::InterpreterError;

/// JSON-shaped value used for structured data (§3.1 `Object`/`Array`/
/// `Primitive`/`StructuredValue`), ported from the teacher's jq engine.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<JsonValue>),
    Object(IndexMap<String, JsonValue>),
}

impl JsonValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
        }
    }

    fn format_number(n: f64) -> String {
        if n.is_nan() || n.is_infinite() {
            return "null".to_string();
        }
        if n == (n as i64) as f64 && n.abs() < 1e18 {
            format!("{}", n as i64)
        } else {
            format!("{n}")
        }
    }

    fn format_json_string(s: &str) -> String {
        let mut out = String::from("\"");
        for ch in s.chars() {
            match ch {
                '"' => out.push_str("\\\""),
                '\\' => out.push_str("\\\\"),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
                c => out.push(c),
            }
        }
        out.push('"');
        out
    }

    /// Pretty-print with 2-space indentation, per §4.1's coercion rules
    /// for block-context objects/arrays.
    pub fn to_pretty_json(&self) -> String {
        self.to_indent(0)
    }

    fn to_indent(&self, indent: usize) -> String {
        let spaces = "  ".repeat(indent);
        let inner = "  ".repeat(indent + 1);
        match self {
            Self::Null => "null".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => Self::format_number(*n),
            Self::String(s) => Self::format_json_string(s),
            Self::Array(items) => {
                if items.is_empty() {
                    return "[]".to_string();
                }
                let body: Vec<String> = items
                    .iter()
                    .map(|v| format!("{inner}{}", v.to_indent(indent + 1)))
                    .collect();
                format!("[\n{}\n{spaces}]", body.join(",\n"))
            }
            Self::Object(fields) => {
                if fields.is_empty() {
                    return "{}".to_string();
                }
                let body: Vec<String> = fields
                    .iter()
                    .map(|(k, v)| format!("{inner}{}: {}", Self::format_json_string(k), v.to_indent(indent + 1)))
                    .collect();
                format!("{{\n{}\n{spaces}}}", body.join(",\n"))
            }
        }
    }

    /// Compact (single-line) JSON, used for inline-context coercion.
    pub fn to_compact_json(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => Self::format_number(*n),
            Self::String(s) => Self::format_json_string(s),
            Self::Array(items) => {
                let body: Vec<String> = items.iter().map(|v| v.to_compact_json()).collect();
                format!("[{}]", body.join(","))
            }
            Self::Object(fields) => {
                let body: Vec<String> = fields
                    .iter()
                    .map(|(k, v)| format!("{}:{}", Self::format_json_string(k), v.to_compact_json()))
                    .collect();
                format!("{{{}}}", body.join(","))
            }
        }
    }

    pub fn from_serde_json(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(arr) => Self::Array(arr.into_iter().map(Self::from_serde_json).collect()),
            serde_json::Value::Object(obj) => {
                let mut map = IndexMap::new();
                for (k, v) in obj {
                    map.insert(k, Self::from_serde_json(v));
                }
                Self::Object(map)
            }
        }
    }

    /// Parse a string as JSON if it looks like one (trimmed begins with
    /// `{` or `[`), used by the ambient `ctx.input` auto-parse rule (§4.2)
    /// and by `CommandResult.data` (§4.8 `run`).
    pub fn try_parse(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
            return None;
        }
        serde_json::from_str::<serde_json::Value>(trimmed)
            .ok()
            .map(Self::from_serde_json)
    }
}

impl fmt::Display for JsonValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, ""),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{}", Self::format_number(*n)),
            Self::String(s) => write!(f, "{s}"),
            Self::Array(_) | Self::Object(_) => write!(f, "{}", self.to_compact_json()),
        }
    }
}

/// A primitive literal Value (§3.1 `Primitive`).
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, ""),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s}"),
        }
    }
}

/// A `path` directive's bound value (§4.8 `path`).
#[derive(Debug, Clone, PartialEq)]
pub struct PathValue {
    pub raw: String,
    pub is_url: bool,
    pub is_absolute: bool,
    pub allowed_protocols: Vec<String>,
}

/// An `Executable` Value: a callable body with positional parameters
/// (§3.1 `Executable`, §4.8 `exe`/`define`).
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutableValue {
    pub parameters: Vec<String>,
    pub body: ExecutableBody,
}

/// A `PipelineInput` Value: the previous stage's output, with both its raw
/// string form and its JSON-parsed form when that parse succeeds (§4.8).
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineInputValue {
    pub text: String,
    pub data: Option<JsonValue>,
}

/// A `CommandResult` Value: the bound form of `var x = run {...}` (§4.8 `run`).
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResultValue {
    pub stdout: String,
    pub data: Option<JsonValue>,
    pub exit_code: i32,
}

/// The tagged payload of a Value (§3.1 `kind`/`value`). Rust's enum
/// discriminant plays the role of the specification's separate `kind`
/// field; [`Value::kind`] projects it to a [`ValueKind`] for comparisons
/// like C10's `all_of_kind`.
#[derive(Debug, Clone, PartialEq)]
pub enum ValuePayload {
    SimpleText(String),
    InterpolatedText(String),
    Template(crate::ast::Template),
    FileContent(String),
    SectionContent(String),
    Object(IndexMap<String, Value>),
    Array(Vec<Value>),
    Primitive(Primitive),
    Path(PathValue),
    Executable(ExecutableValue),
    PipelineInput(PipelineInputValue),
    Imported(Box<Value>),
    CommandResult(CommandResultValue),
    StructuredValue(JsonValue),
}

/// The `kind` tag enumerated in §3.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    SimpleText,
    InterpolatedText,
    Template,
    FileContent,
    SectionContent,
    Object,
    Array,
    Primitive,
    Path,
    Executable,
    PipelineInput,
    Imported,
    CommandResult,
    StructuredValue,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// How a binding was written (§3.1 `source`).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValueSource {
    pub directive: Option<crate::ast::DirectiveKind>,
    pub syntax: String,
    pub has_interpolation: bool,
    pub is_multi_line: bool,
}

/// Security/provenance labels. Taint only ever grows as a value is built
/// from other values (§3.1, §7 taint monotonicity) — never cleared by a
/// later operation. A plain `HashSet<String>` rather than a closed enum:
/// §9's open question notes the label taxonomy is only partially
/// enumerated upstream, so only the monotonicity property is contractual.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Security {
    pub taint: HashSet<String>,
    pub sources: HashSet<String>,
}

impl Security {
    pub fn union(sets: impl IntoIterator<Item = Security>) -> Self {
        let mut taint = HashSet::new();
        let mut sources = HashSet::new();
        for s in sets {
            taint.extend(s.taint);
            sources.extend(s.sources);
        }
        Self { taint, sources }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.taint.insert(label.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.sources.insert(source.into());
        self
    }
}

/// `{ definedAt, isReserved, ... }` (§3.1 `metadata`).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValueMetadata {
    pub defined_at: SourceLocation,
    pub is_reserved: bool,
    pub is_system: bool,
    pub is_read_only: bool,
    pub is_lazy: bool,
    pub is_imported: bool,
    pub is_parameter: bool,
    pub import_path: Option<String>,
    pub resolver_name: Option<String>,
    pub security: Security,
}

/// Marks a Value whose payload is computed on first read rather than at
/// construction (§3.1 `lazy`) — used exclusively by the reserved `debug`
/// binding (§4.2), so this is a closed tag rather than a boxed closure:
/// Values stay plain data, and the Environment is what knows how to
/// materialize a `DebugSnapshot` on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LazyKind {
    DebugSnapshot,
}

/// An immutable binding (§3.1). Never mutated after construction;
/// rebinding happens by shadowing in a child scope.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub name: String,
    pub payload: ValuePayload,
    pub source: ValueSource,
    pub metadata: ValueMetadata,
    pub lazy: Option<LazyKind>,
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match &self.payload {
            ValuePayload::SimpleText(_) => ValueKind::SimpleText,
            ValuePayload::InterpolatedText(_) => ValueKind::InterpolatedText,
            ValuePayload::Template(_) => ValueKind::Template,
            ValuePayload::FileContent(_) => ValueKind::FileContent,
            ValuePayload::SectionContent(_) => ValueKind::SectionContent,
            ValuePayload::Object(_) => ValueKind::Object,
            ValuePayload::Array(_) => ValueKind::Array,
            ValuePayload::Primitive(_) => ValueKind::Primitive,
            ValuePayload::Path(_) => ValueKind::Path,
            ValuePayload::Executable(_) => ValueKind::Executable,
            ValuePayload::PipelineInput(_) => ValueKind::PipelineInput,
            ValuePayload::Imported(_) => ValueKind::Imported,
            ValuePayload::CommandResult(_) => ValueKind::CommandResult,
            ValuePayload::StructuredValue(_) => ValueKind::StructuredValue,
        }
    }

    /// Short debug-friendly description, used by diagnostics formatting
    /// only — never by coercion (§0 ambient-stack addition).
    pub fn describe(&self) -> String {
        format!("{}:{}", self.name, self.kind())
    }

    fn base(name: impl Into<String>, payload: ValuePayload, defined_at: SourceLocation) -> Self {
        Self {
            name: name.into(),
            payload,
            source: ValueSource::default(),
            metadata: ValueMetadata { defined_at, ..Default::default() },
            lazy: None,
        }
    }

    pub fn of_simple_text(name: impl Into<String>, text: impl Into<String>, at: SourceLocation) -> Self {
        Self::base(name, ValuePayload::SimpleText(text.into()), at)
    }

    pub fn of_interpolated_text(name: impl Into<String>, text: impl Into<String>, at: SourceLocation) -> Self {
        let mut v = Self::base(name, ValuePayload::InterpolatedText(text.into()), at);
        v.source.has_interpolation = true;
        v
    }

    pub fn of_template(name: impl Into<String>, template: crate::ast::Template, at: SourceLocation) -> Self {
        let has_interp = template.has_interpolation();
        let is_multi = template.is_multi_line;
        let mut v = Self::base(name, ValuePayload::Template(template), at);
        v.source.has_interpolation = has_interp;
        v.source.is_multi_line = is_multi;
        v
    }

    pub fn of_file_content(name: impl Into<String>, content: impl Into<String>, at: SourceLocation) -> Self {
        Self::base(name, ValuePayload::FileContent(content.into()), at)
    }

    pub fn of_section_content(name: impl Into<String>, content: impl Into<String>, at: SourceLocation) -> Self {
        Self::base(name, ValuePayload::SectionContent(content.into()), at)
    }

    pub fn of_object(name: impl Into<String>, fields: IndexMap<String, Value>, at: SourceLocation) -> Self {
        let security = Security::union(fields.values().map(|v| v.metadata.security.clone()));
        let mut v = Self::base(name, ValuePayload::Object(fields), at);
        v.metadata.security = security;
        v
    }

    pub fn of_array(name: impl Into<String>, items: Vec<Value>, at: SourceLocation) -> Self {
        let security = Security::union(items.iter().map(|v| v.metadata.security.clone()));
        let mut v = Self::base(name, ValuePayload::Array(items), at);
        v.metadata.security = security;
        v
    }

    pub fn of_primitive(name: impl Into<String>, prim: Primitive, at: SourceLocation) -> Self {
        Self::base(name, ValuePayload::Primitive(prim), at)
    }

    pub fn of_path(name: impl Into<String>, path: PathValue, at: SourceLocation) -> Self {
        Self::base(name, ValuePayload::Path(path), at)
    }

    pub fn of_executable(name: impl Into<String>, exe: ExecutableValue, at: SourceLocation) -> Self {
        Self::base(name, ValuePayload::Executable(exe), at)
    }

    pub fn of_pipeline_input(name: impl Into<String>, input: PipelineInputValue, at: SourceLocation) -> Self {
        Self::base(name, ValuePayload::PipelineInput(input), at)
    }

    pub fn of_command_result(name: impl Into<String>, result: CommandResultValue, at: SourceLocation) -> Self {
        Self::base(name, ValuePayload::CommandResult(result), at)
    }

    pub fn of_structured(name: impl Into<String>, data: JsonValue, at: SourceLocation) -> Self {
        Self::base(name, ValuePayload::StructuredValue(data), at)
    }

    /// Wrap an existing Value as `Imported`, stamping `isImported`/`importPath`
    /// and unioning in import-provenance taint (§4.6 step 8).
    pub fn into_imported(mut self, import_path: impl Into<String>, extra_taint: &[&str]) -> Self {
        self.metadata.is_imported = true;
        self.metadata.import_path = Some(import_path.into());
        for label in extra_taint {
            self.metadata.security.taint.insert((*label).to_string());
        }
        Self {
            name: self.name.clone(),
            payload: ValuePayload::Imported(Box::new(self)),
            source: ValueSource::default(),
            metadata: ValueMetadata::default(),
            lazy: None,
        }
    }

    /// The "real" value behind an `Imported` wrapper, if any, else `self`.
    pub fn unwrap_imported(&self) -> &Value {
        match &self.payload {
            ValuePayload::Imported(inner) => inner.unwrap_imported(),
            _ => self,
        }
    }
}

/// Formatting regime used by `coerce_to_string` (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatContext {
    /// Standalone block position (own line/paragraph).
    Block,
    /// Inline, table cell, or list-item position.
    Inline,
    /// Output-literal mode: preserve source whitespace, canonical JSON
    /// for complex values (enabled during final transformation, §4.1).
    OutputLiteral,
    /// Inside a code fence.
    CodeFence,
}

/// Deterministic stringification (§4.1 `coerce_to_string`).
pub fn coerce_to_string(value: &Value, ctx: FormatContext) -> String {
    let value = value.unwrap_imported();
    match &value.payload {
        ValuePayload::SimpleText(s) | ValuePayload::InterpolatedText(s) => s.clone(),
        ValuePayload::FileContent(s) | ValuePayload::SectionContent(s) => s.clone(),
        ValuePayload::Template(t) => t
            .parts
            .iter()
            .map(|p| match p {
                crate::ast::TemplatePart::Literal(s) => s.clone(),
                // A raw, un-evaluated template coerced directly (e.g. shown
                // without interpolation resolution) renders its source form.
                crate::ast::TemplatePart::Interpolation(r) => format!("{{{{{}}}}}", field_ref_text(r)),
            })
            .collect(),
        ValuePayload::Primitive(p) => p.to_string(),
        ValuePayload::Path(p) => p.raw.clone(),
        ValuePayload::PipelineInput(p) => p.text.clone(),
        ValuePayload::CommandResult(r) => r.stdout.clone(),
        ValuePayload::Executable(_) => format!("<executable {}>", value.name),
        ValuePayload::Imported(_) => unreachable!("unwrapped above"),
        ValuePayload::Array(items) => coerce_array(items, ctx),
        ValuePayload::Object(fields) => coerce_object(fields, ctx),
        ValuePayload::StructuredValue(json) => coerce_json(json, ctx),
    }
}

fn field_ref_text(r: &crate::ast::FieldRef) -> String {
    let mut out = r.identifier.clone();
    for step in &r.steps {
        out.push_str(&step.to_string());
    }
    out
}

fn coerce_array(items: &[Value], ctx: FormatContext) -> String {
    if items.is_empty() {
        return "[]".to_string();
    }
    match ctx {
        FormatContext::Block => items
            .iter()
            .map(|v| format!("- {}", coerce_to_string(v, FormatContext::Inline)))
            .collect::<Vec<_>>()
            .join("\n"),
        FormatContext::Inline => items
            .iter()
            .map(|v| coerce_to_string(v, FormatContext::Inline))
            .collect::<Vec<_>>()
            .join(", "),
        FormatContext::OutputLiteral => value_array_to_json(items).to_pretty_json(),
        FormatContext::CodeFence => value_array_to_json(items).to_pretty_json(),
    }
}

fn coerce_object(fields: &IndexMap<String, Value>, ctx: FormatContext) -> String {
    if fields.is_empty() {
        return "{}".to_string();
    }
    let json = value_object_to_json(fields);
    match ctx {
        FormatContext::Block => format!("```json\n{}\n```", json.to_pretty_json()),
        FormatContext::Inline => json.to_compact_json(),
        FormatContext::OutputLiteral => json.to_pretty_json(),
        FormatContext::CodeFence => json.to_pretty_json(),
    }
}

fn coerce_json(json: &JsonValue, ctx: FormatContext) -> String {
    match json {
        JsonValue::Null => String::new(),
        JsonValue::Bool(_) | JsonValue::Number(_) | JsonValue::String(_) => json.to_string(),
        JsonValue::Array(items) => match ctx {
            FormatContext::Block => {
                if items.is_empty() {
                    "[]".to_string()
                } else {
                    items.iter().map(|v| format!("- {v}")).collect::<Vec<_>>().join("\n")
                }
            }
            FormatContext::Inline => {
                if items.is_empty() {
                    "[]".to_string()
                } else {
                    items.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ")
                }
            }
            FormatContext::OutputLiteral | FormatContext::CodeFence => json.to_pretty_json(),
        },
        JsonValue::Object(_) => match ctx {
            FormatContext::Block => format!("```json\n{}\n```", json.to_pretty_json()),
            FormatContext::Inline => json.to_compact_json(),
            FormatContext::OutputLiteral | FormatContext::CodeFence => json.to_pretty_json(),
        },
    }
}

fn value_to_json(v: &Value) -> JsonValue {
    let v = v.unwrap_imported();
    match &v.payload {
        ValuePayload::SimpleText(s) | ValuePayload::InterpolatedText(s) => JsonValue::String(s.clone()),
        ValuePayload::FileContent(s) | ValuePayload::SectionContent(s) => JsonValue::String(s.clone()),
        ValuePayload::Template(_) => JsonValue::String(coerce_to_string(v, FormatContext::Inline)),
        ValuePayload::Primitive(Primitive::Null) => JsonValue::Null,
        ValuePayload::Primitive(Primitive::Bool(b)) => JsonValue::Bool(*b),
        ValuePayload::Primitive(Primitive::Number(n)) => JsonValue::Number(*n),
        ValuePayload::Primitive(Primitive::Str(s)) => JsonValue::String(s.clone()),
        ValuePayload::Path(p) => JsonValue::String(p.raw.clone()),
        ValuePayload::PipelineInput(p) => p.data.clone().unwrap_or_else(|| JsonValue::String(p.text.clone())),
        ValuePayload::CommandResult(r) => r.data.clone().unwrap_or_else(|| JsonValue::String(r.stdout.clone())),
        ValuePayload::Executable(_) => JsonValue::Null,
        ValuePayload::Imported(_) => unreachable!("unwrapped above"),
        ValuePayload::Array(items) => value_array_to_json(items),
        ValuePayload::Object(fields) => value_object_to_json(fields),
        ValuePayload::StructuredValue(j) => j.clone(),
    }
}

fn value_array_to_json(items: &[Value]) -> JsonValue {
    JsonValue::Array(items.iter().map(value_to_json).collect())
}

fn value_object_to_json(fields: &IndexMap<String, Value>) -> JsonValue {
    let mut map = IndexMap::new();
    for (k, v) in fields {
        map.insert(k.clone(), value_to_json(v));
    }
    JsonValue::Object(map)
}

/// Truthiness used by `when`/`guard`/`loop` condition evaluation (§4.8):
/// null, `false`, `0`, empty string, empty array, and empty object are
/// falsy; everything else, including an `Executable` or a `Path`, is
/// truthy.
pub fn is_truthy(value: &Value) -> bool {
    let value = value.unwrap_imported();
    match &value.payload {
        ValuePayload::Primitive(Primitive::Null) => false,
        ValuePayload::Primitive(Primitive::Bool(b)) => *b,
        ValuePayload::Primitive(Primitive::Number(n)) => *n != 0.0,
        ValuePayload::Primitive(Primitive::Str(s)) => !s.is_empty(),
        ValuePayload::SimpleText(s) | ValuePayload::InterpolatedText(s) => !s.is_empty(),
        ValuePayload::FileContent(s) | ValuePayload::SectionContent(s) => !s.is_empty(),
        ValuePayload::Array(items) => !items.is_empty(),
        ValuePayload::Object(fields) => !fields.is_empty(),
        ValuePayload::StructuredValue(json) => json_is_truthy(json),
        ValuePayload::Imported(_) => unreachable!("unwrapped above"),
        ValuePayload::Template(_)
        | ValuePayload::Path(_)
        | ValuePayload::Executable(_)
        | ValuePayload::PipelineInput(_)
        | ValuePayload::CommandResult(_) => true,
    }
}

fn json_is_truthy(json: &JsonValue) -> bool {
    match json {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => *n != 0.0,
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(items) => !items.is_empty(),
        JsonValue::Object(fields) => !fields.is_empty(),
    }
}

/// Strict vs lenient field-access policy (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Strict,
    Lenient,
}

/// Typed field access over nested data (§4.1 `access_field`). The result
/// preserves the security labels of the whole path: the union of the
/// root's taint and any intermediate container's taint (enforced here by
/// always reading `metadata.security` off the *container* Value being
/// stepped into, and folding it into the stepped-to Value when that
/// value is itself composite).
pub fn access_field(root: &Value, path: &[AccessStep], mode: AccessMode) -> Result<Value, InterpreterError> {
    let mut current = root.clone();
    let mut path_so_far = root.name.clone();
    for step in path {
        current = access_step(&current, step, &path_so_far, mode)?;
        path_so_far.push_str(&step.to_string());
    }
    Ok(current)
}

fn access_step(
    container: &Value,
    step: &AccessStep,
    path_so_far: &str,
    mode: AccessMode,
) -> Result<Value, InterpreterError> {
    let inner = container.unwrap_imported();
    let parent_security = inner.metadata.security.clone();
    let mut result = match (&inner.payload, step) {
        (ValuePayload::Array(items), AccessStep::Index(i)) => index_array(items, *i, path_so_far, mode)?,
        (ValuePayload::Object(fields), AccessStep::Field(name)) => {
            field_lookup(fields, name, path_so_far, mode)?
        }
        (ValuePayload::StructuredValue(JsonValue::Array(items)), AccessStep::Index(i)) => {
            index_json_array(items, *i, path_so_far, mode, container)?
        }
        (ValuePayload::StructuredValue(JsonValue::Object(fields)), AccessStep::Field(name)) => {
            json_field_lookup(fields, name, path_so_far, mode, container)?
        }
        (_, AccessStep::Field(name)) => {
            return invalid_or_default(path_so_far, name, inner.kind().to_string(), mode, container);
        }
        (_, AccessStep::Index(i)) => {
            return invalid_or_default(path_so_far, &i.to_string(), inner.kind().to_string(), mode, container);
        }
    };
    result.metadata.security = Security::union([result.metadata.security.clone(), parent_security]);
    Ok(result)
}

fn index_array(
    items: &[Value],
    index: i64,
    path_so_far: &str,
    mode: AccessMode,
) -> Result<Value, InterpreterError> {
    let len = items.len();
    let idx = if index < 0 { index + len as i64 } else { index };
    match items.get(idx.max(-1) as usize).filter(|_| idx >= 0) {
        Some(v) => Ok(v.clone()),
        None => match mode {
            AccessMode::Strict => Err(InterpreterError::IndexOutOfBounds {
                path: path_so_far.to_string(),
                index,
                len,
            }),
            AccessMode::Lenient => Ok(Value::of_primitive("_default", Primitive::Null, SourceLocation::default())),
        },
    }
}

fn field_lookup(
    fields: &IndexMap<String, Value>,
    name: &str,
    path_so_far: &str,
    mode: AccessMode,
) -> Result<Value, InterpreterError> {
    match fields.get(name) {
        Some(v) => Ok(v.clone()),
        None => match mode {
            AccessMode::Strict => Err(InterpreterError::FieldNotFound {
                path: path_so_far.to_string(),
                step: name.to_string(),
            }),
            AccessMode::Lenient => Ok(Value::of_primitive("_default", Primitive::Null, SourceLocation::default())),
        },
    }
}

fn index_json_array(
    items: &[JsonValue],
    index: i64,
    path_so_far: &str,
    mode: AccessMode,
    origin: &Value,
) -> Result<Value, InterpreterError> {
    let len = items.len();
    let idx = if index < 0 { index + len as i64 } else { index };
    match items.get(idx.max(-1) as usize).filter(|_| idx >= 0) {
        Some(v) => Ok(Value::of_structured(origin.name.clone(), v.clone(), origin.metadata.defined_at.clone())),
        None => match mode {
            AccessMode::Strict => Err(InterpreterError::IndexOutOfBounds {
                path: path_so_far.to_string(),
                index,
                len,
            }),
            AccessMode::Lenient => Ok(Value::of_structured(origin.name.clone(), JsonValue::Null, SourceLocation::default())),
        },
    }
}

fn json_field_lookup(
    fields: &IndexMap<String, JsonValue>,
    name: &str,
    path_so_far: &str,
    mode: AccessMode,
    origin: &Value,
) -> Result<Value, InterpreterError> {
    match fields.get(name) {
        Some(v) => Ok(Value::of_structured(origin.name.clone(), v.clone(), origin.metadata.defined_at.clone())),
        None => match mode {
            AccessMode::Strict => Err(InterpreterError::FieldNotFound {
                path: path_so_far.to_string(),
                step: name.to_string(),
            }),
            AccessMode::Lenient => Ok(Value::of_structured(origin.name.clone(), JsonValue::Null, SourceLocation::default())),
        },
    }
}

fn invalid_or_default(
    path_so_far: &str,
    step: &str,
    on_kind: String,
    mode: AccessMode,
    origin: &Value,
) -> Result<Value, InterpreterError> {
    match mode {
        AccessMode::Strict => Err(InterpreterError::InvalidAccess {
            path: path_so_far.to_string(),
            step: step.to_string(),
            on_kind,
        }),
        AccessMode::Lenient => Ok(Value::of_primitive(
            origin.name.clone(),
            Primitive::Null,
            SourceLocation::default(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::DirectiveKind;

    fn loc() -> SourceLocation {
        SourceLocation { file: Some("t.mld".into()), line: 1, column: 1 }
    }

    #[test]
    fn coerce_simple_text_verbatim() {
        let v = Value::of_simple_text("name", "Alice", loc());
        assert_eq!(coerce_to_string(&v, FormatContext::Inline), "Alice");
    }

    #[test]
    fn coerce_empty_array_and_object() {
        let a = Value::of_array("a", vec![], loc());
        let o = Value::of_object("o", IndexMap::new(), loc());
        assert_eq!(coerce_to_string(&a, FormatContext::Inline), "[]");
        assert_eq!(coerce_to_string(&o, FormatContext::Inline), "{}");
    }

    #[test]
    fn coerce_array_block_is_bullet_list() {
        let items = vec![
            Value::of_simple_text("x", "one", loc()),
            Value::of_simple_text("x", "two", loc()),
        ];
        let v = Value::of_array("xs", items, loc());
        assert_eq!(coerce_to_string(&v, FormatContext::Block), "- one\n- two");
    }

    #[test]
    fn coerce_array_inline_is_comma_joined() {
        let items = vec![
            Value::of_simple_text("x", "one", loc()),
            Value::of_simple_text("x", "two", loc()),
        ];
        let v = Value::of_array("xs", items, loc());
        assert_eq!(coerce_to_string(&v, FormatContext::Inline), "one, two");
    }

    #[test]
    fn coerce_object_block_is_fenced_json() {
        let mut fields = IndexMap::new();
        fields.insert("a".to_string(), Value::of_primitive("a", Primitive::Number(1.0), loc()));
        let v = Value::of_object("o", fields, loc());
        let s = coerce_to_string(&v, FormatContext::Block);
        assert!(s.starts_with("```json\n"));
        assert!(s.contains("\"a\": 1"));
        assert!(s.ends_with("```"));
    }

    #[test]
    fn access_field_empty_path_is_identity() {
        let v = Value::of_simple_text("x", "hi", loc());
        let got = access_field(&v, &[], AccessMode::Strict).unwrap();
        assert_eq!(got, v);
    }

    #[test]
    fn access_field_array_index_then_object_field() {
        let mut alice = IndexMap::new();
        alice.insert("name".to_string(), Value::of_simple_text("name", "Alice", loc()));
        let mut bob = IndexMap::new();
        bob.insert("name".to_string(), Value::of_simple_text("name", "Bob", loc()));
        let users = Value::of_array(
            "users",
            vec![Value::of_object("0", alice, loc()), Value::of_object("1", bob, loc())],
            loc(),
        );
        let got = access_field(
            &users,
            &[AccessStep::Index(1), AccessStep::Field("name".into())],
            AccessMode::Strict,
        )
        .unwrap();
        assert_eq!(coerce_to_string(&got, FormatContext::Inline), "Bob");
    }

    #[test]
    fn access_field_strict_errors_on_missing_field() {
        let v = Value::of_object("o", IndexMap::new(), loc());
        let err = access_field(&v, &[AccessStep::Field("missing".into())], AccessMode::Strict).unwrap_err();
        assert!(matches!(err, InterpreterError::FieldNotFound { .. }));
    }

    #[test]
    fn access_field_lenient_returns_default() {
        let v = Value::of_object("o", IndexMap::new(), loc());
        let got = access_field(&v, &[AccessStep::Field("missing".into())], AccessMode::Lenient).unwrap();
        assert_eq!(coerce_to_string(&got, FormatContext::Inline), "");
    }

    #[test]
    fn access_field_index_out_of_bounds_strict() {
        let v = Value::of_array("a", vec![], loc());
        let err = access_field(&v, &[AccessStep::Index(0)], AccessMode::Strict).unwrap_err();
        assert!(matches!(err, InterpreterError::IndexOutOfBounds { .. }));
    }

    #[test]
    fn access_field_invalid_access_on_primitive() {
        let v = Value::of_primitive("p", Primitive::Number(1.0), loc());
        let err = access_field(&v, &[AccessStep::Field("x".into())], AccessMode::Strict).unwrap_err();
        assert!(matches!(err, InterpreterError::InvalidAccess { .. }));
    }

    #[test]
    fn taint_propagates_through_access() {
        let mut inner = Value::of_simple_text("name", "Alice", loc());
        let mut outer_fields = IndexMap::new();
        outer_fields.insert("name".to_string(), inner.clone());
        let mut outer = Value::of_object("o", outer_fields, loc());
        outer.metadata.security = outer.metadata.security.clone().with_label("src:imported");
        inner.metadata.security = inner.metadata.security.with_label("src:exec");

        // Rebuild outer with the tainted inner so union reflects both.
        let mut fields = IndexMap::new();
        fields.insert("name".to_string(), inner);
        let mut outer = Value::of_object("o", fields, loc());
        outer.metadata.security.taint.insert("src:imported".to_string());

        let got = access_field(&outer, &[AccessStep::Field("name".into())], AccessMode::Strict).unwrap();
        assert!(got.metadata.security.taint.contains("src:exec"));
        assert!(got.metadata.security.taint.contains("src:imported"));
    }

    #[test]
    fn coerce_idempotent_for_strings() {
        let v = Value::of_simple_text("x", "hello", loc());
        let once = coerce_to_string(&v, FormatContext::Inline);
        let wrapped = Value::of_simple_text("x", once.clone(), loc());
        let twice = coerce_to_string(&wrapped, FormatContext::Inline);
        assert_eq!(once, twice);
    }

    #[test]
    fn imported_wrapper_is_transparent_to_coercion() {
        let v = Value::of_simple_text("x", "hi", loc());
        let imported = v.into_imported("mod.mld", &["src:env:registry"]);
        assert_eq!(coerce_to_string(&imported, FormatContext::Inline), "hi");
        assert!(imported.unwrap_imported().metadata.security.taint.contains("src:env:registry"));
    }

    #[test]
    fn is_truthy_false_cases() {
        assert!(!is_truthy(&Value::of_primitive("x", Primitive::Null, loc())));
        assert!(!is_truthy(&Value::of_primitive("x", Primitive::Bool(false), loc())));
        assert!(!is_truthy(&Value::of_primitive("x", Primitive::Number(0.0), loc())));
        assert!(!is_truthy(&Value::of_simple_text("x", "", loc())));
        assert!(!is_truthy(&Value::of_array("x", vec![], loc())));
        assert!(!is_truthy(&Value::of_object("x", IndexMap::new(), loc())));
    }

    #[test]
    fn is_truthy_true_cases() {
        assert!(is_truthy(&Value::of_simple_text("x", "hi", loc())));
        assert!(is_truthy(&Value::of_primitive("x", Primitive::Number(1.0), loc())));
        assert!(is_truthy(&Value::of_array("x", vec![Value::of_primitive("y", Primitive::Null, loc())], loc())));
    }

    #[test]
    fn value_source_records_directive_kind() {
        let mut v = Value::of_simple_text("x", "hi", loc());
        v.source.directive = Some(DirectiveKind::Var);
        assert_eq!(v.source.directive, Some(DirectiveKind::Var));
    }
}
