//! Interpolation (C7): resolving `{{identifier.steps}}` references inside
//! a [`crate::ast::Template`] against an [`Environment`], and rendering
//! the result into text.
//!
//! This is a thin orchestration layer over C1/C2: it owns none of the
//! field-access or stringification rules itself, it just sequences
//! "look the identifier up, walk the access steps, coerce to a string"
//! per template part, and reports which access mode (`§4.1` strict vs
//! lenient) each failure should be evaluated under.

use crate::ast::{FieldRef, Template, TemplatePart};
use crate::environment::Environment;
use crate::errors::InterpreterError;
use crate::value::{access_field, coerce_to_string, AccessMode, FormatContext, Value};

/// Resolve a single `{{identifier.steps}}` reference to a `Value`,
/// without stringifying it — used both by template interpolation and by
/// plain reference RHS values (`var x = y.field`).
pub fn resolve_reference(env: &Environment, reference: &FieldRef, mode: AccessMode) -> Result<Value, InterpreterError> {
    let root = env.get(&reference.identifier).ok_or_else(|| InterpreterError::FieldNotFound {
        path: reference.identifier.clone(),
        step: reference.identifier.clone(),
    })?;
    access_field(&root, &reference.steps, mode)
}

/// Render a template to text, resolving each interpolation in turn and
/// coercing it to a string under `ctx` (§4.1). Field access uses `mode`
/// uniformly across the whole template.
pub fn render_template(
    env: &Environment,
    template: &Template,
    mode: AccessMode,
    ctx: FormatContext,
) -> Result<String, InterpreterError> {
    let mut out = String::new();
    for part in &template.parts {
        match part {
            TemplatePart::Literal(text) => out.push_str(text),
            TemplatePart::Interpolation(reference) => {
                let value = resolve_reference(env, reference, mode)?;
                out.push_str(&coerce_to_string(&value, ctx));
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AccessStep, SourceLocation};
    use crate::value::Primitive;
    use indexmap::IndexMap;

    fn loc() -> SourceLocation {
        SourceLocation { file: Some("t.mld".into()), line: 1, column: 1 }
    }

    #[test]
    fn resolve_plain_identifier() {
        let env = Environment::root("/proj", None);
        env.set("name", Value::of_simple_text("name", "Alice", loc()), &loc()).unwrap();
        let got = resolve_reference(&env, &FieldRef { identifier: "name".into(), steps: vec![] }, AccessMode::Strict).unwrap();
        assert_eq!(coerce_to_string(&got, FormatContext::Inline), "Alice");
    }

    #[test]
    fn resolve_nested_field() {
        let env = Environment::root("/proj", None);
        let mut fields = IndexMap::new();
        fields.insert("name".to_string(), Value::of_simple_text("name", "Bob", loc()));
        env.set("user", Value::of_object("user", fields, loc()), &loc()).unwrap();
        let reference = FieldRef { identifier: "user".into(), steps: vec![AccessStep::Field("name".into())] };
        let got = resolve_reference(&env, &reference, AccessMode::Strict).unwrap();
        assert_eq!(coerce_to_string(&got, FormatContext::Inline), "Bob");
    }

    #[test]
    fn resolve_unknown_identifier_errors() {
        let env = Environment::root("/proj", None);
        let err = resolve_reference(&env, &FieldRef { identifier: "missing".into(), steps: vec![] }, AccessMode::Strict).unwrap_err();
        assert!(matches!(err, InterpreterError::FieldNotFound { .. }));
    }

    #[test]
    fn render_template_mixes_literal_and_interpolation() {
        let env = Environment::root("/proj", None);
        env.set("name", Value::of_simple_text("name", "Alice", loc()), &loc()).unwrap();
        let template = Template {
            parts: vec![
                crate::ast::TemplatePart::Literal("Hello, ".into()),
                crate::ast::TemplatePart::Interpolation(FieldRef { identifier: "name".into(), steps: vec![] }),
                crate::ast::TemplatePart::Literal("!".into()),
            ],
            is_multi_line: false,
        };
        let rendered = render_template(&env, &template, AccessMode::Strict, FormatContext::Inline).unwrap();
        assert_eq!(rendered, "Hello, Alice!");
    }

    #[test]
    fn render_template_lenient_mode_substitutes_empty_on_missing_field() {
        let env = Environment::root("/proj", None);
        env.set("user", Value::of_object("user", IndexMap::new(), loc()), &loc()).unwrap();
        let template = Template {
            parts: vec![crate::ast::TemplatePart::Interpolation(FieldRef {
                identifier: "user".into(),
                steps: vec![AccessStep::Field("missing".into())],
            })],
            is_multi_line: false,
        };
        let rendered = render_template(&env, &template, AccessMode::Lenient, FormatContext::Inline).unwrap();
        assert_eq!(rendered, "");
    }

    #[test]
    fn render_template_strict_mode_propagates_error() {
        let env = Environment::root("/proj", None);
        env.set("user", Value::of_object("user", IndexMap::new(), loc()), &loc()).unwrap();
        let template = Template {
            parts: vec![crate::ast::TemplatePart::Interpolation(FieldRef {
                identifier: "user".into(),
                steps: vec![AccessStep::Field("missing".into())],
            })],
            is_multi_line: false,
        };
        let err = render_template(&env, &template, AccessMode::Strict, FormatContext::Inline).unwrap_err();
        assert!(matches!(err, InterpreterError::FieldNotFound { .. }));
    }

    #[test]
    fn resolve_preserves_taint_through_path() {
        let env = Environment::root("/proj", None);
        let mut inner = Value::of_simple_text("token", "secret", loc());
        inner.metadata.security.taint.insert("src:exec".into());
        let mut fields = IndexMap::new();
        fields.insert("token".to_string(), inner);
        env.set("creds", Value::of_object("creds", fields, loc()), &loc()).unwrap();
        let got = resolve_reference(
            &env,
            &FieldRef { identifier: "creds".into(), steps: vec![AccessStep::Field("token".into())] },
            AccessMode::Strict,
        )
        .unwrap();
        assert!(got.metadata.security.taint.contains("src:exec"));
    }

    #[test]
    fn resolve_primitive_literal_binding() {
        let env = Environment::root("/proj", None);
        env.set("count", Value::of_primitive("count", Primitive::Number(3.0), loc()), &loc()).unwrap();
        let got = resolve_reference(&env, &FieldRef { identifier: "count".into(), steps: vec![] }, AccessMode::Strict).unwrap();
        assert_eq!(coerce_to_string(&got, FormatContext::Inline), "3");
    }
}
