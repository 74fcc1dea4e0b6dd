//! Environment (C2): a lexically scoped, append-only chain of bindings.
//!
//! Each directive body (`for`, `loop`, `when` clause, an `exe` call) runs in
//! a *child* scope created with [`Environment::create_child`]; lookups walk
//! outward to the parent chain, and a child's own bindings are invisible to
//! its parent unless explicitly surfaced with [`Environment::merge_child`].
//! A single scope's bindings only ever grow (directives bind new names as
//! they're evaluated in document order) and are never removed or rewritten
//! in place — rebinding a name is a redefinition error, not a mutation.
//!
//! Reserved ambient names (`now`, `input`, `debug`, `base`) cannot be bound
//! by `var`/`exe`/`define`/`import`; `debug` additionally produces its
//! value lazily, on first read, as a structured snapshot of everything
//! visible at that point in the scope chain.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::SourceLocation;
use crate::errors::{DefinedAt, InterpreterError, RedefinitionKind};
use crate::value::{JsonValue, LazyKind, Value, ValueKind};

fn defined_at(loc: &SourceLocation) -> DefinedAt {
    DefinedAt { file: loc.file.clone(), line: loc.line, column: loc.column }
}

/// Names no directive may bind, reserved for ambient resolvers (§4.2).
pub fn default_reserved_names() -> HashSet<String> {
    ["now", "input", "debug", "base"].into_iter().map(String::from).collect()
}

struct ScopeData {
    bindings: RefCell<IndexMap<String, Value>>,
}

/// A lexical scope. Cheap to clone (an `Rc` bundle) — every child shares
/// the root's `import_stack` and `reserved_names`, so cycle detection and
/// name protection apply uniformly no matter how deep the scope chain.
#[derive(Clone)]
pub struct Environment {
    scope: Rc<ScopeData>,
    parent: Option<Rc<Environment>>,
    pub base_path: String,
    pub current_file: Option<String>,
    import_stack: Rc<RefCell<Vec<String>>>,
    reserved_names: Rc<HashSet<String>>,
}

impl Environment {
    /// Construct the root environment for a single interpretation run.
    pub fn root(base_path: impl Into<String>, current_file: Option<String>) -> Self {
        Self {
            scope: Rc::new(ScopeData { bindings: RefCell::new(IndexMap::new()) }),
            parent: None,
            base_path: base_path.into(),
            current_file,
            import_stack: Rc::new(RefCell::new(Vec::new())),
            reserved_names: Rc::new(default_reserved_names()),
        }
    }

    /// A child scope: fresh bindings, shared import stack and reserved
    /// names, inheriting `base_path`/`current_file` unless overridden by
    /// the caller (e.g. an import switches `current_file`).
    pub fn create_child(&self) -> Self {
        Self {
            scope: Rc::new(ScopeData { bindings: RefCell::new(IndexMap::new()) }),
            parent: Some(Rc::new(self.clone())),
            base_path: self.base_path.clone(),
            current_file: self.current_file.clone(),
            import_stack: Rc::clone(&self.import_stack),
            reserved_names: Rc::clone(&self.reserved_names),
        }
    }

    /// A child scope rooted at a different file, used when entering an
    /// imported module (§4.6): its own bindings start empty, it does not
    /// see the importer's names, but shares cycle-detection state.
    pub fn create_module_child(&self, base_path: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            scope: Rc::new(ScopeData { bindings: RefCell::new(IndexMap::new()) }),
            parent: None,
            base_path: base_path.into(),
            current_file: Some(file.into()),
            import_stack: Rc::clone(&self.import_stack),
            reserved_names: Rc::clone(&self.reserved_names),
        }
    }

    pub fn is_reserved(&self, name: &str) -> bool {
        self.reserved_names.contains(name)
    }

    /// Bind a name in the current scope only. Rejects reserved names and
    /// redefinition within the same scope (§4.2); shadowing a parent's
    /// binding in a child scope is not a redefinition.
    pub fn set(&self, name: &str, value: Value, location: &SourceLocation) -> Result<(), InterpreterError> {
        if self.is_reserved(name) {
            return Err(InterpreterError::ReservedName { name: name.to_string() });
        }
        let mut bindings = self.scope.bindings.borrow_mut();
        if let Some(existing) = bindings.get(name) {
            return Err(InterpreterError::VariableRedefinition {
                name: name.to_string(),
                kind: RedefinitionKind::SameFile,
                original: defined_at(&existing.metadata.defined_at),
                conflicting: defined_at(location),
            });
        }
        bindings.insert(name.to_string(), value);
        Ok(())
    }

    /// Bind a parameter in a fresh call scope. Parameters always land in
    /// a scope created just for the call, so there is nothing to collide
    /// with, but reserved names are still off-limits.
    pub fn set_parameter(&self, name: &str, mut value: Value) -> Result<(), InterpreterError> {
        if self.is_reserved(name) {
            return Err(InterpreterError::ReservedName { name: name.to_string() });
        }
        value.metadata.is_parameter = true;
        self.scope.bindings.borrow_mut().insert(name.to_string(), value);
        Ok(())
    }

    /// Bind (or overwrite) an import-conflict-checked name, used by the
    /// import engine when merging selected bindings into the importer's
    /// scope (§4.6): conflicts are reported as `ImportConflict`, not
    /// `SameFile`, so the error message points at the right cause.
    pub fn set_imported(&self, name: &str, value: Value, location: &SourceLocation) -> Result<(), InterpreterError> {
        if self.is_reserved(name) {
            return Err(InterpreterError::ReservedName { name: name.to_string() });
        }
        let mut bindings = self.scope.bindings.borrow_mut();
        if let Some(existing) = bindings.get(name) {
            return Err(InterpreterError::VariableRedefinition {
                name: name.to_string(),
                kind: RedefinitionKind::ImportConflict,
                original: defined_at(&existing.metadata.defined_at),
                conflicting: defined_at(location),
            });
        }
        bindings.insert(name.to_string(), value);
        Ok(())
    }

    /// Look up a name, walking outward through parent scopes. `debug` is
    /// intercepted before touching storage: it has no binding of its own,
    /// it materializes a snapshot from whatever scope is asking.
    pub fn get(&self, name: &str) -> Option<Value> {
        if name == "debug" {
            return Some(self.debug_snapshot());
        }
        if let Some(v) = self.scope.bindings.borrow().get(name) {
            return Some(v.clone());
        }
        self.parent.as_ref().and_then(|p| p.get(name))
    }

    pub fn has(&self, name: &str) -> bool {
        name == "debug" || self.scope.bindings.borrow().contains_key(name) || self.parent.as_ref().is_some_and(|p| p.has(name))
    }

    /// All bindings visible from this scope, nearest scope winning on
    /// name collisions. Used by `debug` and by C10's registry queries.
    pub fn all(&self) -> IndexMap<String, Value> {
        let mut merged = self.parent.as_ref().map(|p| p.all()).unwrap_or_default();
        for (k, v) in self.scope.bindings.borrow().iter() {
            merged.insert(k.clone(), v.clone());
        }
        merged
    }

    /// Surface specific bindings from a child scope up into this one, used
    /// by the `when`/`guard` clause evaluator: the winning clause's body
    /// runs in its own child scope, and only the names it's told to
    /// publish (rather than its whole scope) become visible to the
    /// caller, preserving the rule that a directive body never leaks
    /// unrelated bindings into its surrounding document.
    pub fn merge_child(&self, child: &Environment, names: &[String], location: &SourceLocation) -> Result<(), InterpreterError> {
        for name in names {
            if let Some(v) = child.scope.bindings.borrow().get(name) {
                self.set(name, v.clone(), location)?;
            }
        }
        Ok(())
    }

    /// Push a module path onto the shared import stack, failing with
    /// `CircularImport` if it's already present (§4.6).
    pub fn push_import(&self, path: &str) -> Result<(), InterpreterError> {
        let mut stack = self.import_stack.borrow_mut();
        if let Some(pos) = stack.iter().position(|p| p == path) {
            let mut chain: Vec<String> = stack[pos..].to_vec();
            chain.push(path.to_string());
            return Err(InterpreterError::CircularImport { chain });
        }
        stack.push(path.to_string());
        Ok(())
    }

    pub fn pop_import(&self) {
        self.import_stack.borrow_mut().pop();
    }

    pub fn import_depth(&self) -> usize {
        self.import_stack.borrow().len()
    }

    fn debug_snapshot(&self) -> Value {
        let mut fields = IndexMap::new();
        for (name, v) in self.all() {
            fields.insert(name, JsonValue::String(v.kind().to_string()));
        }
        let mut value = Value::of_structured("debug", JsonValue::Object(fields), SourceLocation::default());
        value.metadata.is_reserved = true;
        value.metadata.is_system = true;
        value.metadata.is_read_only = true;
        value.metadata.is_lazy = true;
        value.lazy = Some(LazyKind::DebugSnapshot);
        value
    }

    /// Names currently bound to an `Executable`, across the whole visible
    /// chain — used by the run/exe dispatcher to resolve a bare name.
    pub fn executable_names(&self) -> Vec<String> {
        self.all()
            .into_iter()
            .filter(|(_, v)| v.kind() == ValueKind::Executable)
            .map(|(k, _)| k)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Primitive;

    fn loc(line: u32) -> SourceLocation {
        SourceLocation { file: Some("t.mld".into()), line, column: 1 }
    }

    #[test]
    fn set_then_get_same_scope() {
        let env = Environment::root("/proj", Some("t.mld".into()));
        env.set("x", Value::of_primitive("x", Primitive::Number(1.0), loc(1)), &loc(1)).unwrap();
        assert!(env.has("x"));
        assert_eq!(env.get("x").unwrap().kind(), ValueKind::Primitive);
    }

    #[test]
    fn reserved_name_rejected() {
        let env = Environment::root("/proj", None);
        let err = env.set("now", Value::of_primitive("now", Primitive::Null, loc(1)), &loc(1)).unwrap_err();
        assert!(matches!(err, InterpreterError::ReservedName { .. }));
    }

    #[test]
    fn redefinition_in_same_scope_errors() {
        let env = Environment::root("/proj", None);
        env.set("x", Value::of_primitive("x", Primitive::Number(1.0), loc(1)), &loc(1)).unwrap();
        let err = env.set("x", Value::of_primitive("x", Primitive::Number(2.0), loc(2)), &loc(2)).unwrap_err();
        assert!(matches!(err, InterpreterError::VariableRedefinition { kind: RedefinitionKind::SameFile, .. }));
    }

    #[test]
    fn child_can_shadow_parent_without_error() {
        let parent = Environment::root("/proj", None);
        parent.set("x", Value::of_primitive("x", Primitive::Number(1.0), loc(1)), &loc(1)).unwrap();
        let child = parent.create_child();
        child.set("x", Value::of_primitive("x", Primitive::Number(2.0), loc(2)), &loc(2)).unwrap();
        assert_eq!(child.get("x").unwrap().payload, crate::value::ValuePayload::Primitive(Primitive::Number(2.0)));
        assert_eq!(parent.get("x").unwrap().payload, crate::value::ValuePayload::Primitive(Primitive::Number(1.0)));
    }

    #[test]
    fn child_bindings_do_not_leak_to_parent_without_merge() {
        let parent = Environment::root("/proj", None);
        let child = parent.create_child();
        child.set("y", Value::of_primitive("y", Primitive::Number(1.0), loc(1)), &loc(1)).unwrap();
        assert!(!parent.has("y"));
    }

    #[test]
    fn merge_child_publishes_named_bindings_only() {
        let parent = Environment::root("/proj", None);
        let child = parent.create_child();
        child.set("a", Value::of_primitive("a", Primitive::Number(1.0), loc(1)), &loc(1)).unwrap();
        child.set("b", Value::of_primitive("b", Primitive::Number(2.0), loc(1)), &loc(1)).unwrap();
        parent.merge_child(&child, &["a".to_string()], &loc(2)).unwrap();
        assert!(parent.has("a"));
        assert!(!parent.has("b"));
    }

    #[test]
    fn import_cycle_detected() {
        let env = Environment::root("/proj", None);
        env.push_import("a.mld").unwrap();
        env.push_import("b.mld").unwrap();
        let err = env.push_import("a.mld").unwrap_err();
        match err {
            InterpreterError::CircularImport { chain } => assert_eq!(chain, vec!["a.mld", "b.mld", "a.mld"]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn import_stack_pops() {
        let env = Environment::root("/proj", None);
        env.push_import("a.mld").unwrap();
        assert_eq!(env.import_depth(), 1);
        env.pop_import();
        assert_eq!(env.import_depth(), 0);
    }

    #[test]
    fn debug_is_lazy_and_reflects_current_bindings() {
        let env = Environment::root("/proj", None);
        env.set("x", Value::of_primitive("x", Primitive::Number(1.0), loc(1)), &loc(1)).unwrap();
        let snap = env.get("debug").unwrap();
        assert!(snap.metadata.is_lazy);
        match &snap.payload {
            crate::value::ValuePayload::StructuredValue(JsonValue::Object(fields)) => {
                assert!(fields.contains_key("x"));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn all_merges_parent_and_child_child_wins() {
        let parent = Environment::root("/proj", None);
        parent.set("x", Value::of_primitive("x", Primitive::Number(1.0), loc(1)), &loc(1)).unwrap();
        let child = parent.create_child();
        child.set("x2", Value::of_primitive("x2", Primitive::Number(2.0), loc(1)), &loc(1)).unwrap();
        let all = child.all();
        assert!(all.contains_key("x"));
        assert!(all.contains_key("x2"));
    }
}
