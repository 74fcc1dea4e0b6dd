//! Registry (C10): a thin, read-only query surface over an
//! [`Environment`]'s visible bindings, used by diagnostics tooling and by
//! the `debug` snapshot rather than by directive evaluation itself.
//! Grounded on the teacher's `CommandRegistry` (`commands/registry.rs`)
//! query shape (`get`/`names`/`contains`), adapted to read through the
//! Environment's scope chain instead of owning a map directly.

use indexmap::IndexMap;

use crate::environment::Environment;
use crate::value::{Value, ValueKind};

pub struct BindingRegistry<'a> {
    env: &'a Environment,
}

impl<'a> BindingRegistry<'a> {
    pub fn new(env: &'a Environment) -> Self {
        Self { env }
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.env.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.env.has(name)
    }

    pub fn all(&self) -> IndexMap<String, Value> {
        self.env.all()
    }

    pub fn all_of_kind(&self, kind: ValueKind) -> IndexMap<String, Value> {
        self.env.all().into_iter().filter(|(_, v)| v.kind() == kind).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.env.all().into_keys().collect()
    }
}
