//! Lexically-scoped environment (C2).
//!
//! Shared across concurrent tasks, so reads must be safe from any task
//! while writes are serialized by the evaluator's single-threaded-per-
//! task discipline (spec §3.2). Backed by a `RwLock` over the local
//! frame; the outer pointer is immutable once constructed, so no
//! cycles can form (grounded on the teacher's `Arc<RwLock<Inner>>`
//! store pattern in `store_memory.rs`, narrowed to sync `RwLock` since
//! environment access never crosses an `.await`).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::value::Value;

pub struct Environment {
    locals: RwLock<HashMap<String, Value>>,
    outer: Option<Arc<Environment>>,
}

impl Environment {
    pub fn root() -> Arc<Environment> {
        Arc::new(Environment {
            locals: RwLock::new(HashMap::new()),
            outer: None,
        })
    }

    pub fn child(outer: &Arc<Environment>) -> Arc<Environment> {
        Arc::new(Environment {
            locals: RwLock::new(HashMap::new()),
            outer: Some(Arc::clone(outer)),
        })
    }

    /// Search the chain, outward from this frame.
    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.locals.read().unwrap().get(name) {
            return Some(v.clone());
        }
        self.outer.as_ref().and_then(|o| o.get(name))
    }

    /// Search only the current frame.
    pub fn get_local(&self, name: &str) -> Option<Value> {
        self.locals.read().unwrap().get(name).cloned()
    }

    /// Write into the current frame, shadowing any outer binding.
    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.locals.write().unwrap().insert(name.into(), value);
    }

    /// Update the nearest enclosing frame that already binds `name`.
    /// Returns whether a binding was found and updated.
    pub fn set(&self, name: &str, value: Value) -> bool {
        {
            let mut locals = self.locals.write().unwrap();
            if let Some(slot) = locals.get_mut(name) {
                *slot = value;
                return true;
            }
        }
        match &self.outer {
            Some(outer) => outer.set(name, value),
            None => false,
        }
    }

    /// Shallow copy of the local frame's bindings.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.locals.read().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_searches_outer_chain() {
        let root = Environment::root();
        root.define("x", Value::Integer(1));
        let child = Environment::child(&root);
        child.define("y", Value::Integer(2));

        assert!(matches!(child.get("x"), Some(Value::Integer(1))));
        assert!(matches!(child.get("y"), Some(Value::Integer(2))));
        assert!(root.get("y").is_none());
    }

    #[test]
    fn set_updates_nearest_binding_not_local() {
        let root = Environment::root();
        root.define("x", Value::Integer(1));
        let child = Environment::child(&root);

        assert!(child.set("x", Value::Integer(9)));
        assert!(child.get_local("x").is_none());
        assert!(matches!(root.get("x"), Some(Value::Integer(9))));
    }

    #[test]
    fn set_missing_binding_fails() {
        let root = Environment::root();
        assert!(!root.set("missing", Value::Unit));
    }

    #[test]
    fn closures_share_mutation() {
        let root = Environment::root();
        root.define("counter", Value::Integer(0));
        let a = Arc::clone(&root);
        let b = Arc::clone(&root);
        a.set("counter", Value::Integer(5));
        assert!(matches!(b.get("counter"), Some(Value::Integer(5))));
    }
}
