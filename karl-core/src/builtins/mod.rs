//! Built-in registry (C6): a process-wide name→callable map plus the
//! member-access dispatch tables for Array/String/Map/Set/Channel/Task.
//!
//! `register_builtins()` rebuilds the map in one shot (grounded on the
//! teacher's "Draft → Published → Retired" `TemplateStore`/registry
//! rebuild convention in `authoring/registry.rs`) so tests can
//! reinitialize a clean `Evaluator` without touching global state —
//! unlike the teacher, there is no process-wide singleton; every
//! `Evaluator` owns its own `Registry`.

pub mod collections;
pub mod io;
pub mod math;
pub mod runtime_builtins;
pub mod strings;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::EvalError;
use crate::eval::Evaluator;
use crate::value::Value;

#[async_trait]
pub trait Builtin: Send + Sync {
    async fn call(&self, ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError>;
}

/// Adapts a plain async closure into a `Builtin`, so most entries in
/// the registry are a one-line `async move { ... }` block rather than a
/// hand-written trait impl.
pub struct FnBuiltin<F>(pub F);

#[async_trait]
impl<F, Fut> Builtin for FnBuiltin<F>
where
    F: Fn(&Evaluator, Vec<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, EvalError>> + Send,
{
    async fn call(&self, ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
        (self.0)(ev, args).await
    }
}

pub struct Registry {
    builtins: HashMap<&'static str, Arc<dyn Builtin>>,
}

impl Registry {
    pub fn get(&self, name: &str) -> Option<Arc<dyn Builtin>> {
        self.builtins.get(name).cloned()
    }

    /// The interned `&'static str` key backing `name`, if registered.
    /// Member dispatch (`eval::Evaluator`'s `Member` node) needs this to
    /// build a `Value::Builtin` from a borrowed `String` key.
    pub fn resolve_static_name(&self, name: &str) -> Option<&'static str> {
        self.builtins.get_key_value(name).map(|(k, _)| *k)
    }

    pub fn names(&self) -> impl Iterator<Item = &&'static str> {
        self.builtins.iter().map(|(k, _)| k)
    }

    fn insert<F, Fut>(&mut self, name: &'static str, f: F)
    where
        F: Fn(&Evaluator, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, EvalError>> + Send + 'static,
    {
        self.builtins.insert(name, Arc::new(FnBuiltin(f)));
    }
}

/// Rebuild the full builtin map. Every category from spec §4.6.
pub fn register_builtins() -> Registry {
    let mut reg = Registry { builtins: HashMap::new() };
    runtime_builtins::register(&mut reg);
    strings::register(&mut reg);
    collections::register(&mut reg);
    math::register(&mut reg);
    io::register(&mut reg);
    reg
}

pub(crate) fn arity_error(name: &str, expected: &str, got: usize) -> EvalError {
    crate::error::RuntimeError::new(format!(
        "{name}: expected {expected} argument(s), got {got}"
    ))
    .into()
}

pub(crate) fn type_error(name: &str, expected: &str, got: &Value) -> EvalError {
    crate::error::RuntimeError::new(format!(
        "{name}: expected {expected}, got {}",
        got.type_tag()
    ))
    .into()
}

pub(crate) fn expect_string(name: &str, v: &Value) -> Result<String, EvalError> {
    match v {
        Value::String(s) => Ok(s.as_str().to_string()),
        other => Err(type_error(name, "string", other)),
    }
}

pub(crate) fn expect_integer(name: &str, v: &Value) -> Result<i64, EvalError> {
    match v {
        Value::Integer(n) => Ok(*n),
        other => Err(type_error(name, "integer", other)),
    }
}

pub(crate) fn expect_float(name: &str, v: &Value) -> Result<f64, EvalError> {
    match v {
        Value::Integer(n) => Ok(*n as f64),
        Value::Float(f) => Ok(*f),
        other => Err(type_error(name, "number", other)),
    }
}

pub(crate) fn expect_array(name: &str, v: &Value) -> Result<crate::value::SharedArray, EvalError> {
    match v {
        Value::Array(a) => Ok(a.clone()),
        other => Err(type_error(name, "array", other)),
    }
}

/// Helper shared by member-access dispatch (spec §4.6 "Receiver
/// binding"): wraps a global builtin as a zero-extra-arity call with
/// the receiver value prepended, without needing bound methods to
/// exist as a distinct `Value` kind.
pub fn bind_receiver(name: &'static str, receiver: Value) -> Value {
    Value::Partial(Arc::new(crate::value::PartialValue {
        callee: Box::new(Value::Builtin(name)),
        bound: vec![Some(receiver)],
    }))
}
