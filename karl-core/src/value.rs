//! Value model (C1): the closed, tagged set of runtime values and the
//! rules for equality, truthiness, and inspection.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::ast::AstNode;
use crate::env::Environment;
use crate::error::RecoverableError;
use crate::pattern::Pattern;

/// A typed composite key for Map/Set, per spec §3.1: "one of String,
/// Char, Integer, Boolean". Carries its originating tag so the
/// inspector can round-trip it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyValue {
    String(String),
    Char(String),
    Integer(i64),
    Boolean(bool),
}

impl KeyValue {
    pub fn from_value(v: &Value) -> Option<Self> {
        match v {
            Value::String(s) => Some(KeyValue::String(s.as_ref().clone())),
            Value::Char(c) => Some(KeyValue::Char(c.clone())),
            Value::Integer(i) => Some(KeyValue::Integer(*i)),
            Value::Boolean(b) => Some(KeyValue::Boolean(*b)),
            _ => None,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            KeyValue::String(s) => Value::string(s),
            KeyValue::Char(c) => Value::Char(c),
            KeyValue::Integer(i) => Value::Integer(i),
            KeyValue::Boolean(b) => Value::Boolean(b),
        }
    }
}

/// Type tag used for operator dispatch, equality, and inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    Integer,
    Float,
    Boolean,
    String,
    Char,
    Null,
    Unit,
    Array,
    Object,
    Map,
    Set,
    Function,
    Builtin,
    Partial,
    Task,
    Channel,
    Module,
    ModuleBuilder,
    Shape,
    Codec,
    SqlDb,
    SqlTx,
    HttpServer,
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TypeTag::Integer => "integer",
            TypeTag::Float => "float",
            TypeTag::Boolean => "boolean",
            TypeTag::String => "string",
            TypeTag::Char => "char",
            TypeTag::Null => "null",
            TypeTag::Unit => "unit",
            TypeTag::Array => "array",
            TypeTag::Object => "object",
            TypeTag::Map => "map",
            TypeTag::Set => "set",
            TypeTag::Function => "function",
            TypeTag::Builtin => "builtin",
            TypeTag::Partial => "partial",
            TypeTag::Task => "task",
            TypeTag::Channel => "channel",
            TypeTag::Module => "module",
            TypeTag::ModuleBuilder => "module_builder",
            TypeTag::Shape => "shape",
            TypeTag::Codec => "codec",
            TypeTag::SqlDb => "sqldb",
            TypeTag::SqlTx => "sqltx",
            TypeTag::HttpServer => "httpserver",
        };
        f.write_str(s)
    }
}

pub type SharedArray = Arc<RwLock<Vec<Value>>>;
pub type SharedObject = Arc<RwLock<HashMap<String, Value>>>;
pub type SharedMap = Arc<RwLock<HashMap<KeyValue, Value>>>;
pub type SharedSet = Arc<RwLock<BTreeSet<KeyValue>>>;

/// A user-defined function: parameter patterns, body, captured
/// environment, and an optional name (for recursion and stack traces).
#[derive(Clone)]
pub struct FunctionValue {
    pub params: Vec<Pattern>,
    pub body: Arc<AstNode>,
    pub env: Arc<Environment>,
    pub name: Option<String>,
}

/// A callable plus a vector of (possibly absent) bound arguments. Holes
/// are filled left-to-right by the next call, encoding currying.
#[derive(Clone)]
pub struct PartialValue {
    pub callee: Box<Value>,
    pub bound: Vec<Option<Value>>,
}

pub type ShapeFn = Arc<dyn Fn(&Value) -> Result<Value, RecoverableError> + Send + Sync>;

/// Deferred module activation (see `Value::ModuleBuilder`).
pub struct ModuleBuilder {
    pub canonical_path: std::path::PathBuf,
    pub base_env: Arc<Environment>,
    pub program: Arc<crate::ast::Program>,
}

/// Runtime values. A closed set; every variant carries a `TypeTag` used
/// uniformly for operator dispatch, equality, and inspection (spec §3.1).
#[derive(Clone)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    String(Arc<String>),
    Char(String),
    Null,
    Unit,
    Array(SharedArray),
    Object(SharedObject),
    Map(SharedMap),
    Set(SharedSet),
    Function(Arc<FunctionValue>),
    Builtin(&'static str),
    Partial(Arc<PartialValue>),
    Task(crate::concurrency::task::TaskHandle),
    Channel(crate::concurrency::channel::ChannelHandle),
    Module(Arc<Environment>),
    /// The "builder" an import resolves to (spec §4.7): invoking it
    /// with zero arguments instantiates a fresh module environment and
    /// evaluates the module program into it, deferring side effects to
    /// call-site activation.
    ModuleBuilder(Arc<ModuleBuilder>),
    Shape(ShapeFn),
    Codec(Arc<crate::builtins::io::json::CodecValue>),
    #[cfg(feature = "sql")]
    SqlDb(Arc<crate::builtins::io::sql::SqlDbHandle>),
    #[cfg(feature = "sql")]
    SqlTx(Arc<crate::builtins::io::sql::SqlTxHandle>),
    HttpServer(Arc<crate::builtins::io::http::HttpServerHandle>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Value {
        Value::String(Arc::new(s.into()))
    }

    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Arc::new(RwLock::new(items)))
    }

    pub fn object(fields: HashMap<String, Value>) -> Value {
        Value::Object(Arc::new(RwLock::new(fields)))
    }

    pub fn type_tag(&self) -> TypeTag {
        match self {
            Value::Integer(_) => TypeTag::Integer,
            Value::Float(_) => TypeTag::Float,
            Value::Boolean(_) => TypeTag::Boolean,
            Value::String(_) => TypeTag::String,
            Value::Char(_) => TypeTag::Char,
            Value::Null => TypeTag::Null,
            Value::Unit => TypeTag::Unit,
            Value::Array(_) => TypeTag::Array,
            Value::Object(_) => TypeTag::Object,
            Value::Map(_) => TypeTag::Map,
            Value::Set(_) => TypeTag::Set,
            Value::Function(_) => TypeTag::Function,
            Value::Builtin(_) => TypeTag::Builtin,
            Value::Partial(_) => TypeTag::Partial,
            Value::Task(_) => TypeTag::Task,
            Value::Channel(_) => TypeTag::Channel,
            Value::Module(_) => TypeTag::Module,
            Value::ModuleBuilder(_) => TypeTag::ModuleBuilder,
            Value::Shape(_) => TypeTag::Shape,
            Value::Codec(_) => TypeTag::Codec,
            #[cfg(feature = "sql")]
            Value::SqlDb(_) => TypeTag::SqlDb,
            #[cfg(feature = "sql")]
            Value::SqlTx(_) => TypeTag::SqlTx,
            Value::HttpServer(_) => TypeTag::HttpServer,
        }
    }

    /// Truthiness (spec §4.1.1): falsy iff null, false, 0, 0.0, "", [],
    /// {}, empty map, empty set. Everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Integer(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Char(c) => !c.is_empty(),
            Value::Array(a) => !a.read().unwrap().is_empty(),
            Value::Object(o) => !o.read().unwrap().is_empty(),
            Value::Map(m) => !m.read().unwrap().is_empty(),
            Value::Set(s) => !s.read().unwrap().is_empty(),
            _ => true,
        }
    }

    /// `length` as used by Array/String member access and pattern
    /// matching rest-arity checks. Counts codepoints for strings, not
    /// bytes (spec §3.1).
    pub fn length(&self) -> Option<usize> {
        match self {
            Value::String(s) => Some(s.chars().count()),
            Value::Array(a) => Some(a.read().unwrap().len()),
            Value::Object(o) => Some(o.read().unwrap().len()),
            Value::Map(m) => Some(m.read().unwrap().len()),
            Value::Set(s) => Some(s.read().unwrap().len()),
            _ => None,
        }
    }

    /// Strict equality (`==`): same type; containers compare by
    /// identity (spec §4.1, §8 property `strict_equal([1,2,3],[1,2,3])`
    /// is false).
    pub fn strict_eq(&self, other: &Value) -> bool {
        use Value::*;
        match (self, other) {
            (Integer(a), Integer(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Boolean(a), Boolean(b)) => a == b,
            (String(a), String(b)) => a == b,
            (Char(a), Char(b)) => a == b,
            (Null, Null) => true,
            (Unit, Unit) => true,
            (Array(a), Array(b)) => Arc::ptr_eq(a, b),
            (Object(a), Object(b)) => Arc::ptr_eq(a, b),
            (Map(a), Map(b)) => Arc::ptr_eq(a, b),
            (Set(a), Set(b)) => Arc::ptr_eq(a, b),
            (Function(a), Function(b)) => Arc::ptr_eq(a, b),
            (Builtin(a), Builtin(b)) => a == b,
            (Partial(a), Partial(b)) => Arc::ptr_eq(a, b),
            (Task(a), Task(b)) => a.id() == b.id(),
            (Channel(a), Channel(b)) => a.id() == b.id(),
            (Module(a), Module(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Structural equality (`eqv`): recursive/elementwise. `ModuleObject`
    /// is normalized to an Object-shaped pair view on both sides before
    /// comparing, per the Open Question in spec §9 (asymmetric in the
    /// original; this reimplementation picks the symmetric reading).
    pub fn eqv(&self, other: &Value) -> bool {
        use Value::*;
        match (self, other) {
            (Integer(a), Integer(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Integer(a), Float(b)) | (Float(b), Integer(a)) => (*a as f64) == *b,
            (Boolean(a), Boolean(b)) => a == b,
            (String(a), String(b)) => a == b,
            (Char(a), Char(b)) => a == b,
            (Null, Null) => true,
            (Unit, Unit) => true,
            (Array(a), Array(b)) => {
                let (a, b) = (a.read().unwrap(), b.read().unwrap());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.eqv(y))
            }
            (Object(_), Object(_)) | (Object(_), Module(_)) | (Module(_), Object(_)) | (Module(_), Module(_)) => {
                let a = self.as_object_pairs();
                let b = other.as_object_pairs();
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|ov| ov.eqv(v)))
            }
            (Map(a), Map(b)) => {
                let (a, b) = (a.read().unwrap(), b.read().unwrap());
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|ov| ov.eqv(v)))
            }
            (Set(a), Set(b)) => *a.read().unwrap() == *b.read().unwrap(),
            _ => self.strict_eq(other),
        }
    }

    fn as_object_pairs(&self) -> HashMap<String, Value> {
        match self {
            Value::Object(o) => o.read().unwrap().clone(),
            Value::Module(env) => env.snapshot(),
            _ => HashMap::new(),
        }
    }

    /// Debug-printer used by the `log` builtin and error messages, kept
    /// distinct from `Debug` so it reflects language-level formatting
    /// rather than Rust internals.
    pub fn inspect(&self) -> String {
        match self {
            Value::Integer(n) => n.to_string(),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.is_finite() {
                    format!("{f:.1}")
                } else {
                    f.to_string()
                }
            }
            Value::Boolean(b) => b.to_string(),
            Value::String(s) => format!("\"{s}\""),
            Value::Char(c) => format!("'{c}'"),
            Value::Null => "null".to_string(),
            Value::Unit => "unit".to_string(),
            Value::Array(a) => {
                let items: Vec<String> = a.read().unwrap().iter().map(Value::inspect).collect();
                format!("[{}]", items.join(", "))
            }
            Value::Object(o) => {
                let mut items: Vec<String> = o
                    .read()
                    .unwrap()
                    .iter()
                    .map(|(k, v)| format!("{k}: {}", v.inspect()))
                    .collect();
                items.sort();
                format!("{{{}}}", items.join(", "))
            }
            Value::Map(m) => {
                let mut items: Vec<String> = m
                    .read()
                    .unwrap()
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.clone().into_value().inspect(), v.inspect()))
                    .collect();
                items.sort();
                format!("Map{{{}}}", items.join(", "))
            }
            Value::Set(s) => {
                let items: Vec<String> = s
                    .read()
                    .unwrap()
                    .iter()
                    .map(|k| k.clone().into_value().inspect())
                    .collect();
                format!("Set{{{}}}", items.join(", "))
            }
            Value::Function(f) => format!("<function {}>", f.name.as_deref().unwrap_or("anonymous")),
            Value::Builtin(name) => format!("<builtin {name}>"),
            Value::Partial(_) => "<partial>".to_string(),
            Value::Task(t) => format!("<task {}>", t.id()),
            Value::Channel(c) => format!("<channel {}>", c.id()),
            Value::Module(_) => "<module>".to_string(),
            Value::ModuleBuilder(_) => "<module builder>".to_string(),
            Value::Shape(_) => "<shape>".to_string(),
            Value::Codec(_) => "<codec>".to_string(),
            #[cfg(feature = "sql")]
            Value::SqlDb(_) => "<sqldb>".to_string(),
            #[cfg(feature = "sql")]
            Value::SqlTx(_) => "<sqltx>".to_string(),
            Value::HttpServer(_) => "<httpserver>".to_string(),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value({})", self.inspect())
    }
}
