//! Pattern matcher (C3): destructure a value against a pattern, binding
//! names into an environment as sub-patterns succeed (spec §4.3).

use std::sync::Arc;

use crate::env::Environment;
use crate::error::RuntimeError;
use crate::value::Value;

#[derive(Debug, Clone)]
pub enum LiteralPattern {
    Integer(i64),
    Float(f64),
    String(String),
    Char(String),
    Boolean(bool),
    Null,
}

#[derive(Debug, Clone)]
pub struct ObjectPatternField {
    pub key: String,
    pub pattern: Pattern,
}

#[derive(Debug, Clone)]
pub enum Pattern {
    Wildcard,
    Identifier(String),
    Literal(LiteralPattern),
    /// Endpoints must be literals; inclusive over Int/Float/Char.
    Range {
        start: LiteralPattern,
        end: LiteralPattern,
    },
    Object(Vec<ObjectPatternField>),
    /// `rest` is bound as an Array against the remaining tail when
    /// present; otherwise lengths must match exactly.
    Array {
        elements: Vec<Pattern>,
        rest: Option<Box<Pattern>>,
    },
    Tuple(Vec<Pattern>),
    /// Reserved; conforming implementations reject it (spec §4.3).
    Call,
}

/// `match_pattern(pattern, value, env) -> (matched, error?)`. Bindings
/// are committed into `env` as sub-patterns succeed; a partial match
/// does not roll back bindings already written (arms get their own
/// environment, so this is never observable between arms).
pub fn match_pattern(
    pattern: &Pattern,
    value: &Value,
    env: &Arc<Environment>,
) -> Result<bool, RuntimeError> {
    match pattern {
        Pattern::Wildcard => Ok(true),
        Pattern::Identifier(name) => {
            env.define(name.clone(), value.clone());
            Ok(true)
        }
        Pattern::Literal(lit) => Ok(literal_matches(lit, value)),
        Pattern::Range { start, end } => Ok(range_matches(start, end, value)),
        Pattern::Object(fields) => match_object(fields, value, env),
        Pattern::Array { elements, rest } => match_array(elements, rest.as_deref(), value, env),
        Pattern::Tuple(elements) => match_tuple(elements, value, env),
        Pattern::Call => Err(RuntimeError::new("call patterns are not supported")),
    }
}

fn literal_matches(lit: &LiteralPattern, value: &Value) -> bool {
    match (lit, value) {
        (LiteralPattern::Integer(a), Value::Integer(b)) => a == b,
        (LiteralPattern::Float(a), Value::Float(b)) => a == b,
        (LiteralPattern::String(a), Value::String(b)) => a.as_str() == b.as_str(),
        (LiteralPattern::Char(a), Value::Char(b)) => a == b,
        (LiteralPattern::Boolean(a), Value::Boolean(b)) => a == b,
        (LiteralPattern::Null, Value::Null) => true,
        _ => false,
    }
}

fn range_matches(start: &LiteralPattern, end: &LiteralPattern, value: &Value) -> bool {
    match (start, end, value) {
        (LiteralPattern::Integer(a), LiteralPattern::Integer(b), Value::Integer(v)) => {
            (a.min(b)..=a.max(b)).contains(v)
        }
        (LiteralPattern::Float(a), LiteralPattern::Float(b), Value::Float(v)) => {
            v >= a.min(*b) && v <= a.max(*b)
        }
        (LiteralPattern::Char(a), LiteralPattern::Char(b), Value::Char(v)) => {
            let (a, b, v) = (a.chars().next(), b.chars().next(), v.chars().next());
            matches!((a, b, v), (Some(a), Some(b), Some(v)) if v >= a.min(b) && v <= a.max(b))
        }
        _ => false,
    }
}

fn match_object(
    fields: &[ObjectPatternField],
    value: &Value,
    env: &Arc<Environment>,
) -> Result<bool, RuntimeError> {
    let Value::Object(obj) = value else {
        return Ok(false);
    };
    let snapshot = obj.read().unwrap().clone();
    for field in fields {
        match snapshot.get(&field.key) {
            Some(v) => {
                if !match_pattern(&field.pattern, v, env)? {
                    return Ok(false);
                }
            }
            None => return Ok(false),
        }
    }
    Ok(true)
}

fn match_array(
    elements: &[Pattern],
    rest: Option<&Pattern>,
    value: &Value,
    env: &Arc<Environment>,
) -> Result<bool, RuntimeError> {
    let Value::Array(arr) = value else {
        return Ok(false);
    };
    let items = arr.read().unwrap().clone();
    match rest {
        None => {
            if items.len() != elements.len() {
                return Ok(false);
            }
            for (p, v) in elements.iter().zip(items.iter()) {
                if !match_pattern(p, v, env)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Some(rest_pattern) => {
            if items.len() < elements.len() {
                return Ok(false);
            }
            for (p, v) in elements.iter().zip(items.iter()) {
                if !match_pattern(p, v, env)? {
                    return Ok(false);
                }
            }
            let tail = Value::array(items[elements.len()..].to_vec());
            match_pattern(rest_pattern, &tail, env)
        }
    }
}

fn match_tuple(
    elements: &[Pattern],
    value: &Value,
    env: &Arc<Environment>,
) -> Result<bool, RuntimeError> {
    let Value::Array(arr) = value else {
        return Ok(false);
    };
    let items = arr.read().unwrap().clone();
    if items.len() != elements.len() {
        return Ok(false);
    }
    for (p, v) in elements.iter().zip(items.iter()) {
        if !match_pattern(p, v, env)? {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Environment;

    #[test]
    fn wildcard_always_matches_and_binds_nothing() {
        let env = Environment::root();
        assert!(match_pattern(&Pattern::Wildcard, &Value::Integer(5), &env).unwrap());
    }

    #[test]
    fn literal_round_trip() {
        let env = Environment::root();
        let p = Pattern::Literal(LiteralPattern::Integer(42));
        assert!(match_pattern(&p, &Value::Integer(42), &env).unwrap());
        assert!(!match_pattern(&p, &Value::Integer(7), &env).unwrap());
    }

    #[test]
    fn array_rest_binds_remainder() {
        let env = Environment::root();
        let p = Pattern::Array {
            elements: vec![Pattern::Identifier("a".into()), Pattern::Identifier("b".into())],
            rest: Some(Box::new(Pattern::Identifier("rest".into()))),
        };
        let v = Value::array(vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]);
        assert!(match_pattern(&p, &v, &env).unwrap());
        assert!(matches!(env.get("a"), Some(Value::Integer(1))));
        assert!(matches!(env.get("b"), Some(Value::Integer(2))));
        let Some(Value::Array(rest)) = env.get("rest") else {
            panic!("rest not bound to an array");
        };
        assert_eq!(rest.read().unwrap().len(), 1);
    }

    #[test]
    fn object_pattern_missing_key_fails_not_errors() {
        let env = Environment::root();
        let p = Pattern::Object(vec![ObjectPatternField {
            key: "missing".into(),
            pattern: Pattern::Wildcard,
        }]);
        let v = Value::object(Default::default());
        assert!(!match_pattern(&p, &v, &env).unwrap());
    }

    #[test]
    fn call_pattern_is_rejected() {
        let env = Environment::root();
        assert!(match_pattern(&Pattern::Call, &Value::Unit, &env).is_err());
    }
}
