//! JSON codec (spec §4.6 "io.json"): `Value <-> serde_json::Value`
//! conversion, exposed both as plain builtins and as the `Value::Codec`
//! handle the base environment seeds under the name `json` (spec's
//! extension-variant note, C1) so `json.encode(x)`/`json.decode(s)`
//! member-call syntax and the flat `jsonEncode`/`jsonDecode` builtins
//! reach the same conversion code.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::builtins::{arity_error, expect_string, Registry};
use crate::error::{EvalError, RecoverableError};
use crate::eval::Evaluator;
use crate::value::{KeyValue, Value};

/// Currently just a name tag — JSON is the only codec spec §4.6 names,
/// so there's nothing to parameterize yet.
pub struct CodecValue {
    pub name: &'static str,
}

pub fn json_codec_value() -> Value {
    Value::Codec(Arc::new(CodecValue { name: "json" }))
}

pub fn register(reg: &mut Registry) {
    reg.insert("jsonEncode", json_encode);
    reg.insert("jsonDecode", json_decode);
}

async fn json_encode(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let v = args.first().ok_or_else(|| arity_error("jsonEncode", "1", 0))?;
    Ok(Value::string(to_json(v)?.to_string()))
}

async fn json_decode(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let s = expect_string("jsonDecode", args.first().ok_or_else(|| arity_error("jsonDecode", "1", 0))?)?;
    let parsed: JsonValue =
        serde_json::from_str(&s).map_err(|e| RecoverableError::new("parse", format!("invalid JSON: {e}")))?;
    Ok(from_json(parsed))
}

pub fn to_json(v: &Value) -> Result<JsonValue, EvalError> {
    Ok(match v {
        Value::Null | Value::Unit => JsonValue::Null,
        Value::Boolean(b) => JsonValue::Bool(*b),
        Value::Integer(n) => JsonValue::from(*n),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Value::String(s) => JsonValue::String(s.as_ref().clone()),
        Value::Char(c) => JsonValue::String(c.clone()),
        Value::Array(a) => {
            let items = a.read().unwrap();
            let mut out = Vec::with_capacity(items.len());
            for item in items.iter() {
                out.push(to_json(item)?);
            }
            JsonValue::Array(out)
        }
        Value::Object(o) => {
            let fields = o.read().unwrap();
            let mut map = serde_json::Map::new();
            for (k, v) in fields.iter() {
                map.insert(k.clone(), to_json(v)?);
            }
            JsonValue::Object(map)
        }
        Value::Map(m) => {
            let entries = m.read().unwrap();
            let mut map = serde_json::Map::new();
            for (k, v) in entries.iter() {
                map.insert(key_to_string(k), to_json(v)?);
            }
            JsonValue::Object(map)
        }
        other => {
            return Err(RecoverableError::new(
                "encode",
                format!("{} is not JSON-encodable", other.type_tag()),
            )
            .into())
        }
    })
}

fn key_to_string(k: &KeyValue) -> String {
    match k {
        KeyValue::String(s) => s.clone(),
        KeyValue::Char(c) => c.clone(),
        KeyValue::Integer(n) => n.to_string(),
        KeyValue::Boolean(b) => b.to_string(),
    }
}

pub fn from_json(j: JsonValue) -> Value {
    match j {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Boolean(b),
        JsonValue::Number(n) => n.as_i64().map(Value::Integer).unwrap_or_else(|| Value::Float(n.as_f64().unwrap_or(0.0))),
        JsonValue::String(s) => Value::string(s),
        JsonValue::Array(items) => Value::array(items.into_iter().map(from_json).collect()),
        JsonValue::Object(fields) => {
            let mut map = HashMap::with_capacity(fields.len());
            for (k, v) in fields {
                map.insert(k, from_json(v));
            }
            Value::object(map)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn encode_then_decode_object() {
        let ev = crate::eval::test_support::test_evaluator();
        let mut fields = HashMap::new();
        fields.insert("a".to_string(), Value::Integer(1));
        let obj = Value::object(fields);
        let encoded = json_encode(&ev, vec![obj]).await.unwrap();
        let decoded = json_decode(&ev, vec![encoded]).await.unwrap();
        let Value::Object(o) = decoded else { panic!() };
        assert!(matches!(o.read().unwrap().get("a"), Some(Value::Integer(1))));
    }

    #[tokio::test]
    async fn decoding_garbage_is_a_recoverable_parse_error() {
        let ev = crate::eval::test_support::test_evaluator();
        let err = json_decode(&ev, vec![Value::string("{not json")]).await.unwrap_err();
        assert!(matches!(err, EvalError::Recoverable(e) if e.kind == "parse"));
    }

    #[test]
    fn builtins_are_not_json_encodable() {
        let err = to_json(&Value::Builtin("len")).unwrap_err();
        assert!(matches!(err, EvalError::Recoverable(e) if e.kind == "encode"));
    }
}
