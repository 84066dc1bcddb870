//! Calendar builtins (spec §4.6 "io.time"), layered on top of the
//! epoch-millis `now()` in `runtime_builtins` — these cover formatting,
//! which needs `chrono` rather than raw integer math.

use chrono::{DateTime, Utc};

use crate::builtins::{arity_error, expect_integer, expect_string, Registry};
use crate::error::{EvalError, RecoverableError};
use crate::eval::Evaluator;
use crate::value::Value;

pub fn register(reg: &mut Registry) {
    reg.insert("formatTime", format_time);
    reg.insert("parseTime", parse_time);
}

async fn format_time(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    if args.len() != 2 {
        return Err(arity_error("formatTime", "2", args.len()));
    }
    let millis = expect_integer("formatTime", &args[0])?;
    let fmt = expect_string("formatTime", &args[1])?;
    let dt: DateTime<Utc> = DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| RecoverableError::new("range", format!("{millis} is not a valid epoch-ms timestamp")))?;
    Ok(Value::string(dt.format(&fmt).to_string()))
}

async fn parse_time(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    if args.len() != 2 {
        return Err(arity_error("parseTime", "2", args.len()));
    }
    let s = expect_string("parseTime", &args[0])?;
    let fmt = expect_string("parseTime", &args[1])?;
    let naive = chrono::NaiveDateTime::parse_from_str(&s, &fmt)
        .map_err(|e| RecoverableError::new("parse", format!("cannot parse \"{s}\" with format \"{fmt}\": {e}")))?;
    Ok(Value::Integer(naive.and_utc().timestamp_millis()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn format_then_parse_roundtrip() {
        let ev = crate::eval::test_support::test_evaluator();
        let fmt = Value::string("%Y-%m-%d");
        let formatted = format_time(&ev, vec![Value::Integer(0), fmt.clone()]).await.unwrap();
        assert!(matches!(&formatted, Value::String(s) if s.as_str() == "1970-01-01"));
        let parsed = parse_time(&ev, vec![formatted, fmt]).await.unwrap();
        assert!(matches!(parsed, Value::Integer(0)));
    }

    #[tokio::test]
    async fn out_of_range_millis_is_recoverable() {
        let ev = crate::eval::test_support::test_evaluator();
        let err = format_time(&ev, vec![Value::Integer(i64::MAX), Value::string("%Y")])
            .await
            .unwrap_err();
        assert!(matches!(err, EvalError::Recoverable(e) if e.kind == "range"));
    }
}
