//! Numeric builtins (spec §4.6 "math").
//!
//! All take and return `Float` except `abs`/`min`/`max`/`clamp`, which
//! preserve the caller's Integer/Float distinction (spec §4.1.1: numeric
//! ops stay in the operand's own type unless mixed).

use crate::builtins::{arity_error, expect_float, type_error, Registry};
use crate::error::EvalError;
use crate::eval::Evaluator;
use crate::value::Value;

pub fn register(reg: &mut Registry) {
    reg.insert("abs", abs);
    reg.insert("sqrt", sqrt);
    reg.insert("pow", pow);
    reg.insert("sin", sin);
    reg.insert("cos", cos);
    reg.insert("tan", tan);
    reg.insert("floor", floor);
    reg.insert("ceil", ceil);
    reg.insert("round", round);
    reg.insert("min", min);
    reg.insert("max", max);
    reg.insert("clamp", clamp);
}

async fn abs(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    match take1(&args, "abs")? {
        Value::Integer(n) => Ok(Value::Integer(n.abs())),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => Err(type_error("abs", "number", other)),
    }
}

async fn sqrt(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let f = expect_float("sqrt", take1(&args, "sqrt")?)?;
    Ok(Value::Float(f.sqrt()))
}

async fn pow(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let [base, exp] = take2(&args, "pow")?;
    match (base, exp) {
        (Value::Integer(b), Value::Integer(e)) if *e >= 0 => {
            Ok(Value::Integer(b.pow(*e as u32)))
        }
        _ => {
            let b = expect_float("pow", base)?;
            let e = expect_float("pow", exp)?;
            Ok(Value::Float(b.powf(e)))
        }
    }
}

async fn sin(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    Ok(Value::Float(expect_float("sin", take1(&args, "sin")?)?.sin()))
}

async fn cos(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    Ok(Value::Float(expect_float("cos", take1(&args, "cos")?)?.cos()))
}

async fn tan(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    Ok(Value::Float(expect_float("tan", take1(&args, "tan")?)?.tan()))
}

async fn floor(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    Ok(Value::Integer(expect_float("floor", take1(&args, "floor")?)?.floor() as i64))
}

async fn ceil(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    Ok(Value::Integer(expect_float("ceil", take1(&args, "ceil")?)?.ceil() as i64))
}

async fn round(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    Ok(Value::Integer(expect_float("round", take1(&args, "round")?)?.round() as i64))
}

async fn min(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let [a, b] = take2(&args, "min")?;
    pick(a, b, "min", |x, y| x <= y)
}

async fn max(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let [a, b] = take2(&args, "max")?;
    pick(a, b, "max", |x, y| x >= y)
}

async fn clamp(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    if args.len() != 3 {
        return Err(arity_error("clamp", "3", args.len()));
    }
    let v = expect_float("clamp", &args[0])?;
    let lo = expect_float("clamp", &args[1])?;
    let hi = expect_float("clamp", &args[2])?;
    let clamped = v.clamp(lo, hi);
    if let Value::Integer(_) = &args[0] {
        Ok(Value::Integer(clamped as i64))
    } else {
        Ok(Value::Float(clamped))
    }
}

fn pick(a: &Value, b: &Value, name: &str, keep_a: impl Fn(f64, f64) -> bool) -> Result<Value, EvalError> {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => {
            Ok(Value::Integer(if keep_a(*x as f64, *y as f64) { *x } else { *y }))
        }
        _ => {
            let x = expect_float(name, a)?;
            let y = expect_float(name, b)?;
            Ok(Value::Float(if keep_a(x, y) { x } else { y }))
        }
    }
}

fn take1<'a>(args: &'a [Value], name: &str) -> Result<&'a Value, EvalError> {
    args.first().ok_or_else(|| arity_error(name, "1", args.len()))
}

fn take2<'a>(args: &'a [Value], name: &str) -> Result<[&'a Value; 2], EvalError> {
    if args.len() != 2 {
        return Err(arity_error(name, "2", args.len()));
    }
    Ok([&args[0], &args[1]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pow_integer_stays_integer() {
        let ev = crate::eval::test_support::test_evaluator();
        let v = pow(&ev, vec![Value::Integer(2), Value::Integer(10)]).await.unwrap();
        assert!(matches!(v, Value::Integer(1024)));
    }

    #[tokio::test]
    async fn clamp_bounds_value() {
        let ev = crate::eval::test_support::test_evaluator();
        let v = clamp(&ev, vec![Value::Integer(15), Value::Integer(0), Value::Integer(10)])
            .await
            .unwrap();
        assert!(matches!(v, Value::Integer(10)));
    }

    #[tokio::test]
    async fn min_prefers_smaller_without_float_conversion() {
        let ev = crate::eval::test_support::test_evaluator();
        let v = min(&ev, vec![Value::Integer(3), Value::Integer(7)]).await.unwrap();
        assert!(matches!(v, Value::Integer(3)));
    }
}
