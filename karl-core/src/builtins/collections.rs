//! Collection builtins (spec §4.6 "collections").
//!
//! Calling back into user code (`filter`, `reduce`, `find`, `sort`'s
//! comparator) goes through `Evaluator::apply_callable`, the same path
//! `Call` nodes use, so these builtins behave identically to if the
//! source had written the loop by hand.

use crate::builtins::{arity_error, expect_array, type_error, Registry};
use crate::error::EvalError;
use crate::eval::Evaluator;
use crate::value::{KeyValue, Value};

pub fn register(reg: &mut Registry) {
    reg.insert("map", map);
    reg.insert("get", get);
    reg.insert("set", set);
    reg.insert("add", add);
    reg.insert("has", has);
    reg.insert("delete", delete);
    reg.insert("keys", keys);
    reg.insert("values", values);
    reg.insert("len", len);
    reg.insert("sort", sort);
    reg.insert("filter", filter);
    reg.insert("reduce", reduce);
    reg.insert("sum", sum);
    reg.insert("find", find);
}

async fn map(ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let [arr, f] = take2(&args, "map")?;
    let items = expect_array("map", arr)?.read().unwrap().clone();
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        out.push(ev.apply_callable(f.clone(), vec![item]).await?);
    }
    Ok(Value::array(out))
}

async fn get(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    if args.len() != 2 {
        return Err(arity_error("get", "2", args.len()));
    }
    match (&args[0], &args[1]) {
        (Value::Object(o), Value::String(k)) => Ok(o.read().unwrap().get(k.as_str()).cloned().unwrap_or(Value::Null)),
        (Value::Map(m), k) => {
            let key = KeyValue::from_value(k).ok_or_else(|| type_error("get", "map key", k))?;
            Ok(m.read().unwrap().get(&key).cloned().unwrap_or(Value::Null))
        }
        (other, _) => Err(type_error("get", "object or map", other)),
    }
}

async fn set(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    if args.len() != 3 {
        return Err(arity_error("set", "3", args.len()));
    }
    match (&args[0], &args[1]) {
        (Value::Object(o), Value::String(k)) => {
            o.write().unwrap().insert(k.as_str().to_string(), args[2].clone());
            Ok(Value::Unit)
        }
        (Value::Map(m), k) => {
            let key = KeyValue::from_value(k).ok_or_else(|| type_error("set", "map key", k))?;
            m.write().unwrap().insert(key, args[2].clone());
            Ok(Value::Unit)
        }
        (other, _) => Err(type_error("set", "object or map", other)),
    }
}

async fn add(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let [target, item] = take2(&args, "add")?;
    match target {
        Value::Array(a) => {
            a.write().unwrap().push(item.clone());
            Ok(Value::Unit)
        }
        Value::Set(s) => {
            let key = KeyValue::from_value(item).ok_or_else(|| type_error("add", "set key", item))?;
            s.write().unwrap().insert(key);
            Ok(Value::Unit)
        }
        other => Err(type_error("add", "array or set", other)),
    }
}

async fn has(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let [target, key] = take2(&args, "has")?;
    match target {
        Value::Object(o) => {
            let k = match key {
                Value::String(s) => s.as_str().to_string(),
                other => return Err(type_error("has", "string key", other)),
            };
            Ok(Value::Boolean(o.read().unwrap().contains_key(&k)))
        }
        Value::Map(m) => {
            let k = KeyValue::from_value(key).ok_or_else(|| type_error("has", "map key", key))?;
            Ok(Value::Boolean(m.read().unwrap().contains_key(&k)))
        }
        Value::Set(s) => {
            let k = KeyValue::from_value(key).ok_or_else(|| type_error("has", "set key", key))?;
            Ok(Value::Boolean(s.read().unwrap().contains(&k)))
        }
        other => Err(type_error("has", "object, map, or set", other)),
    }
}

async fn delete(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let [target, key] = take2(&args, "delete")?;
    match target {
        Value::Object(o) => {
            let k = match key {
                Value::String(s) => s.as_str().to_string(),
                other => return Err(type_error("delete", "string key", other)),
            };
            o.write().unwrap().remove(&k);
            Ok(Value::Unit)
        }
        Value::Map(m) => {
            let k = KeyValue::from_value(key).ok_or_else(|| type_error("delete", "map key", key))?;
            m.write().unwrap().remove(&k);
            Ok(Value::Unit)
        }
        Value::Set(s) => {
            let k = KeyValue::from_value(key).ok_or_else(|| type_error("delete", "set key", key))?;
            s.write().unwrap().remove(&k);
            Ok(Value::Unit)
        }
        other => Err(type_error("delete", "object, map, or set", other)),
    }
}

async fn keys(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let target = take1(&args, "keys")?;
    match target {
        Value::Object(o) => Ok(Value::array(o.read().unwrap().keys().cloned().map(Value::string).collect())),
        Value::Map(m) => Ok(Value::array(m.read().unwrap().keys().cloned().map(KeyValue::into_value).collect())),
        other => Err(type_error("keys", "object or map", other)),
    }
}

async fn values(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let target = take1(&args, "values")?;
    match target {
        Value::Object(o) => Ok(Value::array(o.read().unwrap().values().cloned().collect())),
        Value::Map(m) => Ok(Value::array(m.read().unwrap().values().cloned().collect())),
        other => Err(type_error("values", "object or map", other)),
    }
}

async fn len(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let target = take1(&args, "len")?;
    target
        .length()
        .map(|n| Value::Integer(n as i64))
        .ok_or_else(|| type_error("len", "a sized container", target))
}

async fn sort(ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let arr = expect_array("sort", take1(&args, "sort")?)?;
    let mut items = arr.read().unwrap().clone();
    let comparator = args.get(1).cloned();
    // `sort` may invoke a user comparator that blocks; spec §9 leaves
    // concurrent comparator execution unenforced, so this runs serially.
    if let Some(cmp) = comparator {
        let mut decorated: Vec<(Value, i64)> = Vec::with_capacity(items.len());
        for item in items.drain(..) {
            decorated.push((item, 0));
        }
        // Insertion sort using the user comparator so comparisons stay
        // ordered and sequential (the comparator may itself await).
        let mut sorted: Vec<Value> = Vec::with_capacity(decorated.len());
        for (item, _) in decorated {
            let mut idx = sorted.len();
            while idx > 0 {
                let order = ev
                    .apply_callable(cmp.clone(), vec![item.clone(), sorted[idx - 1].clone()])
                    .await?;
                let less = match order {
                    Value::Integer(n) => n < 0,
                    Value::Boolean(b) => b,
                    other => return Err(type_error("sort", "comparator result", &other)),
                };
                if less {
                    idx -= 1;
                } else {
                    break;
                }
            }
            sorted.insert(idx, item);
        }
        Ok(Value::array(sorted))
    } else {
        items.sort_by(default_scalar_cmp);
        Ok(Value::array(items))
    }
}

pub(crate) fn default_scalar_cmp(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => x.cmp(y),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

async fn filter(ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let [arr, pred] = take2(&args, "filter")?;
    let items = expect_array("filter", arr)?.read().unwrap().clone();
    let mut out = Vec::new();
    for item in items {
        if ev.apply_callable(pred.clone(), vec![item.clone()]).await?.is_truthy() {
            out.push(item);
        }
    }
    Ok(Value::array(out))
}

async fn reduce(ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    if args.len() != 3 {
        return Err(arity_error("reduce", "3", args.len()));
    }
    let items = expect_array("reduce", &args[0])?.read().unwrap().clone();
    let f = args[1].clone();
    let mut acc = args[2].clone();
    for item in items {
        acc = ev.apply_callable(f.clone(), vec![acc, item]).await?;
    }
    Ok(acc)
}

async fn sum(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let items = expect_array("sum", take1(&args, "sum")?)?.read().unwrap().clone();
    let mut int_acc: i64 = 0;
    let mut float_acc: f64 = 0.0;
    let mut is_float = false;
    for item in items {
        match item {
            Value::Integer(n) if !is_float => int_acc += n,
            Value::Integer(n) => float_acc += n as f64,
            Value::Float(f) => {
                if !is_float {
                    float_acc = int_acc as f64;
                    is_float = true;
                }
                float_acc += f;
            }
            other => return Err(type_error("sum", "number", &other)),
        }
    }
    Ok(if is_float { Value::Float(float_acc) } else { Value::Integer(int_acc) })
}

async fn find(ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let [arr, pred] = take2(&args, "find")?;
    let items = expect_array("find", arr)?.read().unwrap().clone();
    for item in items {
        if ev.apply_callable(pred.clone(), vec![item.clone()]).await?.is_truthy() {
            return Ok(item);
        }
    }
    Ok(Value::Null)
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
    async fn sum_mixes_integers_and_floats() {
        let arr = Value::array(vec![Value::Integer(1), Value::Integer(2), Value::Float(1.5)]);
        let ev = crate::eval::test_support::test_evaluator();
        let summed = sum(&ev, vec![arr]).await.unwrap();
        assert!(matches!(summed, Value::Float(f) if (f - 4.5).abs() < 1e-9));
    }

    #[tokio::test]
    async fn object_get_set_roundtrip() {
        let obj = Value::object(Default::default());
        let ev = crate::eval::test_support::test_evaluator();
        set(&ev, vec![obj.clone(), Value::string("k"), Value::Integer(7)])
            .await
            .unwrap();
        let got = get(&ev, vec![obj, Value::string("k")]).await.unwrap();
        assert!(matches!(got, Value::Integer(7)));
    }

    #[test]
    fn default_scalar_cmp_orders_integers() {
        use std::cmp::Ordering;
        assert_eq!(default_scalar_cmp(&Value::Integer(1), &Value::Integer(2)), Ordering::Less);
    }
}
