//! String builtins (spec §4.6 "strings").

use crate::builtins::{arity_error, expect_string, Registry};
use crate::error::EvalError;
use crate::eval::Evaluator;
use crate::value::Value;

pub fn register(reg: &mut Registry) {
    reg.insert("split", split);
    reg.insert("chars", chars);
    reg.insert("trim", trim);
    reg.insert("toLower", to_lower);
    reg.insert("toUpper", to_upper);
    reg.insert("contains", contains);
    reg.insert("startsWith", starts_with);
    reg.insert("endsWith", ends_with);
    reg.insert("replace", replace);
}

async fn split(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let [s, sep] = take2(&args, "split")?;
    let s = expect_string("split", s)?;
    let sep = expect_string("split", sep)?;
    let parts: Vec<Value> = if sep.is_empty() {
        s.chars().map(|c| Value::Char(c.to_string())).collect()
    } else {
        s.split(sep.as_str()).map(Value::string).collect()
    };
    Ok(Value::array(parts))
}

async fn chars(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let s = expect_string("chars", take1(&args, "chars")?)?;
    Ok(Value::array(s.chars().map(|c| Value::Char(c.to_string())).collect()))
}

async fn trim(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let s = expect_string("trim", take1(&args, "trim")?)?;
    Ok(Value::string(s.trim().to_string()))
}

async fn to_lower(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let s = expect_string("toLower", take1(&args, "toLower")?)?;
    Ok(Value::string(s.to_lowercase()))
}

async fn to_upper(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let s = expect_string("toUpper", take1(&args, "toUpper")?)?;
    Ok(Value::string(s.to_uppercase()))
}

async fn contains(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let [s, needle] = take2(&args, "contains")?;
    let s = expect_string("contains", s)?;
    let needle = expect_string("contains", needle)?;
    Ok(Value::Boolean(s.contains(needle.as_str())))
}

async fn starts_with(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let [s, prefix] = take2(&args, "startsWith")?;
    let s = expect_string("startsWith", s)?;
    let prefix = expect_string("startsWith", prefix)?;
    Ok(Value::Boolean(s.starts_with(prefix.as_str())))
}

async fn ends_with(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let [s, suffix] = take2(&args, "endsWith")?;
    let s = expect_string("endsWith", s)?;
    let suffix = expect_string("endsWith", suffix)?;
    Ok(Value::Boolean(s.ends_with(suffix.as_str())))
}

async fn replace(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    if args.len() != 3 {
        return Err(arity_error("replace", "3", args.len()));
    }
    let s = expect_string("replace", &args[0])?;
    let from = expect_string("replace", &args[1])?;
    let to = expect_string("replace", &args[2])?;
    Ok(Value::string(s.replace(from.as_str(), &to)))
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
    use crate::eval::test_support::test_evaluator;

    #[tokio::test]
    async fn split_on_separator() {
        let ev = test_evaluator();
        let v = split(&ev, vec![Value::string("a,b,c"), Value::string(",")]).await.unwrap();
        let Value::Array(a) = v else { panic!() };
        assert_eq!(a.read().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn length_counts_codepoints_not_bytes() {
        let v = Value::string("héllo");
        assert_eq!(v.length(), Some(5));
    }
}
