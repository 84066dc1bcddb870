//! Filesystem builtins (spec §4.6 "io.fs"): read/write/append/exists,
//! backed by `tokio::fs` so a read never blocks the executor a sibling
//! task is running on.

use crate::builtins::{arity_error, expect_string, Registry};
use crate::error::{EvalError, RecoverableError};
use crate::eval::Evaluator;
use crate::value::Value;

pub fn register(reg: &mut Registry) {
    reg.insert("readFile", read_file);
    reg.insert("writeFile", write_file);
    reg.insert("appendFile", append_file);
    reg.insert("fileExists", file_exists);
}

async fn read_file(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let path = expect_string("readFile", args.first().ok_or_else(|| arity_error("readFile", "1", 0))?)?;
    tokio::fs::read_to_string(&path)
        .await
        .map(Value::string)
        .map_err(|e| RecoverableError::new("readFile", format!("{path}: {e}")).into())
}

async fn write_file(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    if args.len() != 2 {
        return Err(arity_error("writeFile", "2", args.len()));
    }
    let path = expect_string("writeFile", &args[0])?;
    let contents = expect_string("writeFile", &args[1])?;
    tokio::fs::write(&path, contents)
        .await
        .map(|_| Value::Unit)
        .map_err(|e| RecoverableError::new("writeFile", format!("{path}: {e}")).into())
}

async fn append_file(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    use tokio::io::AsyncWriteExt;
    if args.len() != 2 {
        return Err(arity_error("appendFile", "2", args.len()));
    }
    let path = expect_string("appendFile", &args[0])?;
    let contents = expect_string("appendFile", &args[1])?;
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
        .map_err(|e| RecoverableError::new("appendFile", format!("{path}: {e}")))?;
    file.write_all(contents.as_bytes())
        .await
        .map_err(|e| RecoverableError::new("appendFile", format!("{path}: {e}")))?;
    Ok(Value::Unit)
}

async fn file_exists(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let path = expect_string("fileExists", args.first().ok_or_else(|| arity_error("fileExists", "1", 0))?)?;
    Ok(Value::Boolean(tokio::fs::metadata(&path).await.is_ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_roundtrip() {
        let ev = crate::eval::test_support::test_evaluator();
        let path = std::env::temp_dir().join(format!("karl-fs-test-{}.txt", std::process::id()));
        let path_str = path.to_string_lossy().to_string();
        write_file(&ev, vec![Value::string(path_str.clone()), Value::string("hello")])
            .await
            .unwrap();
        let read = read_file(&ev, vec![Value::string(path_str.clone())]).await.unwrap();
        assert!(matches!(read, Value::String(s) if s.as_str() == "hello"));
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn missing_file_is_a_recoverable_readfile_error() {
        let ev = crate::eval::test_support::test_evaluator();
        let err = read_file(&ev, vec![Value::string("/nonexistent/path/karl-test")])
            .await
            .unwrap_err();
        assert!(matches!(err, EvalError::Recoverable(e) if e.kind == "readFile"));
    }
}
