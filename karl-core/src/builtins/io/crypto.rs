//! Crypto/identity builtins (spec §4.6 "io.crypto"): hashing and UUID
//! generation, backed by the teacher's own `sha2`/`uuid` dependencies.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::builtins::{arity_error, expect_string, Registry};
use crate::error::EvalError;
use crate::eval::Evaluator;
use crate::value::Value;

pub fn register(reg: &mut Registry) {
    reg.insert("sha256", sha256);
    reg.insert("uuidv4", uuidv4);
}

async fn sha256(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let s = expect_string("sha256", args.first().ok_or_else(|| arity_error("sha256", "1", 0))?)?;
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    let digest = hasher.finalize();
    Ok(Value::string(hex_encode(&digest)))
}

async fn uuidv4(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    if !args.is_empty() {
        return Err(arity_error("uuidv4", "0", args.len()));
    }
    Ok(Value::string(Uuid::new_v4().to_string()))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sha256_of_empty_string_is_well_known() {
        let ev = crate::eval::test_support::test_evaluator();
        let v = sha256(&ev, vec![Value::string("")]).await.unwrap();
        let expected = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b85";
        assert!(matches!(v, Value::String(s) if s.as_str() == expected));
    }

    #[tokio::test]
    async fn uuidv4_is_well_formed() {
        let ev = crate::eval::test_support::test_evaluator();
        let v = uuidv4(&ev, vec![]).await.unwrap();
        let Value::String(s) = v else { panic!() };
        assert_eq!(s.len(), 36);
    }
}
