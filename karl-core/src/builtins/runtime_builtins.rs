//! Runtime/process builtins (spec §4.6 "runtime"): process exit,
//! recoverable failure injection, channel construction, cooperative
//! sleep, diagnostic output, and the handful of conversions/random
//! generators every script ends up reaching for.
//!
//! `log` writes to the process's stdout (the language-level output
//! stream) and separately emits a `tracing` event at `trace` level so
//! an embedder collecting structured logs sees script output flow
//! through the same pipeline as the interpreter's own diagnostics —
//! grounded on the teacher's dual stdout-and-`tracing` reporting in
//! `bpmn-lite-server/src/main.rs`.

use crate::builtins::{arity_error, expect_integer, expect_string, type_error, Registry};
use crate::concurrency::channel::ChannelHandle;
use crate::concurrency::task::TaskHandle;
use crate::error::{EvalError, ExitError, RecoverableError};
use crate::eval::Evaluator;
use crate::value::Value;

pub fn register(reg: &mut Registry) {
    reg.insert("exit", exit);
    reg.insert("fail", fail);
    reg.insert("rendezvous", rendezvous);
    reg.insert("buffered", buffered);
    reg.insert("sleep", sleep);
    reg.insert("log", log);
    reg.insert("str", str_of);
    reg.insert("now", now);
    reg.insert("parseInt", parse_int);
    reg.insert("parseFloat", parse_float);
    reg.insert("rand", rand);
    reg.insert("randInt", rand_int);
    reg.insert("cancel", cancel);
    reg.insert("send", send);
    reg.insert("recv", recv);
    reg.insert("close", close);
    reg.insert("isDone", is_done);
    reg.insert("id", id);
    reg.insert("then", then);
}

/// `task.cancel()` — member-dispatched via `bind_receiver`, so this is
/// just `cancel(task)` (spec §4.4 "structured cancellation").
async fn cancel(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let target = args.first().ok_or_else(|| arity_error("cancel", "1", 0))?;
    match target {
        Value::Task(t) => {
            t.cancel();
            Ok(Value::Unit)
        }
        other => Err(type_error("cancel", "task", other)),
    }
}

async fn send(ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    if args.len() != 2 {
        return Err(arity_error("send", "2", args.len()));
    }
    let Value::Channel(ch) = &args[0] else {
        return Err(type_error("send", "channel", &args[0]));
    };
    ch.send(args[1].clone(), &ev.current_cancel()).await?;
    Ok(Value::Unit)
}

async fn recv(ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let target = args.first().ok_or_else(|| arity_error("recv", "1", 0))?;
    let Value::Channel(ch) = target else {
        return Err(type_error("recv", "channel", target));
    };
    let (value, done) = ch.recv(&ev.current_cancel()).await?;
    let mut fields = std::collections::HashMap::new();
    fields.insert("value".to_string(), value);
    fields.insert("done".to_string(), Value::Boolean(done));
    Ok(Value::object(fields))
}

async fn close(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let target = args.first().ok_or_else(|| arity_error("close", "1", 0))?;
    match target {
        Value::Channel(ch) => {
            ch.done();
            Ok(Value::Unit)
        }
        other => Err(type_error("close", "channel", other)),
    }
}

async fn is_done(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let target = args.first().ok_or_else(|| arity_error("isDone", "1", 0))?;
    match target {
        Value::Task(t) => Ok(Value::Boolean(t.is_done())),
        Value::Channel(c) => Ok(Value::Boolean(c.is_closed())),
        other => Err(type_error("isDone", "task or channel", other)),
    }
}

async fn id(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let target = args.first().ok_or_else(|| arity_error("id", "1", 0))?;
    match target {
        Value::Task(t) => Ok(Value::Integer(t.id() as i64)),
        Value::Channel(c) => Ok(Value::Integer(c.id() as i64)),
        other => Err(type_error("id", "task or channel", other)),
    }
}

/// `task.then(f)`: spawns a continuation task that awaits `task` and
/// feeds its value into `f`, returning a new task immediately rather
/// than blocking the caller — the same "spawn a future" shape `Spawn`
/// nodes use, reached here through `Evaluator::spawn_future` instead of
/// AST evaluation.
async fn then(ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    if args.len() != 2 {
        return Err(arity_error("then", "2", args.len()));
    }
    let Value::Task(task) = &args[0] else {
        return Err(type_error("then", "task", &args[0]));
    };
    let task = task.clone();
    let callback = args[1].clone();
    let child: TaskHandle = ev.spawn_future(true, move |child_ev| async move {
        let cancel = child_ev.current_cancel();
        let value = match task.await_result(&cancel).await {
            Ok(v) => v,
            Err(e) => return Err((*e).clone()),
        };
        child_ev.apply_callable(callback, vec![value]).await
    });
    Ok(Value::Task(child))
}

async fn exit(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let code = match args.first() {
        Some(v) => expect_integer("exit", v)? as i32,
        None => 0,
    };
    let message = match args.get(1) {
        Some(v) => expect_string("exit", v)?,
        None => String::new(),
    };
    Err(ExitError { code, message }.into())
}

async fn fail(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    if args.is_empty() || args.len() > 2 {
        return Err(arity_error("fail", "1 or 2", args.len()));
    }
    let kind = expect_string("fail", &args[0])?;
    let message = match args.get(1) {
        Some(v) => expect_string("fail", v)?,
        None => kind.clone(),
    };
    Err(RecoverableError::new(kind, message).into())
}

async fn rendezvous(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    if !args.is_empty() {
        return Err(arity_error("rendezvous", "0", args.len()));
    }
    Ok(Value::Channel(ChannelHandle::rendezvous()))
}

async fn buffered(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    if args.len() != 1 {
        return Err(arity_error("buffered", "1", args.len()));
    }
    let capacity = expect_integer("buffered", &args[0])?;
    if !(0..=1_000_000).contains(&capacity) {
        return Err(RecoverableError::new("range", "buffered capacity out of range 0..=1000000").into());
    }
    Ok(Value::Channel(ChannelHandle::buffered(capacity as usize)))
}

/// `sleep(ms)`: a cooperative suspension point (spec §5) — races the
/// delay against the calling task's cancel token so a canceled task
/// doesn't block the runtime for the full duration.
async fn sleep(ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let ms = expect_integer("sleep", args.first().ok_or_else(|| arity_error("sleep", "1", 0))?)?;
    if ms < 0 {
        return Err(RecoverableError::new("range", "sleep duration must not be negative").into());
    }
    let cancel = ev.current_cancel();
    tokio::select! {
        _ = cancel.canceled() => Err(RecoverableError::canceled().into()),
        _ = tokio::time::sleep(std::time::Duration::from_millis(ms as u64)) => Ok(Value::Unit),
    }
}

async fn log(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let rendered: Vec<String> = args.iter().map(render_for_log).collect();
    let line = rendered.join(" ");
    println!("{line}");
    tracing::trace!(target: "karl::log", "{line}");
    Ok(Value::Unit)
}

fn render_for_log(v: &Value) -> String {
    match v {
        Value::String(s) => s.as_ref().clone(),
        other => other.inspect(),
    }
}

async fn str_of(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let v = args.first().ok_or_else(|| arity_error("str", "1", 0))?;
    Ok(Value::string(render_for_log(v)))
}

async fn now(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    if !args.is_empty() {
        return Err(arity_error("now", "0", args.len()));
    }
    let millis = chrono::Utc::now().timestamp_millis();
    Ok(Value::Integer(millis))
}

async fn parse_int(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let s = expect_string("parseInt", args.first().ok_or_else(|| arity_error("parseInt", "1", 0))?)?;
    s.trim()
        .parse::<i64>()
        .map(Value::Integer)
        .map_err(|_| RecoverableError::new("parse", format!("cannot parse \"{s}\" as integer")).into())
}

async fn parse_float(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let s = expect_string("parseFloat", args.first().ok_or_else(|| arity_error("parseFloat", "1", 0))?)?;
    s.trim()
        .parse::<f64>()
        .map(Value::Float)
        .map_err(|_| RecoverableError::new("parse", format!("cannot parse \"{s}\" as float")).into())
}

async fn rand(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    if !args.is_empty() {
        return Err(arity_error("rand", "0", args.len()));
    }
    Ok(Value::Float(rand::random::<f64>()))
}

async fn rand_int(_ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    if args.len() != 2 {
        return Err(arity_error("randInt", "2", args.len()));
    }
    let lo = expect_integer("randInt", &args[0])?;
    let hi = expect_integer("randInt", &args[1])?;
    if lo > hi {
        return Err(RecoverableError::new("range", "randInt: lower bound exceeds upper bound").into());
    }
    use rand::Rng;
    Ok(Value::Integer(rand::thread_rng().gen_range(lo..=hi)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fail_defaults_message_to_kind() {
        let ev = crate::eval::test_support::test_evaluator();
        let err = fail(&ev, vec![Value::string("timeout")]).await.unwrap_err();
        assert!(matches!(err, EvalError::Recoverable(e) if e.kind == "timeout" && e.message == "timeout"));
    }

    #[tokio::test]
    async fn exit_carries_code() {
        let ev = crate::eval::test_support::test_evaluator();
        let err = exit(&ev, vec![Value::Integer(7)]).await.unwrap_err();
        assert!(matches!(err, EvalError::Exit(e) if e.code == 7));
    }

    #[tokio::test]
    async fn buffered_rejects_negative_capacity() {
        let ev = crate::eval::test_support::test_evaluator();
        let err = buffered(&ev, vec![Value::Integer(-1)]).await.unwrap_err();
        assert!(matches!(err, EvalError::Recoverable(_)));
    }

    #[tokio::test]
    async fn parse_int_rejects_garbage() {
        let ev = crate::eval::test_support::test_evaluator();
        assert!(parse_int(&ev, vec![Value::string("abc")]).await.is_err());
    }

    #[tokio::test]
    async fn cancel_marks_task_canceled() {
        let ev = crate::eval::test_support::test_evaluator();
        let task = TaskHandle::new(1, false, None);
        cancel(&ev, vec![Value::Task(task.clone())]).await.unwrap();
        assert!(task.cancel_token().is_canceled());
    }

    #[tokio::test]
    async fn send_then_recv_round_trips_a_value() {
        let ev = crate::eval::test_support::test_evaluator();
        let ch = Value::Channel(ChannelHandle::buffered(1));
        send(&ev, vec![ch.clone(), Value::Integer(9)]).await.unwrap();
        let result = recv(&ev, vec![ch]).await.unwrap();
        let Value::Object(o) = result else { panic!() };
        assert!(matches!(o.read().unwrap().get("value"), Some(Value::Integer(9))));
        assert!(matches!(o.read().unwrap().get("done"), Some(Value::Boolean(false))));
    }
}
