//! OS signal builtins (spec §4.6 "io.signal"): `signalWatch(name)`
//! returns a rendezvous `Channel` that yields once the named signal
//! arrives, so a script waits on it the same way it waits on any other
//! channel rather than through a separate callback mechanism.

use crate::builtins::{arity_error, expect_string, Registry};
use crate::concurrency::channel::ChannelHandle;
use crate::error::{EvalError, RecoverableError};
use crate::eval::Evaluator;
use crate::value::Value;

pub fn register(reg: &mut Registry) {
    reg.insert("signalWatch", signal_watch);
}

async fn signal_watch(ev: &Evaluator, args: Vec<Value>) -> Result<Value, EvalError> {
    let name = expect_string("signalWatch", args.first().ok_or_else(|| arity_error("signalWatch", "1", 0))?)?;
    let kind = signal_kind(&name)?;
    let channel = ChannelHandle::rendezvous();
    let cancel = ev.current_cancel();
    let sender_channel = channel.clone();

    tokio::spawn(async move {
        let mut stream = match tokio::signal::unix::signal(kind) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("signalWatch: failed to install handler: {e}");
                return;
            }
        };
        tokio::select! {
            _ = cancel.canceled() => {}
            _ = stream.recv() => {
                let _ = sender_channel.send(Value::Unit, &cancel).await;
            }
        }
    });

    Ok(Value::Channel(channel))
}

fn signal_kind(name: &str) -> Result<tokio::signal::unix::SignalKind, EvalError> {
    use tokio::signal::unix::SignalKind;
    match name {
        "INT" | "SIGINT" => Ok(SignalKind::interrupt()),
        "TERM" | "SIGTERM" => Ok(SignalKind::terminate()),
        "HUP" | "SIGHUP" => Ok(SignalKind::hangup()),
        other => Err(RecoverableError::new("signal", format!("unknown signal \"{other}\"")).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_signal_name_is_rejected() {
        let ev = crate::eval::test_support::test_evaluator();
        let err = signal_watch(&ev, vec![Value::string("BOGUS")]).await.unwrap_err();
        assert!(matches!(err, EvalError::Recoverable(e) if e.kind == "signal"));
    }
}
