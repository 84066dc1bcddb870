//! Channels (C5): rendezvous and buffered conduits between tasks.
//!
//! Buffered channels map directly onto a bounded `tokio::sync::mpsc`.
//! Rendezvous is built as a capacity-1 `mpsc` whose sender additionally
//! waits for a per-item ack, so `send` does not return until a `recv`
//! has actually taken the value — the hand-off the spec requires,
//! without hand-rolling a second synchronization primitive.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};

use crate::concurrency::task::CancelToken;
use crate::error::RecoverableError;
use crate::value::Value;

enum Envelope {
    Plain(Value),
    Handshake(Value, oneshot::Sender<()>),
}

struct Inner {
    tx: Mutex<Option<mpsc::Sender<Envelope>>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Envelope>>,
    id: u64,
    rendezvous: bool,
    closed: AtomicBool,
}

#[derive(Clone)]
pub struct ChannelHandle(Arc<Inner>);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

impl ChannelHandle {
    pub fn rendezvous() -> Self {
        let (tx, rx) = mpsc::channel(1);
        ChannelHandle(Arc::new(Inner {
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            id: NEXT_ID.fetch_add(1, Ordering::SeqCst),
            rendezvous: true,
            closed: AtomicBool::new(false),
        }))
    }

    /// `0 <= capacity <= 10^6` per spec §4.4. A capacity of 0 behaves
    /// like rendezvous.
    pub fn buffered(capacity: usize) -> Self {
        if capacity == 0 {
            return Self::rendezvous();
        }
        let (tx, rx) = mpsc::channel(capacity);
        ChannelHandle(Arc::new(Inner {
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            id: NEXT_ID.fetch_add(1, Ordering::SeqCst),
            rendezvous: false,
            closed: AtomicBool::new(false),
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::SeqCst)
    }

    /// `send(ch, v)`. Fails with a `RecoverableError{kind:"send"}` if
    /// the channel is closed; otherwise delivers, respecting the given
    /// cancel token.
    pub async fn send(&self, value: Value, cancel: &CancelToken) -> Result<(), RecoverableError> {
        if self.is_closed() {
            return Err(RecoverableError::new("send", "send on closed channel"));
        }
        let tx = {
            let guard = self.0.tx.lock().unwrap();
            guard.clone()
        };
        let Some(tx) = tx else {
            return Err(RecoverableError::new("send", "send on closed channel"));
        };

        if self.0.rendezvous {
            let (ack_tx, ack_rx) = oneshot::channel();
            tokio::select! {
                _ = cancel.canceled() => Err(RecoverableError::canceled()),
                sent = tx.send(Envelope::Handshake(value, ack_tx)) => {
                    if sent.is_err() {
                        return Err(RecoverableError::new("send", "send on closed channel"));
                    }
                    tokio::select! {
                        _ = cancel.canceled() => Err(RecoverableError::canceled()),
                        _ = ack_rx => Ok(()),
                    }
                }
            }
        } else {
            tokio::select! {
                _ = cancel.canceled() => Err(RecoverableError::canceled()),
                sent = tx.send(Envelope::Plain(value)) => {
                    sent.map_err(|_| RecoverableError::new("send", "send on closed channel"))
                }
            }
        }
    }

    /// `recv(ch)` returns `(value, done)`: once the channel is closed
    /// and drained, `done` is true and `value` is `Null`.
    pub async fn recv(&self, cancel: &CancelToken) -> Result<(Value, bool), RecoverableError> {
        let mut rx = self.0.rx.lock().await;
        tokio::select! {
            _ = cancel.canceled() => Err(RecoverableError::canceled()),
            item = rx.recv() => match item {
                Some(Envelope::Plain(v)) => Ok((v, false)),
                Some(Envelope::Handshake(v, ack)) => {
                    let _ = ack.send(());
                    Ok((v, false))
                }
                None => Ok((Value::Null, true)),
            },
        }
    }

    /// `done(ch)`: closes idempotently. Subsequent `recv` on an empty,
    /// closed channel returns `(Null, true)`.
    pub fn done(&self) {
        if !self.0.closed.swap(true, Ordering::SeqCst) {
            self.0.tx.lock().unwrap().take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn buffered_fifo_order() {
        let ch = ChannelHandle::buffered(3);
        let cancel = CancelToken::new();
        ch.send(Value::Integer(1), &cancel).await.unwrap();
        ch.send(Value::Integer(2), &cancel).await.unwrap();
        ch.send(Value::Integer(3), &cancel).await.unwrap();
        let (a, _) = ch.recv(&cancel).await.unwrap();
        let (b, _) = ch.recv(&cancel).await.unwrap();
        let (c, _) = ch.recv(&cancel).await.unwrap();
        assert!(matches!(a, Value::Integer(1)));
        assert!(matches!(b, Value::Integer(2)));
        assert!(matches!(c, Value::Integer(3)));
    }

    #[tokio::test]
    async fn rendezvous_hands_off() {
        let ch = ChannelHandle::rendezvous();
        let cancel = CancelToken::new();
        let sender_ch = ch.clone();
        let sender_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            sender_ch.send(Value::string("hi"), &sender_cancel).await.unwrap();
        });
        let (v, done) = ch.recv(&cancel).await.unwrap();
        assert!(!done);
        assert!(matches!(v, Value::String(s) if s.as_str() == "hi"));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn close_is_idempotent_and_recv_reports_done() {
        let ch = ChannelHandle::buffered(1);
        let cancel = CancelToken::new();
        ch.done();
        ch.done();
        let (v, done) = ch.recv(&cancel).await.unwrap();
        assert!(done);
        assert!(matches!(v, Value::Null));
    }

    #[tokio::test]
    async fn send_on_closed_channel_fails() {
        let ch = ChannelHandle::buffered(1);
        ch.done();
        let err = ch.send(Value::Integer(1), &CancelToken::new()).await.unwrap_err();
        assert_eq!(err.kind, "send");
    }
}
