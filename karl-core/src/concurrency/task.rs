//! Task lifecycle (C5): a handle to a concurrent computation with a
//! one-shot result slot, sticky cancellation, and a parent/child tree
//! for structured cancellation (spec §4.4 "Tasks").
//!
//! Grounded on the teacher's `Fiber`/`WaitState`/`TickOutcome` triad in
//! `bpmn-lite-core/src/vm.rs` and `types.rs`: a task here plays the role
//! a fiber plays there, with the BPMN-specific wait-state machinery
//! replaced by a generic cancel token and a `watch` one-shot result.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{watch, Notify};

use crate::error::EvalError;
use crate::value::Value;

/// A sticky cancellation signal: once closed it stays closed.
/// Cancellation is idempotent (spec §5 "Cancellation semantics").
#[derive(Clone)]
pub struct CancelToken(Arc<CancelInner>);

struct CancelInner {
    canceled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken(Arc::new(CancelInner {
            canceled: AtomicBool::new(false),
            notify: Notify::new(),
        }))
    }

    pub fn cancel(&self) {
        if !self.0.canceled.swap(true, Ordering::SeqCst) {
            self.0.notify.notify_waiters();
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.0.canceled.load(Ordering::SeqCst)
    }

    /// Resolves once this token is canceled. Safe to race against other
    /// futures in a `select!` (spec §5 "Suspension points").
    pub async fn canceled(&self) {
        loop {
            if self.is_canceled() {
                return;
            }
            let notified = self.0.notify.notified();
            if self.is_canceled() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

pub type TaskResult = Result<Value, Arc<EvalError>>;

struct TaskInner {
    id: u64,
    result_tx: watch::Sender<Option<TaskResult>>,
    result_rx: watch::Receiver<Option<TaskResult>>,
    done: AtomicBool,
    observed: AtomicBool,
    internal: bool,
    cancel: CancelToken,
    children: Mutex<Vec<TaskHandle>>,
    parent: Mutex<Option<Weak<TaskInner>>>,
    source_file: Option<String>,
}

/// Handle to a concurrent computation. Cheap to clone; every clone
/// refers to the same underlying task.
#[derive(Clone)]
pub struct TaskHandle(Arc<TaskInner>);

impl TaskHandle {
    pub fn new(id: u64, internal: bool, source_file: Option<String>) -> Self {
        let (tx, rx) = watch::channel(None);
        TaskHandle(Arc::new(TaskInner {
            id,
            result_tx: tx,
            result_rx: rx,
            done: AtomicBool::new(false),
            observed: AtomicBool::new(false),
            internal,
            cancel: CancelToken::new(),
            children: Mutex::new(Vec::new()),
            parent: Mutex::new(None),
            source_file,
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn is_internal(&self) -> bool {
        self.0.internal
    }

    pub fn source_file(&self) -> Option<&str> {
        self.0.source_file.as_deref()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.0.cancel
    }

    pub fn set_parent(&self, parent: &TaskHandle) {
        *self.0.parent.lock().unwrap() = Some(Arc::downgrade(&parent.0));
        parent.0.children.lock().unwrap().push(self.clone());
    }

    pub fn mark_observed(&self) {
        self.0.observed.store(true, Ordering::SeqCst);
    }

    pub fn is_observed(&self) -> bool {
        self.0.observed.load(Ordering::SeqCst)
    }

    pub fn is_done(&self) -> bool {
        self.0.done.load(Ordering::SeqCst)
    }

    /// Publish the result exactly once. Later callers (e.g. a cancel
    /// that races a natural completion) are ignored — first writer wins.
    pub fn complete(&self, result: TaskResult) {
        if self.0.done.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.0.result_tx.send(Some(result));
    }

    pub fn try_result(&self) -> Option<TaskResult> {
        self.0.result_rx.borrow().clone()
    }

    /// `task.cancel()`: closes the cancel signal, recursively cancels
    /// children, and forces completion with `RecoverableError{kind:
    /// "canceled"}` if not already terminal. Idempotent.
    pub fn cancel(&self) {
        self.0.cancel.cancel();
        for child in self.0.children.lock().unwrap().iter() {
            child.cancel();
        }
        self.complete(Err(Arc::new(EvalError::Recoverable(
            crate::error::RecoverableError::canceled(),
        ))));
    }

    /// Await completion, honoring the given cancel token and an
    /// optional fatal signal future. Mirrors `await_with_cancel` from
    /// spec §4.4.
    pub async fn await_result(&self, cancel: &CancelToken) -> TaskResult {
        self.mark_observed();
        if let Some(r) = self.try_result() {
            return r;
        }
        let mut rx = self.0.result_rx.clone();
        tokio::select! {
            _ = cancel.canceled() => Err(Arc::new(EvalError::Recoverable(
                crate::error::RecoverableError::canceled(),
            ))),
            res = async {
                loop {
                    if let Some(r) = rx.borrow().clone() {
                        return r;
                    }
                    if rx.changed().await.is_err() {
                        return Err(Arc::new(EvalError::Recoverable(
                            crate::error::RecoverableError::canceled(),
                        )));
                    }
                }
            } => res,
        }
    }
}

/// Process-wide monotonic task-id counter, mirroring the teacher's
/// `task-debug-id counter` (spec §4.5).
#[derive(Default)]
pub struct TaskIdCounter(AtomicU64);

impl TaskIdCounter {
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_is_idempotent_and_sticky() {
        let task = TaskHandle::new(1, false, None);
        task.cancel();
        task.cancel();
        assert!(task.cancel_token().is_canceled());
        let result = task.await_result(&CancelToken::new()).await;
        assert!(matches!(result, Err(e) if matches!(&*e, EvalError::Recoverable(r) if r.kind == "canceled")));
    }

    #[tokio::test]
    async fn cancel_propagates_to_children_not_siblings() {
        let parent = TaskHandle::new(1, false, None);
        let child = TaskHandle::new(2, false, None);
        let sibling = TaskHandle::new(3, false, None);
        child.set_parent(&parent);
        parent.cancel();
        assert!(child.cancel_token().is_canceled());
        assert!(!sibling.cancel_token().is_canceled());
    }

    #[tokio::test]
    async fn completion_is_first_writer_wins() {
        let task = TaskHandle::new(1, false, None);
        task.complete(Ok(Value::Integer(1)));
        task.complete(Ok(Value::Integer(2)));
        let result = task.await_result(&CancelToken::new()).await;
        assert!(matches!(result, Ok(Value::Integer(1))));
    }
}
