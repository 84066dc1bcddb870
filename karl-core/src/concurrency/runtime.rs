//! Process-wide runtime state (spec §4.5): task registry, the
//! task-failure policy, the fatal-failure slot, and the driver-set
//! configuration knobs (program args/path, environ snapshot, SQL driver
//! name). Grounded on the teacher's `BpmnLiteEngine` facade in
//! `engine.rs`, which plays the same "one shared object the whole
//! evaluation hangs off of" role.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{Notify, OnceCell};

use crate::concurrency::task::{TaskHandle, TaskIdCounter};
use crate::error::{EvalError, UnhandledTaskError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskFailurePolicy {
    FailFast,
    Defer,
}

impl TaskFailurePolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fail-fast" => Some(TaskFailurePolicy::FailFast),
            "defer" => Some(TaskFailurePolicy::Defer),
            _ => None,
        }
    }
}

struct Registry {
    tasks: HashMap<u64, Weak<()>>,
    detached_failures: Vec<String>,
}

/// Setters on the runtime are idempotent; `set_fatal_task_failure`
/// stores the first reported error and notifies waiters exactly once.
pub struct RuntimeState {
    policy: Mutex<TaskFailurePolicy>,
    registry: Mutex<Registry>,
    task_ids: TaskIdCounter,
    fatal: OnceCell<Arc<EvalError>>,
    fatal_notify: Notify,
    program_args: Mutex<Vec<String>>,
    program_path: Mutex<Option<String>>,
    environ: Mutex<Vec<(String, String)>>,
    sql_driver: Mutex<Option<String>>,
}

impl RuntimeState {
    pub fn new(policy: TaskFailurePolicy) -> Arc<Self> {
        Arc::new(Self {
            policy: Mutex::new(policy),
            registry: Mutex::new(Registry {
                tasks: HashMap::new(),
                detached_failures: Vec::new(),
            }),
            task_ids: TaskIdCounter::default(),
            fatal: OnceCell::new(),
            fatal_notify: Notify::new(),
            program_args: Mutex::new(Vec::new()),
            program_path: Mutex::new(None),
            environ: Mutex::new(Vec::new()),
            sql_driver: Mutex::new(None),
        })
    }

    pub fn next_task_id(&self) -> u64 {
        self.task_ids.next()
    }

    pub fn policy(&self) -> TaskFailurePolicy {
        *self.policy.lock().unwrap()
    }

    pub fn set_task_failure_policy(&self, policy: TaskFailurePolicy) {
        *self.policy.lock().unwrap() = policy;
    }

    pub fn set_program_args(&self, args: Vec<String>) {
        *self.program_args.lock().unwrap() = args;
    }

    pub fn program_args(&self) -> Vec<String> {
        self.program_args.lock().unwrap().clone()
    }

    pub fn set_program_path(&self, path: String) {
        *self.program_path.lock().unwrap() = Some(path);
    }

    pub fn program_path(&self) -> Option<String> {
        self.program_path.lock().unwrap().clone()
    }

    pub fn set_environ_snapshot(&self, env: Vec<(String, String)>) {
        *self.environ.lock().unwrap() = env;
    }

    pub fn environ_snapshot(&self) -> Vec<(String, String)> {
        self.environ.lock().unwrap().clone()
    }

    pub fn set_sql_driver(&self, driver: String) {
        *self.sql_driver.lock().unwrap() = Some(driver);
    }

    pub fn sql_driver(&self) -> Option<String> {
        self.sql_driver.lock().unwrap().clone()
    }

    /// Idempotent: stores the first reported error and closes the
    /// fatal channel exactly once (spec §4.5).
    pub fn set_fatal_task_failure(&self, err: Arc<EvalError>) {
        if self.fatal.set(err).is_ok() {
            self.fatal_notify.notify_waiters();
        }
    }

    pub fn fatal_error(&self) -> Option<Arc<EvalError>> {
        self.fatal.get().cloned()
    }

    /// Resolves once a fatal task failure has been recorded. A
    /// suspension-point cooperative check (spec §5).
    pub async fn fatal(&self) {
        loop {
            if self.fatal.initialized() {
                return;
            }
            let notified = self.fatal_notify.notified();
            if self.fatal.initialized() {
                return;
            }
            notified.await;
        }
    }

    /// Record a task as terminal in the registry. Detached failures are
    /// recorded synchronously here — no background observer is needed
    /// (spec §9 design notes).
    pub fn record_completion(&self, task: &TaskHandle, result: &Result<crate::value::Value, Arc<EvalError>>) {
        if let Err(err) = result {
            if !matches!(err.as_ref(), EvalError::Recoverable(r) if r.kind == "canceled") && !task.is_observed() {
                let message = format!(
                    "{}: {}",
                    task.source_file().unwrap_or("<task>"),
                    err
                );
                match self.policy() {
                    TaskFailurePolicy::FailFast => {
                        self.set_fatal_task_failure(err.clone());
                        self.registry.lock().unwrap().detached_failures.push(message);
                    }
                    TaskFailurePolicy::Defer => {
                        self.registry.lock().unwrap().detached_failures.push(message);
                    }
                }
            }
        }
    }

    /// `check_unhandled_task_failures()`: inspects the registry and
    /// returns an aggregated error, if any (spec §6).
    pub fn check_unhandled_task_failures(&self) -> Option<UnhandledTaskError> {
        let failures = self.registry.lock().unwrap().detached_failures.clone();
        if failures.is_empty() {
            None
        } else {
            Some(UnhandledTaskError { messages: failures })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_failure_is_first_writer_wins() {
        let rt = RuntimeState::new(TaskFailurePolicy::FailFast);
        let e1 = Arc::new(EvalError::Recoverable(crate::error::RecoverableError::new(
            "fail", "first",
        )));
        let e2 = Arc::new(EvalError::Recoverable(crate::error::RecoverableError::new(
            "fail", "second",
        )));
        rt.set_fatal_task_failure(e1);
        rt.set_fatal_task_failure(e2);
        assert_eq!(rt.fatal_error().unwrap().message(), "first");
    }

    #[test]
    fn defer_policy_collects_without_setting_fatal() {
        let rt = RuntimeState::new(TaskFailurePolicy::Defer);
        let task = TaskHandle::new(rt.next_task_id(), false, Some("prog.kl".into()));
        let err: Arc<EvalError> = Arc::new(EvalError::Recoverable(
            crate::error::RecoverableError::new("fail", "boom"),
        ));
        rt.record_completion(&task, &Err(err));
        assert!(rt.fatal_error().is_none());
        assert_eq!(rt.check_unhandled_task_failures().unwrap().messages.len(), 1);
    }
}
