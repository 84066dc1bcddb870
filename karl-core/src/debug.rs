//! Debug hook (C9): before/after-node callbacks plus a per-task
//! call-frame stack mirror, grounded on the teacher's `RuntimeEvent`
//! append-only audit trail (`events.rs`) — narrowed here to the spec's
//! "narrow step/pause hook" (spec §4.8), since persisted state is out
//! of scope (spec §6).

use std::sync::Mutex;

use crate::ast::Token;
use crate::env::Environment;
use std::sync::Arc;

/// One node-evaluation event, carrying everything a debugger UI needs
/// to render a step.
#[derive(Clone)]
pub struct DebugEvent {
    pub file: Option<String>,
    pub line: usize,
    pub column: usize,
    pub node_kind: &'static str,
    pub frame_depth: usize,
    pub task_id: u64,
    pub env: Arc<Environment>,
}

impl DebugEvent {
    pub fn from_token(token: &Token, node_kind: &'static str, frame_depth: usize, task_id: u64, env: &Arc<Environment>) -> Self {
        DebugEvent {
            file: token.file.clone(),
            line: token.line,
            column: token.column,
            node_kind,
            frame_depth,
            task_id,
            env: Arc::clone(env),
        }
    }
}

/// A call-frame, pushed on `Call`/`Spawn` entry and popped on exit.
#[derive(Clone)]
pub struct Frame {
    pub function_name: Option<String>,
    pub called_at: Option<Token>,
}

/// Returned by a debugger to unwind the stack cooperatively — it
/// propagates through the evaluator exactly like any other error.
#[derive(Debug, Clone, thiserror::Error)]
#[error("debugger terminated the program")]
pub struct DebugTerminated;

/// Debugger callbacks. An embedder (REPL, playground, IDE integration)
/// implements this; the evaluator only ever calls through the trait.
pub trait Debugger: Send + Sync {
    fn before_node(&self, event: &DebugEvent) -> Result<(), DebugTerminated> {
        let _ = event;
        Ok(())
    }

    fn after_node(&self, event: &DebugEvent) -> Result<(), DebugTerminated> {
        let _ = event;
        Ok(())
    }

    fn frame_pushed(&self, _frame: &Frame) {}
    fn frame_popped(&self, _frame: &Frame) {}
}

/// Per-task frame stack mirror the evaluator maintains so a debugger
/// can inspect call depth without walking the Rust call stack itself.
#[derive(Default)]
pub struct FrameStack(Mutex<Vec<Frame>>);

impl FrameStack {
    pub fn push(&self, frame: Frame, debugger: Option<&dyn Debugger>) {
        self.0.lock().unwrap().push(frame.clone());
        if let Some(d) = debugger {
            d.frame_pushed(&frame);
        }
    }

    pub fn pop(&self, debugger: Option<&dyn Debugger>) {
        if let Some(frame) = self.0.lock().unwrap().pop() {
            if let Some(d) = debugger {
                d.frame_popped(&frame);
            }
        }
    }

    pub fn depth(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}
