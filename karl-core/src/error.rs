//! Error model (C8): the two catchable error families, the two that
//! aren't, and the formatter that renders them with source context.

use std::fmt;

use crate::ast::Token;

/// Fatal to the current evaluation chain. Not catchable except by `recover`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct RuntimeError {
    pub message: String,
    pub token: Option<Token>,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            token: None,
        }
    }

    pub fn at(message: impl Into<String>, token: Token) -> Self {
        Self {
            message: message.into(),
            token: Some(token),
        }
    }

    pub fn with_token(mut self, token: Token) -> Self {
        if self.token.is_none() {
            self.token = Some(token);
        }
        self
    }
}

/// A tagged, recoverable failure raised by failure-prone builtins or by
/// `fail(msg)`. The only other error kind `recover` can catch.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct RecoverableError {
    pub kind: String,
    pub message: String,
    pub token: Option<Token>,
}

impl RecoverableError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            token: None,
        }
    }

    pub fn canceled() -> Self {
        Self::new("canceled", "task was canceled")
    }
}

/// Process-terminating error raised by the `exit` builtin.
#[derive(Debug, Clone, thiserror::Error)]
#[error("exit: {message}")]
pub struct ExitError {
    pub code: i32,
    pub message: String,
}

/// Aggregate of detached task failures, surfaced at end-of-run or
/// fail-fast.
#[derive(Debug, Clone, thiserror::Error)]
pub struct UnhandledTaskError {
    pub messages: Vec<String>,
}

impl fmt::Display for UnhandledTaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sorted = self.messages.clone();
        sorted.sort();
        write!(f, "{} unhandled task failure(s):\n{}", sorted.len(), sorted.join("\n"))
    }
}

/// Every fallible path the evaluator can take ends up here. `Signal` is
/// deliberately not part of this type — control flow is not an error,
/// it travels in the evaluator's third return slot (see `eval::Outcome`).
#[derive(Debug, Clone, thiserror::Error)]
pub enum EvalError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Recoverable(#[from] RecoverableError),
    #[error(transparent)]
    Exit(#[from] ExitError),
    #[error(transparent)]
    UnhandledTask(#[from] UnhandledTaskError),
}

impl EvalError {
    pub fn message(&self) -> String {
        match self {
            EvalError::Runtime(e) => e.message.clone(),
            EvalError::Recoverable(e) => e.message.clone(),
            EvalError::Exit(e) => e.message.clone(),
            EvalError::UnhandledTask(e) => e.to_string(),
        }
    }

    pub fn token(&self) -> Option<&Token> {
        match self {
            EvalError::Runtime(e) => e.token.as_ref(),
            EvalError::Recoverable(e) => e.token.as_ref(),
            _ => None,
        }
    }

    /// Only RuntimeError and RecoverableError are catchable by `recover`.
    pub fn is_recoverable_by_expr(&self) -> bool {
        matches!(self, EvalError::Runtime(_) | EvalError::Recoverable(_))
    }

    /// `{kind, message}` object exposed to a `recover` fallback block.
    pub fn as_kind_message(&self) -> (String, String) {
        match self {
            EvalError::Runtime(e) => ("runtime".to_string(), e.message.clone()),
            EvalError::Recoverable(e) => (e.kind.clone(), e.message.clone()),
            EvalError::Exit(e) => ("exit".to_string(), e.message.clone()),
            EvalError::UnhandledTask(e) => ("unhandled_task".to_string(), e.to_string()),
        }
    }
}

/// User-visible formatting, per spec §7.
pub fn format_error(err: &EvalError, source: Option<&str>) -> String {
    let msg = err.message();
    let Some(token) = err.token() else {
        return format!("runtime error: {msg}");
    };
    let mut out = format!(
        "runtime error: {msg}\n  at {}:{}:{}",
        token.file.as_deref().unwrap_or("<input>"),
        token.line,
        token.column
    );
    if let Some(src) = source {
        if let Some(line) = src.lines().nth(token.line.saturating_sub(1)) {
            let caret_pad = " ".repeat(token.column.saturating_sub(1));
            out.push_str(&format!("\n  {line}\n    {caret_pad}^"));
        }
    }
    out
}
