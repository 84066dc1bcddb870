//! Concurrency core (C5): task lifecycle, channels, and the shared
//! runtime state that tracks detached-failure accounting.

pub mod channel;
pub mod runtime;
pub mod task;

pub use channel::ChannelHandle;
pub use runtime::{RuntimeState, TaskFailurePolicy};
pub use task::{CancelToken, TaskHandle, TaskResult};
