#![warn(missing_docs)]
//! structcheck Exec - Bounded Execution
//!
//! Runs a unit of work in a forked worker process and waits for it up to a
//! deadline:
//! - the worker's result is returned to the caller
//! - a panic or `Err` in the worker is relayed back as an [`ExecError`]
//!   (return `anyhow::Error` to get the backtrace from where it was created)
//! - an overdue worker is killed with `SIGKILL` and [`ExecError::Timeout`]
//!   is returned
//!
//! Process isolation (rather than a thread) is what makes the deadline
//! enforceable: a spinning computation cannot be cancelled cooperatively.

#[cfg(not(unix))]
compile_error!("structcheck-exec requires a Unix platform (fork/poll/waitpid)");

mod duration;
mod supervisor;
mod worker;

pub use duration::parse_duration;
pub use structcheck_ipc::Relay;
pub use supervisor::{
    BoundedExecutor, DEFAULT_TIMEOUT, ExecError, ExecutorConfig, run_with_timeout,
    try_run_with_timeout,
};
