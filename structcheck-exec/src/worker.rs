//! Worker Process Body
//!
//! Runs inside the forked child. The child owns a copy of the caller's
//! address space, so the task closure and everything it captured are already
//! here; only the outcome has to travel back.
//!
//! The child never returns into the caller's stack. It posts exactly one
//! [`WorkerMessage`] and leaves with `_exit`, skipping destructors and
//! `atexit` handlers that belong to the parent.

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt::Display;
use std::fs::File;
use std::io::Write;
use std::os::unix::io::{FromRawFd, RawFd};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Mutex, PoisonError};
use structcheck_ipc::{
    FailureKind, FrameError, FrameWriter, Relay, Trace, TraceOrigin, WorkerMessage,
};

/// Exit code when the outcome could not be written to the pipe
const EXIT_PIPE_FAILED: i32 = 70;

/// `file:line:col` of the latest panic in this process. Only the worker's
/// panic hook writes it.
static PANIC_LOCATION: Mutex<Option<String>> = Mutex::new(None);

/// Run `task`, report its outcome on `write_fd`, and terminate the process.
pub(crate) fn serve<T, E, F>(write_fd: RawFd, task: F) -> !
where
    T: Relay,
    E: Display + 'static,
    F: FnOnce() -> Result<T, E>,
{
    // Frames above this one belong to the caller; nothing may unwind into them.
    let code = catch_unwind(AssertUnwindSafe(|| {
        prepare_worker();
        let message = run_task(task);

        let file = unsafe { File::from_raw_fd(write_fd) };
        let mut writer = FrameWriter::new(file);
        match post(&mut writer, &message) {
            Ok(()) => 0,
            Err(_) => EXIT_PIPE_FAILED,
        }
    }))
    .unwrap_or(EXIT_PIPE_FAILED);

    unsafe { libc::_exit(code) }
}

/// Process-wide setup that only the forked child may do.
fn prepare_worker() {
    // SAFETY: after fork the child runs a single thread, so nothing can read
    // the environment concurrently.
    if std::env::var_os("RUST_LIB_BACKTRACE").is_none() {
        unsafe { std::env::set_var("RUST_LIB_BACKTRACE", "1") };
    }

    *PANIC_LOCATION.lock().unwrap_or_else(PoisonError::into_inner) = None;
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        if let Some(location) = info.location() {
            *PANIC_LOCATION.lock().unwrap_or_else(PoisonError::into_inner) =
                Some(location.to_string());
        }
        previous(info);
    }));
}

fn take_panic_location() -> Option<String> {
    PANIC_LOCATION
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
}

/// Write `message`. A result too large for one frame is replaced by a
/// relay failure, so the caller never mistakes it for a crash.
pub(crate) fn post<W: Write>(
    writer: &mut FrameWriter<W>,
    message: &WorkerMessage,
) -> Result<(), FrameError> {
    match writer.write(message) {
        Err(FrameError::FrameTooLarge { size, max }) => writer.write(&WorkerMessage::Failure {
            kind: FailureKind::Relay,
            message: format!(
                "task result too large to send back ({size} bytes, limit {max} bytes)"
            ),
            backtrace: None,
        }),
        other => other,
    }
}

/// Execute the task and translate its outcome into a message.
///
/// Building the message runs user code too (`Display`, archiving), so it
/// sits under the same `catch_unwind` as the task.
pub(crate) fn run_task<T, E, F>(task: F) -> WorkerMessage
where
    T: Relay,
    E: Display + 'static,
    F: FnOnce() -> Result<T, E>,
{
    match catch_unwind(AssertUnwindSafe(|| outcome(task))) {
        Ok(message) => message,
        Err(panic) => panic_failure(&*panic, take_panic_location()),
    }
}

fn outcome<T, E, F>(task: F) -> WorkerMessage
where
    T: Relay,
    E: Display + 'static,
    F: FnOnce() -> Result<T, E>,
{
    match task() {
        Ok(value) => match value.to_payload() {
            Ok(payload) => WorkerMessage::Complete { payload },
            Err(e) => WorkerMessage::Failure {
                kind: FailureKind::Relay,
                message: format!("task result could not be sent back: {e}"),
                backtrace: None,
            },
        },
        Err(err) => error_failure(err),
    }
}

/// An `anyhow::Error` brings the backtrace taken where it was created. Any
/// other error only gets the worker's stack at the point it was returned.
fn error_failure<E: Display + 'static>(err: E) -> WorkerMessage {
    if let Some(err) = (&err as &dyn Any).downcast_ref::<anyhow::Error>() {
        if err.backtrace().status() == BacktraceStatus::Captured {
            return WorkerMessage::Failure {
                kind: FailureKind::Error,
                message: format!("{err:#}"),
                backtrace: Some(Trace {
                    origin: TraceOrigin::Error,
                    text: err.backtrace().to_string(),
                }),
            };
        }
    }

    let backtrace = Backtrace::force_capture();
    WorkerMessage::Failure {
        kind: FailureKind::Error,
        message: err.to_string(),
        backtrace: (backtrace.status() == BacktraceStatus::Captured).then(|| Trace {
            origin: TraceOrigin::Worker,
            text: backtrace.to_string(),
        }),
    }
}

/// Panic failure for the caller.
///
/// Text from the standard assertion macros is relayed unchanged. Any other
/// panic (indexing, `unwrap`, explicit `panic!`) also names where it
/// happened.
fn panic_failure(panic: &(dyn Any + Send), location: Option<String>) -> WorkerMessage {
    let mut message = panic_message(panic);
    if let Some(location) = location {
        if !message.starts_with("assertion") {
            message.push_str(&format!("\n    panicked at {location}"));
        }
    }
    WorkerMessage::Failure {
        kind: FailureKind::Panic,
        message,
        backtrace: None,
    }
}

/// Extract the human-readable text of a panic payload
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;
    use std::io::Cursor;
    use structcheck_ipc::{FrameReader, MAX_FRAME_SIZE};

    /// Error whose `Display` itself panics
    #[derive(Debug)]
    struct UnprintableError;

    impl fmt::Display for UnprintableError {
        fn fmt(&self, _: &mut fmt::Formatter<'_>) -> fmt::Result {
            panic!("display blew up")
        }
    }

    #[test]
    fn test_success_becomes_complete() {
        let message = run_task(|| Ok::<u32, String>(42));
        match message {
            WorkerMessage::Complete { payload } => {
                assert_eq!(u32::from_payload(&payload).unwrap(), 42);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_error_carries_message() {
        let message = run_task(|| Err::<u32, String>("x".to_string()));
        match message {
            WorkerMessage::Failure {
                kind,
                message,
                backtrace,
            } => {
                assert_eq!(kind, FailureKind::Error);
                assert_eq!(message, "x");
                if let Some(trace) = backtrace {
                    assert_eq!(trace.origin, TraceOrigin::Worker);
                }
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_panicking_display_becomes_panic_failure() {
        let message = run_task(|| Err::<u32, UnprintableError>(UnprintableError));
        match message {
            WorkerMessage::Failure { kind, message, .. } => {
                assert_eq!(kind, FailureKind::Panic);
                assert_eq!(message, "display blew up");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_panic_is_relayed_verbatim() {
        let message = run_task(|| -> Result<u32, String> { panic!("boom {}", 7) });
        match message {
            WorkerMessage::Failure {
                kind,
                message,
                backtrace,
            } => {
                assert_eq!(kind, FailureKind::Panic);
                assert_eq!(message, "boom 7");
                assert!(backtrace.is_none());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_panic_location_appended_outside_assertions() {
        let payload: Box<dyn Any + Send> = Box::new("index out of bounds");
        let location = Some("src/solver.rs:12:9".to_string());
        match panic_failure(&*payload, location.clone()) {
            WorkerMessage::Failure { message, .. } => assert_eq!(
                message,
                "index out of bounds\n    panicked at src/solver.rs:12:9"
            ),
            other => panic!("unexpected message: {other:?}"),
        }

        let payload: Box<dyn Any + Send> =
            Box::new("assertion `left == right` failed".to_string());
        match panic_failure(&*payload, location) {
            WorkerMessage::Failure { message, .. } => {
                assert_eq!(message, "assertion `left == right` failed");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_oversized_result_posts_relay_failure() {
        let message = WorkerMessage::Complete {
            payload: vec![0u8; MAX_FRAME_SIZE + 1],
        };
        let mut buf = Vec::new();
        post(&mut FrameWriter::new(&mut buf), &message).unwrap();

        let mut reader = FrameReader::new(Cursor::new(buf));
        match reader.read::<WorkerMessage>().unwrap() {
            WorkerMessage::Failure { kind, message, .. } => {
                assert_eq!(kind, FailureKind::Relay);
                assert!(message.starts_with("task result too large to send back"));
                assert!(message.contains(&format!("limit {MAX_FRAME_SIZE} bytes")));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_panic_message_static_str() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(&*payload), "static");

        let payload: Box<dyn Any + Send> = Box::new(17u8);
        assert_eq!(panic_message(&*payload), "Unknown panic");
    }
}
