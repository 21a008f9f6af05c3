//! Bounded Execution
//!
//! Forks a worker per call, waits on its pipe until the deadline, and
//! forcibly terminates it when time runs out.

use crate::duration::parse_duration;
use crate::worker;
use std::convert::Infallible;
use std::fmt::Display;
use std::fs::File;
use std::os::unix::io::{FromRawFd, RawFd};
use std::time::{Duration, Instant};
use structcheck_ipc::{
    FailureKind, FrameError, FrameReader, Relay, Trace, TraceOrigin, WorkerMessage,
};
use thiserror::Error;
use tracing::{debug, warn};

/// Longest single `poll(2)` slice. Between slices the worker is checked for
/// a silent exit.
const POLL_SLICE: Duration = Duration::from_millis(100);

/// Errors from bounded execution
#[derive(Debug, Error)]
pub enum ExecError {
    /// Deadline elapsed; the worker was killed.
    #[error("test timed out after {seconds} seconds")]
    Timeout {
        /// Configured deadline
        seconds: f64,
    },

    /// Panic inside the task. The message is the panic text, unchanged.
    #[error("{message}")]
    Panicked {
        /// Panic text
        message: String,
    },

    /// Task returned an `Err`; the message carries the relayed backtrace.
    #[error("{message}")]
    Task {
        /// Error text followed by the backtrace, when one was captured
        message: String,
    },

    /// Deadline was zero, negative or not finite
    #[error("timeout must be a positive, finite number of seconds (got {0})")]
    InvalidTimeout(f64),

    /// Duration string could not be parsed
    #[error("invalid duration {input:?}: {reason}")]
    InvalidDuration {
        /// Text as given
        input: String,
        /// What was wrong with it
        reason: String,
    },

    /// `pipe(2)` or `fork(2)` failed
    #[error("Failed to fork worker: {0}")]
    Spawn(#[source] std::io::Error),

    /// Pipe, framing or payload decoding failed
    #[error("IPC error: {0}")]
    Ipc(String),

    /// Worker died without posting an outcome
    #[error("Worker crashed: {0}")]
    WorkerCrashed(String),
}

impl From<FrameError> for ExecError {
    fn from(e: FrameError) -> Self {
        ExecError::Ipc(e.to_string())
    }
}

impl ExecError {
    /// Re-raise this failure in the calling thread.
    ///
    /// Relayed panics are raised with their original text so test harness
    /// expectations (`#[should_panic(expected = ...)]`) keep matching.
    pub fn raise(self) -> ! {
        match self {
            ExecError::Panicked { message } => panic!("{message}"),
            other => panic!("{other}"),
        }
    }

    /// Whether the deadline elapsed
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecError::Timeout { .. })
    }

    fn from_failure(kind: FailureKind, message: String, backtrace: Option<Trace>) -> Self {
        match kind {
            FailureKind::Panic => ExecError::Panicked { message },
            FailureKind::Error => {
                let message = match backtrace {
                    Some(Trace {
                        origin: TraceOrigin::Error,
                        text,
                    }) => format!("{message}\nOriginal backtrace:\n{text}"),
                    Some(Trace {
                        origin: TraceOrigin::Worker,
                        text,
                    }) => format!("{message}\nWorker backtrace:\n{text}"),
                    None => message,
                };
                ExecError::Task { message }
            }
            FailureKind::Relay => ExecError::Ipc(message),
        }
    }
}

/// Result of polling for data
#[derive(Debug)]
enum PollResult {
    DataAvailable,
    Timeout,
    PipeClosed,
    Error(std::io::Error),
}

/// Wait for data to be available on a file descriptor with timeout
fn wait_for_data(fd: RawFd, timeout: Duration) -> PollResult {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };

    let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as i32;
    let result = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };

    if result < 0 {
        PollResult::Error(std::io::Error::last_os_error())
    } else if result == 0 {
        PollResult::Timeout
    } else if pollfd.revents & libc::POLLIN != 0 {
        // A closing pipe can still hold the final frame.
        PollResult::DataAvailable
    } else if pollfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
        PollResult::PipeClosed
    } else {
        PollResult::Timeout
    }
}

/// Create a pipe pair, returning (read_fd, write_fd).
fn create_pipe() -> Result<(RawFd, RawFd), std::io::Error> {
    let mut fds = [0 as RawFd; 2];
    let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    // Keep exec'd programs (including ones spawned by other threads) from
    // inheriting either end.
    for &fd in &fds {
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFD);
            libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
        }
    }
    Ok((fds[0], fds[1]))
}

fn close_fd(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

/// Render a `waitpid` status for error messages
fn describe_status(status: libc::c_int) -> String {
    if libc::WIFSIGNALED(status) {
        format!("worker terminated by signal {}", libc::WTERMSIG(status))
    } else if libc::WIFEXITED(status) {
        format!(
            "worker exited with status {} before reporting a result",
            libc::WEXITSTATUS(status)
        )
    } else {
        format!("worker stopped with raw status {status}")
    }
}

/// Caller-side handle on one forked worker.
///
/// Dropping the handle kills and reaps a worker that is still running, so
/// every exit path from a call releases the process.
struct WorkerHandle {
    pid: libc::pid_t,
    reader: FrameReader<File>,
    read_fd: RawFd,
    exit_status: Option<libc::c_int>,
}

impl WorkerHandle {
    /// Fork a worker that runs `task` and reports on a fresh pipe.
    fn spawn<T, E, F>(task: F) -> Result<Self, ExecError>
    where
        T: Relay,
        E: Display + 'static,
        F: FnOnce() -> Result<T, E>,
    {
        let (read_fd, write_fd) = create_pipe().map_err(ExecError::Spawn)?;

        let pid = unsafe { libc::fork() };
        if pid < 0 {
            let err = std::io::Error::last_os_error();
            close_fd(read_fd);
            close_fd(write_fd);
            return Err(ExecError::Spawn(err));
        }

        if pid == 0 {
            // Child: keep only the write end.
            close_fd(read_fd);
            worker::serve(write_fd, task);
        }

        // Parent: keep only the read end.
        close_fd(write_fd);
        let reader_file = unsafe { File::from_raw_fd(read_fd) };

        debug!(pid, "forked worker");

        Ok(Self {
            pid,
            reader: FrameReader::new(reader_file),
            read_fd,
            exit_status: None,
        })
    }

    /// Wait up to `timeout` for the worker's message.
    ///
    /// Returns `Ok(None)` when the deadline passes with no message.
    fn wait_for_message(&mut self, timeout: Duration) -> Result<Option<WorkerMessage>, ExecError> {
        let start = Instant::now();

        loop {
            let remaining = timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                return Ok(None);
            }

            if !self.reader.has_buffered_data() {
                match wait_for_data(self.read_fd, remaining.min(POLL_SLICE)) {
                    PollResult::DataAvailable => {}
                    PollResult::Timeout => {
                        // Another thread's fork may hold a copy of our write
                        // end, hiding the hang-up. Check the pid directly.
                        if let Some(status) = self.try_reap()? {
                            if matches!(
                                wait_for_data(self.read_fd, Duration::ZERO),
                                PollResult::DataAvailable
                            ) {
                                return self.read_message().map(Some);
                            }
                            return Err(ExecError::WorkerCrashed(describe_status(status)));
                        }
                        continue;
                    }
                    PollResult::PipeClosed => {
                        let status = self.reap()?;
                        return Err(ExecError::WorkerCrashed(describe_status(status)));
                    }
                    PollResult::Error(e) if e.kind() == std::io::ErrorKind::Interrupted => {
                        continue;
                    }
                    PollResult::Error(e) => {
                        return Err(ExecError::Ipc(format!("Pipe error: {e}")));
                    }
                }
            }

            return self.read_message().map(Some);
        }
    }

    fn read_message(&mut self) -> Result<WorkerMessage, ExecError> {
        match self.reader.read::<WorkerMessage>() {
            Ok(msg) => Ok(msg),
            Err(FrameError::EndOfStream) => {
                let status = self.reap()?;
                Err(ExecError::WorkerCrashed(describe_status(status)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Non-blocking reap. Returns the exit status if the worker is gone.
    fn try_reap(&mut self) -> Result<Option<libc::c_int>, ExecError> {
        if let Some(status) = self.exit_status {
            return Ok(Some(status));
        }
        let mut status: libc::c_int = 0;
        let ret = unsafe { libc::waitpid(self.pid, &mut status, libc::WNOHANG) };
        match ret {
            0 => Ok(None),
            r if r == self.pid => {
                self.exit_status = Some(status);
                Ok(Some(status))
            }
            _ => Err(ExecError::Ipc(format!(
                "waitpid failed: {}",
                std::io::Error::last_os_error()
            ))),
        }
    }

    /// Blocking reap (join).
    fn reap(&mut self) -> Result<libc::c_int, ExecError> {
        if let Some(status) = self.exit_status {
            return Ok(status);
        }
        let mut status: libc::c_int = 0;
        loop {
            let ret = unsafe { libc::waitpid(self.pid, &mut status, 0) };
            if ret == self.pid {
                self.exit_status = Some(status);
                return Ok(status);
            }
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::Interrupted {
                // The pid is no longer ours to wait on; never retry it.
                self.exit_status = Some(0);
                return Err(ExecError::Ipc(format!("waitpid failed: {err}")));
            }
        }
    }

    /// Terminate the worker abruptly. No graceful shutdown is attempted and
    /// processes the worker spawned are not followed.
    fn kill(&mut self) {
        if self.exit_status.is_some() {
            return;
        }
        unsafe {
            libc::kill(self.pid, libc::SIGKILL);
        }
        let _ = self.reap();
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Deadline used when nothing else is configured
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Executor settings, usually read from the `[executor]` table of
/// `structcheck.toml`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Deadline for one unit of work
    pub timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Runs units of work in isolated worker processes under a deadline.
///
/// Each call forks one worker, so a runaway computation can always be
/// stopped, unlike a thread. The unit of work must not spawn subprocesses:
/// they are not terminated with the worker.
#[derive(Debug, Clone, Copy)]
pub struct BoundedExecutor {
    timeout: Duration,
    seconds: f64,
}

impl BoundedExecutor {
    /// Executor with the given deadline
    pub fn new(timeout: Duration) -> Result<Self, ExecError> {
        if timeout.is_zero() {
            return Err(ExecError::InvalidTimeout(0.0));
        }
        Ok(Self {
            timeout,
            seconds: timeout.as_secs_f64(),
        })
    }

    /// Executor with a deadline in (fractional) seconds
    pub fn from_secs_f64(seconds: f64) -> Result<Self, ExecError> {
        if !seconds.is_finite() || seconds <= 0.0 {
            return Err(ExecError::InvalidTimeout(seconds));
        }
        let timeout =
            Duration::try_from_secs_f64(seconds).map_err(|_| ExecError::InvalidTimeout(seconds))?;
        if timeout.is_zero() {
            return Err(ExecError::InvalidTimeout(seconds));
        }
        Ok(Self { timeout, seconds })
    }

    /// Executor with a deadline written as text, e.g. `"500ms"`.
    /// See [`parse_duration`] for the accepted units.
    pub fn from_duration_str(duration: &str) -> Result<Self, ExecError> {
        Self::new(parse_duration(duration)?)
    }

    /// Executor with the configured deadline
    pub fn from_config(config: &ExecutorConfig) -> Result<Self, ExecError> {
        Self::new(config.timeout)
    }

    /// Configured deadline
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run an infallible task. Panics in the task come back as
    /// [`ExecError::Panicked`].
    pub fn run<T, F>(&self, task: F) -> Result<T, ExecError>
    where
        T: Relay,
        F: FnOnce() -> T,
    {
        self.try_run(|| Ok::<T, Infallible>(task()))
    }

    /// Run a fallible task. An `Err` comes back as [`ExecError::Task`] with
    /// its `Display` text and a backtrace. An `anyhow::Error` carries the
    /// one captured where it was created ("Original backtrace"); other error
    /// types get the worker stack at the point the task returned ("Worker
    /// backtrace").
    pub fn try_run<T, E, F>(&self, task: F) -> Result<T, ExecError>
    where
        T: Relay,
        E: Display + 'static,
        F: FnOnce() -> Result<T, E>,
    {
        let mut worker = WorkerHandle::spawn(task)?;

        let message = match worker.wait_for_message(self.timeout)? {
            Some(message) => message,
            None => {
                warn!(
                    pid = worker.pid,
                    seconds = self.seconds,
                    "worker exceeded deadline, killing"
                );
                worker.kill();
                return Err(ExecError::Timeout {
                    seconds: self.seconds,
                });
            }
        };

        // The worker exits right after posting; join it.
        let _ = worker.reap();
        debug!(pid = worker.pid, outcome = message.label(), "worker finished");

        match message {
            WorkerMessage::Complete { payload } => Ok(T::from_payload(&payload)?),
            WorkerMessage::Failure {
                kind,
                message,
                backtrace,
            } => Err(ExecError::from_failure(kind, message, backtrace)),
        }
    }
}

/// Run `task` in an isolated worker, giving up after `seconds`.
pub fn run_with_timeout<T, F>(seconds: f64, task: F) -> Result<T, ExecError>
where
    T: Relay,
    F: FnOnce() -> T,
{
    BoundedExecutor::from_secs_f64(seconds)?.run(task)
}

/// Fallible counterpart of [`run_with_timeout`].
pub fn try_run_with_timeout<T, E, F>(seconds: f64, task: F) -> Result<T, ExecError>
where
    T: Relay,
    E: Display + 'static,
    F: FnOnce() -> Result<T, E>,
{
    BoundedExecutor::from_secs_f64(seconds)?.try_run(task)
}
