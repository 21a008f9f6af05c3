//! IPC Message Types
//!
//! A worker posts exactly one of these before exiting.

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};

/// Outcome posted by a worker process
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum WorkerMessage {
    /// Task returned normally
    Complete {
        /// Archived task result, decoded with [`crate::Relay::from_payload`]
        payload: Vec<u8>,
    },

    /// Task failed
    Failure {
        /// Failure category
        kind: FailureKind,
        /// Human-readable message from the task
        message: String,
        /// Backtrace rendered inside the worker. Backtraces cannot cross
        /// the process boundary, so only their text is sent.
        backtrace: Option<Trace>,
    },
}

/// Rendered backtrace plus the point where it was captured
#[derive(Debug, Clone, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct Trace {
    /// Capture point
    pub origin: TraceOrigin,
    /// Rendered frames
    pub text: String,
}

/// Where a relayed backtrace was captured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum TraceOrigin {
    /// When the error value was created (`anyhow::Error`)
    Error,
    /// In the worker, after the task returned
    Worker,
}

impl WorkerMessage {
    /// Short label used in logs
    pub fn label(&self) -> &'static str {
        match self {
            WorkerMessage::Complete { .. } => "complete",
            WorkerMessage::Failure { kind, .. } => kind.label(),
        }
    }
}

/// Categories of worker failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum FailureKind {
    /// Panic inside the task (assertion-style failure)
    Panic,
    /// Task returned an `Err`
    Error,
    /// Result could not be archived for the trip back
    Relay,
}

impl FailureKind {
    /// Short label used in logs
    pub fn label(self) -> &'static str {
        match self {
            FailureKind::Panic => "panic",
            FailureKind::Error => "error",
            FailureKind::Relay => "relay",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        let complete = WorkerMessage::Complete { payload: vec![] };
        assert_eq!(complete.label(), "complete");

        let failure = WorkerMessage::Failure {
            kind: FailureKind::Panic,
            message: "boom".to_string(),
            backtrace: None,
        };
        assert_eq!(failure.label(), "panic");
        assert_eq!(FailureKind::Relay.label(), "relay");
    }
}
