#![warn(missing_docs)]
//! structcheck IPC Protocol
//!
//! Wire format between a bounded-execution caller and its forked worker.
//! Messages are archived with rkyv and sent as length-prefixed frames over a
//! single-use pipe. Exactly one [`WorkerMessage`] travels per call.

mod framing;
mod messages;
mod payload;

pub use framing::{FrameError, FrameReader, FrameWriter, MAX_FRAME_SIZE, read_frame, write_frame};
pub use messages::{FailureKind, Trace, TraceOrigin, WorkerMessage};
pub use payload::Relay;

/// Size of the length prefix preceding every frame
pub const FRAME_HEADER_BYTES: usize = 4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_fits_max_frame() {
        assert_eq!(FRAME_HEADER_BYTES, std::mem::size_of::<u32>());
        assert!(MAX_FRAME_SIZE <= u32::MAX as usize);
    }
}
