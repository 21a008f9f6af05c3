//! Task Result Payloads
//!
//! Task results travel inside [`crate::WorkerMessage::Complete`] as archived
//! bytes. [`Relay`] is implemented for every rkyv-archivable type whose
//! archive can be validated, which covers primitives, `String`, `Vec`,
//! `Option`, tuples and `#[archive(check_bytes)]` user types.

use crate::FrameError;
use rkyv::ser::serializers::AllocSerializer;
use rkyv::validation::validators::DefaultValidator;
use rkyv::{Archive, CheckBytes, Deserialize, Infallible, Serialize};

/// A value that can be sent back from a worker process
pub trait Relay: Sized {
    /// Archive the value into bytes
    fn to_payload(&self) -> Result<Vec<u8>, FrameError>;

    /// Validate and restore a value archived by [`Relay::to_payload`]
    fn from_payload(bytes: &[u8]) -> Result<Self, FrameError>;
}

impl<T> Relay for T
where
    T: Archive + Serialize<AllocSerializer<256>>,
    T::Archived: for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<T, Infallible>,
{
    fn to_payload(&self) -> Result<Vec<u8>, FrameError> {
        let bytes =
            rkyv::to_bytes::<_, 256>(self).map_err(|e| FrameError::Serialization(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn from_payload(bytes: &[u8]) -> Result<Self, FrameError> {
        if std::mem::size_of::<T::Archived>() == 0 {
            // Unit-like results archive to nothing; there is no root to validate.
            // SAFETY: any aligned, non-null pointer is a valid reference to a
            // zero-sized value.
            let archived: &T::Archived =
                unsafe { &*std::ptr::NonNull::<T::Archived>::dangling().as_ptr() };
            return Ok(archived
                .deserialize(&mut Infallible)
                .expect("infallible deserialization"));
        }

        // The payload sits at an arbitrary offset inside the frame; realign it.
        let mut aligned = rkyv::AlignedVec::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);

        let archived = rkyv::check_archived_root::<T>(&aligned)
            .map_err(|e| FrameError::Deserialization(e.to_string()))?;

        Ok(archived
            .deserialize(&mut Infallible)
            .expect("infallible deserialization"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rkyv::{Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};

    #[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
    #[archive(check_bytes)]
    struct SolveReport {
        objective: f64,
        status: String,
        duals: Vec<f64>,
    }

    #[test]
    fn test_user_struct_payload() {
        let report = SolveReport {
            objective: 42.5,
            status: "optimal".to_string(),
            duals: vec![0.5, -1.25],
        };
        let bytes = report.to_payload().unwrap();
        assert_eq!(SolveReport::from_payload(&bytes).unwrap(), report);
    }

    #[test]
    fn test_unaligned_payload_is_realigned() {
        let bytes = vec![1.5f64, 2.5, 3.5].to_payload().unwrap();
        let mut shifted = vec![0u8];
        shifted.extend_from_slice(&bytes);
        let restored = Vec::<f64>::from_payload(&shifted[1..]).unwrap();
        assert_eq!(restored, vec![1.5, 2.5, 3.5]);
    }

    #[test]
    fn test_unit_payload() {
        let bytes = ().to_payload().unwrap();
        <()>::from_payload(&bytes).unwrap();
    }

    #[test]
    fn test_garbage_payload_rejected() {
        let result = String::from_payload(&[0xff; 3]);
        assert!(matches!(result, Err(FrameError::Deserialization(_))));
    }
}
