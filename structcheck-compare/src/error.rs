//! Comparison Failures
//!
//! The recursion returns a [`Mismatch`] that records why the leaves differ
//! and the key/position path from the root to them. Only the top level turns
//! it into text, adding the effective tolerance and both inputs.

use crate::tolerance::{ConfigurationError, Tolerance};
use crate::value::Value;
use std::fmt;
use thiserror::Error;

/// One step from the comparison root towards a divergence
#[derive(Debug, Clone)]
pub enum PathSegment {
    /// Entry of a mapping
    Key(Value),
    /// 0-based element of a sequence
    Position(usize),
}

/// Why two nodes were judged different
#[derive(Debug, Clone)]
pub enum MismatchReason {
    /// Strict mode and the mappings have different entry counts
    MappingSize {
        /// Entries in first
        first: usize,
        /// Entries in second
        second: usize,
    },
    /// A key of first has no counterpart in second
    MissingKey(Value),
    /// Strict mode and the sequences have different lengths
    SequenceSize {
        /// Length of first
        first: usize,
        /// Length of second
        second: usize,
    },
    /// Leaves are neither equal nor within tolerance
    NotClose {
        /// Leaf from first
        first: Value,
        /// Leaf from second
        second: Value,
    },
}

impl fmt::Display for MismatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MismatchReason::MappingSize { first, second } => {
                write!(f, "mappings are different sizes ({first} != {second})")
            }
            MismatchReason::MissingKey(key) => {
                write!(f, "key ({key}) from first not found in second")
            }
            MismatchReason::SequenceSize { first, second } => {
                write!(f, "sequences are different sizes ({first} != {second})")
            }
            MismatchReason::NotClose { first, second } => write!(f, "{first} !~= {second}"),
        }
    }
}

/// A divergence and where it was found
#[derive(Debug, Clone)]
pub struct Mismatch {
    /// What differs
    pub reason: MismatchReason,
    /// Path from the root, outermost segment first
    pub path: Vec<PathSegment>,
}

impl Mismatch {
    pub(crate) fn new(reason: MismatchReason) -> Self {
        Self {
            reason,
            path: Vec::new(),
        }
    }

    /// Prefix a segment while unwinding out of the recursion
    pub(crate) fn within(mut self, segment: PathSegment) -> Self {
        self.path.insert(0, segment);
        self
    }
}

impl fmt::Display for Mismatch {
    /// Reason first, then one breadcrumb line per level from leaf to root
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)?;
        for segment in self.path.iter().rev() {
            match segment {
                PathSegment::Key(key) => write!(f, "\n    Found when comparing key {key}")?,
                PathSegment::Position(i) => write!(f, "\n    Found at position {i}")?,
            }
        }
        Ok(())
    }
}

/// Two structures differ beyond tolerance
#[derive(Debug, Clone, Error)]
#[error(
    "{mismatch}\n    Found when comparing with tolerance ({tolerance}):\n        first={first}\n        second={second}{}",
    .msg.as_deref().map(|m| format!(" : {m}")).unwrap_or_default()
)]
pub struct ComparisonError {
    /// Divergence with its path
    pub mismatch: Mismatch,
    /// Effective tolerance
    pub tolerance: Tolerance,
    /// Top-level first input
    pub first: Value,
    /// Top-level second input
    pub second: Value,
    /// Caller-supplied message appended to the report
    pub msg: Option<String>,
}

/// Which argument of a comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Left-hand argument
    First,
    /// Right-hand argument
    Second,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::First => write!(f, "first"),
            Side::Second => write!(f, "second"),
        }
    }
}

/// Failure of a structured comparison
#[derive(Debug, Clone, Error)]
pub enum AssertError {
    /// Tolerance options are inconsistent; nothing was compared
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// The values differ
    #[error(transparent)]
    Comparison(Box<ComparisonError>),
    /// An input could not be converted for comparison
    #[error("cannot convert {side} for comparison: {message}")]
    Serialize {
        /// Argument whose `Serialize` impl failed
        side: Side,
        /// Error reported by the impl
        message: String,
    },
}

impl From<ComparisonError> for AssertError {
    fn from(err: ComparisonError) -> Self {
        AssertError::Comparison(Box::new(err))
    }
}

impl AssertError {
    /// The structured divergence, if this is a comparison failure
    pub fn mismatch(&self) -> Option<&Mismatch> {
        match self {
            AssertError::Comparison(err) => Some(&err.mismatch),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breadcrumb_order() {
        let mismatch = Mismatch::new(MismatchReason::NotClose {
            first: Value::Int(3),
            second: Value::Int(999),
        })
        .within(PathSegment::Position(2))
        .within(PathSegment::Key(Value::from("k")));

        assert_eq!(
            mismatch.to_string(),
            "3 !~= 999\n    Found at position 2\n    Found when comparing key \"k\""
        );
    }

    #[test]
    fn test_reason_text() {
        assert_eq!(
            MismatchReason::MappingSize { first: 1, second: 2 }.to_string(),
            "mappings are different sizes (1 != 2)"
        );
        assert_eq!(
            MismatchReason::MissingKey(Value::from("b")).to_string(),
            "key (\"b\") from first not found in second"
        );
        assert_eq!(
            MismatchReason::SequenceSize { first: 3, second: 0 }.to_string(),
            "sequences are different sizes (3 != 0)"
        );
    }

    fn comparison(msg: Option<&str>) -> ComparisonError {
        ComparisonError {
            mismatch: Mismatch::new(MismatchReason::NotClose {
                first: Value::Float(1.0),
                second: Value::Float(2.0),
            }),
            tolerance: Tolerance {
                abstol: Some(0.5),
                reltol: None,
            },
            first: Value::Float(1.0),
            second: Value::Float(2.0),
            msg: msg.map(str::to_string),
        }
    }

    #[test]
    fn test_top_level_report() {
        assert_eq!(
            comparison(None).to_string(),
            "1.0 !~= 2.0\n    Found when comparing with tolerance (abs=0.5, rel=None):\n        first=1.0\n        second=2.0"
        );
        assert!(comparison(Some("objective")).to_string().ends_with("second=2.0 : objective"));
    }

    #[test]
    fn test_assert_error_wraps() {
        let err = AssertError::from(comparison(None));
        assert!(err.mismatch().is_some());
        assert!(err.to_string().starts_with("1.0 !~= 2.0"));

        let err = AssertError::Serialize {
            side: Side::Second,
            message: "bad".to_string(),
        };
        assert_eq!(err.to_string(), "cannot convert second for comparison: bad");
        assert!(err.mismatch().is_none());
    }
}
