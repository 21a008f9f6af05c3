#![warn(missing_docs)]
//! structcheck Compare - Structural Comparison
//!
//! Tolerance-aware deep equality for nested data:
//! - any `serde::Serialize` input is converted into a [`Value`] tree
//! - mappings, sequences and text compare structurally
//! - numbers compare within an absolute or relative tolerance
//! - failures carry the key/position path to the first divergence

mod comparator;
mod error;
mod ser;
mod tolerance;
mod value;

pub use comparator::{CompareConfig, StructuredComparator};
pub use error::{AssertError, ComparisonError, Mismatch, MismatchReason, PathSegment, Side};
pub use ser::{ValueError, to_value};
pub use tolerance::{ConfigurationError, DEFAULT_RELTOL, Tolerance, ToleranceOptions};
pub use value::{Kind, Value};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_reltol_constant() {
        assert!((DEFAULT_RELTOL - 1e-7).abs() < f64::EPSILON);
        assert_eq!(CompareConfig::default().default_reltol, DEFAULT_RELTOL);
    }
}
