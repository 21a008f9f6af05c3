//! Structured Comparator
//!
//! Walks two [`Value`] trees in lock-step. Rules, in priority order:
//!
//! 1. both mappings: sizes (strict mode only), then every key of first must
//!    exist in second, then recurse per key
//! 2. either side text: direct equality only
//! 3. both sequences: lengths (strict mode only), then pairwise up to the
//!    shorter length
//! 4. anything else: direct equality, then numeric tolerance
//!
//! Keys present only in second are never reported, even in strict mode.

use crate::error::{AssertError, ComparisonError, Mismatch, MismatchReason, PathSegment, Side};
use crate::ser::to_value;
use crate::tolerance::{DEFAULT_RELTOL, Tolerance, ToleranceOptions};
use crate::value::{Kind, Value};
use serde::{Deserialize, Serialize};

/// Comparator defaults, usually read from the `[compare]` table of
/// `structcheck.toml`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareConfig {
    /// Relative tolerance when no tolerance option is given
    pub default_reltol: f64,
    /// Whether second may have more entries than first
    pub allow_second_superset: bool,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            default_reltol: DEFAULT_RELTOL,
            allow_second_superset: false,
        }
    }
}

/// Tolerance-aware deep equality
///
/// ```ignore
/// StructuredComparator::new()
///     .abstol(1e-6)
///     .allow_second_superset(true)
///     .compare(&expected, &actual)?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct StructuredComparator {
    options: ToleranceOptions,
    default_reltol: Option<f64>,
    msg: Option<String>,
    allow_second_superset: bool,
}

impl StructuredComparator {
    /// Strict comparator with the default relative tolerance
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from configured defaults
    pub fn with_defaults(config: &CompareConfig) -> Self {
        Self::new()
            .with_default_reltol(config.default_reltol)
            .allow_second_superset(config.allow_second_superset)
    }

    /// Absolute tolerance of `10^-places`
    pub fn places(mut self, places: i32) -> Self {
        self.options.places = Some(places);
        self
    }

    /// Alias for [`abstol`](Self::abstol)
    pub fn delta(mut self, delta: f64) -> Self {
        self.options.delta = Some(delta);
        self
    }

    /// Absolute tolerance
    pub fn abstol(mut self, abstol: f64) -> Self {
        self.options.abstol = Some(abstol);
        self
    }

    /// Relative tolerance
    pub fn reltol(mut self, reltol: f64) -> Self {
        self.options.reltol = Some(reltol);
        self
    }

    /// Message appended to the failure report
    pub fn msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = Some(msg.into());
        self
    }

    /// Allow second to be larger than first (extra keys or trailing elements)
    pub fn allow_second_superset(mut self, allow: bool) -> Self {
        self.allow_second_superset = allow;
        self
    }

    /// Relative tolerance applied when no tolerance option is set
    pub fn with_default_reltol(mut self, reltol: f64) -> Self {
        self.default_reltol = Some(reltol);
        self
    }

    /// The tolerance this comparator will apply
    pub fn tolerance(&self) -> Result<Tolerance, AssertError> {
        let default = self.default_reltol.unwrap_or(DEFAULT_RELTOL);
        Ok(self.options.resolve_with_default(default)?)
    }

    /// Compare any two serializable values.
    pub fn compare<A, B>(&self, first: &A, second: &B) -> Result<(), AssertError>
    where
        A: Serialize + ?Sized,
        B: Serialize + ?Sized,
    {
        // Configuration errors come before any conversion work.
        let tolerance = self.tolerance()?;
        let first = convert(first, Side::First)?;
        let second = convert(second, Side::Second)?;
        self.check(tolerance, first, second)
    }

    /// Compare two already converted trees.
    pub fn compare_values(&self, first: &Value, second: &Value) -> Result<(), AssertError> {
        let tolerance = self.tolerance()?;
        self.check(tolerance, first.clone(), second.clone())
    }

    fn check(&self, tolerance: Tolerance, first: Value, second: Value) -> Result<(), AssertError> {
        let walker = Walker {
            tolerance,
            exact: !self.allow_second_superset,
        };
        match walker.walk(&first, &second) {
            Ok(()) => Ok(()),
            Err(mismatch) => {
                tracing::debug!(depth = mismatch.path.len(), reason = %mismatch.reason, "structured comparison failed");
                Err(ComparisonError {
                    mismatch,
                    tolerance,
                    first,
                    second,
                    msg: self.msg.clone(),
                }
                .into())
            }
        }
    }
}

fn convert<T: Serialize + ?Sized>(value: &T, side: Side) -> Result<Value, AssertError> {
    to_value(value).map_err(|e| AssertError::Serialize {
        side,
        message: e.to_string(),
    })
}

struct Walker {
    tolerance: Tolerance,
    exact: bool,
}

impl Walker {
    fn walk(&self, first: &Value, second: &Value) -> Result<(), Mismatch> {
        match (first, second) {
            (Value::Map(entries), Value::Map(other)) => {
                if self.exact && entries.len() != other.len() {
                    return Err(Mismatch::new(MismatchReason::MappingSize {
                        first: entries.len(),
                        second: other.len(),
                    }));
                }
                for (key, value) in entries {
                    let Some(counterpart) = second.get(key) else {
                        return Err(Mismatch::new(MismatchReason::MissingKey(key.clone())));
                    };
                    self.walk(value, counterpart)
                        .map_err(|m| m.within(PathSegment::Key(key.clone())))?;
                }
                Ok(())
            }
            _ if first.kind() == Kind::Text || second.kind() == Kind::Text => {
                if first.loose_eq(second) {
                    Ok(())
                } else {
                    Err(not_close(first, second))
                }
            }
            (Value::Seq(items), Value::Seq(other)) => {
                if self.exact && items.len() != other.len() {
                    return Err(Mismatch::new(MismatchReason::SequenceSize {
                        first: items.len(),
                        second: other.len(),
                    }));
                }
                for (i, (f, s)) in items.iter().zip(other).enumerate() {
                    self.walk(f, s)
                        .map_err(|m| m.within(PathSegment::Position(i)))?;
                }
                Ok(())
            }
            _ => self.scalar(first, second),
        }
    }

    fn scalar(&self, first: &Value, second: &Value) -> Result<(), Mismatch> {
        if first.loose_eq(second) {
            return Ok(());
        }
        match (first.as_f64(), second.as_f64()) {
            (Some(f), Some(s)) if self.tolerance.accepts(f, s) => Ok(()),
            _ => Err(not_close(first, second)),
        }
    }
}

fn not_close(first: &Value, second: &Value) -> Mismatch {
    Mismatch::new(MismatchReason::NotClose {
        first: first.clone(),
        second: second.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn strict() -> StructuredComparator {
        StructuredComparator::new()
    }

    #[test]
    fn test_identical_structures_pass() {
        let x = json!({"a": [1, 2.5, {"b": "text"}], "c": null, "d": true});
        strict().compare(&x, &x).unwrap();
    }

    #[test]
    fn test_abstol_bound_is_inclusive() {
        strict().abstol(0.5).compare(&1.0, &1.5).unwrap();
        assert!(strict().abstol(0.5).compare(&1.0, &1.5000001).is_err());
    }

    #[test]
    fn test_reltol() {
        // diff / max = 1 / 1000
        strict().reltol(1e-3).compare(&1000.0, &999.0).unwrap();
        assert!(strict().reltol(1e-4).compare(&1000.0, &999.0).is_err());
    }

    #[test]
    fn test_default_reltol_applies() {
        strict().compare(&1.0, &(1.0 + 1e-9)).unwrap();
        assert!(strict().compare(&1.0, &1.001).is_err());
    }

    #[test]
    fn test_places() {
        strict().places(2).compare(&1.0, &1.005).unwrap();
        assert!(strict().places(3).compare(&1.0, &1.005).is_err());
    }

    #[test]
    fn test_conflicting_tolerance_before_comparison() {
        let err = strict()
            .places(2)
            .abstol(0.1)
            .compare(&1.0, &1.0)
            .unwrap_err();
        assert!(matches!(err, AssertError::Configuration(_)));
    }

    #[test]
    fn test_nested_breadcrumb() {
        let err = strict()
            .compare(&json!({"k": [1, 2, 3]}), &json!({"k": [1, 2, 999]}))
            .unwrap_err();
        let text = err.to_string();
        assert!(text.starts_with("3 !~= 999\n    Found at position 2\n    Found when comparing key \"k\""));
        assert!(text.contains("Found when comparing with tolerance (abs=None, rel=1e-7):"));
        assert!(text.contains("first={\"k\": [1, 2, 3]}"));
        assert!(text.ends_with("second={\"k\": [1, 2, 999]}"));

        let mismatch = err.mismatch().unwrap();
        assert!(matches!(&mismatch.path[..], [PathSegment::Key(_), PathSegment::Position(2)]));
    }

    #[test]
    fn test_superset_mapping() {
        let first = json!({"a": 1});
        let second = json!({"a": 1, "b": 2});

        strict()
            .allow_second_superset(true)
            .compare(&first, &second)
            .unwrap();

        let err = strict().compare(&first, &second).unwrap_err();
        assert!(err.to_string().starts_with("mappings are different sizes (1 != 2)"));
    }

    #[test]
    fn test_missing_key_reported_even_when_superset_allowed() {
        let err = strict()
            .allow_second_superset(true)
            .compare(&json!({"a": 1, "z": 0}), &json!({"a": 1, "b": 2}))
            .unwrap_err();
        assert!(err.to_string().starts_with("key (\"z\") from first not found in second"));
    }

    #[test]
    fn test_equal_size_maps_with_extra_second_keys_report_missing_first_key() {
        // Only first's keys are looked up; second's extras are silent.
        let err = strict()
            .compare(&json!({"a": 1}), &json!({"b": 1}))
            .unwrap_err();
        assert!(matches!(
            err.mismatch().map(|m| &m.reason),
            Some(MismatchReason::MissingKey(_))
        ));
    }

    #[test]
    fn test_sequence_lengths() {
        let err = strict().compare(&vec![1, 2], &vec![1, 2, 3]).unwrap_err();
        assert!(err.to_string().starts_with("sequences are different sizes (2 != 3)"));

        strict()
            .allow_second_superset(true)
            .compare(&vec![1, 2], &vec![1, 2, 3])
            .unwrap();
    }

    #[test]
    fn test_text_is_atomic() {
        strict().compare("abc", "abc").unwrap();
        let err = strict().compare("1.0", &1.0).unwrap_err();
        assert!(err.to_string().starts_with("\"1.0\" !~= 1.0"));
        // Text is not walked as a sequence of characters.
        assert!(strict().compare("ab", &vec!["a", "b"]).is_err());
    }

    #[test]
    fn test_int_and_float_mix() {
        strict().compare(&vec![1, 2], &vec![1.0, 2.0]).unwrap();
        strict().abstol(0.1).compare(&3u64, &3.05f32).unwrap();
    }

    #[test]
    fn test_nan_never_matches() {
        assert!(strict().compare(&f64::NAN, &f64::NAN).is_err());
        strict().compare(&f64::INFINITY, &f64::INFINITY).unwrap();
    }

    #[test]
    fn test_zero_against_zero() {
        strict().compare(&0.0, &-0.0).unwrap();
        assert!(strict().compare(&0.0, &1e-300).is_err());
    }

    #[test]
    fn test_bool_and_null() {
        strict().compare(&Some(true), &Some(true)).unwrap();
        strict().compare(&None::<i32>, &()).unwrap();
        assert!(strict().compare(&None::<f64>, &0.0).is_err());
        assert!(strict().compare(&None::<bool>, &false).is_err());
    }

    #[test]
    fn test_bools_compare_as_numbers() {
        strict().compare(&true, &1).unwrap();
        strict().compare(&vec![true, false], &vec![1, 0]).unwrap();
        strict().compare(&json!({"flag": false}), &json!({"flag": 0.0})).unwrap();
        StructuredComparator::new()
            .abstol(1e-6)
            .compare(&true, &1.0000001)
            .unwrap();

        let err = strict().compare(&vec![true, true], &vec![1, 0]).unwrap_err();
        assert!(err.to_string().starts_with("true !~= 0\n    Found at position 1"));
    }

    #[test]
    fn test_mapping_against_sequence_fails() {
        let err = strict().compare(&json!({"a": 1}), &json!([1])).unwrap_err();
        assert!(err.to_string().starts_with("{\"a\": 1} !~= [1]"));
    }

    #[test]
    fn test_non_string_keys() {
        let mut first = BTreeMap::new();
        first.insert(1, 0.5);
        let mut second = BTreeMap::new();
        second.insert(1, 0.5 + 1e-12);
        strict().compare(&first, &second).unwrap();
    }

    #[test]
    fn test_custom_message() {
        let err = strict().msg("objective").compare(&1.0, &2.0).unwrap_err();
        assert!(err.to_string().ends_with("second=2.0 : objective"));
    }

    #[test]
    fn test_with_defaults() {
        let config = CompareConfig {
            default_reltol: 1e-2,
            allow_second_superset: true,
        };
        let cmp = StructuredComparator::with_defaults(&config);
        cmp.compare(&vec![100.0], &vec![100.5, 7.0]).unwrap();

        // An explicit tolerance replaces the configured default.
        assert!(cmp.clone().abstol(0.1).compare(&100.0, &100.5).is_err());
    }

    #[test]
    fn test_compare_values() {
        let first = Value::from(vec![1.0, 2.0]);
        let second = Value::from(vec![1.0, 2.0 + 1e-10]);
        strict().compare_values(&first, &second).unwrap();
    }

    #[test]
    fn test_comparison_is_symmetric_for_numbers() {
        let cmp = strict().reltol(0.01);
        for (a, b) in [(1.0, 1.009), (-5.0, -5.04), (250.0, 252.0)] {
            assert_eq!(cmp.compare(&a, &b).is_ok(), cmp.compare(&b, &a).is_ok());
        }
    }
}
