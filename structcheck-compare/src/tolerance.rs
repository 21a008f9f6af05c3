//! Tolerance Resolution
//!
//! The user-facing knobs (`places`, `delta`, `abstol`, `reltol`) collapse into
//! one [`Tolerance`] before any comparison work starts.

use std::fmt;
use thiserror::Error;

/// Relative tolerance used when no tolerance option is supplied
pub const DEFAULT_RELTOL: f64 = 1e-7;

/// Invalid tolerance options
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    /// Two or more of the absolute-tolerance spellings were supplied
    #[error("Cannot specify more than one of {{places, delta, abstol}} (got {})", .supplied.join(", "))]
    ConflictingTolerance {
        /// Names of the options that were set
        supplied: Vec<&'static str>,
    },
    /// A tolerance was negative or NaN
    #[error("tolerance {name} must be a non-negative number, got {value}")]
    InvalidTolerance {
        /// Option name
        name: &'static str,
        /// Offending value
        value: f64,
    },
}

/// Raw tolerance options as supplied by the caller
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ToleranceOptions {
    /// Decimal places; becomes `abstol = 10^-places`
    pub places: Option<i32>,
    /// Alias for `abstol`
    pub delta: Option<f64>,
    /// Absolute tolerance
    pub abstol: Option<f64>,
    /// Relative tolerance
    pub reltol: Option<f64>,
}

/// Effective tolerance after resolution
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    /// Pass when `|f - s| <= abstol`
    pub abstol: Option<f64>,
    /// Pass when `|f - s| / max(|f|, |s|) <= reltol`
    pub reltol: Option<f64>,
}

impl ToleranceOptions {
    /// Resolve with [`DEFAULT_RELTOL`] as the fallback
    pub fn resolve(&self) -> Result<Tolerance, ConfigurationError> {
        self.resolve_with_default(DEFAULT_RELTOL)
    }

    /// Resolve, falling back to `default_reltol` when nothing was supplied
    pub fn resolve_with_default(&self, default_reltol: f64) -> Result<Tolerance, ConfigurationError> {
        let supplied: Vec<&'static str> = [
            ("places", self.places.is_some()),
            ("delta", self.delta.is_some()),
            ("abstol", self.abstol.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, set)| set.then_some(name))
        .collect();

        if supplied.len() > 1 {
            return Err(ConfigurationError::ConflictingTolerance { supplied });
        }

        let abstol = match (self.places, self.delta, self.abstol) {
            (Some(places), _, _) => Some(10f64.powi(-places)),
            (_, Some(delta), _) => Some(check("delta", delta)?),
            (_, _, Some(abstol)) => Some(check("abstol", abstol)?),
            _ => None,
        };
        let mut reltol = self.reltol.map(|r| check("reltol", r)).transpose()?;

        if abstol.is_none() && reltol.is_none() {
            reltol = Some(check("default_reltol", default_reltol)?);
        }

        let tolerance = Tolerance { abstol, reltol };
        tracing::trace!(options = ?self, ?tolerance, "resolved tolerance");
        Ok(tolerance)
    }
}

fn check(name: &'static str, value: f64) -> Result<f64, ConfigurationError> {
    if value >= 0.0 {
        Ok(value)
    } else {
        Err(ConfigurationError::InvalidTolerance { name, value })
    }
}

impl Tolerance {
    /// Whether two numbers agree within this tolerance. NaN never agrees.
    pub fn accepts(&self, first: f64, second: f64) -> bool {
        let diff = (first - second).abs();
        if self.abstol.is_some_and(|abs| diff <= abs) {
            return true;
        }
        self.reltol
            .is_some_and(|rel| diff / first.abs().max(second.abs()) <= rel)
    }
}

impl fmt::Display for Tolerance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "abs={}, rel={}", Opt(self.abstol), Opt(self.reltol))
    }
}

struct Opt(Option<f64>);

impl fmt::Display for Opt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(v) => write!(f, "{v:?}"),
            None => write!(f, "None"),
        }
    }
}
