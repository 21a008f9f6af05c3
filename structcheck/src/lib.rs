#![warn(missing_docs)]
//! # structcheck
//!
//! Test assertions for nested numeric data, plus deadlines for tests that
//! might never finish.
//!
//! - **Structured comparison**: deep equality over mappings, sequences and
//!   scalars with absolute or relative tolerance. Failures name the key and
//!   position path to the first divergence.
//! - **Bounded execution**: run a unit of work in a forked worker process and
//!   kill it when the deadline passes. Panics and errors travel back to the
//!   caller.
//!
//! ## Quick Start
//!
//! ```ignore
//! use structcheck::prelude::*;
//!
//! #[test]
//! fn solution_matches_reference() {
//!     let reference = serde_json::json!({"x": [1.0, 2.0], "obj": 3.0});
//!     let solution = solve();
//!     assert_structured_almost_eq!(reference, solution, abstol = 1e-6);
//! }
//!
//! #[timeout(5)]
//! #[test]
//! fn converges() {
//!     assert!(solve_iteratively().converged);
//! }
//! ```
//!
//! ## Failure Report
//!
//! ```text
//! 3 !~= 999
//!     Found at position 2
//!     Found when comparing key "k"
//!     Found when comparing with tolerance (abs=None, rel=1e-7):
//!         first={"k": [1, 2, 3]}
//!         second={"k": [1, 2, 999]}
//! ```

mod config;

use serde::Serialize;
use std::sync::OnceLock;

pub use config::{CONFIG_FILE, ExecutorSection, StructcheckConfig};

// Re-export comparison types
pub use structcheck_compare::{
    AssertError, CompareConfig, ComparisonError, ConfigurationError, DEFAULT_RELTOL, Kind,
    Mismatch, MismatchReason, PathSegment, Side, StructuredComparator, Tolerance,
    ToleranceOptions, Value, ValueError, to_value,
};

// Re-export execution types
pub use structcheck_exec::{
    BoundedExecutor, DEFAULT_TIMEOUT, ExecError, ExecutorConfig, Relay, parse_duration,
    run_with_timeout, try_run_with_timeout,
};

// Re-export macros
pub use structcheck_macros::timeout;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        BoundedExecutor, ExecError, StructuredComparator, assert_structured_almost_eq,
        run_with_timeout, timeout, try_run_with_timeout,
    };
}

/// Assert that two values are equal within the default relative tolerance.
///
/// Panics with the formatted failure report. Use the
/// [`assert_structured_almost_eq!`] macro or a [`StructuredComparator`] for
/// other tolerances.
#[track_caller]
pub fn assert_structured_almost_eq<A, B>(first: &A, second: &B)
where
    A: Serialize + ?Sized,
    B: Serialize + ?Sized,
{
    if let Err(err) = StructuredComparator::new().compare(first, second) {
        panic!("{err}");
    }
}

/// Assert that two structures are equal within tolerance.
///
/// Accepts the options `places`, `msg`, `delta`, `abstol`, `reltol` and
/// `allow_second_superset`. Any other option is a compile error.
///
/// ```ignore
/// assert_structured_almost_eq!(expected, actual);
/// assert_structured_almost_eq!(expected, actual, places = 3);
/// assert_structured_almost_eq!(
///     expected,
///     actual,
///     reltol = 1e-4,
///     allow_second_superset = true,
///     msg = "objective drifted",
/// );
/// ```
#[macro_export]
macro_rules! assert_structured_almost_eq {
    ($first:expr, $second:expr $(, $opt:ident = $value:expr)* $(,)?) => {{
        #[allow(unused_mut)]
        let mut __comparator = $crate::StructuredComparator::new();
        $(
            __comparator = $crate::__structcheck_option!(__comparator, $opt, $value);
        )*
        if let ::core::result::Result::Err(__err) = __comparator.compare(&$first, &$second) {
            ::core::panic!("{}", __err);
        }
    }};
}

#[doc(hidden)]
#[macro_export]
macro_rules! __structcheck_option {
    ($cmp:expr, places, $value:expr) => {
        $cmp.places($value)
    };
    ($cmp:expr, msg, $value:expr) => {
        $cmp.msg($value)
    };
    ($cmp:expr, delta, $value:expr) => {
        $cmp.delta($value)
    };
    ($cmp:expr, abstol, $value:expr) => {
        $cmp.abstol($value)
    };
    ($cmp:expr, reltol, $value:expr) => {
        $cmp.reltol($value)
    };
    ($cmp:expr, allow_second_superset, $value:expr) => {
        $cmp.allow_second_superset($value)
    };
    ($cmp:expr, $other:ident, $value:expr) => {
        ::core::compile_error!(::core::concat!(
            "unknown option `",
            ::core::stringify!($other),
            "` (expected places, msg, delta, abstol, reltol or allow_second_superset)"
        ))
    };
}

/// Executor using the deadline from `structcheck.toml`, or 60 seconds.
///
/// The configuration is discovered once per process. This is what a bare
/// `#[timeout]` attribute uses.
pub fn configured_executor() -> Result<BoundedExecutor, ExecError> {
    static CONFIG: OnceLock<ExecutorConfig> = OnceLock::new();

    let config = CONFIG.get_or_init(|| {
        let Some(config) = StructcheckConfig::discover() else {
            return ExecutorConfig::default();
        };
        match config.executor_config() {
            Ok(executor) => executor,
            Err(e) => {
                tracing::warn!(error = %e, "invalid [executor] timeout, using default");
                ExecutorConfig::default()
            }
        }
    });
    BoundedExecutor::from_config(config)
}

/// Install a `tracing` subscriber for structcheck's events.
///
/// `verbose` selects `debug` instead of `info`. Does nothing if a global
/// subscriber is already set.
pub fn init_logging(verbose: bool) {
    let filter = if verbose {
        "structcheck=debug"
    } else {
        "structcheck=info"
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
