//! Configuration loading from structcheck.toml
//!
//! Defaults for the comparator and the executor can be set in a
//! `structcheck.toml` file in the project root. The file is discovered by
//! walking up from the current directory.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use structcheck_compare::{CompareConfig, DEFAULT_RELTOL, StructuredComparator};
use structcheck_exec::{BoundedExecutor, ExecutorConfig};

/// File name looked up by [`StructcheckConfig::discover`]
pub const CONFIG_FILE: &str = "structcheck.toml";

/// structcheck configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StructcheckConfig {
    /// Comparator defaults
    #[serde(default)]
    pub compare: CompareConfig,
    /// Executor defaults
    #[serde(default)]
    pub executor: ExecutorSection,
}

/// `[executor]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSection {
    /// Deadline for one unit of work (e.g., "60s", "500ms", "2m")
    #[serde(default = "default_timeout")]
    pub timeout: String,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
        }
    }
}

fn default_timeout() -> String {
    "60s".to_string()
}

impl StructcheckConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Try to discover and load configuration by walking up from current directory
    pub fn discover() -> Option<Self> {
        Self::discover_from(std::env::current_dir().ok()?)
    }

    /// Walk up from `start` looking for `structcheck.toml`
    pub fn discover_from(start: impl AsRef<Path>) -> Option<Self> {
        let mut dir = start.as_ref().to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.exists() {
                return match Self::load(&config_path) {
                    Ok(config) => Some(config),
                    Err(e) => {
                        tracing::warn!(path = %config_path.display(), error = %e, "ignoring unreadable config");
                        None
                    }
                };
            }
            if !dir.pop() {
                break;
            }
        }
        None
    }

    /// Comparator preloaded with the `[compare]` defaults
    pub fn comparator(&self) -> StructuredComparator {
        StructuredComparator::with_defaults(&self.compare)
    }

    /// Parsed `[executor]` settings
    pub fn executor_config(&self) -> anyhow::Result<ExecutorConfig> {
        Ok(ExecutorConfig {
            timeout: Self::parse_duration(&self.executor.timeout)?,
        })
    }

    /// Executor with the `[executor]` deadline
    pub fn executor(&self) -> anyhow::Result<BoundedExecutor> {
        Ok(BoundedExecutor::from_config(&self.executor_config()?)?)
    }

    /// Generate a default configuration as TOML string
    pub fn default_toml() -> String {
        format!(
            r#"# structcheck Configuration
# https://github.com/ml-rust/structcheck

[compare]
# Relative tolerance used when no places/delta/abstol/reltol is given
default_reltol = {DEFAULT_RELTOL:e}
# Allow the second value to carry extra keys or trailing elements
allow_second_superset = false

[executor]
# Deadline for #[timeout] without arguments
timeout = "60s"
"#
        )
    }

    /// Parse duration string (e.g., "3s", "500ms", "2m").
    ///
    /// Same grammar as `#[timeout(duration = "..")]`.
    pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
        Ok(structcheck_exec::parse_duration(s)?)
    }
}
