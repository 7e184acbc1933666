//! Runtime configuration.
//!
//! All fields have defaults, so an empty JSON object is a valid config.

use serde::{Deserialize, Serialize};

use crate::error::{ReactiveError, Result};

/// The widest nesting depth the per-dep bitmasks can represent.
pub const MAX_MARKER_BITS: u32 = 31;

/// Tunables for a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// How many times one job may run within a single flush before it is
    /// skipped for the rest of that flush.
    pub recursion_limit: u32,

    /// Effect nesting depth up to which dependencies are reconciled with
    /// per-dep bitmasks. Deeper runs fall back to clearing and rebuilding
    /// the effect's dependency list.
    pub max_marker_depth: u32,

    /// Number of newly tracked targets between sweeps of registry entries
    /// whose target has been dropped. Zero disables automatic sweeps.
    pub registry_sweep_interval: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            recursion_limit: 100,
            max_marker_depth: 30,
            registry_sweep_interval: 256,
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ReactiveError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_marker_depth > MAX_MARKER_BITS {
            return Err(ReactiveError::Config(format!(
                "max_marker_depth must be at most {MAX_MARKER_BITS}, got {}",
                self.max_marker_depth
            )));
        }
        if self.recursion_limit == 0 {
            return Err(ReactiveError::Config(
                "recursion_limit must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
