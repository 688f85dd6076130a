//! Message-passing configuration.

use serde::{Deserialize, Serialize};

use crate::error::{PgmError, Result};

/// Configuration for cluster graph processing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterGraphConfig {
    /// Maximum number of scheduler rounds
    pub max_iter: usize,
    /// Convergence threshold on the largest message divergence
    pub tol: f64,
    /// Send one message per round (true) or every informative message (false)
    pub sync: bool,
    /// Keep a copy of every passed message
    pub debug: bool,
    /// Absorb asynchronous rounds concurrently, one task per receiver
    pub parallel_async: bool,
}

impl Default for ClusterGraphConfig {
    fn default() -> Self {
        Self {
            max_iter: 50,
            tol: 1e-3,
            sync: true,
            debug: false,
            parallel_async: false,
        }
    }
}

impl ClusterGraphConfig {
    /// Set the round budget
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Set the convergence threshold
    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Choose the synchronous or asynchronous policy
    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_parallel_async(mut self, parallel_async: bool) -> Self {
        self.parallel_async = parallel_async;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validate_tol(self.tol)
    }

    /// Parse a configuration from JSON; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| PgmError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| PgmError::Serialization(e.to_string()))
    }
}

pub(crate) fn validate_tol(tol: f64) -> Result<()> {
    if !tol.is_finite() || tol < 0.0 {
        return Err(PgmError::Config(format!(
            "tol must be finite and non-negative, got {}",
            tol
        )));
    }
    Ok(())
}
