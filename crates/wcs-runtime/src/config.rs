#![forbid(unsafe_code)]

//! Runtime configuration.
//!
//! [`RuntimeConfig`] bounds the structures the runtime grows on its own:
//! loop nesting, the per-template content pool and the per-anchor isolation
//! cache. With the `policy-config` feature it can be loaded from TOML or JSON;
//! absent keys keep their defaults.
//!
//! ```toml
//! max_loop_depth = 64
//! pool_capacity = 32
//! ```

use wcs_core::DEFAULT_MAX_LOOP_DEPTH;

use crate::error::{Result, RuntimeError};

/// Default number of unmounted content blocks kept per template.
pub const DEFAULT_POOL_CAPACITY: usize = 64;

/// Default number of anchors whose isolation verdict is remembered.
pub const DEFAULT_ISOLATION_CACHE_CAPACITY: usize = 1024;

/// Scope name used by bindings that do not name one.
pub const DEFAULT_STATE_NAME: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "policy-config",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct RuntimeConfig {
    /// Deepest allowed nesting of repetitions.
    pub max_loop_depth: usize,
    /// Unmounted blocks kept per template for reuse; `0` disables pooling.
    pub pool_capacity: usize,
    /// Anchors whose "alone in parent" verdict is cached.
    pub isolation_cache_capacity: usize,
    pub default_state_name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_loop_depth: DEFAULT_MAX_LOOP_DEPTH,
            pool_capacity: DEFAULT_POOL_CAPACITY,
            isolation_cache_capacity: DEFAULT_ISOLATION_CACHE_CAPACITY,
            default_state_name: DEFAULT_STATE_NAME.to_owned(),
        }
    }
}

impl RuntimeConfig {
    #[must_use]
    pub fn with_max_loop_depth(mut self, depth: usize) -> Self {
        self.max_loop_depth = depth;
        self
    }

    #[must_use]
    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_isolation_cache_capacity(mut self, capacity: usize) -> Self {
        self.isolation_cache_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_default_state_name(mut self, name: impl Into<String>) -> Self {
        self.default_state_name = name.into();
        self
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.max_loop_depth == 0 {
            return Err(RuntimeError::InvalidConfig {
                reason: "max_loop_depth must be at least 1".into(),
            });
        }
        if self.default_state_name.is_empty() {
            return Err(RuntimeError::InvalidConfig {
                reason: "default_state_name must not be empty".into(),
            });
        }
        Ok(())
    }

    /// Parse and validate a TOML document.
    #[cfg(feature = "policy-config")]
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source).map_err(|e| RuntimeError::InvalidConfig {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON document.
    #[cfg(feature = "policy-config")]
    pub fn from_json_str(source: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(source).map_err(|e| RuntimeError::InvalidConfig {
                reason: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }
}
