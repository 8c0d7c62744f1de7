//! Trace configuration.
//!
//! The only tunable of the core is the per-holder trace capacity. The
//! configuration installs process-wide at most once; holders read it on
//! every record, so installation must happen before the first chain is
//! built to affect everything.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `capacity` | 16 |

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Default bound on a holder's call trace.
pub const DEFAULT_TRACE_CAPACITY: usize = 16;

static TRACE_CONFIG: OnceLock<TraceConfig> = OnceLock::new();

/// Error installing the process-wide configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A configuration was already installed.
    #[error("trace configuration already installed")]
    AlreadyInstalled,
}

/// Bounds for the per-holder call trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceConfig {
    capacity: usize,
}

impl TraceConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            capacity: DEFAULT_TRACE_CAPACITY,
        }
    }

    /// Sets the trace capacity (at least 1).
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// The configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs the process-wide trace configuration.
///
/// # Errors
///
/// Returns [`ConfigError::AlreadyInstalled`] if called more than once.
pub fn install_trace_config(config: TraceConfig) -> Result<(), ConfigError> {
    TRACE_CONFIG
        .set(config)
        .map_err(|_| ConfigError::AlreadyInstalled)
}

/// The capacity holders trim their traces to.
pub(crate) fn trace_capacity() -> usize {
    TRACE_CONFIG
        .get()
        .map_or(DEFAULT_TRACE_CAPACITY, TraceConfig::capacity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_capacity() {
        assert_eq!(TraceConfig::default().capacity(), DEFAULT_TRACE_CAPACITY);
    }

    #[test]
    fn capacity_floor_is_one() {
        assert_eq!(TraceConfig::new().with_capacity(0).capacity(), 1);
    }

    #[test]
    fn builder_sets_capacity() {
        assert_eq!(TraceConfig::new().with_capacity(4).capacity(), 4);
    }
}
