//! Registry configuration
//!
//! Built programmatically with the builder methods or read from the
//! environment with [`RegistryConfig::from_env`].
//!
//! # Environment Variables
//!
//! - `FAULTLINE_MAX_CAUSE_DEPTH=<n>` - longest cause chain followed per capture (default 64)
//! - `FAULTLINE_SWAP_TIMEOUT_MS=<ms>` - deadline for bounded swaps, 0 = wait forever (default 0)

use std::str::FromStr;
use std::time::Duration;

use crate::error::{RegistryError, RegistryResult};

/// Default longest cause chain followed by a single capture.
pub const DEFAULT_MAX_CAUSE_DEPTH: usize = 64;

/// Upper bound accepted for `max_cause_depth`.
pub const MAX_CAUSE_DEPTH_LIMIT: usize = 4096;

/// Tunables shared by the front and the in-memory backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Causes followed per capture before the chain is truncated.
    pub max_cause_depth: usize,
    /// Deadline used by `RegistryFront::replace_bounded`. `None` waits forever.
    pub swap_timeout: Option<Duration>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_cause_depth: DEFAULT_MAX_CAUSE_DEPTH,
            swap_timeout: None,
        }
    }
}

impl RegistryConfig {
    /// Read overrides from `FAULTLINE_*` variables on top of the defaults.
    ///
    /// Unparsable values fall back to the default; out-of-range values are
    /// caught by [`validate`](Self::validate).
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let timeout_ms: u64 = env_get("FAULTLINE_SWAP_TIMEOUT_MS", 0);
        Self {
            max_cause_depth: env_get("FAULTLINE_MAX_CAUSE_DEPTH", defaults.max_cause_depth),
            swap_timeout: (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms)),
        }
    }

    pub fn max_cause_depth(mut self, depth: usize) -> Self {
        self.max_cause_depth = depth;
        self
    }

    pub fn swap_timeout(mut self, timeout: Duration) -> Self {
        self.swap_timeout = Some(timeout);
        self
    }

    /// Reject values the registry cannot honour.
    pub fn validate(&self) -> RegistryResult<()> {
        if self.max_cause_depth > MAX_CAUSE_DEPTH_LIMIT {
            return Err(RegistryError::InvalidConfig {
                key: "max_cause_depth",
                value: self.max_cause_depth.to_string(),
            });
        }
        if self.swap_timeout == Some(Duration::ZERO) {
            return Err(RegistryError::InvalidConfig {
                key: "swap_timeout",
                value: "0ms".to_string(),
            });
        }
        Ok(())
    }
}

/// Get environment variable parsed as type T, or return default
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
