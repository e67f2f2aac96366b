//! Library configuration, loadable from TOML.
//!
//! ```toml
//! default_similarity_threshold = 8
//! reject_exact_duplicates = true
//!
//! [retry]
//! max_attempts = 3
//! initial_backoff_ms = 10
//! max_backoff_ms = 100
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use gallery_types::PerceptualHash;

use crate::error::{SdkError, SdkResult};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "gallery.toml";

/// Shortest wait between two attempts.
pub const MIN_BACKOFF: Duration = Duration::from_millis(1);

/// How the facade retries mutations that failed with contention.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Must be at least 1.
    pub max_attempts: u32,
    /// Wait before the second attempt, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Upper bound for the doubling wait, in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 5,
            max_backoff_ms: 200,
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Wait after the `failures`-th failed attempt: `initial_backoff`
    /// doubled per further failure, capped at `max_backoff`, never below
    /// [`MIN_BACKOFF`].
    pub fn backoff_after(&self, failures: u32) -> Duration {
        let doublings = failures.saturating_sub(1).min(31);
        self.initial_backoff()
            .max(MIN_BACKOFF)
            .saturating_mul(1u32 << doublings)
            .min(self.max_backoff().max(MIN_BACKOFF))
    }
}

/// Configuration for a [`Library`](crate::Library).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Hamming distance used when a caller does not pass a threshold.
    pub default_similarity_threshold: u32,
    /// Refuse to ingest an image whose exact hash is already registered.
    pub reject_exact_duplicates: bool,
    /// Contention retry behaviour.
    pub retry: RetryPolicy,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            default_similarity_threshold: 10,
            reject_exact_duplicates: false,
            retry: RetryPolicy::default(),
        }
    }
}

impl LibraryConfig {
    /// Parse and validate TOML text. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> SdkResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| SdkError::Config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> SdkResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Write the configuration as pretty TOML.
    pub fn save(&self, path: impl AsRef<Path>) -> SdkResult<()> {
        let text =
            toml::to_string_pretty(self).map_err(|e| SdkError::Serialization(e.to_string()))?;
        std::fs::write(path.as_ref(), text)?;
        Ok(())
    }

    pub fn validate(&self) -> SdkResult<()> {
        if self.default_similarity_threshold > PerceptualHash::BITS {
            return Err(SdkError::Config(format!(
                "default_similarity_threshold {} exceeds hash width {}",
                self.default_similarity_threshold,
                PerceptualHash::BITS
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(SdkError::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.max_attempts > 1 && self.retry.initial_backoff_ms == 0 {
            return Err(SdkError::Config(
                "retry.initial_backoff_ms must be positive when retries are enabled".into(),
            ));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(SdkError::Config(format!(
                "retry.initial_backoff_ms {} exceeds retry.max_backoff_ms {}",
                self.retry.initial_backoff_ms, self.retry.max_backoff_ms
            )));
        }
        Ok(())
    }
}
