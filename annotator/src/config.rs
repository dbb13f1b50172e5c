use crate::retry::RetryPolicy;
use crate::types::Region;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// Most charts processed at once within a phase.
pub const MAX_CONCURRENCY: usize = 8;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("missing required setting: {0}")]
    MissingField(&'static str),
    #[error("project id must be a positive integer, got {0:?}")]
    InvalidProjectId(String),
    #[error("region must be US or EU, got {0:?}")]
    InvalidRegion(String),
    #[error("invalid annotation: {0}")]
    InvalidAnnotation(String),
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("invalid retry policy: {0}")]
    InvalidPolicy(String),
    #[error("concurrency must be at least 1")]
    InvalidConcurrency,
}

/// Vendor endpoint settings. Used as a fallback for values the environment
/// does not provide.
#[derive(Clone, Deserialize, Debug, Default, PartialEq)]
pub struct VendorConfig {
    pub region: Option<Region>,
    pub project_id: Option<u64>,
    /// Replaces the region host, e.g. for an egress proxy.
    pub base_url: Option<Url>,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter_ms: u64,
    pub max_elapsed_secs: u64,
    pub timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            multiplier: 2.0,
            jitter_ms: 250,
            max_elapsed_secs: 60,
            timeout_secs: 30,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> Result<RetryPolicy, ConfigurationError> {
        if self.max_attempts == 0 {
            return Err(ConfigurationError::InvalidPolicy(
                "max_attempts must be at least 1".into(),
            ));
        }
        if self.multiplier.is_nan() || self.multiplier < 1.0 {
            return Err(ConfigurationError::InvalidPolicy(
                "multiplier must be at least 1.0".into(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigurationError::InvalidPolicy(
                "timeout_secs must be at least 1".into(),
            ));
        }

        Ok(RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.multiplier,
            jitter: Duration::from_millis(self.jitter_ms),
            max_elapsed: Duration::from_secs(self.max_elapsed_secs),
            attempt_timeout: Duration::from_secs(self.timeout_secs),
        })
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    pub concurrency: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig { concurrency: 4 }
    }
}

impl RunConfig {
    pub fn concurrency(&self) -> Result<usize, ConfigurationError> {
        match self.concurrency {
            0 => Err(ConfigurationError::InvalidConcurrency),
            n => Ok(n.min(MAX_CONCURRENCY)),
        }
    }
}
