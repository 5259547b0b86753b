//! Gateway Configuration
//!
//! Limits and policy the gateway applies to every request: pool size, acquisition timeout, row
//! and time bounds for queries, and keyword overrides for the classifier. All sections have
//! defaults, so an empty JSON object is a valid configuration.
//!
//! Stored connection profiles (where to connect) live in [`store`].

pub mod store;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::classifier::KeywordPolicy;
use crate::error::{GatewayError, Result};

/// Everything the gateway needs besides the connection itself
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    pub pool: PoolSettings,
    pub limits: QueryLimits,
    pub keywords: KeywordOverrides,
}

impl GatewayConfig {
    /// Reject zero sizes and defaults that exceed their maximum
    pub fn validate(&self) -> Result<()> {
        self.pool.validate()?;
        self.limits.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolSettings {
    /// Maximum simultaneous connections
    pub max_size: usize,

    /// How long a request waits for a free connection
    pub acquire_timeout_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self { max_size: 5, acquire_timeout_ms: 5_000 }
    }
}

impl PoolSettings {
    #[must_use]
    pub const fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(GatewayError::config_error("pool.max_size must be at least 1"));
        }
        if self.acquire_timeout_ms == 0 {
            return Err(GatewayError::config_error("pool.acquire_timeout_ms must be at least 1"));
        }
        Ok(())
    }
}

/// Row and time bounds for `run_query`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryLimits {
    pub default_row_limit: usize,
    pub max_row_limit: usize,
    pub default_timeout_ms: u64,
    pub max_timeout_ms: u64,

    /// Rows shown by the plain-text renderer
    pub text_max_rows: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            default_row_limit: 100,
            max_row_limit: 1_000,
            default_timeout_ms: 30_000,
            max_timeout_ms: 120_000,
            text_max_rows: 100,
        }
    }
}

impl QueryLimits {
    fn validate(&self) -> Result<()> {
        if self.default_row_limit == 0 || self.max_row_limit == 0 {
            return Err(GatewayError::config_error("row limits must be at least 1"));
        }
        if self.default_row_limit > self.max_row_limit {
            return Err(GatewayError::config_error(format!(
                "limits.default_row_limit ({}) exceeds limits.max_row_limit ({})",
                self.default_row_limit, self.max_row_limit
            )));
        }
        if self.default_timeout_ms == 0 || self.max_timeout_ms == 0 {
            return Err(GatewayError::config_error("timeouts must be at least 1ms"));
        }
        if self.default_timeout_ms > self.max_timeout_ms {
            return Err(GatewayError::config_error(format!(
                "limits.default_timeout_ms ({}) exceeds limits.max_timeout_ms ({})",
                self.default_timeout_ms, self.max_timeout_ms
            )));
        }
        if self.text_max_rows == 0 {
            return Err(GatewayError::config_error("limits.text_max_rows must be at least 1"));
        }
        Ok(())
    }

    /// Apply the default when absent; reject zero or values above the maximum
    pub fn row_limit(&self, requested: Option<usize>) -> Result<usize> {
        match requested {
            None => Ok(self.default_row_limit),
            Some(0) => Err(GatewayError::invalid_input("row_limit must be at least 1")),
            Some(n) if n > self.max_row_limit => Err(GatewayError::invalid_input(format!(
                "row_limit {n} exceeds the maximum of {}",
                self.max_row_limit
            ))),
            Some(n) => Ok(n),
        }
    }

    /// Apply the default when absent; reject zero or values above the maximum
    pub fn timeout(&self, requested_ms: Option<u64>) -> Result<Duration> {
        match requested_ms {
            None => Ok(Duration::from_millis(self.default_timeout_ms)),
            Some(0) => Err(GatewayError::invalid_input("timeout_ms must be at least 1")),
            Some(ms) if ms > self.max_timeout_ms => Err(GatewayError::invalid_input(format!(
                "timeout_ms {ms} exceeds the maximum of {}",
                self.max_timeout_ms
            ))),
            Some(ms) => Ok(Duration::from_millis(ms)),
        }
    }

    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// Adjustments to the classifier's keyword lists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KeywordOverrides {
    pub permit_explain: bool,

    /// Extra keywords accepted as the first token (e.g. `VALUES`)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allow_leading: Vec<String>,

    /// Default leading keywords to stop accepting (e.g. `SHOW`)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remove_leading: Vec<String>,

    /// Extra keywords rejected anywhere in a statement
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub deny: Vec<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub deny_functions: Vec<String>,
}

impl Default for KeywordOverrides {
    fn default() -> Self {
        Self {
            permit_explain: true,
            allow_leading: Vec::new(),
            remove_leading: Vec::new(),
            deny: Vec::new(),
            deny_functions: Vec::new(),
        }
    }
}

impl KeywordOverrides {
    #[must_use]
    pub fn policy(&self) -> KeywordPolicy {
        let mut policy = KeywordPolicy::strict().permit_explain(self.permit_explain);
        for keyword in &self.allow_leading {
            policy = policy.allow_leading(keyword);
        }
        for keyword in &self.remove_leading {
            policy = policy.remove_leading(keyword);
        }
        for keyword in &self.deny {
            policy = policy.deny(keyword);
        }
        for name in &self.deny_functions {
            policy = policy.deny_function(name);
        }
        policy
    }
}
