// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Broker configuration loaded from `broker.toml` in the state dir.
//!
//! The file is optional. Without one the broker listens on the default
//! address and serves open queues only; restricted queues and device
//! connectors must be declared here.

use std::collections::HashMap;
use std::path::Path;

use rig_store::{AccessPolicy, QueueRules, StoreConfig};
use serde::Deserialize;
use thiserror::Error;

/// Default listen address.
pub const DEFAULT_LISTEN: &str = "127.0.0.1:7581";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("{path}: {message}")]
    Invalid { path: String, message: String },
}

/// Contents of `broker.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerConfig {
    /// Listen address. Port 0 binds an ephemeral port; the bound address
    /// is written to `broker.addr` either way.
    pub listen: String,
    /// Lease TTL granted at dispatch and on each renewal, in seconds.
    pub lease_ttl_secs: u64,
    /// Interval between expired-lease sweeps, in seconds.
    pub sweep_interval_secs: u64,
    /// Dispatch attempts before the sweep fails a job instead of
    /// requeueing it.
    pub max_attempts: u32,
    /// Declared queues, keyed by name. Undeclared queues are open.
    pub queues: HashMap<String, QueueRules>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            lease_ttl_secs: 60,
            sweep_interval_secs: 10,
            max_attempts: 3,
            queues: HashMap::new(),
        }
    }
}

impl BrokerConfig {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate(path)?;
        Ok(config)
    }

    fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::Invalid {
            path: path.display().to_string(),
            message,
        };
        if self.lease_ttl_secs == 0 {
            return Err(invalid("lease_ttl_secs must be positive".to_string()));
        }
        if self.sweep_interval_secs == 0 {
            return Err(invalid("sweep_interval_secs must be positive".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(invalid("max_attempts must be positive".to_string()));
        }
        for (name, rules) in &self.queues {
            if rules.restricted && rules.tokens.is_empty() {
                return Err(invalid(format!(
                    "restricted queue '{name}' has an empty token allow-list"
                )));
            }
        }
        Ok(())
    }

    /// Queue rules in the form the store checks them.
    pub fn access_policy(&self) -> AccessPolicy {
        AccessPolicy::new(self.queues.clone())
    }

    /// Store tunables.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            lease_ttl_secs: self.lease_ttl_secs,
            max_attempts: self.max_attempts,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
