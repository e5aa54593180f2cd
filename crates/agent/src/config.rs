// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent configuration loaded from `agent.toml` in the state dir.
//!
//! Unlike the broker, the agent cannot run on defaults alone: it needs
//! an identity, the device it fronts, and at least one queue to serve.
//! The file is therefore required.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rig_core::AgentId;
use serde::Deserialize;
use thiserror::Error;

/// Default broker address, matching the broker's default listen address.
pub const DEFAULT_BROKER: &str = "127.0.0.1:7581";

/// Default idle delay between queue polls, in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Default pause between SIGTERM and SIGKILL when tearing a phase down,
/// in seconds.
pub const DEFAULT_GRACE_SECS: u64 = 10;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing config file {path}")]
    Missing { path: String },

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

/// On-disk shape of `agent.toml`. Optional fields resolve to defaults
/// when the config is loaded.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAgentConfig {
    agent_id: String,
    device: String,
    broker: Option<String>,
    queues: Vec<String>,
    poll_interval_secs: Option<u64>,
    grace_secs: Option<u64>,
    workdir: Option<PathBuf>,
}

/// Resolved agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Fleet-unique agent identity, sent with every broker call.
    pub agent: AgentId,
    /// Device under test this agent fronts.
    pub device: String,
    /// Broker address.
    pub broker: String,
    /// Queues served, in declaration order.
    pub queues: Vec<String>,
    /// Idle delay between queue polls.
    pub poll_interval: Duration,
    /// Pause between SIGTERM and SIGKILL when tearing a phase down.
    pub grace: Duration,
    /// Parent directory for per-job working directories.
    pub workdir: PathBuf,
}

impl AgentConfig {
    /// Load from `path`. Relative or absent `workdir` resolves against
    /// `state_dir`.
    pub fn load(path: &Path, state_dir: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::Missing {
                path: path.display().to_string(),
            });
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let raw: RawAgentConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::resolve(raw, state_dir);
        config.validate(path)?;
        Ok(config)
    }

    fn resolve(raw: RawAgentConfig, state_dir: &Path) -> Self {
        let workdir = match raw.workdir {
            Some(dir) if dir.is_absolute() => dir,
            Some(dir) => state_dir.join(dir),
            None => state_dir.join("jobs"),
        };
        Self {
            agent: AgentId::new(raw.agent_id),
            device: raw.device,
            broker: raw.broker.unwrap_or_else(|| DEFAULT_BROKER.to_string()),
            queues: raw.queues,
            poll_interval: Duration::from_secs(
                raw.poll_interval_secs.unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
            ),
            grace: Duration::from_secs(raw.grace_secs.unwrap_or(DEFAULT_GRACE_SECS)),
            workdir,
        }
    }

    fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::Invalid {
            path: path.display().to_string(),
            message,
        };
        if self.agent.as_str().trim().is_empty() {
            return Err(invalid("agent_id must not be blank".to_string()));
        }
        if self.device.trim().is_empty() {
            return Err(invalid("device must not be blank".to_string()));
        }
        if self.queues.is_empty() {
            return Err(invalid("queues must list at least one queue".to_string()));
        }
        if self.queues.iter().any(|queue| queue.trim().is_empty()) {
            return Err(invalid("queues must not contain blank names".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(invalid("poll_interval_secs must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
