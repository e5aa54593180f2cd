// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent lifecycle management: startup, shutdown.

use std::fs::File;
use std::path::PathBuf;

use fs2::FileExt;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{AgentConfig, ConfigError};

/// Filesystem layout under the state dir.
///
/// `agent.lock` doubles as the pid file. `checkpoint.json` is the
/// in-flight job record consulted after a crash; it exists only while
/// a job is running.
#[derive(Debug, Clone)]
pub struct Paths {
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub lock_path: PathBuf,
    pub log_path: PathBuf,
    pub checkpoint_path: PathBuf,
}

impl Paths {
    /// Layout under the resolved state dir.
    pub fn resolve() -> Result<Self, LifecycleError> {
        Ok(Self::under(crate::env::state_dir()?))
    }

    pub fn under(state_dir: PathBuf) -> Self {
        Self {
            config_path: state_dir.join("agent.toml"),
            lock_path: state_dir.join("agent.lock"),
            log_path: state_dir.join("agent.log"),
            checkpoint_path: state_dir.join("checkpoint.json"),
            state_dir,
        }
    }
}

/// Agent state during operation.
pub struct AgentContext {
    pub paths: Paths,
    pub config: AgentConfig,
    // NOTE(lifetime): Held to maintain exclusive file lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
}

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Could not determine state directory")]
    NoStateDir,

    #[error("Failed to acquire lock: agent already running?")]
    LockFailed(#[source] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Start the agent: lock the state dir, load config, prepare the job
/// working directory. The broker is not contacted here; the poll loop
/// tolerates an unreachable broker from the first iteration.
pub fn startup(paths: &Paths) -> Result<AgentContext, LifecycleError> {
    match startup_inner(paths) {
        Ok(context) => Ok(context),
        Err(e) => {
            // Don't clean up if we failed to acquire the lock —
            // those files belong to the already-running agent.
            if !matches!(e, LifecycleError::LockFailed(_)) {
                cleanup_on_failure(paths);
            }
            Err(e)
        }
    }
}

/// Inner startup logic - cleanup_on_failure called if this fails
fn startup_inner(paths: &Paths) -> Result<AgentContext, LifecycleError> {
    // 1. Create state directory
    std::fs::create_dir_all(&paths.state_dir)?;

    // 2. Acquire lock file FIRST - prevents races
    // Use OpenOptions to avoid truncating the file before we hold the lock,
    // which would wipe the running agent's pid.
    let lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&paths.lock_path)?;
    lock_file
        .try_lock_exclusive()
        .map_err(LifecycleError::LockFailed)?;

    // Write pid to lock file (truncate now that we hold the lock)
    use std::io::Write;
    let mut lock_file = lock_file;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;
    let lock_file = lock_file; // Drop mutability

    // 3. Load configuration (required; an agent has no useful defaults
    // for its identity or queues)
    let config = AgentConfig::load(&paths.config_path, &paths.state_dir)?;

    // 4. Prepare the parent of per-job working directories
    std::fs::create_dir_all(&config.workdir)?;

    info!(
        agent = %config.agent,
        device = %config.device,
        broker = %config.broker,
        queues = ?config.queues,
        "Agent started"
    );

    Ok(AgentContext {
        paths: paths.clone(),
        config,
        lock_file,
    })
}

impl AgentContext {
    /// Shutdown the agent gracefully: remove the lock file, release the
    /// lock. The checkpoint file is deliberately left alone; if a job
    /// was interrupted it is the crash-recovery record.
    pub fn shutdown(&mut self) {
        info!("Shutting down agent...");

        if self.paths.lock_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.paths.lock_path) {
                warn!("Failed to remove lock file: {}", e);
            }
        }
        // Lock is released when self.lock_file drops

        info!("Agent shutdown complete");
    }
}

/// Clean up resources on startup failure
fn cleanup_on_failure(paths: &Paths) {
    if paths.lock_path.exists() {
        let _ = std::fs::remove_file(&paths.lock_path);
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
