// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Broker lifecycle management: startup, shutdown.

use std::fs::File;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use fs2::FileExt;
use rig_core::{SystemClock, UuidIdGen};
use rig_store::{JobStore, StoreError};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::{BrokerConfig, ConfigError};

/// Store type the broker serves.
pub type BrokerStore = JobStore<SystemClock, UuidIdGen>;

/// Filesystem layout under the state dir.
///
/// `broker.lock` doubles as the pid file; `broker.addr` holds the bound
/// listen address so tooling can find a broker bound to port 0.
#[derive(Debug, Clone)]
pub struct Paths {
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub lock_path: PathBuf,
    pub addr_path: PathBuf,
    pub log_path: PathBuf,
    pub store_dir: PathBuf,
}

impl Paths {
    /// Layout under the resolved state dir.
    pub fn resolve() -> Result<Self, LifecycleError> {
        Ok(Self::under(crate::env::state_dir()?))
    }

    pub fn under(state_dir: PathBuf) -> Self {
        Self {
            config_path: state_dir.join("broker.toml"),
            lock_path: state_dir.join("broker.lock"),
            addr_path: state_dir.join("broker.addr"),
            log_path: state_dir.join("broker.log"),
            store_dir: state_dir.join("store"),
            state_dir,
        }
    }
}

/// Broker state during operation.
pub struct BrokerState {
    pub paths: Paths,
    pub config: BrokerConfig,
    pub store: Arc<BrokerStore>,
    // NOTE(lifetime): Held to maintain exclusive file lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
}

/// Result of broker startup.
pub struct StartupResult {
    pub broker: BrokerState,
    /// Bound socket, to be spawned as the listener task.
    pub listener: TcpListener,
    pub addr: SocketAddr,
}

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Could not determine state directory")]
    NoStateDir,

    #[error("Failed to acquire lock: broker already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("Failed to bind {0}: {1}")]
    BindFailed(String, std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Start the broker: lock the state dir, load config, recover the
/// store, bind the listener, publish the bound address.
pub async fn startup(paths: &Paths) -> Result<StartupResult, LifecycleError> {
    match startup_inner(paths).await {
        Ok(result) => Ok(result),
        Err(e) => {
            // Don't clean up if we failed to acquire the lock —
            // those files belong to the already-running broker.
            if !matches!(e, LifecycleError::LockFailed(_)) {
                cleanup_on_failure(paths);
            }
            Err(e)
        }
    }
}

/// Inner startup logic - cleanup_on_failure called if this fails
async fn startup_inner(paths: &Paths) -> Result<StartupResult, LifecycleError> {
    // 1. Create state directories
    std::fs::create_dir_all(&paths.state_dir)?;
    std::fs::create_dir_all(&paths.store_dir)?;

    // 2. Acquire lock file FIRST - prevents races
    // Use OpenOptions to avoid truncating the file before we hold the lock,
    // which would wipe the running broker's pid.
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

    // 3. Load configuration
    let config = BrokerConfig::load(&paths.config_path)?;

    // 4. Recover the store: snapshot + journal tail
    let store = JobStore::open(
        &paths.store_dir,
        config.store_config(),
        config.access_policy(),
        SystemClock,
        UuidIdGen,
    )?;

    // 5. Bind LAST - only after all validation passes. Port 0 binds an
    // ephemeral port; the addr file is how tooling finds it either way.
    let listener = TcpListener::bind(&config.listen)
        .await
        .map_err(|e| LifecycleError::BindFailed(config.listen.clone(), e))?;
    let addr = listener.local_addr()?;
    std::fs::write(&paths.addr_path, addr.to_string())?;

    info!(%addr, state_dir = %paths.state_dir.display(), "Broker started");

    Ok(StartupResult {
        broker: BrokerState {
            paths: paths.clone(),
            config,
            store: Arc::new(store),
            lock_file,
        },
        listener,
        addr,
    })
}

impl BrokerState {
    /// Shutdown the broker gracefully: flush and snapshot the store,
    /// remove the published files, release the lock.
    pub fn shutdown(&mut self) {
        info!("Shutting down broker...");

        if let Err(e) = self.store.flush() {
            warn!("Failed to flush journal on shutdown: {}", e);
        }
        match self.store.checkpoint() {
            Ok(seq) => info!(seq, "Saved shutdown snapshot"),
            Err(e) => warn!("Failed to save shutdown snapshot: {}", e),
        }

        if self.paths.addr_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.paths.addr_path) {
                warn!("Failed to remove addr file: {}", e);
            }
        }
        if self.paths.lock_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.paths.lock_path) {
                warn!("Failed to remove lock file: {}", e);
            }
        }
        // Lock is released when self.lock_file drops

        info!("Broker shutdown complete");
    }
}

/// Clean up resources on startup failure
fn cleanup_on_failure(paths: &Paths) {
    if paths.addr_path.exists() {
        let _ = std::fs::remove_file(&paths.addr_path);
    }
    if paths.lock_path.exists() {
        let _ = std::fs::remove_file(&paths.lock_path);
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
