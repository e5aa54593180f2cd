// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rig broker daemon (rigd)
//!
//! Background process that owns the durable job store and serves the
//! wire protocol to `rig` clients and device agents.
//!
//! Architecture:
//! - Listener task: accepts connections, one request/response exchange each
//! - Tick loop: main task driving the lease sweep and shutdown signals
//! - Flush/checkpoint tasks: journal group commit and periodic snapshots

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod config;
mod env;
mod lifecycle;
mod listener;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

use crate::lifecycle::{BrokerStore, LifecycleError, Paths, StartupResult};
use crate::listener::Listener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Handle info flags before any config/lock acquisition
    if let Some(arg) = std::env::args().nth(1) {
        match arg.as_str() {
            "--version" | "-V" | "-v" => {
                println!("rigd {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" | "help" => {
                println!("rigd {}", env!("CARGO_PKG_VERSION"));
                println!("Rig broker daemon - owns the job queues and serves agents and the rig CLI");
                println!();
                println!("USAGE:");
                println!("    rigd");
                println!();
                println!("Configuration is read from broker.toml in the state dir");
                println!("(RIG_STATE_DIR, default ~/.local/state/rig). The broker prints");
                println!("READY <addr> once it accepts connections; the bound address is");
                println!("also written to broker.addr in the state dir.");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help       Print help information");
                println!("    -V, --version    Print version information");
                return Ok(());
            }
            _ => {
                eprintln!("error: unexpected argument '{arg}'");
                eprintln!("Usage: rigd [--help | --version]");
                std::process::exit(1);
            }
        }
    }

    let paths = Paths::resolve()?;

    // Set up logging
    let _log_guard = setup_logging(&paths)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting broker");

    // Start broker
    let StartupResult {
        mut broker,
        listener,
        addr,
    } = match lifecycle::startup(&paths).await {
        Ok(r) => r,
        Err(LifecycleError::LockFailed(_)) => {
            // Another broker holds the state dir — print a human-readable
            // message instead of a raw debug error.
            let pid = std::fs::read_to_string(&paths.lock_path)
                .unwrap_or_default()
                .trim()
                .to_string();
            eprintln!("rigd is already running");
            if !pid.is_empty() {
                eprintln!("  pid: {pid}");
            }
            std::process::exit(1);
        }
        Err(e) => {
            error!("Failed to start broker: {}", e);
            return Err(e.into());
        }
    };

    // Spawn listener task
    tokio::spawn(Listener::new(listener, Arc::clone(&broker.store)).run());

    // Spawn flush task for group commit (~10ms durability window)
    spawn_flush_task(Arc::clone(&broker.store));

    // Spawn checkpoint task for periodic snapshots
    spawn_checkpoint(Arc::clone(&broker.store));

    // Set up signal handlers
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    info!(%addr, "Broker ready");

    // Signal ready for parent process (service manager, tests)
    println!("READY {addr}");

    // NOTE: Must be created outside the loop - tokio::select! re-evaluates
    // branches on each iteration, so using sleep() inside would reset on
    // every iteration and the sweep would never fire.
    let mut sweep = tokio::time::interval(Duration::from_secs(broker.config.sweep_interval_secs));
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            // Reclaim expired leases
            _ = sweep.tick() => {
                match broker.store.reclaim_expired() {
                    Ok(reclaimed) if !reclaimed.is_empty() => {
                        info!(count = reclaimed.len(), "Swept expired leases");
                    }
                    Ok(_) => {}
                    Err(e) => error!("Lease sweep failed: {}", e),
                }
            }

            // Graceful shutdown on SIGTERM
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
                break;
            }

            // Graceful shutdown on SIGINT
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down...");
                break;
            }
        }
    }

    broker.shutdown();
    info!("Broker stopped");
    Ok(())
}

/// Flush interval for group commit (~10ms durability window)
const FLUSH_INTERVAL: Duration = Duration::from_millis(10);

/// Spawn a task that periodically flushes the journal.
fn spawn_flush_task(store: Arc<BrokerStore>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(FLUSH_INTERVAL);

        loop {
            interval.tick().await;

            if let Err(e) = store.flush_if_due() {
                tracing::error!("Failed to flush journal: {}", e);
            }
        }
    });
}

/// Checkpoint interval (60 seconds)
const CHECKPOINT_INTERVAL: Duration = Duration::from_secs(60);

/// Spawn a task that periodically saves snapshots and truncates the
/// journal.
///
/// This provides durability with bounded recovery time.
fn spawn_checkpoint(store: Arc<BrokerStore>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CHECKPOINT_INTERVAL);

        loop {
            interval.tick().await;

            match store.checkpoint() {
                // Nothing journaled yet
                Ok(0) => {}
                Ok(seq) => tracing::debug!(seq, "saved checkpoint snapshot"),
                Err(e) => tracing::warn!(error = %e, "failed to save checkpoint snapshot"),
            }
        }
    });
}

/// Rotate the log when it exceeds this size, keeping three generations.
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Startup-time log rotation: broker.log -> .1 -> .2 -> .3, oldest
/// dropped.
fn rotate_log_if_needed(log_path: &Path) {
    let Ok(meta) = log_path.metadata() else {
        return;
    };
    if meta.len() <= MAX_LOG_SIZE {
        return;
    }

    let rotated = |n: u32| log_path.with_extension(format!("log.{n}"));
    let _ = std::fs::remove_file(rotated(3));
    for n in [2u32, 1] {
        let from = rotated(n);
        if from.exists() {
            let _ = std::fs::rename(&from, rotated(n + 1));
        }
    }
    let _ = std::fs::rename(log_path, rotated(1));
}

fn setup_logging(
    paths: &Paths,
) -> Result<tracing_appender::non_blocking::WorkerGuard, LifecycleError> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    // Create log directory if needed
    if let Some(parent) = paths.log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    rotate_log_if_needed(&paths.log_path);

    // Set up file appender
    let file_appender = tracing_appender::rolling::never(
        paths.log_path.parent().ok_or(LifecycleError::NoStateDir)?,
        paths
            .log_path
            .file_name()
            .ok_or(LifecycleError::NoStateDir)?,
    );
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Set up subscriber with env filter
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();

    Ok(guard)
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
