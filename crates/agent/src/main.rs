// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rig device agent (rig-agent)
//!
//! One process per device under test. Polls the broker for jobs on its
//! queues, runs their phases as subprocesses, streams output back, and
//! reports the terminal status. A durable checkpoint lets a restarted
//! process report the job it died with and scrub the device before
//! taking new work.
//!
//! Architecture:
//! - Main task: recovery pass, then the poll loop and shutdown signals
//! - Per job: heartbeat task (lease renewal) and output forwarder task
//! - Phase subprocesses run in their own process groups

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod broker;
mod checkpoint;
mod config;
mod env;
mod executor;
mod lifecycle;
mod output;
mod recovery;
mod runner;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use crate::broker::TcpBroker;
use crate::lifecycle::{LifecycleError, Paths};
use crate::runner::Runner;

/// Backoff for an unreachable broker, doubling up to the cap.
const POLL_BACKOFF_BASE: Duration = Duration::from_secs(1);
const POLL_BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Spread added to every poll wait so a fleet of agents does not hit a
/// recovering broker in lockstep.
const POLL_JITTER_MS: u64 = 250;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Handle info flags before any config/lock acquisition
    if let Some(arg) = std::env::args().nth(1) {
        match arg.as_str() {
            "--version" | "-V" | "-v" => {
                println!("rig-agent {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" | "help" => {
                println!("rig-agent {}", env!("CARGO_PKG_VERSION"));
                println!("Rig device agent - runs one device's jobs from the broker's queues");
                println!();
                println!("USAGE:");
                println!("    rig-agent");
                println!();
                println!("Configuration is read from agent.toml in the state dir");
                println!("(RIG_STATE_DIR, default ~/.local/state/rig). The agent prints");
                println!("READY once crash recovery has finished and polling begins.");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help       Print help information");
                println!("    -V, --version    Print version information");
                return Ok(());
            }
            _ => {
                eprintln!("error: unexpected argument '{arg}'");
                eprintln!("Usage: rig-agent [--help | --version]");
                std::process::exit(1);
            }
        }
    }

    let paths = Paths::resolve()?;

    // Set up logging
    let _log_guard = setup_logging(&paths)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting agent");

    let mut context = match lifecycle::startup(&paths) {
        Ok(c) => c,
        Err(LifecycleError::LockFailed(_)) => {
            // Another agent holds the state dir — print a human-readable
            // message instead of a raw debug error.
            let pid = std::fs::read_to_string(&paths.lock_path)
                .unwrap_or_default()
                .trim()
                .to_string();
            eprintln!("rig-agent is already running");
            if !pid.is_empty() {
                eprintln!("  pid: {pid}");
            }
            std::process::exit(1);
        }
        Err(e) => {
            error!("Failed to start agent: {}", e);
            return Err(e.into());
        }
    };

    let broker = Arc::new(TcpBroker::new(context.config.broker.clone()));

    // A checkpoint left by a dead process is settled before any new work
    recovery::run_recovery(&broker, &context.config, &context.paths.checkpoint_path).await;

    let poll_interval = context.config.poll_interval;
    let runner = Runner::new(
        Arc::clone(&broker),
        context.config.clone(),
        context.paths.checkpoint_path.clone(),
    );

    // Set up signal handlers
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    info!(agent = %context.config.agent, "Agent ready");

    // Signal ready for parent process (service manager, tests)
    println!("READY");

    let mut backoff = POLL_BACKOFF_BASE;
    loop {
        // A signal mid-job cancels the run outright: kill_on_drop reaps
        // the phase subprocess and the surviving checkpoint makes the
        // next start report the job as an agent restart.
        let wait = tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
                break;
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down...");
                break;
            }
            polled = runner.poll_once() => match polled {
                Ok(true) => {
                    backoff = POLL_BACKOFF_BASE;
                    Duration::ZERO
                }
                Ok(false) => {
                    backoff = POLL_BACKOFF_BASE;
                    jittered(poll_interval)
                }
                Err(e) => {
                    warn!(error = %e, "poll failed");
                    let wait = jittered(backoff);
                    backoff = (backoff * 2).min(POLL_BACKOFF_CAP);
                    wait
                }
            },
        };

        if !wait.is_zero() {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down...");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down...");
                    break;
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    context.shutdown();
    info!("Agent stopped");
    Ok(())
}

fn jittered(base: Duration) -> Duration {
    base + Duration::from_millis(rand::rng().random_range(0..=POLL_JITTER_MS))
}

/// Rotate the log when it exceeds this size, keeping three generations.
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Startup-time log rotation: agent.log -> .1 -> .2 -> .3, oldest
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
