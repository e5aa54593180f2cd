// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Startup reconciliation of a job left behind by a crash.
//!
//! A checkpoint on disk at startup means the previous process died with
//! a job in flight. The interrupted phase is never resumed; half-run
//! setup or provisioning leaves hardware in a state no replay can be
//! trusted against. Instead the job is reported ERROR "agent restart",
//! its cleanup runs once if it declared one, and the checkpoint is
//! cleared before polling resumes.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rig_core::{JobStatus, Phase};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::broker::Broker;
use crate::checkpoint::{clear_checkpoint, load_checkpoint};
use crate::config::AgentConfig;
use crate::executor::{ExecOutcome, PhaseExecutor, PhaseRun, StopFlags};
use crate::output::spawn_forwarder;
use crate::runner::{retry_broker, FORWARDER_DRAIN};

/// Reconcile the checkpointed job, if there is one. Runs to completion
/// before the first poll; the device is not offered to new work while a
/// dead job's cleanup is pending.
pub async fn run_recovery<B: Broker>(broker: &Arc<B>, config: &AgentConfig, checkpoint_path: &Path) {
    let Some(checkpoint) = load_checkpoint(checkpoint_path) else {
        return;
    };
    info!(
        job_id = %checkpoint.job_id,
        phase = ?checkpoint.phase,
        "checkpoint found; previous process died mid-job"
    );

    // Report first: the client learns the job's fate even if cleanup
    // hangs. A rejection means the lease lapsed and the sweep already
    // decided; nothing left to say about it.
    let report = retry_broker(|| {
        broker.finish(
            &checkpoint.job_id,
            &config.agent,
            &checkpoint.lease,
            JobStatus::Error,
            Some("agent restart".to_string()),
        )
    })
    .await;
    match report {
        Ok(()) => info!(job_id = %checkpoint.job_id, "interrupted job reported"),
        Err(e) if e.is_rejection() => {
            info!(job_id = %checkpoint.job_id, error = %e, "job already reclaimed");
        }
        Err(e) => warn!(job_id = %checkpoint.job_id, error = %e, "restart report lost"),
    }

    match &checkpoint.cleanup {
        Some(spec) if checkpoint.phase != Some(Phase::Cleanup) => {
            // The store's output count is the sequence floor; the local
            // copy is the fallback when the record cannot be fetched.
            let next_seq = match retry_broker(|| broker.job(&checkpoint.job_id)).await {
                Ok(record) => record.last_seq(),
                Err(e) => {
                    warn!(
                        job_id = %checkpoint.job_id,
                        error = %e,
                        "cannot fetch job record; using local sequence floor"
                    );
                    checkpoint.last_seq
                }
            };

            if let Err(e) = std::fs::create_dir_all(&checkpoint.workdir) {
                warn!(job_id = %checkpoint.job_id, error = %e, "cannot recreate workdir");
            }

            let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
            let mut forwarder = spawn_forwarder(
                Arc::clone(broker),
                checkpoint.job_id.clone(),
                config.agent.clone(),
                checkpoint.lease.clone(),
                chunk_rx,
            );
            let (stop_tx, stop_rx) = watch::channel(StopFlags::default());
            drop(stop_tx);

            let executor = PhaseExecutor::new(config.grace);
            info!(job_id = %checkpoint.job_id, phase = %Phase::Cleanup, "recovery cleanup started");
            let outcome = executor
                .run(PhaseRun {
                    job_id: &checkpoint.job_id,
                    agent: &config.agent,
                    device: &config.device,
                    queue: &checkpoint.queue,
                    spec,
                    workdir: &checkpoint.workdir,
                    global_deadline: None,
                    output_timeout: Some(Duration::from_secs(checkpoint.output_timeout)),
                    heed_cancel: false,
                    next_seq,
                    stop: stop_rx,
                    chunks: chunk_tx.clone(),
                })
                .await;
            if let ExecOutcome::Finished { result, .. } = outcome {
                if !result.passed() {
                    warn!(
                        job_id = %checkpoint.job_id,
                        termination = ?result.termination,
                        exit_code = ?result.exit_code,
                        "recovery cleanup failed"
                    );
                }
                // A terminal job still accepts a cleanup result from the
                // lease it died under; best-effort either way.
                let reported = retry_broker(|| {
                    broker.phase_result(
                        &checkpoint.job_id,
                        &config.agent,
                        &checkpoint.lease,
                        result.clone(),
                    )
                })
                .await;
                if let Err(e) = reported {
                    info!(job_id = %checkpoint.job_id, error = %e, "recovery cleanup report not accepted");
                }
            }

            drop(chunk_tx);
            if tokio::time::timeout(FORWARDER_DRAIN, &mut forwarder)
                .await
                .is_err()
            {
                forwarder.abort();
            }
        }
        Some(_) => {
            info!(job_id = %checkpoint.job_id, "cleanup was the interrupted phase; not re-entering");
        }
        None => {}
    }

    clear_checkpoint(checkpoint_path);
    info!(job_id = %checkpoint.job_id, "recovery finished; resuming polls");
}

#[cfg(test)]
#[path = "recovery_tests.rs"]
mod tests;
