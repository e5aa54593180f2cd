// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job runner: the poll → run → report cycle for one device.
//!
//! A granted job is pinned by a heartbeat task that renews the lease and
//! relays cancellation through the stop flags. The declared phases run in
//! order; a failed phase decides the verdict and skips the rest; cleanup
//! always runs; the terminal status is reported exactly once, after
//! cleanup. A checkpoint on disk tracks the job across phase transitions
//! so a crashed process can be reported on restart.
//!
//! Broker reports are retried a few times with backoff. A rejection is
//! never retried: it means the lease fence closed, and the job now
//! belongs to the sweep or to another agent.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rig_core::{
    AgentId, Clock, Job, JobId, JobStatus, LeaseId, Phase, PhaseResult, SystemClock, Termination,
    TimeoutKind,
};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::broker::{Broker, BrokerError};
use crate::checkpoint::{clear_checkpoint, write_checkpoint, Checkpoint};
use crate::config::AgentConfig;
use crate::executor::{ExecOutcome, PhaseExecutor, PhaseRun, StopFlags};
use crate::output::spawn_forwarder;

/// Attempts for one broker report before it is given up on.
const BROKER_CALL_ATTEMPTS: u32 = 3;

/// Backoff between report attempts.
const RETRY_BASE: Duration = Duration::from_millis(250);
const RETRY_CAP: Duration = Duration::from_secs(2);

/// Floor for the renewal interval; leases about to lapse are renewed at
/// this rate rather than in an ever-tighter loop.
const MIN_RENEW_INTERVAL: Duration = Duration::from_secs(1);

/// How long the terminal report waits for the forwarder to flush.
pub(crate) const FORWARDER_DRAIN: Duration = Duration::from_secs(5);

/// Polls for jobs and runs them to their terminal report.
pub struct Runner<B: Broker> {
    broker: Arc<B>,
    config: AgentConfig,
    checkpoint_path: PathBuf,
    executor: PhaseExecutor,
}

impl<B: Broker> Runner<B> {
    pub fn new(broker: Arc<B>, config: AgentConfig, checkpoint_path: PathBuf) -> Self {
        let executor = PhaseExecutor::new(config.grace);
        Self {
            broker,
            config,
            checkpoint_path,
            executor,
        }
    }

    /// One poll pass: ask for a job and, if granted one, run it to the
    /// end. Returns whether a job ran.
    pub async fn poll_once(&self) -> Result<bool, BrokerError> {
        let granted = self
            .broker
            .take_next(&self.config.agent, &self.config.device, &self.config.queues)
            .await?;
        let Some(job) = granted else {
            return Ok(false);
        };
        self.run_job(job).await;
        Ok(true)
    }

    async fn run_job(&self, job: Job) {
        // The store never dispatches without a lease; a snapshot missing
        // one cannot be fenced and must not be run.
        let Some(lease) = job.lease.clone() else {
            warn!(job_id = %job.id, "granted job carries no lease; dropping");
            return;
        };
        info!(
            job_id = %job.id,
            queue = %job.queue,
            lease = %lease.id,
            attempt = job.attempts,
            "job granted"
        );

        let workdir = self.config.workdir.join(job.id.as_str());
        if let Err(e) = prepare_workdir(&workdir, &job) {
            warn!(job_id = %job.id, error = %e, "workdir setup failed");
            let cause = format!("workdir setup failed: {e}");
            let report = retry_broker(|| {
                self.broker.finish(
                    &job.id,
                    &self.config.agent,
                    &lease.id,
                    JobStatus::Error,
                    Some(cause.clone()),
                )
            })
            .await;
            if let Err(e) = report {
                warn!(job_id = %job.id, error = %e, "terminal report lost");
            }
            return;
        }

        let (stop_tx, stop_rx) = watch::channel(StopFlags::default());
        let stop_tx = Arc::new(stop_tx);

        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let mut forwarder = spawn_forwarder(
            Arc::clone(&self.broker),
            job.id.clone(),
            self.config.agent.clone(),
            lease.id.clone(),
            chunk_rx,
        );
        let heartbeat = tokio::spawn(heartbeat_loop(
            Arc::clone(&self.broker),
            job.id.clone(),
            self.config.agent.clone(),
            lease.id.clone(),
            lease.expires_at_ms,
            Arc::clone(&stop_tx),
        ));

        // On disk before any phase starts: a crash from here on is
        // reported by the recovery pass, not silently forgotten.
        let mut checkpoint = Checkpoint {
            job_id: job.id.clone(),
            queue: job.queue.clone(),
            lease: lease.id.clone(),
            phase: None,
            cleanup: job.phase_spec(Phase::Cleanup).cloned(),
            workdir: workdir.clone(),
            output_timeout: job.output_timeout,
            last_seq: job.last_seq(),
            updated_at_ms: SystemClock.epoch_ms(),
        };
        write_checkpoint(&self.checkpoint_path, &checkpoint);

        let global_deadline = Instant::now() + Duration::from_secs(job.global_timeout);
        let silence = Duration::from_secs(job.output_timeout);
        let mut next_seq = job.last_seq();
        let mut verdict: Option<(JobStatus, Option<String>)> = None;
        let mut abandoned = false;

        for spec in job.phases.iter().filter(|s| s.phase != Phase::Cleanup) {
            let flags = *stop_rx.borrow();
            if flags.lease_lost {
                abandoned = true;
                break;
            }
            if flags.cancel {
                verdict = Some((JobStatus::Cancelled, None));
                break;
            }

            checkpoint.phase = Some(spec.phase);
            checkpoint.updated_at_ms = SystemClock.epoch_ms();
            write_checkpoint(&self.checkpoint_path, &checkpoint);

            let announced = retry_broker(|| {
                self.broker
                    .phase_started(&job.id, &self.config.agent, &lease.id, spec.phase)
            })
            .await;
            match announced {
                Ok(cancel_requested) => {
                    if cancel_requested {
                        stop_tx.send_modify(|f| f.cancel = true);
                    }
                }
                Err(e) => {
                    // Rejected: the fence closed. Unreachable: the job's
                    // fate is unknowable from here, and a terminal report
                    // would consume an attempt the sweep should get.
                    warn!(
                        job_id = %job.id,
                        phase = %spec.phase,
                        error = %e,
                        "cannot announce phase; abandoning job"
                    );
                    abandoned = true;
                    break;
                }
            }

            // The reservation window is walled off from the job-level
            // timers; its own phase timeout is the window.
            let reserve = spec.phase == Phase::Reserve;
            info!(job_id = %job.id, phase = %spec.phase, "phase started");
            let outcome = self
                .executor
                .run(PhaseRun {
                    job_id: &job.id,
                    agent: &self.config.agent,
                    device: &self.config.device,
                    queue: &job.queue,
                    spec,
                    workdir: &workdir,
                    global_deadline: (!reserve).then_some(global_deadline),
                    output_timeout: (!reserve).then_some(silence),
                    heed_cancel: true,
                    next_seq,
                    stop: stop_rx.clone(),
                    chunks: chunk_tx.clone(),
                })
                .await;

            let result = match outcome {
                ExecOutcome::LeaseLost { next_seq: seq } => {
                    next_seq = seq;
                    abandoned = true;
                    break;
                }
                ExecOutcome::Finished {
                    result,
                    next_seq: seq,
                } => {
                    next_seq = seq;
                    result
                }
            };
            info!(
                job_id = %job.id,
                phase = %spec.phase,
                termination = ?result.termination,
                exit_code = ?result.exit_code,
                "phase finished"
            );

            // A released or lapsed reservation is a normal end of the
            // hold, not a failure.
            let released = reserve
                && matches!(
                    result.termination,
                    Termination::Cancelled
                        | Termination::TimedOut {
                            timeout: TimeoutKind::Phase
                        }
                );
            let failure = (!result.passed() && !released).then(|| verdict_for(&result));

            let reported = retry_broker(|| {
                self.broker
                    .phase_result(&job.id, &self.config.agent, &lease.id, result.clone())
            })
            .await;
            match reported {
                Ok(()) => {}
                Err(e) if e.is_rejection() => {
                    warn!(
                        job_id = %job.id,
                        phase = %spec.phase,
                        error = %e,
                        "phase report fenced; abandoning job"
                    );
                    abandoned = true;
                    break;
                }
                Err(e) => {
                    warn!(job_id = %job.id, phase = %spec.phase, error = %e, "phase report lost");
                }
            }

            if released {
                info!(job_id = %job.id, "reservation ended");
                continue;
            }
            if let Some(v) = failure {
                verdict = Some(v);
                break;
            }
        }

        if let Some(spec) = job.phase_spec(Phase::Cleanup) {
            checkpoint.phase = Some(Phase::Cleanup);
            checkpoint.updated_at_ms = SystemClock.epoch_ms();
            write_checkpoint(&self.checkpoint_path, &checkpoint);

            if !abandoned {
                let announced = retry_broker(|| {
                    self.broker
                        .phase_started(&job.id, &self.config.agent, &lease.id, Phase::Cleanup)
                })
                .await;
                match announced {
                    // The advisory cancel flag is moot once cleanup is
                    // reached.
                    Ok(_) => {}
                    Err(e) if e.is_rejection() => {
                        warn!(job_id = %job.id, error = %e, "cleanup announcement fenced");
                        abandoned = true;
                    }
                    Err(e) => {
                        warn!(job_id = %job.id, error = %e, "cleanup announcement lost");
                    }
                }
            }

            // Cleanup scrubs the device whatever happened to the lease;
            // a detached stop channel keeps the latched flags away from
            // it. Only the silence watchdog still applies.
            let (detached_tx, detached_rx) = watch::channel(StopFlags::default());
            drop(detached_tx);

            info!(job_id = %job.id, phase = %Phase::Cleanup, "phase started");
            let outcome = self
                .executor
                .run(PhaseRun {
                    job_id: &job.id,
                    agent: &self.config.agent,
                    device: &self.config.device,
                    queue: &job.queue,
                    spec,
                    workdir: &workdir,
                    global_deadline: None,
                    output_timeout: Some(silence),
                    heed_cancel: false,
                    next_seq,
                    stop: detached_rx,
                    chunks: chunk_tx.clone(),
                })
                .await;
            if let ExecOutcome::Finished { result, .. } = outcome {
                if !result.passed() {
                    // Logged and reported, but the decided verdict stands.
                    warn!(
                        job_id = %job.id,
                        termination = ?result.termination,
                        exit_code = ?result.exit_code,
                        "cleanup failed"
                    );
                }
                if !abandoned {
                    let reported = retry_broker(|| {
                        self.broker
                            .phase_result(&job.id, &self.config.agent, &lease.id, result.clone())
                    })
                    .await;
                    if let Err(e) = reported {
                        warn!(job_id = %job.id, error = %e, "cleanup report lost");
                    }
                }
            }
        }

        // Output is flushed before the terminal report so a client
        // polling on the terminal status sees the whole stream.
        drop(chunk_tx);
        if tokio::time::timeout(FORWARDER_DRAIN, &mut forwarder)
            .await
            .is_err()
        {
            warn!(job_id = %job.id, "output flush timed out");
            forwarder.abort();
        }
        heartbeat.abort();

        if abandoned {
            info!(job_id = %job.id, "job abandoned; its fate is the sweep's to decide");
        } else {
            let (status, cause) = verdict.unwrap_or((JobStatus::Complete, None));
            info!(job_id = %job.id, status = %status, "job finished");
            let report = retry_broker(|| {
                self.broker
                    .finish(&job.id, &self.config.agent, &lease.id, status, cause.clone())
            })
            .await;
            if let Err(e) = report {
                warn!(job_id = %job.id, error = %e, "terminal report lost");
            }
        }
        clear_checkpoint(&self.checkpoint_path);
    }
}

/// Renews the lease at a third of its remaining life and relays what the
/// broker says back into the stop flags. Exits once the lease is gone,
/// one way or the other; the runner aborts it after the terminal report.
async fn heartbeat_loop<B: Broker>(
    broker: Arc<B>,
    job_id: JobId,
    agent: AgentId,
    lease: LeaseId,
    mut expires_at_ms: u64,
    stop: Arc<watch::Sender<StopFlags>>,
) {
    loop {
        let now = SystemClock.epoch_ms();
        if now >= expires_at_ms {
            warn!(job_id = %job_id, "lease expired before renewal");
            stop.send_modify(|f| f.lease_lost = true);
            return;
        }
        let interval = Duration::from_millis((expires_at_ms - now) / 3).max(MIN_RENEW_INTERVAL);
        tokio::time::sleep(interval).await;

        match broker.renew(&job_id, &agent, &lease).await {
            Ok((expiry, cancel_requested)) => {
                expires_at_ms = expiry;
                if cancel_requested {
                    stop.send_modify(|f| f.cancel = true);
                }
            }
            Err(e) if e.is_rejection() => {
                warn!(job_id = %job_id, error = %e, "lease renewal rejected");
                stop.send_modify(|f| f.lease_lost = true);
                return;
            }
            Err(e) => {
                // Keep trying until the wall clock says the lease lapsed;
                // a broker restart inside the TTL costs nothing.
                debug!(job_id = %job_id, error = %e, "lease renewal unreachable");
            }
        }
    }
}

/// Retry a broker call with backoff. Rejections return immediately;
/// they are answers, not failures.
pub(crate) async fn retry_broker<T, Fut>(mut call: impl FnMut() -> Fut) -> Result<T, BrokerError>
where
    Fut: Future<Output = Result<T, BrokerError>>,
{
    let mut delay = RETRY_BASE;
    let mut attempt: u32 = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_rejection() || attempt >= BROKER_CALL_ATTEMPTS => return Err(e),
            Err(e) => {
                debug!(error = %e, attempt, "broker call failed; retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(RETRY_CAP);
                attempt += 1;
            }
        }
    }
}

/// Terminal status and cause for the phase result that decided the job.
fn verdict_for(result: &PhaseResult) -> (JobStatus, Option<String>) {
    let phase = result.phase;
    match result.termination {
        Termination::Exited => match result.exit_code {
            Some(code) => (
                JobStatus::Error,
                Some(format!("{phase} phase failed (exit code {code})")),
            ),
            None => (
                JobStatus::Error,
                Some(format!("{phase} phase killed by signal")),
            ),
        },
        Termination::SpawnFailed => {
            let detail = result.detail.as_deref().unwrap_or("spawn failed");
            (
                JobStatus::Error,
                Some(format!("{phase} phase failed to start: {detail}")),
            )
        }
        Termination::TimedOut {
            timeout: TimeoutKind::Global,
        } => (JobStatus::Timeout, Some("global timeout".to_string())),
        Termination::TimedOut {
            timeout: TimeoutKind::Silence,
        } => (
            JobStatus::Timeout,
            Some(format!("output timeout during {phase} phase")),
        ),
        Termination::TimedOut {
            timeout: TimeoutKind::Phase,
        } => (JobStatus::Timeout, Some(format!("{phase} phase timeout"))),
        Termination::Cancelled => (JobStatus::Cancelled, None),
    }
}

/// Per-job working directory with the submitted document materialized
/// as job.json, the path phase commands get in `RIG_JOB_DOC`.
fn prepare_workdir(workdir: &Path, job: &Job) -> std::io::Result<()> {
    std::fs::create_dir_all(workdir)?;
    let doc = serde_json::to_string_pretty(&job.doc).map_err(std::io::Error::other)?;
    std::fs::write(workdir.join("job.json"), doc.as_bytes())?;
    Ok(())
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
