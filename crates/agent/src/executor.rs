// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Phase subprocess execution
//!
//! Each phase command runs in its own process group with stdout and
//! stderr captured line by line. The run is supervised by up to three
//! watchdogs (global deadline, output silence, per-phase timeout) plus
//! the stop flags raised by the heartbeat; whichever trips first
//! decides the termination cause, and the others are not consulted
//! again.
//!
//! Teardown always follows the same protocol: SIGTERM to the group,
//! wait out the grace period, SIGKILL whatever is left. After the
//! child is gone the group gets a final SIGKILL so grandchildren
//! cannot outlive the phase and leak into the next one.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use rig_core::{
    AgentId, Clock, JobId, OutputChunk, PhaseResult, PhaseSpec, SystemClock, Termination,
    TimeoutKind,
};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// How long to wait for straggling pipe output after the child is gone
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Pending lines between the pipe readers and the capture loop
const LINE_BUFFER: usize = 256;

/// Stop conditions raised outside the capture loop, observed at its
/// suspension points. Both flags latch; they are never lowered within
/// one job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StopFlags {
    /// Client asked for cancellation.
    pub cancel: bool,
    /// The lease expired or was granted to someone else; the agent no
    /// longer owns this job.
    pub lease_lost: bool,
}

/// One phase execution request.
pub struct PhaseRun<'a> {
    pub job_id: &'a JobId,
    pub agent: &'a AgentId,
    pub device: &'a str,
    pub queue: &'a str,
    pub spec: &'a PhaseSpec,
    pub workdir: &'a Path,
    /// Job-level deadline, absolute. None for phases the global timer
    /// does not cover.
    pub global_deadline: Option<Instant>,
    /// Output-silence limit. None disables the silence watchdog.
    pub output_timeout: Option<Duration>,
    /// Whether the cancel flag terminates this phase. Cleanup runs
    /// through a cancel.
    pub heed_cancel: bool,
    /// Last output sequence number assigned so far.
    pub next_seq: u64,
    pub stop: watch::Receiver<StopFlags>,
    pub chunks: mpsc::UnboundedSender<OutputChunk>,
}

/// What became of one phase execution.
pub enum ExecOutcome {
    Finished { result: PhaseResult, next_seq: u64 },
    /// The lease was lost mid-phase; the process group is dead and no
    /// result may be reported.
    LeaseLost { next_seq: u64 },
}

/// First stop condition observed by the capture loop.
enum Trigger {
    Exited(Option<std::process::ExitStatus>),
    Timeout(TimeoutKind),
    Cancelled,
    LeaseLost,
}

/// Runs phase commands under the termination protocol.
pub struct PhaseExecutor {
    grace: Duration,
}

impl PhaseExecutor {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    /// Execute one phase to its termination.
    pub async fn run(&self, run: PhaseRun<'_>) -> ExecOutcome {
        let PhaseRun {
            job_id,
            agent,
            device,
            queue,
            spec,
            workdir,
            global_deadline,
            output_timeout,
            heed_cancel,
            mut next_seq,
            mut stop,
            chunks,
        } = run;

        // A flag raised before the process exists needs no teardown.
        let flags = *stop.borrow_and_update();
        if flags.lease_lost {
            return ExecOutcome::LeaseLost { next_seq };
        }
        if flags.cancel && heed_cancel {
            let now = SystemClock.epoch_ms();
            return ExecOutcome::Finished {
                result: PhaseResult {
                    phase: spec.phase,
                    exit_code: None,
                    termination: Termination::Cancelled,
                    forced_kill: false,
                    best_effort: spec.best_effort,
                    started_at_ms: now,
                    finished_at_ms: now,
                    detail: None,
                },
                next_seq,
            };
        }

        let started_at_ms = SystemClock.epoch_ms();
        let Some((program, args)) = spec.command.split_first() else {
            return ExecOutcome::Finished {
                result: PhaseResult {
                    phase: spec.phase,
                    exit_code: None,
                    termination: Termination::SpawnFailed,
                    forced_kill: false,
                    best_effort: spec.best_effort,
                    started_at_ms,
                    finished_at_ms: SystemClock.epoch_ms(),
                    detail: Some("empty command".to_string()),
                },
                next_seq,
            };
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(workdir)
            .env("RIG_JOB_ID", job_id.as_str())
            .env("RIG_AGENT_ID", agent.as_str())
            .env("RIG_DEVICE_ID", device)
            .env("RIG_QUEUE", queue)
            .env("RIG_PHASE", spec.phase.as_str())
            // Submitted document, materialized next to the phase by the
            // runner; connectors take its path as an argument
            .env("RIG_JOB_DOC", workdir.join("job.json"))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Own process group so termination signals reach every
            // descendant, not just the direct child
            .process_group(0)
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                info!(job_id = %job_id, phase = %spec.phase, error = %e, "phase spawn failed");
                return ExecOutcome::Finished {
                    result: PhaseResult {
                        phase: spec.phase,
                        exit_code: None,
                        termination: Termination::SpawnFailed,
                        forced_kill: false,
                        best_effort: spec.best_effort,
                        started_at_ms,
                        finished_at_ms: SystemClock.epoch_ms(),
                        detail: Some(format!("{program}: {e}")),
                    },
                    next_seq,
                };
            }
        };

        // pgid == child pid; saved because child.id() is gone once the
        // child is reaped
        let pgid = child.id().map(|pid| pid as i32);

        let (line_tx, mut line_rx) = mpsc::channel::<String>(LINE_BUFFER);
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_line_reader(stdout, line_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_line_reader(stderr, line_tx.clone()));
        }
        drop(line_tx);

        let phase_deadline = spec
            .timeout
            .map(|secs| Instant::now() + Duration::from_secs(secs));
        let mut silence_deadline = output_timeout.map(|limit| Instant::now() + limit);
        let mut lines_open = true;
        let mut stop_open = true;

        // Biased order puts the stop flags and watchdogs ahead of the
        // line arm; a flooding child cannot starve a deadline.
        let trigger = loop {
            tokio::select! {
                biased;

                changed = stop.changed(), if stop_open => {
                    if changed.is_err() {
                        stop_open = false;
                        continue;
                    }
                    let flags = *stop.borrow_and_update();
                    if flags.lease_lost {
                        break Trigger::LeaseLost;
                    }
                    if flags.cancel && heed_cancel {
                        break Trigger::Cancelled;
                    }
                }

                status = child.wait() => {
                    break Trigger::Exited(status.ok());
                }

                _ = tokio::time::sleep_until(global_deadline.unwrap_or_else(far_future)),
                    if global_deadline.is_some() =>
                {
                    break Trigger::Timeout(TimeoutKind::Global);
                }

                _ = tokio::time::sleep_until(silence_deadline.unwrap_or_else(far_future)),
                    if silence_deadline.is_some() =>
                {
                    break Trigger::Timeout(TimeoutKind::Silence);
                }

                _ = tokio::time::sleep_until(phase_deadline.unwrap_or_else(far_future)),
                    if phase_deadline.is_some() =>
                {
                    break Trigger::Timeout(TimeoutKind::Phase);
                }

                maybe = line_rx.recv(), if lines_open => match maybe {
                    Some(text) => {
                        if let Some(limit) = output_timeout {
                            silence_deadline = Some(Instant::now() + limit);
                        }
                        next_seq += 1;
                        let _ = chunks.send(OutputChunk {
                            seq: next_seq,
                            at_ms: SystemClock.epoch_ms(),
                            text,
                        });
                    }
                    None => lines_open = false,
                },
            }
        };

        let (status, forced_kill) = match trigger {
            Trigger::Exited(status) => (status, false),
            _ => self.terminate_group(&mut child, pgid).await,
        };

        // Bounded drain of whatever the pipes still hold
        let drain_deadline = Instant::now() + DRAIN_TIMEOUT;
        while lines_open {
            match tokio::time::timeout_at(drain_deadline, line_rx.recv()).await {
                Ok(Some(text)) => {
                    next_seq += 1;
                    let _ = chunks.send(OutputChunk {
                        seq: next_seq,
                        at_ms: SystemClock.epoch_ms(),
                        text,
                    });
                }
                Ok(None) => break,
                Err(_) => {
                    debug!(job_id = %job_id, phase = %spec.phase, "pipe drain timed out");
                    break;
                }
            }
        }

        // Grandchildren may have survived the child; nothing from this
        // phase outlives it
        kill_group(pgid, Signal::SIGKILL);
        for reader in readers {
            reader.abort();
        }

        let termination = match trigger {
            Trigger::LeaseLost => return ExecOutcome::LeaseLost { next_seq },
            Trigger::Exited(_) => Termination::Exited,
            Trigger::Timeout(timeout) => Termination::TimedOut { timeout },
            Trigger::Cancelled => Termination::Cancelled,
        };

        ExecOutcome::Finished {
            result: PhaseResult {
                phase: spec.phase,
                exit_code: status.and_then(|s| s.code()),
                termination,
                forced_kill,
                best_effort: spec.best_effort,
                started_at_ms,
                finished_at_ms: SystemClock.epoch_ms(),
                detail: None,
            },
            next_seq,
        }
    }

    /// SIGTERM the group, give it the grace period, SIGKILL the rest.
    /// Returns the child's exit status and whether SIGKILL was needed.
    async fn terminate_group(
        &self,
        child: &mut Child,
        pgid: Option<i32>,
    ) -> (Option<std::process::ExitStatus>, bool) {
        kill_group(pgid, Signal::SIGTERM);
        match tokio::time::timeout(self.grace, child.wait()).await {
            Ok(status) => (status.ok(), false),
            Err(_) => {
                kill_group(pgid, Signal::SIGKILL);
                (child.wait().await.ok(), true)
            }
        }
    }
}

fn spawn_line_reader<R>(reader: R, tx: mpsc::Sender<String>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        // next_line strips the terminator; put a plain newline back so
        // chunks concatenate into the original stream
        while let Ok(Some(mut line)) = lines.next_line().await {
            line.push('\n');
            if tx.send(line).await.is_err() {
                break;
            }
        }
    })
}

fn kill_group(pgid: Option<i32>, signal: Signal) {
    if let Some(pgid) = pgid {
        // ESRCH just means the group is already gone
        let _ = killpg(Pid::from_raw(pgid), signal);
    }
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86400 * 365 * 30)
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
