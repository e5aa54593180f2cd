// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The synchronized, durable job store
//!
//! [`JobStore`] owns the queue state, the journal, and the agent
//! registry behind one lock, so every operation is validate → append →
//! apply as a single atomic step. That makes the WAITING → LEASED grant
//! a structural compare-and-set: two agents polling at once serialize on
//! the lock and cannot receive the same job.
//!
//! Fencing: every agent-originated mutation carries the (agent id,
//! lease id) pair it was granted and is checked against the job's
//! recorded lease. A zombie writer whose lease was reclaimed fails the
//! check on every write, not just on renewal.

use crate::access::{build_phases, AccessPolicy};
use crate::journal::{Journal, JournalError};
use crate::snapshot::{Snapshot, SnapshotError};
use crate::state::QueueState;
use parking_lot::Mutex;
use rig_core::{
    AgentId, AgentRecord, AgentState, CancelOutcome, Clock, Event, IdGen, Job, JobDoc, JobId,
    JobStatus, JobSummary, Lease, LeaseId, OutputChunk, Phase, PhaseResult, SubmissionError,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown job '{0}'")]
    UnknownJob(String),

    #[error(transparent)]
    Submission(#[from] SubmissionError),

    /// The caller's (agent, lease) pair does not match the job's
    /// recorded lease. This is the zombie-writer fence.
    #[error("job '{job}' is not held by this lease")]
    NotHolder { job: JobId },

    #[error("lease on job '{job}' has expired")]
    LeaseExpired { job: JobId },

    #[error("job '{job}' is already terminal ({status})")]
    Terminal { job: JobId, status: JobStatus },

    #[error("phase may not move backwards ({from} -> {to})")]
    PhaseRewind { from: Phase, to: Phase },

    #[error("finish requires a terminal status, got '{0}'")]
    NotTerminal(JobStatus),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// Tunables the broker reads from its config file.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Lease TTL granted at dispatch and restored by each renewal, in
    /// seconds.
    pub lease_ttl_secs: u64,
    /// Dispatch attempts before the sweep declares a job failed instead
    /// of requeueing it.
    pub max_attempts: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lease_ttl_secs: 60,
            max_attempts: 3,
        }
    }
}

/// Heartbeat acknowledgement. The advisory cancel flag rides along so
/// the agent learns about cancellation without an extra poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewAck {
    pub expires_at_ms: u64,
    pub cancel_requested: bool,
}

/// Phase entry acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartAck {
    pub cancel_requested: bool,
}

struct Inner {
    state: QueueState,
    journal: Journal,
    /// Presence only; never journaled. A broker restart forgets agents
    /// until their next poll.
    agents: HashMap<AgentId, AgentRecord>,
}

impl Inner {
    /// Append then apply, the only way state changes.
    fn commit(&mut self, event: Event) -> Result<(), StoreError> {
        debug!(kind = event.kind(), job_id = %event.job_id(), "Commit event");
        self.journal.append(&event)?;
        self.state.apply_event(&event);
        Ok(())
    }

    /// Look up `job_id` and fence against the caller's lease.
    fn held_job(
        &self,
        job_id: &JobId,
        agent: &AgentId,
        lease: &LeaseId,
    ) -> Result<&Job, StoreError> {
        let job = self
            .state
            .jobs
            .get(job_id)
            .ok_or_else(|| StoreError::UnknownJob(job_id.to_string()))?;
        let held = job
            .lease
            .as_ref()
            .is_some_and(|l| l.id == *lease && l.agent == *agent);
        if !held {
            return Err(StoreError::NotHolder {
                job: job_id.clone(),
            });
        }
        Ok(job)
    }

    /// Update a known agent's presence. Registration happens on poll;
    /// anything else is a no-op for unknown agents.
    fn note_agent(&mut self, id: &AgentId, state: AgentState, job: Option<JobId>, now_ms: u64) {
        if let Some(record) = self.agents.get_mut(id) {
            record.state = state;
            record.job = job;
            record.last_seen_ms = now_ms;
        }
    }
}

/// Durable job queue store shared by all broker connections.
pub struct JobStore<C: Clock, G: IdGen> {
    inner: Mutex<Inner>,
    clock: C,
    ids: G,
    config: StoreConfig,
    access: AccessPolicy,
    snapshot_path: PathBuf,
}

impl<C: Clock, G: IdGen> JobStore<C, G> {
    /// Open the store in `dir`: load the snapshot if one exists, then
    /// replay the journal tail on top of it.
    pub fn open(
        dir: &Path,
        config: StoreConfig,
        access: AccessPolicy,
        clock: C,
        ids: G,
    ) -> Result<Self, StoreError> {
        let snapshot_path = dir.join("snapshot.zst");
        let journal_path = dir.join("journal.jsonl");

        let (mut state, base_seq) = match Snapshot::load(&snapshot_path)? {
            Some(snapshot) => (snapshot.state, snapshot.seq),
            None => (QueueState::default(), 0),
        };

        let mut journal = Journal::open(&journal_path, base_seq)?;
        let tail = journal.entries_after(base_seq)?;
        let replayed = tail.len();
        for entry in &tail {
            state.apply_event(&entry.event);
        }
        if base_seq > 0 || replayed > 0 {
            info!(
                snapshot_seq = base_seq,
                replayed,
                jobs = state.jobs.len(),
                "Recovered store state"
            );
        }

        Ok(Self {
            inner: Mutex::new(Inner {
                state,
                journal,
                agents: HashMap::new(),
            }),
            clock,
            ids,
            config,
            access,
            snapshot_path,
        })
    }

    // --- client operations ---

    /// Accept a job submission.
    ///
    /// Queue access is checked before anything else: a rejected
    /// submission to a restricted queue must leave no trace, so no job id
    /// is assigned and nothing is journaled until the document has fully
    /// passed. Returns the stored job record.
    pub fn submit(&self, doc: JobDoc, token: Option<&str>) -> Result<Job, StoreError> {
        self.access.authorize(&doc.job_queue, token)?;
        doc.validate()?;
        let phases = build_phases(&doc, self.access.rules(&doc.job_queue))?;

        let id = JobId::new(self.ids.next());
        let doc_value = serde_json::to_value(&doc)?;
        let job = Job::new(id, doc_value, &doc, phases, self.clock.epoch_ms());

        let mut inner = self.inner.lock();
        inner.commit(Event::JobSubmitted {
            job: Box::new(job.clone()),
        })?;
        info!(job_id = %job.id, queue = %job.queue, priority = job.priority, "Job submitted");
        Ok(job)
    }

    /// Full job record, by id or unique prefix.
    pub fn job(&self, id: &str) -> Option<Job> {
        self.inner.lock().state.get_job(id).cloned()
    }

    /// Output chunks strictly after `cursor`, plus the job's status so
    /// pollers know when to stop.
    pub fn output_after(&self, id: &str, cursor: u64) -> Option<(Vec<OutputChunk>, JobStatus)> {
        let inner = self.inner.lock();
        let job = inner.state.get_job(id)?;
        Some((job.output_after(cursor), job.status))
    }

    /// Listing rows, newest submission first.
    pub fn jobs(&self, queue: Option<&str>) -> Vec<JobSummary> {
        self.inner
            .lock()
            .state
            .jobs_sorted(queue)
            .into_iter()
            .map(Job::summary)
            .collect()
    }

    /// Known agents, sorted by id.
    pub fn agents(&self) -> Vec<AgentRecord> {
        let inner = self.inner.lock();
        let mut agents: Vec<AgentRecord> = inner.agents.values().cloned().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    /// Request cancellation, by id or unique prefix.
    ///
    /// A waiting job is cancelled outright: nothing ran, so there is
    /// nothing to clean up. An active job only gets the advisory flag;
    /// the holder observes it and runs CLEANUP before reporting the
    /// terminal status.
    pub fn cancel(&self, id: &str) -> Result<CancelOutcome, StoreError> {
        let mut inner = self.inner.lock();
        let job = inner
            .state
            .get_job(id)
            .ok_or_else(|| StoreError::UnknownJob(id.to_string()))?;
        let job_id = job.id.clone();
        let status = job.status;
        let already_flagged = job.cancel_requested;

        if status.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal);
        }
        if status == JobStatus::Waiting {
            inner.commit(Event::JobFinished {
                job_id: job_id.clone(),
                status: JobStatus::Cancelled,
                cause: None,
            })?;
            info!(job_id = %job_id, "Cancelled waiting job");
            return Ok(CancelOutcome::Cancelled);
        }
        if !already_flagged {
            inner.commit(Event::CancelRequested {
                job_id: job_id.clone(),
            })?;
            info!(job_id = %job_id, "Cancel requested for active job");
        }
        Ok(CancelOutcome::Requested)
    }

    // --- agent operations ---

    /// Grant the next waiting job for `queues` to `agent`, if any.
    ///
    /// Dispatch order is lowest priority value, then FIFO by submission
    /// time, then job id. The returned job carries the new lease; its
    /// attempt counter has already been incremented.
    pub fn take_next(
        &self,
        agent: &AgentId,
        device: &str,
        queues: &[String],
    ) -> Result<Option<Job>, StoreError> {
        let now = self.clock.epoch_ms();
        let mut inner = self.inner.lock();

        // Polling is also how agents register their presence
        inner.agents.insert(
            agent.clone(),
            AgentRecord {
                id: agent.clone(),
                device: device.to_string(),
                queues: queues.to_vec(),
                state: AgentState::Waiting,
                job: None,
                last_seen_ms: now,
            },
        );

        let Some(candidate) = inner.state.next_waiting(queues) else {
            return Ok(None);
        };
        let job_id = candidate.id.clone();
        let attempt = candidate.attempts + 1;

        let lease = Lease {
            id: LeaseId::new(self.ids.next()),
            agent: agent.clone(),
            expires_at_ms: now + self.config.lease_ttl_secs * 1_000,
        };
        inner.commit(Event::JobLeased {
            job_id: job_id.clone(),
            lease,
            attempt,
        })?;
        inner.note_agent(agent, AgentState::Leased, Some(job_id.clone()), now);

        let job = inner
            .state
            .jobs
            .get(&job_id)
            .cloned()
            .ok_or_else(|| StoreError::UnknownJob(job_id.to_string()))?;
        info!(job_id = %job_id, agent = %agent, attempt, "Job leased");
        Ok(Some(job))
    }

    /// Extend the caller's lease by one TTL.
    ///
    /// Unlike the other fenced writes this also fails on expiry: an
    /// expired lease may already have been reclaimed and regranted, so
    /// the holder must stop rather than fight the new holder.
    pub fn renew(
        &self,
        job_id: &JobId,
        agent: &AgentId,
        lease: &LeaseId,
    ) -> Result<RenewAck, StoreError> {
        let now = self.clock.epoch_ms();
        let mut inner = self.inner.lock();

        let job = inner.held_job(job_id, agent, lease)?;
        if job.is_terminal() {
            return Err(StoreError::Terminal {
                job: job_id.clone(),
                status: job.status,
            });
        }
        let expired = job.lease.as_ref().is_some_and(|l| l.is_expired(now));
        if expired {
            return Err(StoreError::LeaseExpired {
                job: job_id.clone(),
            });
        }
        let cancel_requested = job.cancel_requested;
        let job_state = match job.status {
            JobStatus::Leased => AgentState::Leased,
            _ => AgentState::Running,
        };

        let expires_at_ms = now + self.config.lease_ttl_secs * 1_000;
        inner.commit(Event::LeaseRenewed {
            job_id: job_id.clone(),
            expires_at_ms,
        })?;
        inner.note_agent(agent, job_state, Some(job_id.clone()), now);

        Ok(RenewAck {
            expires_at_ms,
            cancel_requested,
        })
    }

    /// Record entry into `phase`.
    ///
    /// The phase pointer is monotonic within a lease: re-entering the
    /// current phase is an idempotent retry, moving backwards is a bug
    /// and is rejected.
    pub fn phase_started(
        &self,
        job_id: &JobId,
        agent: &AgentId,
        lease: &LeaseId,
        phase: Phase,
    ) -> Result<StartAck, StoreError> {
        let now = self.clock.epoch_ms();
        let mut inner = self.inner.lock();

        let job = inner.held_job(job_id, agent, lease)?;
        if job.is_terminal() {
            return Err(StoreError::Terminal {
                job: job_id.clone(),
                status: job.status,
            });
        }
        let cancel_requested = job.cancel_requested;
        match job.phase {
            Some(current) if phase.ordinal() < current.ordinal() => {
                return Err(StoreError::PhaseRewind {
                    from: current,
                    to: phase,
                });
            }
            Some(current) if phase == current => {
                return Ok(StartAck { cancel_requested });
            }
            _ => {}
        }

        inner.commit(Event::PhaseStarted {
            job_id: job_id.clone(),
            phase,
            at_ms: now,
        })?;
        inner.note_agent(agent, AgentState::Running, Some(job_id.clone()), now);
        info!(job_id = %job_id, phase = %phase, "Phase started");

        Ok(StartAck { cancel_requested })
    }

    /// Store output chunks, deduplicated by sequence number.
    ///
    /// Accepted even after the job is terminal: stragglers from the
    /// forwarder and recovery CLEANUP output still matter to the reader,
    /// and the lease fence already keeps strangers out.
    pub fn append_output(
        &self,
        job_id: &JobId,
        agent: &AgentId,
        lease: &LeaseId,
        chunks: Vec<OutputChunk>,
    ) -> Result<(), StoreError> {
        let now = self.clock.epoch_ms();
        let mut inner = self.inner.lock();

        let job = inner.held_job(job_id, agent, lease)?;
        let fresh: Vec<OutputChunk> = chunks
            .into_iter()
            .filter(|c| !job.output.contains_key(&c.seq))
            .collect();
        if fresh.is_empty() {
            return Ok(());
        }
        debug!(job_id = %job_id, chunks = fresh.len(), "Output appended");
        inner.commit(Event::OutputAppended {
            job_id: job_id.clone(),
            chunks: fresh,
        })?;
        inner.note_agent(agent, AgentState::Running, Some(job_id.clone()), now);
        Ok(())
    }

    /// Record a finished phase.
    ///
    /// On a terminal job only a CLEANUP result is accepted - that is the
    /// recovery path, where the restart was reported first and cleanup
    /// ran after. Anything else arriving late is refused.
    pub fn phase_result(
        &self,
        job_id: &JobId,
        agent: &AgentId,
        lease: &LeaseId,
        result: PhaseResult,
    ) -> Result<(), StoreError> {
        let now = self.clock.epoch_ms();
        let mut inner = self.inner.lock();

        let job = inner.held_job(job_id, agent, lease)?;
        let recovering = job.is_terminal();
        if recovering && result.phase != Phase::Cleanup {
            return Err(StoreError::Terminal {
                job: job_id.clone(),
                status: job.status,
            });
        }
        if job.results.last() == Some(&result) {
            // Idempotent redelivery
            return Ok(());
        }
        info!(
            job_id = %job_id,
            phase = %result.phase,
            exit_code = ?result.exit_code,
            passed = result.passed(),
            "Phase result recorded"
        );
        inner.commit(Event::PhaseRecorded {
            job_id: job_id.clone(),
            result,
        })?;
        // A cleanup result for a terminal job is the recovery signature
        let state = if recovering {
            AgentState::Recovering
        } else {
            AgentState::Running
        };
        inner.note_agent(agent, state, Some(job_id.clone()), now);
        Ok(())
    }

    /// Write the job's terminal status. Once only; the job is immutable
    /// afterwards except for the carve-outs above.
    pub fn finish(
        &self,
        job_id: &JobId,
        agent: &AgentId,
        lease: &LeaseId,
        status: JobStatus,
        cause: Option<String>,
    ) -> Result<(), StoreError> {
        if !status.is_terminal() {
            return Err(StoreError::NotTerminal(status));
        }
        let now = self.clock.epoch_ms();
        let mut inner = self.inner.lock();

        let job = inner.held_job(job_id, agent, lease)?;
        if job.is_terminal() {
            return Err(StoreError::Terminal {
                job: job_id.clone(),
                status: job.status,
            });
        }

        inner.commit(Event::JobFinished {
            job_id: job_id.clone(),
            status,
            cause: cause.clone(),
        })?;
        inner.note_agent(agent, AgentState::Waiting, None, now);
        info!(job_id = %job_id, status = %status, cause = ?cause, "Job finished");
        Ok(())
    }

    // --- maintenance ---

    /// The sweep: take back expired leases.
    ///
    /// A job still under its attempt budget returns to WAITING for
    /// redispatch; one that has used its last attempt becomes ERROR.
    /// Returns the ids that were touched.
    pub fn reclaim_expired(&self) -> Result<Vec<JobId>, StoreError> {
        let now = self.clock.epoch_ms();
        let mut inner = self.inner.lock();

        let expired = inner.state.expired(now);
        for job_id in &expired {
            let attempts = inner
                .state
                .jobs
                .get(job_id)
                .map(|j| j.attempts)
                .unwrap_or(0);
            if attempts >= self.config.max_attempts {
                warn!(
                    job_id = %job_id,
                    attempts,
                    "Lease expired with no attempts left, failing job"
                );
                inner.commit(Event::JobFinished {
                    job_id: job_id.clone(),
                    status: JobStatus::Error,
                    cause: Some("exceeded maximum dispatch attempts".to_string()),
                })?;
            } else {
                warn!(job_id = %job_id, attempts, "Lease expired, requeueing job");
                inner.commit(Event::LeaseReclaimed {
                    job_id: job_id.clone(),
                })?;
            }
        }
        Ok(expired)
    }

    /// Flush the journal if the group-commit window has closed.
    pub fn flush_if_due(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.journal.needs_flush() {
            inner.journal.flush()?;
        }
        Ok(())
    }

    /// Force a journal flush (shutdown path).
    pub fn flush(&self) -> Result<(), StoreError> {
        self.inner.lock().journal.flush()?;
        Ok(())
    }

    /// Snapshot current state and truncate the journal below it.
    ///
    /// The state clone is taken under the lock but compression and the
    /// snapshot fsyncs run outside it, so operations only stall for the
    /// clone. Returns the snapshotted sequence.
    pub fn checkpoint(&self) -> Result<u64, StoreError> {
        let (snapshot, seq) = {
            let mut inner = self.inner.lock();
            inner.journal.flush()?;
            let seq = inner.journal.write_seq();
            if seq == 0 {
                // Nothing journaled yet
                return Ok(0);
            }
            (Snapshot::new(seq, inner.state.clone()), seq)
        };

        snapshot.save(&self.snapshot_path)?;

        let mut inner = self.inner.lock();
        inner.journal.truncate_before(seq + 1)?;
        debug!(seq, "Checkpoint written");
        Ok(seq)
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
