// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job records, leases, and submission documents

use crate::agent::AgentId;
use crate::phase::{Phase, PhaseResult, PhaseSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;
use thiserror::Error;

crate::define_id! {
    /// Unique job identifier
    pub struct JobId;
}

crate::define_id! {
    /// Identifier for one granted lease; a redispatch mints a new one
    pub struct LeaseId;
}

/// Priority when the submission document does not set one. Lower values
/// dispatch first.
pub const DEFAULT_PRIORITY: u32 = 100;

/// Default job-level deadline, counted from job start (4 hours).
pub const DEFAULT_GLOBAL_TIMEOUT_SECS: u64 = 14_400;

/// Default output-silence deadline (15 minutes).
pub const DEFAULT_OUTPUT_TIMEOUT_SECS: u64 = 900;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued, visible to the broker for dispatch.
    Waiting,
    /// Granted to an agent, no phase started yet.
    Leased,
    /// A phase is executing.
    Running,
    /// Holding the device for interactive use (allocate/reserve).
    Allocated,
    Complete,
    Error,
    Cancelled,
    Timeout,
}

impl JobStatus {
    /// Terminal jobs are immutable, save for the recovery carve-outs the
    /// store enforces (late output and a cleanup result).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Complete | JobStatus::Error | JobStatus::Cancelled | JobStatus::Timeout
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Leased => "leased",
            JobStatus::Running => "running",
            JobStatus::Allocated => "allocated",
            JobStatus::Complete => "complete",
            JobStatus::Error => "error",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Timeout => "timeout",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A time-bounded exclusive claim binding one job to one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub id: LeaseId,
    pub agent: AgentId,
    pub expires_at_ms: u64,
}

impl Lease {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// One span of captured subprocess output, tagged with its per-job
/// sequence number. Sequence numbers start at 1 and are assigned
/// agent-side; the store reconstructs order from them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputChunk {
    pub seq: u64,
    pub at_ms: u64,
    pub text: String,
}

/// Chunk payload as stored on the job record, keyed by sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSpan {
    pub at_ms: u64,
    pub text: String,
}

/// Requested post-test device hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReserveData {
    #[serde(default)]
    pub ssh_keys: Vec<String>,
    /// Reservation window in seconds.
    #[serde(default = "default_reserve_timeout")]
    pub timeout: u64,
}

fn default_reserve_timeout() -> u64 {
    3600
}

/// Client-submitted job document (YAML or JSON).
///
/// Either carries an explicit `phases` list (argv arrays, validated at
/// submission) or just data sections, in which case the broker builds the
/// phase list from the queue's device connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDoc {
    pub job_queue: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phases: Vec<PhaseSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provision_data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware_update_data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserve_data: Option<ReserveData>,
}

impl JobDoc {
    /// Validate document shape. Queue access and connector synthesis are
    /// the store's concern; this checks only what the client controls.
    pub fn validate(&self) -> Result<(), SubmissionError> {
        if self.job_queue.trim().is_empty() {
            return Err(SubmissionError::EmptyQueue);
        }
        if self.global_timeout == Some(0) {
            return Err(SubmissionError::BadGlobalTimeout);
        }
        if self.output_timeout == Some(0) {
            return Err(SubmissionError::BadOutputTimeout);
        }
        validate_phase_list(&self.phases)?;
        Ok(())
    }
}

/// Check an explicit phase list: non-empty argv, positive timeouts,
/// strictly ascending canonical order (no duplicates). An empty list is
/// fine here; whether that is acceptable depends on the queue's connector.
pub fn validate_phase_list(phases: &[PhaseSpec]) -> Result<(), SubmissionError> {
    let mut previous: Option<Phase> = None;
    for spec in phases {
        if spec.command.is_empty() || spec.command.iter().any(|a| a.is_empty()) {
            return Err(SubmissionError::EmptyCommand { phase: spec.phase });
        }
        if spec.timeout == Some(0) {
            return Err(SubmissionError::BadTimeout { phase: spec.phase });
        }
        if let Some(prev) = previous {
            if spec.phase.ordinal() <= prev.ordinal() {
                return Err(SubmissionError::OutOfOrder {
                    phase: spec.phase,
                    previous: prev,
                });
            }
        }
        previous = Some(spec.phase);
    }
    Ok(())
}

/// Why a submission was refused. Rejection happens before any job record
/// exists; none of these leave a trace in the store.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SubmissionError {
    #[error("job_queue must not be empty")]
    EmptyQueue,

    #[error("global_timeout must be positive")]
    BadGlobalTimeout,

    #[error("output_timeout must be positive")]
    BadOutputTimeout,

    #[error("phase {phase} has an empty command")]
    EmptyCommand { phase: Phase },

    #[error("phase {phase} has a non-positive timeout")]
    BadTimeout { phase: Phase },

    #[error("phase {phase} may not follow {previous}")]
    OutOfOrder { phase: Phase, previous: Phase },

    #[error("queue '{queue}' is restricted")]
    RestrictedQueue { queue: String },

    #[error("job has no phases and queue '{queue}' has no connector")]
    NoPhases { queue: String },
}

/// What `cancel` did, reported back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// Job had not been dispatched; cancelled outright.
    Cancelled,
    /// Job is active; the flag is set and the agent will observe it.
    Requested,
    /// Job was already terminal; nothing to do.
    AlreadyTerminal,
}

/// Listing row: everything the fleet view needs without dragging the
/// output map across the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: JobId,
    pub queue: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    pub priority: u32,
    pub attempts: u32,
    pub submitted_at_ms: u64,
    /// Holder of the current lease, or the last holder for a finished job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

/// A submitted job and its full lifecycle state.
///
/// Owned exclusively by the store; agents only ever hold a snapshot plus
/// the (agent id, lease id) pair every mutation is fenced by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub queue: String,
    pub priority: u32,
    pub submitted_at_ms: u64,
    pub phases: Vec<PhaseSpec>,
    /// Seconds from job start before the global watchdog fires.
    pub global_timeout: u64,
    /// Seconds of output silence before the silence watchdog fires.
    pub output_timeout: u64,
    pub status: JobStatus,
    /// Phase currently executing (or last entered). Advances monotonically
    /// within one lease.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease: Option<Lease>,
    /// Dispatch count; bounded by the broker's max_attempts.
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub cancel_requested: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub output: BTreeMap<u64, OutputSpan>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<PhaseResult>,
    /// Normalized submission document; agents materialize it as job.json
    /// for device connectors.
    pub doc: serde_json::Value,
}

impl Job {
    pub fn new(
        id: JobId,
        doc_value: serde_json::Value,
        doc: &JobDoc,
        phases: Vec<PhaseSpec>,
        submitted_at_ms: u64,
    ) -> Self {
        Self {
            id,
            queue: doc.job_queue.clone(),
            priority: doc.priority.unwrap_or(DEFAULT_PRIORITY),
            submitted_at_ms,
            phases,
            global_timeout: doc.global_timeout.unwrap_or(DEFAULT_GLOBAL_TIMEOUT_SECS),
            output_timeout: doc.output_timeout.unwrap_or(DEFAULT_OUTPUT_TIMEOUT_SECS),
            status: JobStatus::Waiting,
            phase: None,
            lease: None,
            attempts: 0,
            cancel_requested: false,
            cause: None,
            output: BTreeMap::new(),
            results: Vec::new(),
            doc: doc_value,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The job's descriptor for `phase`, if declared.
    pub fn phase_spec(&self, phase: Phase) -> Option<&PhaseSpec> {
        self.phases.iter().find(|p| p.phase == phase)
    }

    /// Output chunks with sequence numbers strictly after `cursor`, in
    /// order. A cursor of 0 returns everything.
    pub fn output_after(&self, cursor: u64) -> Vec<OutputChunk> {
        self.output
            .range((Bound::Excluded(cursor), Bound::Unbounded))
            .map(|(seq, span)| OutputChunk {
                seq: *seq,
                at_ms: span.at_ms,
                text: span.text.clone(),
            })
            .collect()
    }

    /// Highest output sequence number recorded so far.
    pub fn last_seq(&self) -> u64 {
        self.output.keys().next_back().copied().unwrap_or(0)
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id.clone(),
            queue: self.queue.clone(),
            status: self.status,
            phase: self.phase,
            priority: self.priority,
            attempts: self.attempts,
            submitted_at_ms: self.submitted_at_ms,
            agent: self.lease.as_ref().map(|l| l.agent.clone()),
            cause: self.cause.clone(),
        }
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
