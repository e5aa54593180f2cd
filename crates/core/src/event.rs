// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Journal events
//!
//! Every store mutation is expressed as one of these and appended to the
//! journal before it is applied; startup replay walks the same
//! application path, so live state and recovered state cannot diverge.

use crate::job::{Job, JobId, JobStatus, Lease, OutputChunk};
use crate::phase::{Phase, PhaseResult};
use serde::{Deserialize, Serialize};

/// State transitions of the job store.
///
/// Serializes with `{"type": "job:name", ...fields}` format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// A validated submission entered the queue.
    #[serde(rename = "job:submitted")]
    JobSubmitted { job: Box<Job> },

    /// The broker matched the job to an agent. `attempt` is the total
    /// dispatch count including this grant.
    #[serde(rename = "job:leased")]
    JobLeased {
        job_id: JobId,
        lease: Lease,
        attempt: u32,
    },

    /// Heartbeat extended the lease.
    #[serde(rename = "job:lease-renewed")]
    LeaseRenewed { job_id: JobId, expires_at_ms: u64 },

    /// The sweep took an expired lease back; the job returns to waiting.
    #[serde(rename = "job:lease-reclaimed")]
    LeaseReclaimed { job_id: JobId },

    /// The agent entered a phase.
    #[serde(rename = "job:phase-started")]
    PhaseStarted {
        job_id: JobId,
        phase: Phase,
        at_ms: u64,
    },

    /// Output chunks arrived; duplicates by seq are dropped on apply.
    #[serde(rename = "job:output")]
    OutputAppended {
        job_id: JobId,
        chunks: Vec<OutputChunk>,
    },

    /// A phase finished and its result was recorded.
    #[serde(rename = "job:phase-result")]
    PhaseRecorded { job_id: JobId, result: PhaseResult },

    /// A client asked for cancellation; advisory until the agent observes
    /// it.
    #[serde(rename = "job:cancel-requested")]
    CancelRequested { job_id: JobId },

    /// Terminal status written. The last lease stays on the record so
    /// late writes from the holder (recovery output, a CLEANUP result)
    /// can still be fenced.
    #[serde(rename = "job:finished")]
    JobFinished {
        job_id: JobId,
        status: JobStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cause: Option<String>,
    },
}

impl Event {
    /// The job this event belongs to, for logging and filtering.
    pub fn job_id(&self) -> &JobId {
        match self {
            Event::JobSubmitted { job } => &job.id,
            Event::JobLeased { job_id, .. }
            | Event::LeaseRenewed { job_id, .. }
            | Event::LeaseReclaimed { job_id }
            | Event::PhaseStarted { job_id, .. }
            | Event::OutputAppended { job_id, .. }
            | Event::PhaseRecorded { job_id, .. }
            | Event::CancelRequested { job_id }
            | Event::JobFinished { job_id, .. } => job_id,
        }
    }

    /// Short tag for logs, matching the wire rename.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::JobSubmitted { .. } => "job:submitted",
            Event::JobLeased { .. } => "job:leased",
            Event::LeaseRenewed { .. } => "job:lease-renewed",
            Event::LeaseReclaimed { .. } => "job:lease-reclaimed",
            Event::PhaseStarted { .. } => "job:phase-started",
            Event::OutputAppended { .. } => "job:output",
            Event::PhaseRecorded { .. } => "job:phase-result",
            Event::CancelRequested { .. } => "job:cancel-requested",
            Event::JobFinished { .. } => "job:finished",
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
