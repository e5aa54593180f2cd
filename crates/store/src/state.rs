// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Materialized job state from journal replay

use rig_core::{Event, Job, JobId, JobStatus, OutputSpan, Phase};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Materialized state built from journal events.
///
/// Pure data: every mutation goes through [`QueueState::apply_event`], so
/// live state and state recovered by replay cannot diverge. Agent
/// presence is deliberately not here — it is rebuilt from live traffic
/// and never journaled.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct QueueState {
    pub jobs: HashMap<JobId, Job>,
}

impl QueueState {
    /// Get a job by ID or unique prefix (like git commit hashes)
    pub fn get_job(&self, id: &str) -> Option<&Job> {
        // Try exact match first
        if let Some(job) = self.jobs.get(id) {
            return Some(job);
        }

        // Try prefix match
        let matches: Vec<_> = self
            .jobs
            .iter()
            .filter(|(k, _)| k.as_str().starts_with(id))
            .collect();

        // Only return if exactly one match (unambiguous)
        if matches.len() == 1 {
            Some(matches[0].1)
        } else {
            None
        }
    }

    /// The waiting job that dispatches next for an agent serving `queues`:
    /// lowest priority value, then earliest submission, then job id.
    pub fn next_waiting(&self, queues: &[String]) -> Option<&Job> {
        self.jobs
            .values()
            .filter(|j| j.status == JobStatus::Waiting && queues.contains(&j.queue))
            .min_by(|a, b| {
                (a.priority, a.submitted_at_ms, &a.id).cmp(&(b.priority, b.submitted_at_ms, &b.id))
            })
    }

    /// Non-terminal jobs whose lease has expired, sorted by id for a
    /// deterministic sweep order.
    pub fn expired(&self, now_ms: u64) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self
            .jobs
            .values()
            .filter(|j| !j.is_terminal())
            .filter(|j| j.lease.as_ref().is_some_and(|l| l.is_expired(now_ms)))
            .map(|j| j.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Jobs for listings, newest submission first.
    pub fn jobs_sorted(&self, queue: Option<&str>) -> Vec<&Job> {
        let mut jobs: Vec<&Job> = self
            .jobs
            .values()
            .filter(|j| match queue {
                Some(q) => j.queue == q,
                None => true,
            })
            .collect();
        jobs.sort_by(|a, b| (b.submitted_at_ms, &b.id).cmp(&(a.submitted_at_ms, &a.id)));
        jobs
    }

    /// Apply an event to derive state changes.
    ///
    /// Events are facts about what happened; state is derived from those
    /// facts. Unknown job ids are ignored rather than erroring: replay
    /// after a truncated journal may see a tail event for a job whose
    /// submission lives only in the snapshot that failed to load.
    pub fn apply_event(&mut self, event: &Event) {
        match event {
            Event::JobSubmitted { job } => {
                self.jobs.insert(job.id.clone(), (**job).clone());
            }

            Event::JobLeased {
                job_id,
                lease,
                attempt,
            } => {
                if let Some(job) = self.jobs.get_mut(job_id) {
                    job.status = JobStatus::Leased;
                    job.lease = Some(lease.clone());
                    job.attempts = *attempt;
                }
            }

            Event::LeaseRenewed {
                job_id,
                expires_at_ms,
            } => {
                if let Some(job) = self.jobs.get_mut(job_id) {
                    if let Some(lease) = job.lease.as_mut() {
                        lease.expires_at_ms = *expires_at_ms;
                    }
                }
            }

            Event::LeaseReclaimed { job_id } => {
                if let Some(job) = self.jobs.get_mut(job_id) {
                    job.status = JobStatus::Waiting;
                    job.lease = None;
                    job.phase = None;
                }
            }

            Event::PhaseStarted { job_id, phase, .. } => {
                if let Some(job) = self.jobs.get_mut(job_id) {
                    job.phase = Some(*phase);
                    // The device is held from allocation until cleanup
                    job.status = match phase {
                        Phase::Allocate | Phase::Reserve => JobStatus::Allocated,
                        _ => JobStatus::Running,
                    };
                }
            }

            Event::OutputAppended { job_id, chunks } => {
                if let Some(job) = self.jobs.get_mut(job_id) {
                    for chunk in chunks {
                        // First write wins; redelivered chunks are dropped
                        job.output.entry(chunk.seq).or_insert_with(|| OutputSpan {
                            at_ms: chunk.at_ms,
                            text: chunk.text.clone(),
                        });
                    }
                }
            }

            Event::PhaseRecorded { job_id, result } => {
                if let Some(job) = self.jobs.get_mut(job_id) {
                    job.results.push(result.clone());
                }
            }

            Event::CancelRequested { job_id } => {
                if let Some(job) = self.jobs.get_mut(job_id) {
                    job.cancel_requested = true;
                }
            }

            Event::JobFinished {
                job_id,
                status,
                cause,
            } => {
                if let Some(job) = self.jobs.get_mut(job_id) {
                    job.status = *status;
                    job.cause = cause.clone();
                    // The lease stays on the record: post-terminal writes
                    // (late output, a recovery CLEANUP result) are fenced
                    // against it.
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
