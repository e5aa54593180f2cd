// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake broker for deterministic testing

use super::{Broker, BrokerError};
use async_trait::async_trait;
use parking_lot::Mutex;
use rig_core::{AgentId, Job, JobId, JobStatus, LeaseId, OutputChunk, Phase, PhaseResult};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Renewal expiry handed out when no renew response is scripted. Far
/// enough out that heartbeats never fire mid-test unless asked to.
pub const FAR_FUTURE_MS: u64 = u64::MAX / 4;

/// Recorded call to FakeBroker
#[derive(Debug, Clone)]
pub enum BrokerCall {
    TakeNext {
        agent: AgentId,
        queues: Vec<String>,
    },
    GetJob {
        job_id: JobId,
    },
    Renew {
        job_id: JobId,
        lease: LeaseId,
    },
    PhaseStarted {
        job_id: JobId,
        phase: Phase,
    },
    AppendOutput {
        job_id: JobId,
        chunks: usize,
    },
    PhaseResult {
        job_id: JobId,
        phase: Phase,
    },
    Finish {
        job_id: JobId,
        status: JobStatus,
        cause: Option<String>,
    },
}

/// Fake broker for testing
///
/// Hands out scripted jobs, records all calls, and can be told to fail
/// or flag cancellation at chosen points.
#[derive(Clone)]
pub struct FakeBroker {
    inner: Arc<Mutex<FakeBrokerState>>,
}

struct FakeBrokerState {
    queue: VecDeque<Job>,
    records: HashMap<JobId, Job>,
    calls: Vec<BrokerCall>,
    renew_responses: VecDeque<Result<(u64, bool), BrokerError>>,
    cancel_at_phase: Option<Phase>,
    phase_started_error: Option<BrokerError>,
    append_errors: VecDeque<BrokerError>,
    phase_result_errors: VecDeque<BrokerError>,
    finish_error: Option<BrokerError>,
    appended: Vec<OutputChunk>,
    results: Vec<PhaseResult>,
    finishes: Vec<(JobId, JobStatus, Option<String>)>,
}

impl Default for FakeBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBroker {
    /// Create a new fake broker
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeBrokerState {
                queue: VecDeque::new(),
                records: HashMap::new(),
                calls: Vec::new(),
                renew_responses: VecDeque::new(),
                cancel_at_phase: None,
                phase_started_error: None,
                append_errors: VecDeque::new(),
                phase_result_errors: VecDeque::new(),
                finish_error: None,
                appended: Vec::new(),
                results: Vec::new(),
                finishes: Vec::new(),
            })),
        }
    }

    /// Get all recorded calls
    pub fn calls(&self) -> Vec<BrokerCall> {
        self.inner.lock().calls.clone()
    }

    /// Queue a job for the next take_next
    pub fn push_job(&self, job: Job) {
        self.inner.lock().queue.push_back(job);
    }

    /// Make a job record available to `job()` lookups
    pub fn set_record(&self, job: Job) {
        self.inner.lock().records.insert(job.id.clone(), job);
    }

    /// Script the next renew response
    pub fn push_renew(&self, response: Result<(u64, bool), BrokerError>) {
        self.inner.lock().renew_responses.push_back(response);
    }

    /// Report cancel_requested from phase_started at the given phase
    pub fn set_cancel_at_phase(&self, phase: Phase) {
        self.inner.lock().cancel_at_phase = Some(phase);
    }

    /// Set error to return on next phase_started
    pub fn set_phase_started_error(&self, error: BrokerError) {
        self.inner.lock().phase_started_error = Some(error);
    }

    /// Queue an error for an upcoming append_output
    pub fn push_append_error(&self, error: BrokerError) {
        self.inner.lock().append_errors.push_back(error);
    }

    /// Queue an error for an upcoming phase_result
    pub fn push_phase_result_error(&self, error: BrokerError) {
        self.inner.lock().phase_result_errors.push_back(error);
    }

    /// Set error to return on next finish
    pub fn set_finish_error(&self, error: BrokerError) {
        self.inner.lock().finish_error = Some(error);
    }

    /// All chunks delivered so far, in arrival order
    pub fn appended_chunks(&self) -> Vec<OutputChunk> {
        self.inner.lock().appended.clone()
    }

    /// All phase results reported so far
    pub fn reported_results(&self) -> Vec<PhaseResult> {
        self.inner.lock().results.clone()
    }

    /// All terminal reports so far
    pub fn finish_reports(&self) -> Vec<(JobId, JobStatus, Option<String>)> {
        self.inner.lock().finishes.clone()
    }
}

#[async_trait]
impl Broker for FakeBroker {
    async fn take_next(
        &self,
        agent: &AgentId,
        _device: &str,
        queues: &[String],
    ) -> Result<Option<Job>, BrokerError> {
        let mut inner = self.inner.lock();
        inner.calls.push(BrokerCall::TakeNext {
            agent: agent.clone(),
            queues: queues.to_vec(),
        });
        Ok(inner.queue.pop_front())
    }

    async fn job(&self, id: &JobId) -> Result<Job, BrokerError> {
        let mut inner = self.inner.lock();
        inner.calls.push(BrokerCall::GetJob { job_id: id.clone() });
        inner
            .records
            .get(id)
            .cloned()
            .ok_or_else(|| BrokerError::Rejected(format!("job not found: {id}")))
    }

    async fn renew(
        &self,
        job_id: &JobId,
        _agent: &AgentId,
        lease: &LeaseId,
    ) -> Result<(u64, bool), BrokerError> {
        let mut inner = self.inner.lock();
        inner.calls.push(BrokerCall::Renew {
            job_id: job_id.clone(),
            lease: lease.clone(),
        });
        inner
            .renew_responses
            .pop_front()
            .unwrap_or(Ok((FAR_FUTURE_MS, false)))
    }

    async fn phase_started(
        &self,
        job_id: &JobId,
        _agent: &AgentId,
        _lease: &LeaseId,
        phase: Phase,
    ) -> Result<bool, BrokerError> {
        let mut inner = self.inner.lock();
        inner.calls.push(BrokerCall::PhaseStarted {
            job_id: job_id.clone(),
            phase,
        });
        if let Some(error) = inner.phase_started_error.take() {
            return Err(error);
        }
        Ok(inner.cancel_at_phase == Some(phase))
    }

    async fn append_output(
        &self,
        job_id: &JobId,
        _agent: &AgentId,
        _lease: &LeaseId,
        chunks: Vec<OutputChunk>,
    ) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock();
        inner.calls.push(BrokerCall::AppendOutput {
            job_id: job_id.clone(),
            chunks: chunks.len(),
        });
        if let Some(error) = inner.append_errors.pop_front() {
            return Err(error);
        }
        inner.appended.extend(chunks);
        Ok(())
    }

    async fn phase_result(
        &self,
        job_id: &JobId,
        _agent: &AgentId,
        _lease: &LeaseId,
        result: PhaseResult,
    ) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock();
        inner.calls.push(BrokerCall::PhaseResult {
            job_id: job_id.clone(),
            phase: result.phase,
        });
        if let Some(error) = inner.phase_result_errors.pop_front() {
            return Err(error);
        }
        inner.results.push(result);
        Ok(())
    }

    async fn finish(
        &self,
        job_id: &JobId,
        _agent: &AgentId,
        _lease: &LeaseId,
        status: JobStatus,
        cause: Option<String>,
    ) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock();
        inner.calls.push(BrokerCall::Finish {
            job_id: job_id.clone(),
            status,
            cause: cause.clone(),
        });
        if let Some(error) = inner.finish_error.take() {
            return Err(error);
        }
        inner.finishes.push((job_id.clone(), status, cause));
        Ok(())
    }
}
