// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Broker access seam
//!
//! The runner and recovery paths talk to the broker through this trait
//! so tests can script broker behavior without a socket. `TcpBroker`
//! is the production implementation, a thin layer over the wire client.

use async_trait::async_trait;
use rig_core::{AgentId, Job, JobId, JobStatus, LeaseId, OutputChunk, Phase, PhaseResult};
use rig_proto::{BrokerClient, ClientError};
use thiserror::Error;

/// Broker call failures, split by how the caller should react.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker answered and said no. Retrying the same call will not
    /// change the answer.
    #[error("{0}")]
    Rejected(String),

    /// The broker could not be reached or the exchange broke off.
    #[error("broker unavailable: {0}")]
    Transport(String),
}

impl BrokerError {
    pub fn is_rejection(&self) -> bool {
        matches!(self, BrokerError::Rejected(_))
    }
}

impl From<ClientError> for BrokerError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Rejected(message) => BrokerError::Rejected(message),
            other => BrokerError::Transport(other.to_string()),
        }
    }
}

/// The broker operations an agent uses.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Poll the agent's queues for the next waiting job.
    async fn take_next(
        &self,
        agent: &AgentId,
        device: &str,
        queues: &[String],
    ) -> Result<Option<Job>, BrokerError>;

    /// Full job record, used during crash recovery.
    async fn job(&self, id: &JobId) -> Result<Job, BrokerError>;

    /// Heartbeat lease renewal; returns (expires_at_ms, cancel_requested).
    async fn renew(
        &self,
        job_id: &JobId,
        agent: &AgentId,
        lease: &LeaseId,
    ) -> Result<(u64, bool), BrokerError>;

    /// Announce phase entry; returns the advisory cancel flag.
    async fn phase_started(
        &self,
        job_id: &JobId,
        agent: &AgentId,
        lease: &LeaseId,
        phase: Phase,
    ) -> Result<bool, BrokerError>;

    /// Deliver a batch of output chunks.
    async fn append_output(
        &self,
        job_id: &JobId,
        agent: &AgentId,
        lease: &LeaseId,
        chunks: Vec<OutputChunk>,
    ) -> Result<(), BrokerError>;

    /// Report a completed phase.
    async fn phase_result(
        &self,
        job_id: &JobId,
        agent: &AgentId,
        lease: &LeaseId,
        result: PhaseResult,
    ) -> Result<(), BrokerError>;

    /// Report the job's terminal status.
    async fn finish(
        &self,
        job_id: &JobId,
        agent: &AgentId,
        lease: &LeaseId,
        status: JobStatus,
        cause: Option<String>,
    ) -> Result<(), BrokerError>;
}

/// Production broker access over TCP.
pub struct TcpBroker {
    client: BrokerClient,
}

impl TcpBroker {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            client: BrokerClient::new(addr),
        }
    }
}

#[async_trait]
impl Broker for TcpBroker {
    async fn take_next(
        &self,
        agent: &AgentId,
        device: &str,
        queues: &[String],
    ) -> Result<Option<Job>, BrokerError> {
        Ok(self.client.take_next(agent, device, queues).await?)
    }

    async fn job(&self, id: &JobId) -> Result<Job, BrokerError> {
        Ok(self.client.job(id.as_str()).await?)
    }

    async fn renew(
        &self,
        job_id: &JobId,
        agent: &AgentId,
        lease: &LeaseId,
    ) -> Result<(u64, bool), BrokerError> {
        Ok(self.client.renew(job_id, agent, lease).await?)
    }

    async fn phase_started(
        &self,
        job_id: &JobId,
        agent: &AgentId,
        lease: &LeaseId,
        phase: Phase,
    ) -> Result<bool, BrokerError> {
        Ok(self.client.phase_started(job_id, agent, lease, phase).await?)
    }

    async fn append_output(
        &self,
        job_id: &JobId,
        agent: &AgentId,
        lease: &LeaseId,
        chunks: Vec<OutputChunk>,
    ) -> Result<(), BrokerError> {
        Ok(self.client.append_output(job_id, agent, lease, chunks).await?)
    }

    async fn phase_result(
        &self,
        job_id: &JobId,
        agent: &AgentId,
        lease: &LeaseId,
        result: PhaseResult,
    ) -> Result<(), BrokerError> {
        Ok(self.client.phase_result(job_id, agent, lease, result).await?)
    }

    async fn finish(
        &self,
        job_id: &JobId,
        agent: &AgentId,
        lease: &LeaseId,
        status: JobStatus,
        cause: Option<String>,
    ) -> Result<(), BrokerError> {
        Ok(self
            .client
            .finish(job_id, agent, lease, status, cause)
            .await?)
    }
}

#[cfg(test)]
#[path = "broker_fake.rs"]
pub(crate) mod fake;
