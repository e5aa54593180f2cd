// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Broker client for CLI commands and agents
//!
//! One connection per request: connect, send, read the reply, drop the
//! stream. Every caller is either a human-paced CLI invocation or an
//! agent loop with second-scale cadence, so connection reuse buys
//! nothing and one-shot exchanges keep broker connection handling dumb.

use std::time::Duration;

use crate::protocol::{self, ProtocolError, Request, Response, PROTOCOL_VERSION};
use rig_core::{
    AgentId, AgentRecord, CancelOutcome, Job, JobDoc, JobId, JobStatus, JobSummary, LeaseId,
    OutputChunk, Phase, PhaseResult,
};
use thiserror::Error;
use tokio::net::TcpStream;

// Timeout configuration (env vars in milliseconds)
fn parse_duration_ms(var: &str) -> Option<Duration> {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Timeout for a single request/response exchange
pub fn timeout_ipc() -> Duration {
    parse_duration_ms("RIG_TIMEOUT_IPC_MS").unwrap_or(Duration::from_secs(5))
}

/// Timeout for establishing the TCP connection
pub fn timeout_connect() -> Duration {
    parse_duration_ms("RIG_TIMEOUT_CONNECT_MS").unwrap_or(Duration::from_secs(5))
}

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Cannot reach broker at {addr}: {source}")]
    Unreachable {
        addr: String,
        source: std::io::Error,
    },

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("{0}")]
    Rejected(String),

    #[error("Unexpected response from broker")]
    UnexpectedResponse,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Broker client bound to one address
pub struct BrokerClient {
    addr: String,
}

impl BrokerClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send a request and receive a response
    pub async fn send(&self, request: &Request) -> Result<Response, ClientError> {
        let stream = tokio::time::timeout(timeout_connect(), TcpStream::connect(&self.addr))
            .await
            .map_err(|_| ProtocolError::Timeout)?
            .map_err(|e| ClientError::Unreachable {
                addr: self.addr.clone(),
                source: e,
            })?;
        let (mut reader, mut writer) = stream.into_split();

        let data = protocol::encode(request)?;
        tokio::time::timeout(timeout_ipc(), protocol::write_message(&mut writer, &data))
            .await
            .map_err(|_| ProtocolError::Timeout)??;

        let response_bytes =
            tokio::time::timeout(timeout_ipc(), protocol::read_message(&mut reader))
                .await
                .map_err(|_| ProtocolError::Timeout)??;

        let response: Response = protocol::decode(&response_bytes)?;
        Ok(response)
    }

    /// Helper for requests that expect Ok or Error responses
    async fn send_simple(&self, request: &Request) -> Result<(), ClientError> {
        match self.send(request).await? {
            Response::Ok => Ok(()),
            Response::Error { message } => Err(ClientError::Rejected(message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Health check
    pub async fn ping(&self) -> Result<(), ClientError> {
        match self.send(&Request::Ping).await? {
            Response::Pong => Ok(()),
            Response::Error { message } => Err(ClientError::Rejected(message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Get broker version via Hello handshake
    pub async fn hello(&self) -> Result<String, ClientError> {
        let request = Request::Hello {
            version: PROTOCOL_VERSION.to_string(),
        };
        match self.send(&request).await? {
            Response::Hello { version } => Ok(version),
            Response::Error { message } => Err(ClientError::Rejected(message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Submit a job document
    pub async fn submit(&self, doc: &JobDoc, token: Option<&str>) -> Result<JobId, ClientError> {
        let request = Request::Submit {
            doc: doc.clone(),
            token: token.map(String::from),
        };
        match self.send(&request).await? {
            Response::Submitted { job_id } => Ok(job_id),
            Response::Error { message } => Err(ClientError::Rejected(message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Full job record by id or unique prefix
    pub async fn job(&self, id: &str) -> Result<Job, ClientError> {
        let request = Request::GetJob { id: id.to_string() };
        match self.send(&request).await? {
            Response::Job { job } => Ok(*job),
            Response::Error { message } => Err(ClientError::Rejected(message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Output chunks after a cursor, plus the job's status
    pub async fn output(
        &self,
        id: &str,
        after: u64,
    ) -> Result<(Vec<OutputChunk>, JobStatus), ClientError> {
        let request = Request::GetOutput {
            id: id.to_string(),
            after,
        };
        match self.send(&request).await? {
            Response::Output { chunks, status } => Ok((chunks, status)),
            Response::Error { message } => Err(ClientError::Rejected(message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Request cancellation
    pub async fn cancel(&self, id: &str) -> Result<CancelOutcome, ClientError> {
        let request = Request::Cancel { id: id.to_string() };
        match self.send(&request).await? {
            Response::Cancelled { outcome } => Ok(outcome),
            Response::Error { message } => Err(ClientError::Rejected(message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// List jobs, optionally filtered by queue
    pub async fn jobs(&self, queue: Option<&str>) -> Result<Vec<JobSummary>, ClientError> {
        let request = Request::ListJobs {
            queue: queue.map(String::from),
        };
        match self.send(&request).await? {
            Response::Jobs { jobs } => Ok(jobs),
            Response::Error { message } => Err(ClientError::Rejected(message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// List known agents
    pub async fn agents(&self) -> Result<Vec<AgentRecord>, ClientError> {
        match self.send(&Request::ListAgents).await? {
            Response::Agents { agents } => Ok(agents),
            Response::Error { message } => Err(ClientError::Rejected(message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Poll for the next waiting job
    pub async fn take_next(
        &self,
        agent: &AgentId,
        device: &str,
        queues: &[String],
    ) -> Result<Option<Job>, ClientError> {
        let request = Request::TakeNext {
            agent: agent.clone(),
            device: device.to_string(),
            queues: queues.to_vec(),
        };
        match self.send(&request).await? {
            Response::Granted { job } => Ok(job.map(|b| *b)),
            Response::Error { message } => Err(ClientError::Rejected(message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Heartbeat lease renewal; returns (expires_at_ms, cancel_requested)
    pub async fn renew(
        &self,
        job_id: &JobId,
        agent: &AgentId,
        lease: &LeaseId,
    ) -> Result<(u64, bool), ClientError> {
        let request = Request::Renew {
            job_id: job_id.clone(),
            agent: agent.clone(),
            lease: lease.clone(),
        };
        match self.send(&request).await? {
            Response::Renewed {
                expires_at_ms,
                cancel_requested,
            } => Ok((expires_at_ms, cancel_requested)),
            Response::Error { message } => Err(ClientError::Rejected(message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Announce phase entry; returns the advisory cancel flag
    pub async fn phase_started(
        &self,
        job_id: &JobId,
        agent: &AgentId,
        lease: &LeaseId,
        phase: Phase,
    ) -> Result<bool, ClientError> {
        let request = Request::PhaseStarted {
            job_id: job_id.clone(),
            agent: agent.clone(),
            lease: lease.clone(),
            phase,
        };
        match self.send(&request).await? {
            Response::PhaseAck { cancel_requested } => Ok(cancel_requested),
            Response::Error { message } => Err(ClientError::Rejected(message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Deliver a batch of output chunks
    pub async fn append_output(
        &self,
        job_id: &JobId,
        agent: &AgentId,
        lease: &LeaseId,
        chunks: Vec<OutputChunk>,
    ) -> Result<(), ClientError> {
        let request = Request::AppendOutput {
            job_id: job_id.clone(),
            agent: agent.clone(),
            lease: lease.clone(),
            chunks,
        };
        self.send_simple(&request).await
    }

    /// Report a completed phase
    pub async fn phase_result(
        &self,
        job_id: &JobId,
        agent: &AgentId,
        lease: &LeaseId,
        result: PhaseResult,
    ) -> Result<(), ClientError> {
        let request = Request::PhaseResult {
            job_id: job_id.clone(),
            agent: agent.clone(),
            lease: lease.clone(),
            result,
        };
        self.send_simple(&request).await
    }

    /// Report the job's terminal status
    pub async fn finish(
        &self,
        job_id: &JobId,
        agent: &AgentId,
        lease: &LeaseId,
        status: JobStatus,
        cause: Option<String>,
    ) -> Result<(), ClientError> {
        let request = Request::Finish {
            job_id: job_id.clone(),
            agent: agent.clone(),
            lease: lease.clone(),
            status,
            cause,
        };
        self.send_simple(&request).await
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
