// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Listener task for handling broker connections.
//!
//! The Listener runs in a spawned task, accepting connections and
//! handling them without blocking the tick loop. Each connection is one
//! request/response exchange against the shared [`BrokerStore`].

use std::sync::Arc;

use rig_proto::{protocol, Request, Response, DEFAULT_TIMEOUT, PROTOCOL_VERSION};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, warn};

use crate::lifecycle::BrokerStore;

/// Listener task for accepting broker connections.
pub struct Listener {
    socket: TcpListener,
    store: Arc<BrokerStore>,
}

/// Errors from connection handling.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),
}

impl Listener {
    pub fn new(socket: TcpListener, store: Arc<BrokerStore>) -> Self {
        Self { socket, store }
    }

    /// Run the accept loop, spawning a task per connection.
    pub async fn run(self) {
        loop {
            match self.socket.accept().await {
                Ok((stream, _)) => {
                    let store = Arc::clone(&self.store);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, store).await {
                            match e {
                                ConnectionError::Protocol(
                                    protocol::ProtocolError::ConnectionClosed,
                                ) => debug!("Client disconnected"),
                                ConnectionError::Protocol(protocol::ProtocolError::Timeout) => {
                                    warn!("Connection timeout")
                                }
                                _ => error!("Connection error: {}", e),
                            }
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}

/// Handle a single client connection: one request, one response.
async fn handle_connection(
    stream: TcpStream,
    store: Arc<BrokerStore>,
) -> Result<(), ConnectionError> {
    let (mut reader, mut writer) = stream.into_split();

    let request = protocol::read_request(&mut reader, DEFAULT_TIMEOUT).await?;

    // Agent-plane traffic is constant (polls, heartbeats, output); log it
    // at debug and keep info for client operations.
    if is_agent_plane(&request) {
        debug!(request = ?request, "received request");
    } else {
        tracing::info!(request = ?request, "received request");
    }

    let response = handle_request(request, &store);

    debug!("Sending response: {:?}", response);
    protocol::write_response(&mut writer, &response, DEFAULT_TIMEOUT).await?;

    Ok(())
}

fn is_agent_plane(request: &Request) -> bool {
    matches!(
        request,
        Request::Ping
            | Request::TakeNext { .. }
            | Request::Renew { .. }
            | Request::AppendOutput { .. }
            | Request::GetOutput { .. }
    )
}

/// Handle a single request against the store.
///
/// Store rejections cross the wire as `Response::Error`; the connection
/// itself only fails on transport problems.
fn handle_request<C: rig_core::Clock, G: rig_core::IdGen>(
    request: Request,
    store: &rig_store::JobStore<C, G>,
) -> Response {
    match request {
        Request::Ping => Response::Pong,

        Request::Hello { version: _ } => Response::Hello {
            version: PROTOCOL_VERSION.to_string(),
        },

        Request::Submit { doc, token } => match store.submit(doc, token.as_deref()) {
            Ok(job) => Response::Submitted { job_id: job.id },
            Err(e) => error_response(e),
        },

        Request::GetJob { id } => match store.job(&id) {
            Some(job) => Response::Job { job: Box::new(job) },
            None => Response::Error {
                message: format!("unknown job '{id}'"),
            },
        },

        Request::GetOutput { id, after } => match store.output_after(&id, after) {
            Some((chunks, status)) => Response::Output { chunks, status },
            None => Response::Error {
                message: format!("unknown job '{id}'"),
            },
        },

        Request::Cancel { id } => match store.cancel(&id) {
            Ok(outcome) => Response::Cancelled { outcome },
            Err(e) => error_response(e),
        },

        Request::ListJobs { queue } => Response::Jobs {
            jobs: store.jobs(queue.as_deref()),
        },

        Request::ListAgents => Response::Agents {
            agents: store.agents(),
        },

        Request::TakeNext {
            agent,
            device,
            queues,
        } => match store.take_next(&agent, &device, &queues) {
            Ok(job) => Response::Granted {
                job: job.map(Box::new),
            },
            Err(e) => error_response(e),
        },

        Request::Renew {
            job_id,
            agent,
            lease,
        } => match store.renew(&job_id, &agent, &lease) {
            Ok(ack) => Response::Renewed {
                expires_at_ms: ack.expires_at_ms,
                cancel_requested: ack.cancel_requested,
            },
            Err(e) => error_response(e),
        },

        Request::PhaseStarted {
            job_id,
            agent,
            lease,
            phase,
        } => match store.phase_started(&job_id, &agent, &lease, phase) {
            Ok(ack) => Response::PhaseAck {
                cancel_requested: ack.cancel_requested,
            },
            Err(e) => error_response(e),
        },

        Request::AppendOutput {
            job_id,
            agent,
            lease,
            chunks,
        } => match store.append_output(&job_id, &agent, &lease, chunks) {
            Ok(()) => Response::Ok,
            Err(e) => error_response(e),
        },

        Request::PhaseResult {
            job_id,
            agent,
            lease,
            result,
        } => match store.phase_result(&job_id, &agent, &lease, result) {
            Ok(()) => Response::Ok,
            Err(e) => error_response(e),
        },

        Request::Finish {
            job_id,
            agent,
            lease,
            status,
            cause,
        } => match store.finish(&job_id, &agent, &lease, status, cause) {
            Ok(()) => Response::Ok,
            Err(e) => error_response(e),
        },
    }
}

fn error_response(e: rig_store::StoreError) -> Response {
    Response::Error {
        message: e.to_string(),
    }
}

#[cfg(test)]
#[path = "listener_tests.rs"]
mod tests;
