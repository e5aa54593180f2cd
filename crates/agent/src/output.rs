// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Output delivery pipeline
//!
//! Captured lines arrive here already stamped with their per-job
//! sequence number; this task batches them and pushes batches to the
//! broker in order. Delivery is decoupled from capture so a slow or
//! unreachable broker never stalls the phase watchdogs.
//!
//! A batch that keeps failing on transport is dropped after bounded
//! retries; the store orders by sequence number, so a gap is visible
//! but harmless. A fenced batch (the lease moved on) stops delivery
//! for good.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rig_core::{AgentId, JobId, LeaseId, OutputChunk};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::broker::{Broker, BrokerError};

/// How long a partial batch may sit before it is pushed anyway
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(500);

/// Chunks per AppendOutput request
pub const MAX_BATCH: usize = 64;

/// First retry delay after a transport failure
pub const BACKOFF_BASE: Duration = Duration::from_millis(250);

/// Retry delay ceiling
pub const BACKOFF_CAP: Duration = Duration::from_secs(5);

/// Random extra delay added to each retry, breaking up lockstep
/// retries from a fleet of agents behind one recovering broker
pub const BACKOFF_JITTER_MS: u64 = 100;

/// Delivery attempts per batch before it is dropped
pub const MAX_DELIVERY_ATTEMPTS: u32 = 6;

/// Spawn the delivery task for one job.
///
/// Drains `rx` until the capture side closes it, then flushes what
/// remains and exits.
pub fn spawn_forwarder<B: Broker>(
    broker: Arc<B>,
    job_id: JobId,
    agent: AgentId,
    lease: LeaseId,
    mut rx: mpsc::UnboundedReceiver<OutputChunk>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut batch: Vec<OutputChunk> = Vec::new();
        let mut flush_at: Option<Instant> = None;
        let mut fenced = false;

        loop {
            let deadline = flush_at.unwrap_or_else(far_future);
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(chunk) => {
                        if batch.is_empty() {
                            flush_at = Some(Instant::now() + FLUSH_INTERVAL);
                        }
                        batch.push(chunk);
                        if batch.len() >= MAX_BATCH {
                            deliver(&*broker, &job_id, &agent, &lease, &mut batch, &mut fenced)
                                .await;
                            flush_at = None;
                        }
                    }
                    None => {
                        deliver(&*broker, &job_id, &agent, &lease, &mut batch, &mut fenced).await;
                        break;
                    }
                },
                _ = tokio::time::sleep_until(deadline) => {
                    deliver(&*broker, &job_id, &agent, &lease, &mut batch, &mut fenced).await;
                    flush_at = None;
                }
            }
        }
    })
}

/// Push one batch, retrying transport failures with capped exponential
/// backoff. The batch is consumed either way.
async fn deliver<B: Broker>(
    broker: &B,
    job_id: &JobId,
    agent: &AgentId,
    lease: &LeaseId,
    batch: &mut Vec<OutputChunk>,
    fenced: &mut bool,
) {
    if batch.is_empty() {
        return;
    }
    let chunks = std::mem::take(batch);
    if *fenced {
        debug!(job_id = %job_id, dropped = chunks.len(), "lease fenced, dropping output");
        return;
    }

    let count = chunks.len();
    let mut delay = BACKOFF_BASE;
    for attempt in 1..=MAX_DELIVERY_ATTEMPTS {
        match broker
            .append_output(job_id, agent, lease, chunks.clone())
            .await
        {
            Ok(()) => return,
            Err(BrokerError::Rejected(message)) => {
                warn!(job_id = %job_id, dropped = count, %message, "output batch fenced");
                *fenced = true;
                return;
            }
            Err(BrokerError::Transport(message)) if attempt < MAX_DELIVERY_ATTEMPTS => {
                debug!(job_id = %job_id, attempt, %message, "output delivery failed, retrying");
                let jitter = Duration::from_millis(rand::rng().random_range(0..=BACKOFF_JITTER_MS));
                tokio::time::sleep(delay + jitter).await;
                delay = (delay * 2).min(BACKOFF_CAP);
            }
            Err(BrokerError::Transport(message)) => {
                warn!(job_id = %job_id, dropped = count, %message, "output batch dropped");
                return;
            }
        }
    }
}

fn far_future() -> Instant {
    // Effectively "never"; tokio timers saturate rather than overflow
    Instant::now() + Duration::from_secs(86400 * 365 * 30)
}

#[cfg(test)]
#[path = "output_tests.rs"]
mod tests;
