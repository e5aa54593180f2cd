// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent identity and broker-side presence

use crate::job::JobId;
use serde::{Deserialize, Serialize};
use std::fmt;

crate::define_id! {
    /// Stable identifier an agent presents to the broker.
    ///
    /// Comes from the agent's config file, one per physical or virtual
    /// test target; the format is opaque to the broker.
    pub struct AgentId;
}

/// What an agent is doing right now, as last reported to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Polling for work.
    Waiting,
    /// Holds a lease, no phase started yet.
    Leased,
    /// Executing job phases.
    Running,
    /// Reconciling a checkpoint left by a crash.
    Recovering,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentState::Waiting => "waiting",
            AgentState::Leased => "leased",
            AgentState::Running => "running",
            AgentState::Recovering => "recovering",
        };
        f.write_str(s)
    }
}

/// Broker-side presence record for one agent.
///
/// Rebuilt from live traffic; never journaled. A broker restart forgets
/// agents until their next poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: AgentId,
    /// Identity of the test target this agent drives, injected into
    /// phase environments as RIG_DEVICE_ID.
    pub device: String,
    pub queues: Vec<String>,
    pub state: AgentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<JobId>,
    pub last_seen_ms: u64,
}
