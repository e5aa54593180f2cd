// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Queue access rules and connector phase synthesis
//!
//! Queues come in two flavors. An undeclared queue is open: it springs
//! into existence on first submit and anyone may use it. A queue declared
//! in broker config may be restricted to holders of an allow-listed
//! bearer token, and may name a device connector the broker uses to build
//! a phase list for submissions that only carry data sections.

use rig_core::{JobDoc, Phase, PhaseSpec, SubmissionError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

// Default per-phase timeouts for synthesized phase lists, in seconds.
// TEST gets none: its bound is the job-level pair of watchdogs.
const SETUP_TIMEOUT_SECS: u64 = 600;
const PROVISION_TIMEOUT_SECS: u64 = 3_600;
const FIRMWARE_UPDATE_TIMEOUT_SECS: u64 = 1_800;
const ALLOCATE_TIMEOUT_SECS: u64 = 300;
const CLEANUP_TIMEOUT_SECS: u64 = 600;

/// Per-queue configuration as declared in broker config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueRules {
    /// Restricted queues refuse submissions without an allow-listed token.
    #[serde(default)]
    pub restricted: bool,
    /// SHA-256 hex digests of accepted bearer tokens. Config never holds
    /// the tokens themselves.
    #[serde(default)]
    pub tokens: Vec<String>,
    /// Device connector executable for phase synthesis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector: Option<String>,
    /// Config file path passed to the connector as `--config`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector_config: Option<String>,
}

/// All declared queues, keyed by queue name.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    queues: HashMap<String, QueueRules>,
}

impl AccessPolicy {
    pub fn new(queues: HashMap<String, QueueRules>) -> Self {
        Self { queues }
    }

    pub fn rules(&self, queue: &str) -> Option<&QueueRules> {
        self.queues.get(queue)
    }

    /// Check whether `token` may submit to `queue`.
    ///
    /// Runs before any document validation; a rejected submission must
    /// leave no trace, so this is the first gate.
    pub fn authorize(&self, queue: &str, token: Option<&str>) -> Result<(), SubmissionError> {
        let Some(rules) = self.queues.get(queue) else {
            // Undeclared queues are open
            return Ok(());
        };
        if !rules.restricted {
            return Ok(());
        }
        let allowed = token
            .map(|t| rules.tokens.iter().any(|d| *d == token_digest(t)))
            .unwrap_or(false);
        if allowed {
            Ok(())
        } else {
            Err(SubmissionError::RestrictedQueue {
                queue: queue.to_string(),
            })
        }
    }
}

/// SHA-256 hex digest of a bearer token, as stored in queue allow-lists.
pub fn token_digest(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    format!("{:x}", digest)
}

/// Resolve the phase list for a validated submission document.
///
/// An explicit `phases` list wins as-is. Otherwise the queue's connector
/// builds one from the document's data sections: SETUP and CLEANUP always
/// run, PROVISION / FIRMWARE_UPDATE / TEST run iff their data section is
/// present, and `reserve_data` adds the ALLOCATE + RESERVE pair with the
/// requested hold window as the RESERVE timeout. A document with neither
/// phases nor a connector-bearing queue is rejected.
pub fn build_phases(
    doc: &JobDoc,
    rules: Option<&QueueRules>,
) -> Result<Vec<PhaseSpec>, SubmissionError> {
    if !doc.phases.is_empty() {
        return Ok(doc.phases.clone());
    }

    let Some(connector) = rules.and_then(|r| r.connector.as_deref()) else {
        return Err(SubmissionError::NoPhases {
            queue: doc.job_queue.clone(),
        });
    };
    let config = rules.and_then(|r| r.connector_config.as_deref());
    let spec = |phase: Phase| PhaseSpec::new(phase, connector_command(connector, config, phase));

    let mut phases = vec![spec(Phase::Setup).with_timeout(SETUP_TIMEOUT_SECS)];
    if doc.provision_data.is_some() {
        phases.push(spec(Phase::Provision).with_timeout(PROVISION_TIMEOUT_SECS));
    }
    if doc.firmware_update_data.is_some() {
        phases.push(spec(Phase::FirmwareUpdate).with_timeout(FIRMWARE_UPDATE_TIMEOUT_SECS));
    }
    if doc.test_data.is_some() {
        phases.push(spec(Phase::Test));
    }
    if let Some(reserve) = &doc.reserve_data {
        phases.push(spec(Phase::Allocate).with_timeout(ALLOCATE_TIMEOUT_SECS));
        phases.push(spec(Phase::Reserve).with_timeout(reserve.timeout));
    }
    phases.push(
        spec(Phase::Cleanup)
            .with_timeout(CLEANUP_TIMEOUT_SECS)
            .best_effort(),
    );

    Ok(phases)
}

/// Connector invocation for one phase. The agent materializes the job
/// document next to the process as `job.json`.
fn connector_command(connector: &str, config: Option<&str>, phase: Phase) -> Vec<String> {
    let mut argv = vec![connector.to_string(), phase.as_str().to_string()];
    if let Some(cfg) = config {
        argv.push("--config".to_string());
        argv.push(cfg.to_string());
    }
    argv.push("job.json".to_string());
    argv
}

#[cfg(test)]
#[path = "access_tests.rs"]
mod tests;
