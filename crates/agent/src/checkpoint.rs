// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable record of the job in flight, for crash recovery.
//!
//! Written before the first phase starts and rewritten at each phase
//! transition; removed after the job's terminal report. A checkpoint
//! found at startup means the previous process died mid-job.
//!
//! Write failures are logged but never propagate. An agent that cannot
//! persist its checkpoint still runs the job; the broker's lease sweep
//! covers the window a lost checkpoint would have covered.

use rig_core::{JobId, LeaseId, Phase, PhaseSpec};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Snapshot of the in-flight job, enough to report the failure and run
/// cleanup without re-entering any phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub job_id: JobId,
    pub queue: String,
    pub lease: LeaseId,
    /// Phase that was current when this snapshot was taken. None means
    /// the job was granted but no phase had been announced yet.
    #[serde(default)]
    pub phase: Option<Phase>,
    /// The job's cleanup spec, if it declared one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup: Option<PhaseSpec>,
    /// Working directory the job's phases ran in.
    pub workdir: PathBuf,
    /// Output-silence limit in seconds, applied to recovery cleanup.
    pub output_timeout: u64,
    /// Highest output sequence number assigned so far. Recovery prefers
    /// the broker's count; this is the fallback when the broker record
    /// cannot be fetched.
    pub last_seq: u64,
    pub updated_at_ms: u64,
}

/// Atomically replace the checkpoint file.
pub fn write_checkpoint(path: &Path, checkpoint: &Checkpoint) {
    let tmp_path = path.with_extension("json.tmp");

    let result = serde_json::to_string_pretty(checkpoint)
        .map_err(std::io::Error::other)
        .and_then(|json| {
            std::fs::write(&tmp_path, json.as_bytes())?;
            std::fs::rename(&tmp_path, path)
        });
    if let Err(e) = result {
        warn!(
            job_id = %checkpoint.job_id,
            phase = ?checkpoint.phase,
            error = %e,
            "failed to write checkpoint"
        );
    }
}

/// Read the checkpoint left by a previous process, if any.
///
/// A file that fails to parse is discarded with a warning; recovery
/// cannot act on a record it cannot read, and leaving it in place would
/// re-trip this path on every start.
pub fn load_checkpoint(path: &Path) -> Option<Checkpoint> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read checkpoint file");
            return None;
        }
    };
    match serde_json::from_str::<Checkpoint>(&content) {
        Ok(checkpoint) => Some(checkpoint),
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "discarding corrupt checkpoint file"
            );
            if let Err(e) = std::fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "failed to remove corrupt checkpoint");
            }
            None
        }
    }
}

/// Delete the checkpoint file once the job has been reported.
pub fn clear_checkpoint(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "failed to clear checkpoint");
        }
    }
}

#[cfg(test)]
#[path = "checkpoint_tests.rs"]
mod tests;
