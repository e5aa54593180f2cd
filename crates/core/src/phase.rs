// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Phase model: the fixed execution sequence and per-phase outcomes
//!
//! A job runs its declared phases in canonical order. CLEANUP is the only
//! phase guaranteed to run; everything after a failed non-best-effort
//! phase is skipped straight to it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One named step of a job's fixed execution sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Setup,
    Provision,
    FirmwareUpdate,
    Test,
    Allocate,
    Reserve,
    Cleanup,
}

impl Phase {
    /// Canonical execution order.
    pub const ALL: [Phase; 7] = [
        Phase::Setup,
        Phase::Provision,
        Phase::FirmwareUpdate,
        Phase::Test,
        Phase::Allocate,
        Phase::Reserve,
        Phase::Cleanup,
    ];

    /// Position in the canonical order; declared phase lists must be
    /// strictly ascending in this.
    pub fn ordinal(self) -> usize {
        match self {
            Phase::Setup => 0,
            Phase::Provision => 1,
            Phase::FirmwareUpdate => 2,
            Phase::Test => 3,
            Phase::Allocate => 4,
            Phase::Reserve => 5,
            Phase::Cleanup => 6,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Setup => "setup",
            Phase::Provision => "provision",
            Phase::FirmwareUpdate => "firmware_update",
            Phase::Test => "test",
            Phase::Allocate => "allocate",
            Phase::Reserve => "reserve",
            Phase::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase descriptor: what to run and how long it may take.
///
/// `command` is an argv array, never a shell string. `timeout` bounds the
/// phase's own wall time in seconds; the job-level global and
/// output-silence timers run independently of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSpec {
    pub phase: Phase,
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub best_effort: bool,
}

impl PhaseSpec {
    pub fn new(phase: Phase, command: Vec<String>) -> Self {
        Self {
            phase,
            command,
            timeout: None,
            best_effort: false,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Some(secs);
        self
    }

    pub fn best_effort(mut self) -> Self {
        self.best_effort = true;
        self
    }
}

/// Which watchdog fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutKind {
    /// Job-level deadline counted from job start, not phase start.
    Global,
    /// No output for longer than the job's output_timeout.
    Silence,
    /// The phase's own timeout.
    Phase,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimeoutKind::Global => "global",
            TimeoutKind::Silence => "silence",
            TimeoutKind::Phase => "phase",
        };
        f.write_str(s)
    }
}

/// How a phase's subprocess came to an end.
///
/// Exactly one of these wins even when triggers race; the executor
/// resolves the race before the result is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Termination {
    /// Process exited on its own.
    Exited,
    /// A watchdog fired and the process group was terminated.
    TimedOut { timeout: TimeoutKind },
    /// Cancellation was observed mid-phase.
    Cancelled,
    /// The command could not be launched at all.
    SpawnFailed,
}

/// Outcome of one phase execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub termination: Termination,
    /// Whether the grace period elapsed and the group had to be SIGKILLed.
    #[serde(default)]
    pub forced_kill: bool,
    #[serde(default)]
    pub best_effort: bool,
    pub started_at_ms: u64,
    pub finished_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl PhaseResult {
    /// Whether this result lets the job advance to the next phase.
    ///
    /// Timeouts and cancellation never pass here; the runner decides the
    /// reserve-release special case before consulting this.
    pub fn passed(&self) -> bool {
        match self.termination {
            Termination::Exited => self.exit_code == Some(0) || self.best_effort,
            Termination::SpawnFailed => self.best_effort,
            Termination::TimedOut { .. } | Termination::Cancelled => false,
        }
    }
}

#[cfg(test)]
#[path = "phase_tests.rs"]
mod tests;
