// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! rig-core: Core library for the Rig test-fleet orchestrator
//!
//! Data model shared by the broker, the per-device agents, and the CLI:
//! job and phase records, leases, journal events, and the small
//! abstractions (clock, id generation) that keep the rest testable.

pub mod agent;
pub mod clock;
pub mod duration;
pub mod event;
pub mod id;
pub mod job;
pub mod phase;

pub use agent::{AgentId, AgentRecord, AgentState};
pub use clock::{Clock, FakeClock, SystemClock};
pub use duration::parse_duration;
pub use event::Event;
pub use id::{IdGen, SequentialIdGen, UuidIdGen};
pub use job::{
    validate_phase_list, CancelOutcome, Job, JobDoc, JobId, JobStatus, JobSummary, Lease, LeaseId,
    OutputChunk, OutputSpan, ReserveData, SubmissionError, DEFAULT_GLOBAL_TIMEOUT_SECS,
    DEFAULT_OUTPUT_TIMEOUT_SECS, DEFAULT_PRIORITY,
};
pub use phase::{Phase, PhaseResult, PhaseSpec, Termination, TimeoutKind};
