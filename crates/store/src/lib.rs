// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Durable job queue store for Rig
//!
//! Every mutation is an [`rig_core::Event`] appended to a JSONL journal
//! before it is applied to the in-memory [`QueueState`]; periodic
//! snapshots bound replay time. [`JobStore`] is the synchronized wrapper
//! the broker talks to: one lock around validate, append, apply.

mod access;
mod journal;
mod snapshot;
mod state;
mod store;

pub use access::{token_digest, AccessPolicy, QueueRules};
pub use journal::{Journal, JournalEntry, JournalError};
pub use snapshot::{Snapshot, SnapshotError};
pub use state::QueueState;
pub use store::{JobStore, RenewAck, StartAck, StoreConfig, StoreError};
