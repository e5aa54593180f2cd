// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! rig-proto: wire protocol between the broker, agents, and the CLI
//!
//! Framed request/response types plus the one-shot TCP client used by
//! both `rig` and `rig-agent`.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod client;
pub mod protocol;

pub use client::{timeout_connect, timeout_ipc, BrokerClient, ClientError};
pub use protocol::{
    decode, encode, read_message, read_request, write_message, write_response, ProtocolError,
    Request, Response, DEFAULT_TIMEOUT, MAX_MESSAGE_SIZE, PROTOCOL_VERSION,
};
