// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI command implementations

pub mod agents;
pub mod cancel;
pub mod jobs;
pub mod output;
pub mod ping;
pub mod results;
pub mod status;
pub mod submit;
