// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Silent process-exit-code carrier.

use std::fmt;

/// An error that sets the process exit code without printing anything.
///
/// Used when the command has already said what happened on stdout and
/// only the exit code is left to deliver (e.g. `rig submit --follow`
/// after streaming a job that did not complete).
#[derive(Debug)]
pub struct ExitError {
    pub code: i32,
}

impl ExitError {
    pub fn new(code: i32) -> Self {
        Self { code }
    }
}

impl fmt::Display for ExitError {
    fn fmt(&self, _f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Intentionally empty: main() suppresses empty messages.
        Ok(())
    }
}

impl std::error::Error for ExitError {}
