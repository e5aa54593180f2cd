// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the broker.

use std::path::PathBuf;

use crate::lifecycle::LifecycleError;

/// Resolve state directory: RIG_STATE_DIR > XDG_STATE_HOME/rig > ~/.local/state/rig
pub fn state_dir() -> Result<PathBuf, LifecycleError> {
    if let Ok(dir) = std::env::var("RIG_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("rig"));
    }
    let home = std::env::var("HOME").map_err(|_| LifecycleError::NoStateDir)?;
    Ok(PathBuf::from(home).join(".local/state/rig"))
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
