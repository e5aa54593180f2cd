// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the CLI crate.

/// Fallback broker address when neither `--broker` nor `RIG_BROKER` is set.
pub const DEFAULT_BROKER: &str = "127.0.0.1:7581";

// --- Broker address ---

/// Resolve the broker address: `--broker` flag > `RIG_BROKER` > default.
pub fn broker_addr(flag: Option<String>) -> String {
    if let Some(addr) = flag {
        return addr;
    }
    if let Some(addr) = std::env::var("RIG_BROKER").ok().filter(|s| !s.is_empty()) {
        return addr;
    }
    DEFAULT_BROKER.to_string()
}

// --- Color ---

pub fn no_color() -> bool {
    std::env::var("NO_COLOR").is_ok_and(|v| v == "1")
}

pub fn force_color() -> bool {
    std::env::var("COLOR").is_ok_and(|v| v == "1")
}
