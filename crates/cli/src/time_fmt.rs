// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Human-readable elapsed-time formatting for list views.

/// Format seconds as a short human-readable duration: `"5s"`, `"2m"`, `"1h30m"`, `"3d"`.
///
/// For the hours range, minutes are included when non-zero (e.g. `"1h"` vs `"1h5m"`).
pub fn format_elapsed(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86400 {
        let h = secs / 3600;
        let m = (secs % 3600) / 60;
        if m > 0 {
            format!("{}h{}m", h, m)
        } else {
            format!("{}h", h)
        }
    } else {
        format!("{}d", secs / 86400)
    }
}

/// Elapsed time between two epoch-millisecond stamps, as a short duration.
///
/// Clamps to zero when the clocks disagree and `then_ms` is ahead of `now_ms`.
pub fn elapsed_ms(now_ms: u64, then_ms: u64) -> String {
    format_elapsed(now_ms.saturating_sub(then_ms) / 1000)
}

/// Relative "how long ago" cell: `"5s ago"`, or `"-"` when `then_ms` is unset.
pub fn ago_ms(now_ms: u64, then_ms: u64) -> String {
    if then_ms == 0 {
        return "-".to_string();
    }
    format!("{} ago", elapsed_ms(now_ms, then_ms))
}

#[cfg(test)]
#[path = "time_fmt_tests.rs"]
mod tests;
