// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Specs: rigd process lifecycle.

use crate::prelude::*;

#[test]
fn help_describes_the_daemon() {
    let dir = tempfile::tempdir().unwrap();
    let out = rigd_run(dir.path(), &["--help"]);
    assert!(out.status.success());
    let stdout = stdout_lossy(&out);
    assert!(stdout.contains("rigd"), "no name in:\n{stdout}");
    assert!(stdout.contains("broker.toml"), "no config hint in:\n{stdout}");
    assert!(stdout.contains("broker.addr"), "no addr-file hint in:\n{stdout}");
}

#[test]
fn version_flag_prints_version() {
    let dir = tempfile::tempdir().unwrap();
    let out = rigd_run(dir.path(), &["--version"]);
    assert!(out.status.success());
    assert!(stdout_lossy(&out).starts_with("rigd "));
}

#[test]
fn unexpected_argument_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let out = rigd_run(dir.path(), &["--frobnicate"]);
    assert!(!out.status.success());
    let stderr = stderr_lossy(&out);
    assert!(stderr.contains("unexpected argument '--frobnicate'"));
    assert!(stderr.contains("Usage: rigd"));
}

#[test]
fn publishes_its_address_and_answers_ping() {
    let fleet = Fleet::start();
    assert!(
        fleet.addr.starts_with("127.0.0.1:"),
        "unexpected addr '{}'",
        fleet.addr
    );
    // The ephemeral port was actually bound, not the config literal.
    assert!(!fleet.addr.ends_with(":0"));
    fleet.rig().args(&["ping"]).passes().stdout_has("broker ");
}

#[test]
fn fresh_broker_has_no_jobs_or_agents() {
    let fleet = Fleet::start();
    fleet.rig().args(&["jobs"]).passes().stdout_has("No jobs");
    fleet.rig().args(&["agents"]).passes().stdout_has("No agents");
}

#[test]
fn second_broker_on_the_same_state_dir_is_refused() {
    let fleet = Fleet::start();
    let out = rigd_run(fleet.broker_state(), &[]);
    assert!(!out.status.success());
    assert!(stderr_lossy(&out).contains("rigd is already running"));
}
