// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Specs: rig-agent process lifecycle.

use crate::prelude::*;

#[test]
fn help_describes_the_agent() {
    let dir = tempfile::tempdir().unwrap();
    let out = rig_agent_run(dir.path(), &["--help"]);
    assert!(out.status.success());
    let stdout = stdout_lossy(&out);
    assert!(stdout.contains("rig-agent"), "no name in:\n{stdout}");
    assert!(stdout.contains("agent.toml"), "no config hint in:\n{stdout}");
}

#[test]
fn version_flag_prints_version() {
    let dir = tempfile::tempdir().unwrap();
    let out = rig_agent_run(dir.path(), &["--version"]);
    assert!(out.status.success());
    assert!(stdout_lossy(&out).starts_with("rig-agent "));
}

#[test]
fn missing_config_is_a_startup_error() {
    let dir = tempfile::tempdir().unwrap();
    let out = rig_agent_run(dir.path(), &[]);
    assert!(!out.status.success());
    // The error names the file it wanted.
    assert!(stderr_lossy(&out).contains("agent.toml"));
}

#[test]
fn registers_with_the_broker() {
    let mut fleet = Fleet::start();
    fleet.spawn_agent("reg-1", &["pool-reg"]);
    fleet
        .rig()
        .args(&["agents"])
        .passes()
        .stdout_has("reg-1")
        .stdout_has("dut-reg-1")
        .stdout_has("pool-reg")
        .stdout_has("waiting");
}

#[test]
fn second_agent_on_the_same_state_dir_is_refused() {
    let mut fleet = Fleet::start();
    fleet.spawn_agent("dup-1", &["pool-dup"]);
    let out = rig_agent_run(fleet.agent_state("dup-1"), &[]);
    assert!(!out.status.success());
    assert!(stderr_lossy(&out).contains("rig-agent is already running"));
}
