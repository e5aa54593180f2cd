// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Specs: crash recovery from the local checkpoint.
//!
//! SIGKILL models a power cut: the phase subprocess is orphaned, not
//! reaped, so spec phases must terminate on their own.

use crate::prelude::*;

#[test]
fn killed_agent_reports_restart_and_cleans_up_once() {
    let mut fleet = Fleet::start();
    fleet.spawn_agent("crash-1", &["pool-a"]);

    let doc = concat!(
        "job_queue: pool-a\n",
        "phases:\n",
        "  - phase: setup\n",
        "    command: [\"sh\", \"-c\", \"echo setup-ran\"]\n",
        "  - phase: test\n",
        "    command: [\"sh\", \"-c\", \"echo test-started; sleep 15\"]\n",
        "  - phase: cleanup\n",
        "    command: [\"sh\", \"-c\", \"echo cleanup-ran\"]\n",
    );
    let job = fleet.submit(doc);
    fleet.wait_output(&job, "test-started");

    fleet.kill_agent("crash-1");
    fleet.restart_agent("crash-1");

    fleet.wait_status(&job, "error");
    let status = fleet.status_of(&job);
    assert!(status.contains("agent restart"), "missing cause:\n{status}");

    // Cleanup ran exactly once, and the interrupted phase was never
    // re-entered.
    fleet.wait_output(&job, "cleanup-ran");
    let output = fleet.output_of(&job);
    assert_eq!(output.matches("cleanup-ran").count(), 1, "{output}");
    assert_eq!(output.matches("test-started").count(), 1, "{output}");

    // The interrupted phase never produced a result; recovery's cleanup
    // did.
    let results = fleet.results_of(&job);
    let phases: Vec<&str> = results
        .as_array()
        .expect("array")
        .iter()
        .map(|r| r["phase"].as_str().expect("phase"))
        .collect();
    assert_eq!(phases, ["setup", "cleanup"]);

    // The settled checkpoint is gone.
    let checkpoint = fleet.agent_state("crash-1").join("checkpoint.json");
    assert!(
        wait_for(SPEC_WAIT_MAX_MS, || !checkpoint.exists()),
        "checkpoint survived recovery"
    );
}

#[test]
fn recovered_agent_serves_new_work() {
    let mut fleet = Fleet::start();
    fleet.spawn_agent("crash-2", &["pool-b"]);

    let doc = concat!(
        "job_queue: pool-b\n",
        "phases:\n",
        "  - phase: test\n",
        "    command: [\"sh\", \"-c\", \"echo first-started; sleep 15\"]\n",
        "  - phase: cleanup\n",
        "    command: [\"sh\", \"-c\", \"echo cleanup-ran\"]\n",
    );
    let first = fleet.submit(doc);
    fleet.wait_output(&first, "first-started");

    fleet.kill_agent("crash-2");
    fleet.restart_agent("crash-2");
    fleet.wait_status(&first, "error");

    // Polling resumed after recovery settled.
    let quick = concat!(
        "job_queue: pool-b\n",
        "phases:\n",
        "  - phase: test\n",
        "    command: [\"sh\", \"-c\", \"echo second-ran\"]\n",
    );
    let second = fleet.submit(quick);
    fleet.wait_status(&second, "complete");
    fleet.wait_output(&second, "second-ran");
}

#[test]
fn clean_restart_has_nothing_to_recover() {
    let mut fleet = Fleet::start();
    fleet.spawn_agent("crash-3", &["pool-c"]);

    let doc = concat!(
        "job_queue: pool-c\n",
        "phases:\n",
        "  - phase: test\n",
        "    command: [\"sh\", \"-c\", \"echo done-ran\"]\n",
    );
    let job = fleet.submit(doc);
    fleet.wait_status(&job, "complete");

    // The checkpoint was cleared when the job finished; a restart finds
    // nothing and the job's record is untouched.
    fleet.kill_agent("crash-3");
    fleet.restart_agent("crash-3");

    let registered = wait_for(SPEC_WAIT_MAX_MS, || {
        fleet
            .rig()
            .args(&["agents"])
            .stdout_of()
            .contains("crash-3")
    });
    assert!(registered, "restarted agent never re-registered");
    fleet.wait_status(&job, "complete");
    let status = fleet.status_of(&job);
    assert!(!status.contains("agent restart"), "{status}");
}
