// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Specs: failing phases, the skip-to-cleanup rule, best-effort.

use crate::prelude::*;

#[test]
fn failing_phase_skips_ahead_to_cleanup() {
    let mut fleet = Fleet::start();
    fleet.spawn_agent("fail-1", &["pool-a"]);

    let doc = concat!(
        "job_queue: pool-a\n",
        "phases:\n",
        "  - phase: setup\n",
        "    command: [\"sh\", \"-c\", \"echo setup-ran\"]\n",
        "  - phase: provision\n",
        "    command: [\"sh\", \"-c\", \"echo provision-ran; exit 7\"]\n",
        "  - phase: test\n",
        "    command: [\"sh\", \"-c\", \"echo never-ran\"]\n",
        "  - phase: cleanup\n",
        "    command: [\"sh\", \"-c\", \"echo cleanup-ran\"]\n",
    );
    let job = fleet.submit(doc);
    fleet.wait_status(&job, "error");

    let status = fleet.status_of(&job);
    assert!(
        status.contains("provision phase failed (exit code 7)"),
        "missing cause:\n{status}"
    );

    let output = fleet.output_of(&job);
    assert!(output.contains("provision-ran"), "{output}");
    assert!(output.contains("cleanup-ran"), "{output}");
    assert!(!output.contains("never-ran"), "test phase ran:\n{output}");

    let results = fleet.results_of(&job);
    let phases: Vec<&str> = results
        .as_array()
        .expect("array")
        .iter()
        .map(|r| r["phase"].as_str().expect("phase"))
        .collect();
    assert_eq!(phases, ["setup", "provision", "cleanup"]);
}

#[test]
fn best_effort_failure_keeps_walking() {
    let mut fleet = Fleet::start();
    fleet.spawn_agent("fail-2", &["pool-a"]);

    let doc = concat!(
        "job_queue: pool-a\n",
        "phases:\n",
        "  - phase: provision\n",
        "    command: [\"sh\", \"-c\", \"echo provision-ran; exit 1\"]\n",
        "    best_effort: true\n",
        "  - phase: test\n",
        "    command: [\"sh\", \"-c\", \"echo test-ran\"]\n",
    );
    let job = fleet.submit(doc);
    fleet.wait_status(&job, "complete");

    fleet.wait_output(&job, "test-ran");
    let results = fleet.results_of(&job);
    let provision = &results.as_array().expect("array")[0];
    assert_eq!(provision["phase"], "provision");
    assert_eq!(provision["exit_code"], 1);
    assert_eq!(provision["best_effort"], true);
}

#[test]
fn cleanup_failure_does_not_change_the_verdict() {
    let mut fleet = Fleet::start();
    fleet.spawn_agent("fail-3", &["pool-a"]);

    // Cleanup is best-effort by nature: its failure is recorded in the
    // results but the walk's verdict stands.
    let doc = concat!(
        "job_queue: pool-a\n",
        "phases:\n",
        "  - phase: test\n",
        "    command: [\"sh\", \"-c\", \"echo test-ran\"]\n",
        "  - phase: cleanup\n",
        "    command: [\"sh\", \"-c\", \"exit 2\"]\n",
    );
    let job = fleet.submit(doc);
    fleet.wait_status(&job, "complete");

    let results = fleet.results_of(&job);
    let cleanup = &results.as_array().expect("array")[1];
    assert_eq!(cleanup["phase"], "cleanup");
    assert_eq!(cleanup["exit_code"], 2);
}

#[test]
fn forced_kill_is_recorded_when_term_is_ignored() {
    let mut fleet = Fleet::start();
    fleet.spawn_agent("fail-4", &["pool-a"]);

    // The trap swallows SIGTERM in the shell; the first sleep dies with
    // the group signal and the second keeps the shell alive until the
    // grace period expires and SIGKILL lands.
    let doc = concat!(
        "job_queue: pool-a\n",
        "phases:\n",
        "  - phase: test\n",
        "    command: [\"sh\", \"-c\", \"trap '' TERM; echo armored; sleep 30; sleep 30\"]\n",
        "    timeout: 1\n",
    );
    let job = fleet.submit(doc);
    fleet.wait_status(&job, "timeout");

    let results = fleet.results_of(&job);
    let test = &results.as_array().expect("array")[0];
    assert_eq!(test["phase"], "test");
    assert_eq!(test["termination"]["kind"], "timed_out");
    assert_eq!(test["forced_kill"], true);
}
