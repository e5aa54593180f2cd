// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Specs: the three timeout layers.

use crate::prelude::*;

#[test]
fn phase_timeout_marks_the_job_and_still_cleans_up() {
    let mut fleet = Fleet::start();
    fleet.spawn_agent("timeo-1", &["pool-a"]);

    let doc = concat!(
        "job_queue: pool-a\n",
        "phases:\n",
        "  - phase: test\n",
        "    command: [\"sh\", \"-c\", \"echo test-started; sleep 30\"]\n",
        "    timeout: 1\n",
        "  - phase: cleanup\n",
        "    command: [\"sh\", \"-c\", \"echo cleanup-ran\"]\n",
    );
    let job = fleet.submit(doc);
    fleet.wait_status(&job, "timeout");

    let status = fleet.status_of(&job);
    assert!(status.contains("test phase timeout"), "{status}");
    fleet.wait_output(&job, "cleanup-ran");

    let results = fleet.results_of(&job);
    let test = &results.as_array().expect("array")[0];
    assert_eq!(test["termination"]["kind"], "timed_out");
    assert_eq!(test["termination"]["timeout"], "phase");
}

#[test]
fn output_silence_times_the_job_out() {
    let mut fleet = Fleet::start();
    fleet.spawn_agent("timeo-2", &["pool-a"]);

    let doc = concat!(
        "job_queue: pool-a\n",
        "output_timeout: 1\n",
        "phases:\n",
        "  - phase: test\n",
        "    command: [\"sh\", \"-c\", \"echo chatty; sleep 30\"]\n",
        "  - phase: cleanup\n",
        "    command: [\"sh\", \"-c\", \"echo cleanup-ran\"]\n",
    );
    let job = fleet.submit(doc);
    fleet.wait_status(&job, "timeout");

    let status = fleet.status_of(&job);
    assert!(
        status.contains("output timeout during test phase"),
        "{status}"
    );
    fleet.wait_output(&job, "cleanup-ran");

    let results = fleet.results_of(&job);
    let test = &results.as_array().expect("array")[0];
    assert_eq!(test["termination"]["timeout"], "silence");
}

#[test]
fn global_timeout_caps_the_whole_job() {
    let mut fleet = Fleet::start();
    fleet.spawn_agent("timeo-3", &["pool-a"]);

    let doc = concat!(
        "job_queue: pool-a\n",
        "global_timeout: 1\n",
        "phases:\n",
        "  - phase: setup\n",
        "    command: [\"sh\", \"-c\", \"echo setup-ran\"]\n",
        "  - phase: test\n",
        "    command: [\"sh\", \"-c\", \"echo test-started; sleep 30\"]\n",
        "  - phase: cleanup\n",
        "    command: [\"sh\", \"-c\", \"echo cleanup-ran\"]\n",
    );
    let job = fleet.submit(doc);
    fleet.wait_status(&job, "timeout");

    let status = fleet.status_of(&job);
    assert!(status.contains("global timeout"), "{status}");
    // Cleanup is exempt from the global clock.
    fleet.wait_output(&job, "cleanup-ran");

    let results = fleet.results_of(&job);
    let timed_out: Vec<&str> = results
        .as_array()
        .expect("array")
        .iter()
        .filter(|r| r["termination"]["timeout"] == "global")
        .map(|r| r["phase"].as_str().expect("phase"))
        .collect();
    assert_eq!(timed_out, ["test"]);
}
