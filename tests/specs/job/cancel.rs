// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Specs: cancellation before and during dispatch.

use crate::prelude::*;

#[test]
fn waiting_job_cancels_outright() {
    let fleet = Fleet::start();

    let doc = concat!(
        "job_queue: pool-idle\n",
        "phases:\n",
        "  - phase: test\n",
        "    command: [\"sh\", \"-c\", \"echo never\"]\n",
    );
    let job = fleet.submit(doc);

    // No agent serves pool-idle, so the job is still waiting.
    fleet
        .rig()
        .args(&["cancel", &job])
        .passes()
        .stdout_has("cancelled");
    fleet.wait_status(&job, "cancelled");

    // A second cancel is a no-op.
    fleet
        .rig()
        .args(&["cancel", &job])
        .passes()
        .stdout_has("job is already finished");
}

#[test]
fn running_job_stops_and_cleans_up() {
    // A short lease TTL makes the heartbeat renew (and hear about the
    // cancel) within about a second.
    let mut fleet = Fleet::start_with("lease_ttl_secs = 3\n");
    fleet.spawn_agent("cancel-1", &["pool-a"]);

    let doc = concat!(
        "job_queue: pool-a\n",
        "phases:\n",
        "  - phase: test\n",
        "    command: [\"sh\", \"-c\", \"echo test-started; sleep 30\"]\n",
        "  - phase: cleanup\n",
        "    command: [\"sh\", \"-c\", \"echo cleanup-ran\"]\n",
    );
    let job = fleet.submit(doc);
    fleet.wait_output(&job, "test-started");

    fleet
        .rig()
        .args(&["cancel", &job])
        .passes()
        .stdout_has("cancellation requested");
    fleet.wait_status(&job, "cancelled");

    fleet.wait_output(&job, "cleanup-ran");
    let results = fleet.results_of(&job);
    let test = &results.as_array().expect("array")[0];
    assert_eq!(test["phase"], "test");
    assert_eq!(test["termination"]["kind"], "cancelled");
}

#[test]
fn cancel_before_any_phase_starts_skips_to_cleanup() {
    let mut fleet = Fleet::start_with("lease_ttl_secs = 3\n");
    fleet.spawn_agent("cancel-2", &["pool-a"]);

    let doc = concat!(
        "job_queue: pool-a\n",
        "phases:\n",
        "  - phase: setup\n",
        "    command: [\"sh\", \"-c\", \"echo setup-started; sleep 30\"]\n",
        "  - phase: test\n",
        "    command: [\"sh\", \"-c\", \"echo never-ran\"]\n",
        "  - phase: cleanup\n",
        "    command: [\"sh\", \"-c\", \"echo cleanup-ran\"]\n",
    );
    let job = fleet.submit(doc);
    fleet.wait_output(&job, "setup-started");

    fleet.rig().args(&["cancel", &job]).passes();
    fleet.wait_status(&job, "cancelled");

    let output = fleet.output_of(&job);
    assert!(output.contains("cleanup-ran"), "{output}");
    assert!(!output.contains("never-ran"), "test phase ran:\n{output}");
}
