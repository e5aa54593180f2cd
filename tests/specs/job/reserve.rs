// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Specs: allocate/reserve interactive holds.

use crate::prelude::*;

#[test]
fn allocate_is_visible_as_a_status() {
    let mut fleet = Fleet::start();
    fleet.spawn_agent("hold-1", &["pool-a"]);

    let doc = concat!(
        "job_queue: pool-a\n",
        "phases:\n",
        "  - phase: test\n",
        "    command: [\"sh\", \"-c\", \"echo tested\"]\n",
        "  - phase: allocate\n",
        "    command: [\"sh\", \"-c\", \"echo holding; sleep 2\"]\n",
    );
    let job = fleet.submit(doc);
    fleet.wait_status(&job, "allocated");
    fleet.wait_status(&job, "complete");
}

#[test]
fn reserve_window_is_exempt_from_the_global_clock() {
    let mut fleet = Fleet::start();
    fleet.spawn_agent("hold-2", &["pool-a"]);

    // The global deadline passes while the reservation holds; the
    // window still runs its full course and the job completes.
    let doc = concat!(
        "job_queue: pool-a\n",
        "global_timeout: 1\n",
        "phases:\n",
        "  - phase: test\n",
        "    command: [\"sh\", \"-c\", \"echo tested\"]\n",
        "  - phase: reserve\n",
        "    command: [\"sh\", \"-c\", \"echo reserved; sleep 30\"]\n",
        "    timeout: 3\n",
        "  - phase: cleanup\n",
        "    command: [\"sh\", \"-c\", \"echo cleanup-ran\"]\n",
    );
    let job = fleet.submit(doc);
    fleet.wait_status(&job, "complete");

    let status = fleet.status_of(&job);
    assert!(!status.contains("global timeout"), "{status}");
    fleet.wait_output(&job, "cleanup-ran");

    // The lapsed window reads as a phase timeout in the results but
    // never as a failure.
    let results = fleet.results_of(&job);
    let reserve = results
        .as_array()
        .expect("array")
        .iter()
        .find(|r| r["phase"] == "reserve")
        .expect("reserve result");
    assert_eq!(reserve["termination"]["kind"], "timed_out");
}

#[test]
fn cancel_during_reserve_releases_the_hold() {
    let mut fleet = Fleet::start_with("lease_ttl_secs = 3\n");
    fleet.spawn_agent("hold-3", &["pool-a"]);

    let doc = concat!(
        "job_queue: pool-a\n",
        "phases:\n",
        "  - phase: reserve\n",
        "    command: [\"sh\", \"-c\", \"echo reserved; sleep 60\"]\n",
        "    timeout: 30\n",
        "  - phase: cleanup\n",
        "    command: [\"sh\", \"-c\", \"echo cleanup-ran\"]\n",
    );
    let job = fleet.submit(doc);
    fleet.wait_output(&job, "reserved");

    // Releasing a reservation is a normal end of the hold: the job
    // walks on to cleanup and completes.
    fleet.rig().args(&["cancel", &job]).passes();
    fleet.wait_status(&job, "complete");
    fleet.wait_output(&job, "cleanup-ran");

    let results = fleet.results_of(&job);
    let reserve = &results.as_array().expect("array")[0];
    assert_eq!(reserve["termination"]["kind"], "cancelled");
}
