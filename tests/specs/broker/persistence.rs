// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Specs: store durability across broker crashes.
//!
//! SIGKILL skips the shutdown snapshot, so these runs land on the
//! journal-replay path.

use std::time::Duration;

use crate::prelude::*;

const WAITING_DOC: &str = concat!(
    "job_queue: pool-parked\n",
    "phases:\n",
    "  - phase: test\n",
    "    command: [\"sh\", \"-c\", \"echo parked\"]\n",
);

/// Acked writes ride a 10ms group commit; wait it out before killing.
fn settle() {
    std::thread::sleep(Duration::from_millis(300));
}

#[test]
fn waiting_jobs_survive_a_broker_crash() {
    let mut fleet = Fleet::start();
    let first = fleet.submit(WAITING_DOC);
    let second = fleet.submit(WAITING_DOC);

    settle();
    fleet.kill_broker();
    fleet.restart_broker();

    fleet.wait_status(&first, "waiting");
    fleet.wait_status(&second, "waiting");
    fleet
        .rig()
        .args(&["jobs"])
        .passes()
        .stdout_has(&first[..8])
        .stdout_has(&second[..8]);
}

#[test]
fn finished_jobs_keep_their_record_across_a_crash() {
    let mut fleet = Fleet::start();
    fleet.spawn_agent("dur-1", &["pool-a"]);

    let doc = concat!(
        "job_queue: pool-a\n",
        "phases:\n",
        "  - phase: test\n",
        "    command: [\"sh\", \"-c\", \"echo test-ran\"]\n",
    );
    let job = fleet.submit(doc);
    fleet.wait_status(&job, "complete");

    settle();
    fleet.kill_broker();
    fleet.restart_broker();

    fleet.wait_status(&job, "complete");
    fleet.wait_output(&job, "test-ran");
    let results = fleet.results_of(&job);
    assert_eq!(results.as_array().expect("array").len(), 1);
}

#[test]
fn cancelled_flag_survives_a_crash() {
    let mut fleet = Fleet::start();
    let job = fleet.submit(WAITING_DOC);
    fleet.rig().args(&["cancel", &job]).passes();

    settle();
    fleet.kill_broker();
    fleet.restart_broker();

    fleet.wait_status(&job, "cancelled");
}

#[test]
fn corrupt_snapshot_falls_back_to_journal_replay() {
    let mut fleet = Fleet::start();
    let job = fleet.submit(WAITING_DOC);

    settle();
    fleet.kill_broker();

    // Valid zstd stream, but the payload is not a snapshot.
    let garbage = zstd::encode_all("not a snapshot".as_bytes(), 3).unwrap();
    let snapshot = fleet.broker_state().join("snapshot.zst");
    std::fs::write(&snapshot, garbage).unwrap();

    fleet.restart_broker();

    // The journal alone rebuilt the queue; the bad file was set aside.
    // A fresh snapshot may already have replaced it, so only the .bak
    // is load-bearing here.
    fleet.wait_status(&job, "waiting");
    assert!(fleet.broker_state().join("snapshot.bak").exists());
}

#[test]
fn truncated_snapshot_is_set_aside_too() {
    let mut fleet = Fleet::start();
    let job = fleet.submit(WAITING_DOC);

    settle();
    fleet.kill_broker();

    // zstd magic followed by garbage.
    let snapshot = fleet.broker_state().join("snapshot.zst");
    std::fs::write(&snapshot, [0x28, 0xb5, 0x2f, 0xfd, 0xde, 0xad, 0xbe, 0xef]).unwrap();

    fleet.restart_broker();
    fleet.wait_status(&job, "waiting");
    assert!(fleet.broker_state().join("snapshot.bak").exists());
}
