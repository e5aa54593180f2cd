// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Specs: CLI error surfaces.
//!
//! Port 1 is never listening, so dial failures are instant; document
//! validation fires before any connection is attempted.

use crate::prelude::*;

#[test]
fn unreachable_broker_is_a_clean_error() {
    cli()
        .args(&["--broker", "127.0.0.1:1", "ping"])
        .fails()
        .stderr_has("Cannot reach broker at 127.0.0.1:1");
}

#[test]
fn submit_missing_file_names_the_path() {
    cli()
        .args(&["--broker", "127.0.0.1:1", "submit", "/nonexistent/rig-job.yaml"])
        .fails()
        .stderr_has("/nonexistent/rig-job.yaml");
}

#[test]
fn malformed_document_is_rejected_without_dialing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.yaml");
    std::fs::write(&path, "job_queue: [unclosed\n").unwrap();
    cli()
        .args(&["--broker", "127.0.0.1:1", "submit", path.to_str().unwrap()])
        .fails()
        .stderr_has("invalid job document");
}

#[test]
fn out_of_order_phases_are_rejected_client_side() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("backwards.yaml");
    std::fs::write(
        &path,
        concat!(
            "job_queue: pool-a\n",
            "phases:\n",
            "  - phase: test\n",
            "    command: [\"true\"]\n",
            "  - phase: provision\n",
            "    command: [\"true\"]\n",
        ),
    )
    .unwrap();
    // No broker is listening on port 1: a rejection proves the document
    // never left the client.
    cli()
        .args(&["--broker", "127.0.0.1:1", "submit", path.to_str().unwrap()])
        .fails()
        .stderr_has("may not follow");
}

#[test]
fn zero_global_timeout_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("zero.yaml");
    std::fs::write(
        &path,
        concat!(
            "job_queue: pool-a\n",
            "global_timeout: 0\n",
            "phases:\n",
            "  - phase: test\n",
            "    command: [\"true\"]\n",
        ),
    )
    .unwrap();
    cli()
        .args(&["--broker", "127.0.0.1:1", "submit", path.to_str().unwrap()])
        .fails()
        .stderr_has("global_timeout must be positive");
}

#[test]
fn status_of_an_unknown_job_fails() {
    let fleet = Fleet::start();
    fleet
        .rig()
        .args(&["status", "feedbeef"])
        .fails()
        .stderr_has("unknown job 'feedbeef'");
}

#[test]
fn cancel_of_an_unknown_job_fails() {
    let fleet = Fleet::start();
    fleet
        .rig()
        .args(&["cancel", "feedbeef"])
        .fails()
        .stderr_has("unknown job");
}
