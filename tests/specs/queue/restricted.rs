// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Specs: restricted queues and bearer tokens.

use crate::prelude::*;

// sha256 of "hunter2"; broker.toml stores digests, never raw tokens.
const SECURE_RULES: &str = concat!(
    "[queues.secure]\n",
    "restricted = true\n",
    "tokens = [\"f52fbd32b2b3b86ff88ef6c490628285f482af15ddcb29541f94bcf526a3f6c7\"]\n",
);

const SECURE_DOC: &str = concat!(
    "job_queue: secure\n",
    "phases:\n",
    "  - phase: test\n",
    "    command: [\"sh\", \"-c\", \"echo secret-ran\"]\n",
);

#[test]
fn submission_without_a_token_is_refused() {
    let fleet = Fleet::start_with(SECURE_RULES);
    let path = fleet.write_doc(SECURE_DOC);
    fleet
        .rig()
        .args(&["submit", path.to_str().unwrap()])
        .fails()
        .stderr_has("queue 'secure' is restricted");
}

#[test]
fn wrong_token_is_refused() {
    let fleet = Fleet::start_with(SECURE_RULES);
    let path = fleet.write_doc(SECURE_DOC);
    fleet
        .rig()
        .args(&["submit", path.to_str().unwrap(), "--token", "wordpass"])
        .fails()
        .stderr_has("restricted");
}

#[test]
fn allow_listed_token_is_accepted() {
    let fleet = Fleet::start_with(SECURE_RULES);
    let job = fleet.submit_with(SECURE_DOC, &["--token", "hunter2"]);
    fleet.wait_status(&job, "waiting");
}

#[test]
fn token_gated_job_runs_like_any_other() {
    let mut fleet = Fleet::start_with(SECURE_RULES);
    fleet.spawn_agent("sec-1", &["secure"]);
    let job = fleet.submit_with(SECURE_DOC, &["--token", "hunter2"]);
    fleet.wait_status(&job, "complete");
    fleet.wait_output(&job, "secret-ran");
}

#[test]
fn open_queues_ignore_tokens() {
    let fleet = Fleet::start_with(SECURE_RULES);
    let doc = concat!(
        "job_queue: pool-open\n",
        "phases:\n",
        "  - phase: test\n",
        "    command: [\"sh\", \"-c\", \"echo open-ran\"]\n",
    );
    let job = fleet.submit_with(doc, &["--token", "anything-goes"]);
    fleet.wait_status(&job, "waiting");
    assert!(!job.is_empty());
}
