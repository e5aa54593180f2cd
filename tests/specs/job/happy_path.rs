// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Specs: the full phase walk on a healthy device.

use crate::prelude::*;

const HAPPY_DOC: &str = concat!(
    "job_queue: pool-a\n",
    "phases:\n",
    "  - phase: setup\n",
    "    command: [\"sh\", \"-c\", \"echo setup-ran\"]\n",
    "  - phase: provision\n",
    "    command: [\"sh\", \"-c\", \"echo provision-ran\"]\n",
    "  - phase: test\n",
    "    command: [\"sh\", \"-c\", \"echo test-ran\"]\n",
    "  - phase: cleanup\n",
    "    command: [\"sh\", \"-c\", \"echo cleanup-ran\"]\n",
);

#[test]
fn walks_every_phase_in_order_and_completes() {
    let mut fleet = Fleet::start();
    fleet.spawn_agent("happy-1", &["pool-a"]);

    let job = fleet.submit(HAPPY_DOC);
    fleet.wait_status(&job, "complete");

    let output = fleet.output_of(&job);
    let setup = output.find("setup-ran").expect("setup output");
    let provision = output.find("provision-ran").expect("provision output");
    let test = output.find("test-ran").expect("test output");
    let cleanup = output.find("cleanup-ran").expect("cleanup output");
    assert!(
        setup < provision && provision < test && test < cleanup,
        "phases ran out of order:\n{output}"
    );
}

#[test]
fn results_record_every_phase() {
    let mut fleet = Fleet::start();
    fleet.spawn_agent("happy-2", &["pool-a"]);

    let job = fleet.submit(HAPPY_DOC);
    fleet.wait_status(&job, "complete");

    let results = fleet.results_of(&job);
    let phases: Vec<&str> = results
        .as_array()
        .expect("array")
        .iter()
        .map(|r| r["phase"].as_str().expect("phase"))
        .collect();
    assert_eq!(phases, ["setup", "provision", "test", "cleanup"]);
    for result in results.as_array().expect("array") {
        assert_eq!(result["termination"]["kind"], "exited");
        assert_eq!(result["exit_code"], 0);
        assert_eq!(result["forced_kill"], false);
    }
}

#[test]
fn phase_commands_see_the_job_environment() {
    let mut fleet = Fleet::start();
    fleet.spawn_agent("happy-3", &["pool-env"]);

    let doc = concat!(
        "job_queue: pool-env\n",
        "phases:\n",
        "  - phase: test\n",
        "    command: [\"sh\", \"-c\", \"env | grep ^RIG_ | sort\"]\n",
    );
    let job = fleet.submit(doc);
    fleet.wait_status(&job, "complete");

    let output = fleet.output_of(&job);
    assert!(output.contains(&format!("RIG_JOB_ID={job}")), "{output}");
    assert!(output.contains("RIG_AGENT_ID=happy-3"), "{output}");
    assert!(output.contains("RIG_DEVICE_ID=dut-happy-3"), "{output}");
    assert!(output.contains("RIG_QUEUE=pool-env"), "{output}");
    assert!(output.contains("RIG_PHASE=test"), "{output}");
}

#[test]
fn listing_shows_the_finished_job() {
    let mut fleet = Fleet::start();
    fleet.spawn_agent("happy-4", &["pool-a"]);

    let job = fleet.submit(HAPPY_DOC);
    fleet.wait_status(&job, "complete");

    fleet
        .rig()
        .args(&["jobs"])
        .passes()
        .stdout_has(&job[..8])
        .stdout_has("pool-a")
        .stdout_has("complete")
        .stdout_has("happy-4");
}

#[test]
fn submit_follow_streams_and_exits_clean() {
    let mut fleet = Fleet::start();
    fleet.spawn_agent("happy-5", &["pool-a"]);

    let path = fleet.write_doc(HAPPY_DOC);
    fleet
        .rig()
        .args(&["submit", path.to_str().unwrap(), "--follow"])
        .passes()
        .stdout_has("setup-ran")
        .stdout_has("cleanup-ran");
}

#[test]
fn submit_follow_reports_a_failing_job_in_its_exit_code() {
    let mut fleet = Fleet::start();
    fleet.spawn_agent("happy-6", &["pool-a"]);

    let doc = concat!(
        "job_queue: pool-a\n",
        "phases:\n",
        "  - phase: test\n",
        "    command: [\"sh\", \"-c\", \"echo doomed; exit 3\"]\n",
    );
    let path = fleet.write_doc(doc);
    fleet
        .rig()
        .args(&["submit", path.to_str().unwrap(), "--follow"])
        .fails()
        .stdout_has("doomed");
}

#[test]
fn stdin_submission_reads_the_dash() {
    let mut fleet = Fleet::start();
    fleet.spawn_agent("happy-7", &["pool-a"]);

    let doc = concat!(
        "job_queue: pool-a\n",
        "phases:\n",
        "  - phase: test\n",
        "    command: [\"sh\", \"-c\", \"echo from-stdin\"]\n",
    );
    let job = fleet
        .rig()
        .args(&["submit", "-"])
        .stdin(doc)
        .passes()
        .stdout()
        .trim()
        .to_string();
    fleet.wait_status(&job, "complete");
    fleet.wait_output(&job, "from-stdin");
}

#[test]
fn output_from_resumes_after_a_sequence_number() {
    let mut fleet = Fleet::start();
    fleet.spawn_agent("happy-8", &["pool-a"]);

    let doc = concat!(
        "job_queue: pool-a\n",
        "phases:\n",
        "  - phase: setup\n",
        "    command: [\"sh\", \"-c\", \"echo early-line\"]\n",
        "  - phase: test\n",
        "    command: [\"sh\", \"-c\", \"sleep 1; echo late-line\"]\n",
    );
    let job = fleet.submit(doc);
    fleet.wait_status(&job, "complete");

    // Everything from the start.
    fleet
        .rig()
        .args(&["output", &job])
        .passes()
        .stdout_has("early-line")
        .stdout_has("late-line");
    // A high --from cursor skips what came before it.
    fleet
        .rig()
        .args(&["output", &job, "--from", "1000000"])
        .passes()
        .stdout_lacks("early-line");
}
