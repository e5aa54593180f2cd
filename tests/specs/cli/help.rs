// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Specs: top-level CLI surface.

use crate::prelude::*;

#[test]
fn bare_invocation_prints_help() {
    cli()
        .passes()
        .stdout_has("Usage: rig")
        .stdout_has("submit")
        .stdout_has("status")
        .stdout_has("output")
        .stdout_has("cancel")
        .stdout_has("results")
        .stdout_has("jobs")
        .stdout_has("agents")
        .stdout_has("ping");
}

#[test]
fn help_flag_prints_help() {
    cli()
        .args(&["--help"])
        .passes()
        .stdout_has("Usage: rig")
        .stdout_has("--broker");
}

#[test]
fn version_flag_prints_version() {
    cli().args(&["--version"]).passes().stdout_has("rig ");
}

#[test]
fn subcommand_help_shows_its_flags() {
    cli()
        .args(&["submit", "--help"])
        .passes()
        .stdout_has("--token")
        .stdout_has("--follow");
}

#[test]
fn unknown_subcommand_is_rejected() {
    cli()
        .args(&["conjure"])
        .fails()
        .stderr_has("unrecognized subcommand");
}

#[test]
fn submit_requires_a_document_argument() {
    cli().args(&["submit"]).fails().stderr_has("required");
}
