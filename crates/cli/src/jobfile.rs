// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job document loading for `rig submit`.

use std::io::Read;

use anyhow::{Context, Result};
use rig_core::JobDoc;

/// Load and validate a job document. `-` reads stdin.
///
/// Validation here catches only what the client controls (document shape,
/// phase ordering). Queue access is the broker's call at submission time.
pub fn load(path: &str) -> Result<JobDoc> {
    let content = if path == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading job document from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path).with_context(|| format!("reading job document '{path}'"))?
    };
    parse(&content).with_context(|| format!("invalid job document '{path}'"))
}

/// Parse a YAML document. JSON parses too: every JSON document is valid YAML.
fn parse(content: &str) -> Result<JobDoc> {
    let doc: JobDoc = serde_yaml::from_str(content)?;
    doc.validate()?;
    Ok(doc)
}

#[cfg(test)]
#[path = "jobfile_tests.rs"]
mod tests;
