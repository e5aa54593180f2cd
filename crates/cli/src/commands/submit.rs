// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `rig submit` - send a job document to the broker

use anyhow::Result;
use clap::Args;
use rig_core::JobStatus;
use rig_proto::BrokerClient;

use crate::exit_error::ExitError;
use crate::jobfile;

use super::output;

#[derive(Args)]
pub struct SubmitArgs {
    /// Job document (YAML or JSON), `-` for stdin
    pub file: String,

    /// Access token for a restricted queue
    #[arg(long)]
    pub token: Option<String>,

    /// Stream output until the job reaches a terminal status
    #[arg(long, short = 'f')]
    pub follow: bool,
}

pub async fn handle(args: SubmitArgs, client: &BrokerClient) -> Result<()> {
    let doc = jobfile::load(&args.file)?;
    let job_id = client.submit(&doc, args.token.as_deref()).await?;
    println!("{job_id}");

    if args.follow {
        let status = output::follow(client, job_id.as_str(), 0).await?;
        if status != JobStatus::Complete {
            // The stream already showed what went wrong; only the exit
            // code is left to deliver.
            return Err(ExitError::new(1).into());
        }
    }
    Ok(())
}
