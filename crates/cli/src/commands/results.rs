// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `rig results` - a job's phase results as JSON

use anyhow::Result;
use clap::Args;
use rig_proto::BrokerClient;

#[derive(Args)]
pub struct ResultsArgs {
    /// Job id (a unique prefix is enough)
    pub job: String,
}

pub async fn handle(args: ResultsArgs, client: &BrokerClient) -> Result<()> {
    let job = client.job(&args.job).await?;
    println!("{}", serde_json::to_string_pretty(&job.results)?);
    Ok(())
}
