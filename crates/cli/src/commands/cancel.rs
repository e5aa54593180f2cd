// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `rig cancel` - request job cancellation

use anyhow::Result;
use clap::Args;
use rig_core::CancelOutcome;
use rig_proto::BrokerClient;

#[derive(Args)]
pub struct CancelArgs {
    /// Job id (a unique prefix is enough)
    pub job: String,
}

pub async fn handle(args: CancelArgs, client: &BrokerClient) -> Result<()> {
    match client.cancel(&args.job).await? {
        CancelOutcome::Cancelled => println!("cancelled"),
        CancelOutcome::Requested => {
            println!("cancellation requested; the agent will stop the job")
        }
        CancelOutcome::AlreadyTerminal => println!("job is already finished"),
    }
    Ok(())
}
