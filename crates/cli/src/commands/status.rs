// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `rig status` - one job's lifecycle state

use anyhow::Result;
use clap::Args;
use rig_core::{Clock, SystemClock};
use rig_proto::BrokerClient;

use crate::color;
use crate::time_fmt;

#[derive(Args)]
pub struct StatusArgs {
    /// Job id (a unique prefix is enough)
    pub job: String,
}

pub async fn handle(args: StatusArgs, client: &BrokerClient) -> Result<()> {
    let job = client.job(&args.job).await?;
    let now_ms = SystemClock.epoch_ms();

    println!("id:        {}", job.id);
    println!("queue:     {}", job.queue);
    println!("status:    {}", color::status(job.status.as_str()));
    if let Some(phase) = job.phase {
        println!("phase:     {}", phase);
    }
    println!("priority:  {}", job.priority);
    println!("attempts:  {}", job.attempts);
    println!(
        "submitted: {}",
        color::muted(&time_fmt::ago_ms(now_ms, job.submitted_at_ms))
    );
    if let Some(lease) = &job.lease {
        println!("agent:     {}", lease.agent);
    }
    if job.cancel_requested && !job.is_terminal() {
        println!("cancel:    requested");
    }
    if let Some(cause) = &job.cause {
        println!("cause:     {}", cause);
    }
    Ok(())
}
