// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `rig jobs` - list jobs

use anyhow::Result;
use clap::Args;
use rig_core::{Clock, SystemClock};
use rig_proto::BrokerClient;

use crate::table::{Column, Table};
use crate::time_fmt;

#[derive(Args)]
pub struct JobsArgs {
    /// Only jobs on this queue
    #[arg(long)]
    pub queue: Option<String>,
}

pub async fn handle(args: JobsArgs, client: &BrokerClient) -> Result<()> {
    let jobs = client.jobs(args.queue.as_deref()).await?;
    if jobs.is_empty() {
        println!("No jobs");
        return Ok(());
    }

    let now_ms = SystemClock.epoch_ms();
    let mut table = Table::new(vec![
        Column::left("JOB"),
        Column::left("QUEUE"),
        Column::status("STATUS"),
        Column::left("PHASE"),
        Column::right("PRI"),
        Column::right("AGE"),
        Column::muted("AGENT"),
    ]);
    for job in &jobs {
        table.row(vec![
            job.id.short(8).to_string(),
            job.queue.clone(),
            job.status.to_string(),
            job.phase
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".into()),
            job.priority.to_string(),
            time_fmt::elapsed_ms(now_ms, job.submitted_at_ms),
            job.agent
                .as_ref()
                .map(|a| a.to_string())
                .unwrap_or_else(|| "-".into()),
        ]);
    }
    table.render(&mut std::io::stdout());
    Ok(())
}
