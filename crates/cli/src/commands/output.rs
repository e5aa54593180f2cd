// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `rig output` - print or stream a job's captured output

use std::io::Write;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use rig_core::JobStatus;
use rig_proto::BrokerClient;

/// Poll cadence while following a job's output.
const FOLLOW_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Args)]
pub struct OutputArgs {
    /// Job id (a unique prefix is enough)
    pub job: String,

    /// Stream new output until the job reaches a terminal status
    #[arg(long, short = 'f')]
    pub follow: bool,

    /// Print only chunks after this sequence number
    #[arg(long, value_name = "SEQ", default_value_t = 0)]
    pub from: u64,
}

pub async fn handle(args: OutputArgs, client: &BrokerClient) -> Result<()> {
    if args.follow {
        follow(client, &args.job, args.from).await?;
        return Ok(());
    }

    let (chunks, _status) = client.output(&args.job, args.from).await?;
    let mut out = std::io::stdout();
    for chunk in &chunks {
        out.write_all(chunk.text.as_bytes())?;
    }
    out.flush()?;
    Ok(())
}

/// Stream output from `after` until the job is terminal or Ctrl+C.
///
/// Returns the last status seen. The final chunks ride in the same
/// response that carries the terminal status, so no extra pass is needed.
pub async fn follow(client: &BrokerClient, job: &str, mut after: u64) -> Result<JobStatus> {
    let mut ctrl_c = Box::pin(tokio::signal::ctrl_c());
    loop {
        let (chunks, status) = client.output(job, after).await?;
        if !chunks.is_empty() {
            let mut out = std::io::stdout();
            for chunk in &chunks {
                out.write_all(chunk.text.as_bytes())?;
                after = after.max(chunk.seq);
            }
            out.flush()?;
        }
        if status.is_terminal() {
            return Ok(status);
        }
        tokio::select! {
            _ = &mut ctrl_c => return Ok(status),
            _ = tokio::time::sleep(FOLLOW_INTERVAL) => {}
        }
    }
}
