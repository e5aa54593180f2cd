// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! rig - test-fleet orchestration CLI

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod color;
mod commands;
mod env;
mod exit_error;
mod jobfile;
mod table;
mod time_fmt;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{agents, cancel, jobs, output, ping, results, status, submit};
use rig_proto::BrokerClient;

#[derive(Parser)]
#[command(
    name = "rig",
    version,
    about = "Rig - hardware test-fleet orchestration"
)]
struct Cli {
    /// Broker address (host:port); overrides RIG_BROKER
    #[arg(long, global = true, value_name = "ADDR")]
    broker: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a job document to its queue
    Submit(submit::SubmitArgs),
    /// Show one job's lifecycle state
    Status(status::StatusArgs),
    /// Print a job's captured output
    Output(output::OutputArgs),
    /// Cancel a job
    Cancel(cancel::CancelArgs),
    /// Print a job's phase results as JSON
    Results(results::ResultsArgs),
    /// List jobs
    Jobs(jobs::JobsArgs),
    /// List agents and what they are doing
    Agents,
    /// Check that the broker is reachable
    Ping,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        let code = e
            .downcast_ref::<exit_error::ExitError>()
            .map_or(1, |c| c.code);
        let msg = format_error(&e);
        if !msg.is_empty() {
            eprintln!("Error: {}", msg);
        }
        std::process::exit(code);
    }
}

/// Format an anyhow error, deduplicating the chain.
///
/// If the top-level Display already contains the source error text, we skip
/// the "Caused by" chain to avoid noisy duplicate output (common when
/// thiserror variants use `#[error("... {0}")]` with `#[from]`).
/// Otherwise we render the full chain so context isn't lost.
fn format_error(err: &anyhow::Error) -> String {
    let top = err.to_string();

    // Walk the source chain; if every source message already appears
    // in the top-level string, the chain is redundant.
    let chain_redundant = err
        .chain()
        .skip(1)
        .all(|cause| top.contains(&cause.to_string()));

    if chain_redundant {
        return top;
    }

    let mut buf = top;
    for (i, cause) in err.chain().skip(1).enumerate() {
        buf.push_str(&format!("\n\nCaused by:\n    {}: {}", i, cause));
    }
    buf
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let command = match cli.command {
        Some(cmd) => cmd,
        None => {
            // No subcommand provided — print help and exit 0
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
            return Ok(());
        }
    };

    let client = BrokerClient::new(env::broker_addr(cli.broker));

    match command {
        Commands::Submit(args) => submit::handle(args, &client).await,
        Commands::Status(args) => status::handle(args, &client).await,
        Commands::Output(args) => output::handle(args, &client).await,
        Commands::Cancel(args) => cancel::handle(args, &client).await,
        Commands::Results(args) => results::handle(args, &client).await,
        Commands::Jobs(args) => jobs::handle(args, &client).await,
        Commands::Agents => agents::handle(&client).await,
        Commands::Ping => ping::handle(&client).await,
    }
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
