// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `rig agents` - list agents and their current work

use anyhow::Result;
use rig_core::{Clock, SystemClock};
use rig_proto::BrokerClient;

use crate::table::{Column, Table};
use crate::time_fmt;

pub async fn handle(client: &BrokerClient) -> Result<()> {
    let agents = client.agents().await?;
    if agents.is_empty() {
        println!("No agents");
        return Ok(());
    }

    let now_ms = SystemClock.epoch_ms();
    let mut table = Table::new(vec![
        Column::left("AGENT"),
        Column::left("DEVICE"),
        Column::status("STATE"),
        Column::left("JOB"),
        Column::left("QUEUES"),
        Column::muted("LAST SEEN"),
    ]);
    for agent in &agents {
        table.row(vec![
            agent.id.to_string(),
            agent.device.clone(),
            agent.state.to_string(),
            agent
                .job
                .as_ref()
                .map(|j| j.short(8).to_string())
                .unwrap_or_else(|| "-".into()),
            agent.queues.join(","),
            time_fmt::ago_ms(now_ms, agent.last_seen_ms),
        ]);
    }
    table.render(&mut std::io::stdout());
    Ok(())
}
