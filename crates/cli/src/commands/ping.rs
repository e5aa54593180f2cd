// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `rig ping` - broker reachability check

use anyhow::Result;
use rig_proto::BrokerClient;

pub async fn handle(client: &BrokerClient) -> Result<()> {
    let version = client.hello().await?;
    println!("broker {} at {}", version, client.addr());
    Ok(())
}
