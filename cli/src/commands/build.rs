// Copyright (c) 2026 Podhost Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Build engine commands. Compose/Dockerfile
//! parsing is an external collaborator; this subcommand
//! takes the already-parsed build plan as a minimal JSON document of
//! [`BuildNode`]s, one sequential stage, and drives the daemon's
//! scheduler with it.

use anyhow::{Context, Result};
use clap::Subcommand;
use podhost_client::DaemonClient;
use podhost_core::domain::build::BuildNode;
use podhost_core::domain::snapshot::Digest;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum BuildCommand {
    /// Run a build stage (a JSON array of build nodes) against the
    /// daemon's cache and snapshotter
    Run {
        /// Path to a JSON file containing an array of build nodes
        #[arg(value_name = "PLAN")]
        plan: PathBuf,

        /// Digest of the snapshot to use as the stage's starting point
        #[arg(long)]
        base: Option<String>,
    },
}

pub async fn handle_command(command: BuildCommand, host: &str, port: u16) -> Result<()> {
    let client = DaemonClient::new(port).context("failed to build daemon client")?;
    let _ = host;

    match command {
        BuildCommand::Run { plan, base } => run(&client, plan, base).await,
    }
}

async fn run(client: &DaemonClient, plan: PathBuf, base: Option<String>) -> Result<()> {
    let raw = std::fs::read_to_string(&plan).with_context(|| format!("failed to read {}", plan.display()))?;
    let nodes: Vec<BuildNode> =
        serde_json::from_str(&raw).with_context(|| format!("failed to parse build plan {}", plan.display()))?;
    if nodes.is_empty() {
        anyhow::bail!("build plan {} has no nodes", plan.display());
    }

    let request = podhost_client::stage_for(base.map(Digest::new), nodes);
    let response = client.run_build_stage(request).await?;

    println!("{}", response.head);
    eprintln!("cache hits: {}, cache misses: {}", response.cache_hits, response.cache_misses);
    Ok(())
}
