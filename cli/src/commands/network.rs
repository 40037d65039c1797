// Copyright (c) 2026 Podhost Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Network lifecycle commands: `create`, `list`,
//! `delete`, `inspect`.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use podhost_client::DaemonClient;
use podhost_core::domain::network::{NetworkConfiguration, NetworkMode, NetworkState};
use std::collections::HashMap;

#[derive(Subcommand)]
pub enum NetworkCommand {
    /// Create a network
    Create {
        /// Network name
        #[arg(value_name = "NAME")]
        name: String,

        /// Network mode
        #[arg(long, value_enum, default_value = "nat")]
        mode: ModeArg,

        /// IPv4 subnet in CIDR notation (e.g. 10.89.0.0/24)
        #[arg(long)]
        subnet: Option<String>,

        /// IPv6 subnet in CIDR notation
        #[arg(long)]
        ipv6_subnet: Option<String>,

        /// Label in key=value form, may be repeated
        #[arg(long = "label", value_name = "KEY=VALUE")]
        labels: Vec<String>,
    },

    /// List networks
    List,

    /// Show detailed information about one network
    Inspect {
        #[arg(value_name = "NAME")]
        name: String,
    },

    /// Delete a network
    Delete {
        #[arg(value_name = "NAME")]
        name: String,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
pub enum ModeArg {
    Nat,
    Bridged,
    HostOnly,
}

impl From<ModeArg> for NetworkMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Nat => NetworkMode::Nat,
            ModeArg::Bridged => NetworkMode::Bridged,
            ModeArg::HostOnly => NetworkMode::HostOnly,
        }
    }
}

pub async fn handle_command(command: NetworkCommand, host: &str, port: u16) -> Result<()> {
    let client = DaemonClient::new(port).context("failed to build daemon client")?;
    let _ = host; // reserved for remote daemons; local-only today

    match command {
        NetworkCommand::Create { name, mode, subnet, ipv6_subnet, labels } => {
            create(&client, name, mode, subnet, ipv6_subnet, labels).await
        }
        NetworkCommand::List => list(&client).await,
        NetworkCommand::Inspect { name } => inspect(&client, &name).await,
        NetworkCommand::Delete { name } => delete(&client, &name).await,
    }
}

fn parse_labels(raw: &[String]) -> Result<HashMap<String, String>> {
    let mut labels = HashMap::new();
    for entry in raw {
        let (key, value) = entry
            .split_once('=')
            .with_context(|| format!("invalid label {entry:?}, expected KEY=VALUE"))?;
        labels.insert(key.to_string(), value.to_string());
    }
    Ok(labels)
}

async fn create(
    client: &DaemonClient,
    name: String,
    mode: ModeArg,
    subnet: Option<String>,
    ipv6_subnet: Option<String>,
    labels: Vec<String>,
) -> Result<()> {
    let mut config = NetworkConfiguration::new(name.clone(), mode.into(), "builtin-ipam");
    config.labels = parse_labels(&labels)?;
    if let Some(subnet) = subnet {
        config.ipv4_cidr = Some(subnet.parse().context("invalid --subnet CIDR")?);
    }
    if let Some(subnet) = ipv6_subnet {
        config.ipv6_cidr = Some(subnet.parse().context("invalid --ipv6-subnet CIDR")?);
    }

    client.create_network(config).await?;
    println!("{name}");
    Ok(())
}

async fn list(client: &DaemonClient) -> Result<()> {
    let networks = client.list_networks().await?;
    println!("{:<20} {:<10} {:<18} {}", "NAME".bold(), "MODE".bold(), "SUBNET".bold(), "STATE".bold());
    for state in networks {
        print_row(&state);
    }
    Ok(())
}

fn print_row(state: &NetworkState) {
    let config = state.config();
    let (subnet, status) = match state {
        NetworkState::Running(_, s) => (s.ipv4_subnet.to_string(), "running"),
        NetworkState::Created(_) => ("-".to_string(), "created"),
    };
    println!("{:<20} {:<10} {:<18} {}", config.id, format!("{:?}", config.mode).to_lowercase(), subnet, status);
}

async fn inspect(client: &DaemonClient, name: &str) -> Result<()> {
    let state = client.inspect_network(name).await?;
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

async fn delete(client: &DaemonClient, name: &str) -> Result<()> {
    client.delete_network(name).await.with_context(|| format!("failed to delete network {name}"))?;
    println!("{name}");
    Ok(())
}
