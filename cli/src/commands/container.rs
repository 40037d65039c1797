// Copyright (c) 2026 Podhost Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Container lifecycle and attachment commands: `create`, `list`,
//! `inspect`, `start`, `stop`, `attach`, `logs`, `delete`.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use podhost_client::DaemonClient;
use podhost_core::domain::container::{Container, ContainerConfig, ContainerStatus, Protocol, PublishedPort, RestartPolicy};
use podhost_core::domain::pty::SignalExitCounter;
use std::collections::HashMap;
use std::io::{IsTerminal, Write};

#[derive(Subcommand)]
pub enum ContainerCommand {
    /// Create a container without starting it
    Create {
        /// Image reference
        #[arg(long)]
        image: String,

        /// Allocate a pseudo-TTY for the container's primary process
        #[arg(short, long)]
        terminal: bool,

        /// Network to attach, may be repeated (default: the `default` network)
        #[arg(long = "network")]
        networks: Vec<String>,

        /// Publish a port as HOST:CONTAINER[/tcp|/udp], may be repeated
        #[arg(short = 'p', long = "publish")]
        publish: Vec<String>,

        /// Restart policy
        #[arg(long, value_enum, default_value = "no")]
        restart: RestartArg,

        /// Label in key=value form, may be repeated
        #[arg(long = "label")]
        labels: Vec<String>,

        /// Init process and its arguments
        #[arg(value_name = "COMMAND", trailing_var_arg = true)]
        command: Vec<String>,
    },

    /// List containers
    List,

    /// Show detailed information about one container
    Inspect {
        #[arg(value_name = "CONTAINER")]
        container: String,
    },

    /// Start a created (or stopped) container
    Start {
        #[arg(value_name = "CONTAINER")]
        container: String,
    },

    /// Stop a running container
    Stop {
        #[arg(value_name = "CONTAINER")]
        container: String,

        /// Skip the container's normal stop sequence
        #[arg(short, long)]
        force: bool,
    },

    /// Attach to a running container's stdio
    Attach {
        #[arg(value_name = "CONTAINER")]
        container: String,

        /// Skip replaying retained history before live output
        #[arg(long)]
        no_history: bool,
    },

    /// Fetch a container's retained output history
    Logs {
        #[arg(value_name = "CONTAINER")]
        container: String,
    },

    /// Remove a container
    Delete {
        #[arg(value_name = "CONTAINER")]
        container: String,

        /// Remove even if the container is running
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
pub enum RestartArg {
    No,
    OnFailure,
    Always,
}

impl From<RestartArg> for RestartPolicy {
    fn from(value: RestartArg) -> Self {
        match value {
            RestartArg::No => RestartPolicy::No,
            RestartArg::OnFailure => RestartPolicy::OnFailure,
            RestartArg::Always => RestartPolicy::Always,
        }
    }
}

pub async fn handle_command(command: ContainerCommand, host: &str, port: u16) -> Result<()> {
    let client = DaemonClient::new(port).context("failed to build daemon client")?;
    let _ = host;

    match command {
        ContainerCommand::Create { image, terminal, networks, publish, restart, labels, command } => {
            create(&client, image, terminal, networks, publish, restart, labels, command).await
        }
        ContainerCommand::List => list(&client).await,
        ContainerCommand::Inspect { container } => inspect(&client, &container).await,
        ContainerCommand::Start { container } => start(&client, &container).await,
        ContainerCommand::Stop { container, force } => stop(&client, &container, force).await,
        ContainerCommand::Attach { container, no_history } => attach(&client, &container, no_history).await,
        ContainerCommand::Logs { container } => logs(&client, &container).await,
        ContainerCommand::Delete { container, force } => delete(&client, &container, force).await,
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

fn parse_publish(raw: &[String]) -> Result<Vec<PublishedPort>> {
    raw.iter()
        .map(|entry| {
            let (ports, protocol) = match entry.split_once('/') {
                Some((ports, proto)) => (ports, proto),
                None => (entry.as_str(), "tcp"),
            };
            let (host, container) =
                ports.split_once(':').with_context(|| format!("invalid --publish {entry:?}, expected HOST:CONTAINER"))?;
            let protocol = match protocol {
                "tcp" => Protocol::Tcp,
                "udp" => Protocol::Udp,
                other => anyhow::bail!("unknown protocol {other:?} in --publish {entry:?}"),
            };
            Ok(PublishedPort {
                host_port: host.parse().with_context(|| format!("invalid host port in {entry:?}"))?,
                container_port: container.parse().with_context(|| format!("invalid container port in {entry:?}"))?,
                protocol,
            })
        })
        .collect()
}

#[allow(clippy::too_many_arguments)]
async fn create(
    client: &DaemonClient,
    image: String,
    terminal: bool,
    networks: Vec<String>,
    publish: Vec<String>,
    restart: RestartArg,
    labels: Vec<String>,
    command: Vec<String>,
) -> Result<()> {
    if command.is_empty() {
        anyhow::bail!("no init command given");
    }
    let config = ContainerConfig {
        image,
        init: command,
        terminal,
        networks: if networks.is_empty() { vec!["default".to_string()] } else { networks },
        published_ports: parse_publish(&publish)?,
        restart_policy: restart.into(),
        labels: parse_labels(&labels)?,
    };

    let container = client.create_container(config).await?;
    println!("{}", container.id);
    Ok(())
}

async fn list(client: &DaemonClient) -> Result<()> {
    let containers = client.list_containers().await?;
    println!("{:<16} {:<24} {:<10} {}", "ID".bold(), "IMAGE".bold(), "STATUS".bold(), "NETWORKS".bold());
    for container in containers {
        print_row(&container);
    }
    Ok(())
}

fn print_row(container: &Container) {
    let status = match container.status {
        ContainerStatus::Created => "created",
        ContainerStatus::Running => "running",
        ContainerStatus::Stopped => "stopped",
    };
    let nets: Vec<&str> = container.attachments.iter().map(|a| a.network_id.as_str()).collect();
    println!("{:<16} {:<24} {:<10} {}", short_id(&container.id), container.config.image, status, nets.join(","));
}

fn short_id(id: &str) -> &str {
    &id[..id.len().min(12)]
}

async fn inspect(client: &DaemonClient, query: &str) -> Result<()> {
    let container = client.inspect_container(query).await?;
    println!("{}", serde_json::to_string_pretty(&container)?);
    Ok(())
}

async fn start(client: &DaemonClient, query: &str) -> Result<()> {
    client.start_container(query).await.with_context(|| format!("failed to start {query}"))?;
    println!("{query}");
    Ok(())
}

async fn stop(client: &DaemonClient, query: &str, force: bool) -> Result<()> {
    client.stop_container(query, force).await.with_context(|| format!("failed to stop {query}"))?;
    println!("{query}");
    Ok(())
}

async fn delete(client: &DaemonClient, query: &str, force: bool) -> Result<()> {
    client.delete_container(query, force).await.with_context(|| format!("failed to delete {query}"))?;
    println!("{query}");
    Ok(())
}

async fn logs(client: &DaemonClient, query: &str) -> Result<()> {
    let bytes = client.container_logs(query).await?;
    std::io::stdout().write_all(&bytes)?;
    Ok(())
}

/// Streams history replay (unless `--no-history`) followed by live
/// output to this process's stdout until the daemon closes the
/// connection.
async fn attach(client: &DaemonClient, query: &str, no_history: bool) -> Result<()> {
    let mut stdout = std::io::stdout();
    if !stdout.is_terminal() {
        // A piped/redirected attach can't rely on a terminal's own line
        // discipline to make a single Ctrl-C felt right away, so repeated
        // signals are counted and force the process down once the
        // threshold is reached instead of waiting on a graceful stop.
        spawn_signal_force_exit();
    }
    client
        .attach_container(query, no_history, move |chunk| {
            let _ = stdout.write_all(chunk);
            let _ = stdout.flush();
        })
        .await
}

fn spawn_signal_force_exit() {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(_) => return,
        };
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => return,
        };
        let mut counter = SignalExitCounter::new();
        loop {
            tokio::select! {
                _ = sigint.recv() => {}
                _ = sigterm.recv() => {}
            }
            if counter.record() {
                std::process::exit(130);
            }
        }
    });
}
