// Copyright (c) 2026 Podhost Contributors
// SPDX-License-Identifier: AGPL-3.0

//! # Podhost CLI
//!
//! `podhost` is the command-line front end for the podhost container
//! platform's long-lived API server (the "daemon"). It follows a
//! **CLI-first** design with daemon capabilities:
//!
//! - **Default mode**: CLI commands delegate to the daemon over HTTP.
//! - **Daemon mode**: `podhost --daemon` runs the API server in the
//!   foreground (or backgrounded via `podhost daemon start`).
//!
//! ## Commands
//!
//! - `podhost daemon start|stop|status|install|uninstall`
//! - `podhost network create|list|delete|inspect`
//! - `podhost container create|list|inspect|start|stop|attach|logs|delete`
//! - `podhost build run`
//! - `podhost config show|validate|generate`
//!
//! `images`, `registry`, `volume`, `system`, `compose`, and `cluster`
//! are named external collaborators: their subcommands
//! are present for surface completeness but are not implemented here.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing::info;

mod commands;
mod daemon;

use commands::{
    BuildCommand, ClusterCommand, ComposeCommand, ConfigCommand, ContainerCommand, DaemonCommand, ImagesCommand,
    NetworkCommand, RegistryCommand, SystemCommand, VolumeCommand,
};

/// Podhost - a local, single-host container platform
#[derive(Parser)]
#[command(name = "podhost")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Run as the API server (daemon) in the foreground
    #[arg(long, global = true)]
    daemon: bool,

    /// Path to configuration file (overrides discovery)
    #[arg(short, long, global = true, env = "PODHOST_CONFIG_PATH", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Daemon HTTP API port
    #[arg(long, global = true, env = "PODHOST_PORT", default_value = "8000")]
    port: u16,

    /// Daemon HTTP API host
    #[arg(long, global = true, env = "PODHOST_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "PODHOST_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the daemon process
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Manage networks
    Network {
        #[command(subcommand)]
        command: NetworkCommand,
    },

    /// Manage containers
    Container {
        #[command(subcommand)]
        command: ContainerCommand,
    },

    /// Run build stages against the build cache and snapshotter
    Build {
        #[command(subcommand)]
        command: BuildCommand,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Manage images (external collaborator, not implemented here)
    Images {
        #[command(subcommand)]
        command: ImagesCommand,
    },

    /// Manage registries (external collaborator, not implemented here)
    Registry {
        #[command(subcommand)]
        command: RegistryCommand,
    },

    /// Manage volumes (external collaborator, not implemented here)
    Volume {
        #[command(subcommand)]
        command: VolumeCommand,
    },

    /// Control the overall system (external collaborator, not implemented here)
    System {
        #[command(subcommand)]
        command: SystemCommand,
    },

    /// Compose up/down (external collaborator, not implemented here)
    Compose {
        #[command(subcommand)]
        command: ComposeCommand,
    },

    /// Cluster bootstrap subcommands (external collaborator, not implemented here)
    Cluster {
        #[command(subcommand)]
        command: ClusterCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    if cli.daemon {
        info!("starting podhost daemon in foreground mode");
        return daemon::start_daemon(cli.config, cli.port).await;
    }

    match cli.command {
        Some(Commands::Daemon { command }) => commands::daemon::handle_command(command, cli.config, &cli.host, cli.port).await,
        Some(Commands::Network { command }) => commands::network::handle_command(command, &cli.host, cli.port).await,
        Some(Commands::Container { command }) => commands::container::handle_command(command, &cli.host, cli.port).await,
        Some(Commands::Build { command }) => commands::build::handle_command(command, &cli.host, cli.port).await,
        Some(Commands::Config { command }) => commands::config::handle_command(command, cli.config).await,
        Some(Commands::Images { .. }) => commands::stub::not_implemented("images"),
        Some(Commands::Registry { .. }) => commands::stub::not_implemented("registry"),
        Some(Commands::Volume { .. }) => commands::stub::not_implemented("volume"),
        Some(Commands::System { .. }) => commands::stub::not_implemented("system"),
        Some(Commands::Compose { .. }) => commands::stub::not_implemented("compose"),
        Some(Commands::Cluster { .. }) => commands::stub::not_implemented("cluster"),
        None => {
            eprintln!("{}", "no command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
