// Copyright (c) 2026 Podhost Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use podhost_core::domain::config::NodeConfig;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show {
        /// Also print the discovery paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate a sample configuration file
    Generate {
        /// Output path
        #[arg(short, long, default_value = "./podhost-config.toml")]
        output: PathBuf,

        /// Include commented examples
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, examples } => generate(output, examples).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = NodeConfig::load_or_default(config_override.clone()).context("failed to load configuration")?;

    if show_paths {
        println!("{}", "configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. PODHOST_APP_ROOT/config.toml: {}",
            std::env::var("PODHOST_APP_ROOT").unwrap_or_else(|_| "(not set)".to_string()).dimmed()
        );
        println!("  3. ~/.podhost/config.toml");
        println!("  4. /etc/podhost/config.toml");
        println!();
    }

    println!("{}", "current configuration:".bold());
    println!();
    println!("{}", config.to_toml_string()?);
    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("validating configuration...");

    let config = NodeConfig::load_or_default(config_path).context("failed to load configuration")?;
    config.validate().context("configuration validation failed")?;

    println!("{}", "configuration is valid".green());
    Ok(())
}

async fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    let sample = if with_examples {
        include_str!("../../templates/config-with-examples.toml")
    } else {
        include_str!("../../templates/config-minimal.toml")
    };

    std::fs::write(&output, sample).with_context(|| format!("failed to write config to {:?}", output))?;

    println!("{}", format!("configuration generated: {}", output.display()).green());
    Ok(())
}
