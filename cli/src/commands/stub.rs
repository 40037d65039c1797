// Copyright (c) 2026 Podhost Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Surface-complete stubs for the external-collaborator portions of
//! the CLI: image-registry transport, compose/YAML
//! parsing, Kubernetes cluster bootstrap, and volume/system management
//! beyond what exercises the four core subsystems. These subcommands
//! exist so `podhost --help` matches the documented surface, but defer
//! to a real implementation outside this crate.

use anyhow::Result;
use clap::Subcommand;

#[derive(Subcommand)]
pub enum ImagesCommand {
    List,
    Pull { reference: String },
    Remove { reference: String },
}

#[derive(Subcommand)]
pub enum RegistryCommand {
    Login { registry: String },
    Logout { registry: String },
}

#[derive(Subcommand)]
pub enum VolumeCommand {
    Create { name: String },
    List,
    Delete { name: String },
    Prune,
}

#[derive(Subcommand)]
pub enum SystemCommand {
    Start,
    Stop,
    Restart,
}

#[derive(Subcommand)]
pub enum ComposeCommand {
    Up,
    Down,
}

#[derive(Subcommand)]
pub enum ClusterCommand {
    Create { name: String },
    Delete { name: String },
    List,
}

pub fn not_implemented(command: &str) -> Result<()> {
    eprintln!("{command}: not implemented in this build");
    std::process::exit(1);
}
