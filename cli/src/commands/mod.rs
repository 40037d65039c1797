// Copyright (c) 2026 Podhost Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the podhost CLI.

pub mod build;
pub mod config;
pub mod container;
pub mod daemon;
pub mod network;
pub mod stub;

pub use self::build::BuildCommand;
pub use self::config::ConfigCommand;
pub use self::container::ContainerCommand;
pub use self::daemon::DaemonCommand;
pub use self::network::NetworkCommand;
pub use self::stub::{ClusterCommand, ComposeCommand, ImagesCommand, RegistryCommand, SystemCommand, VolumeCommand};
