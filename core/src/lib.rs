// Copyright (c) 2026 Podhost Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # podhost-core
//!
//! Core runtime for the podhost container platform. This crate owns the
//! four subsystems where the hard engineering lives:
//!
//! | Subsystem | Domain module | Infrastructure module |
//! |---|---|---|
//! | Container lifecycle & I/O attachment | [`domain::container`], [`domain::pty`] | [`infrastructure::ring_buffer`], [`infrastructure::pty_session`], [`infrastructure::io_multiplexer`], [`infrastructure::restart_supervisor`] |
//! | Network allocator service | [`domain::network`] | [`application::network_allocator`] |
//! | Authoritative DNS server | [`domain::dns`] | [`infrastructure::dns_codec`], [`infrastructure::dns_server`] |
//! | OCI build engine core | [`domain::snapshot`], [`domain::diffkey`], [`domain::build`] | [`infrastructure::differ`], [`infrastructure::snapshotter`], [`infrastructure::content_store`], [`application::build_scheduler`] |
//!
//! Node-wide settings (data root, default CIDRs, DNS binds, PTY buffer
//! size, restart backoff, build cache size/TTL) are loaded through
//! [`domain::config::NodeConfig`].
//!
//! ## Layer structure
//!
//! ```text
//! application/    <- service traits orchestrating domain + infrastructure
//!     v
//! domain/         <- aggregates, value objects, domain errors
//!     v
//! infrastructure/ <- filesystem, sockets, archives, concurrency primitives
//! ```

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod error;

pub use error::ErrorKind;
