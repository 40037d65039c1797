// Copyright (c) 2026 Podhost Contributors
// SPDX-License-Identifier: AGPL-3.0

//! podhost CLI library - exposes testable components

pub mod commands;
pub mod daemon;
