// Copyright (c) 2026 Podhost Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Shared error taxonomy. Every subsystem's `thiserror` enum implements
//! [`HasErrorKind`] so the CLI can map failures to exit codes and stderr
//! output uniformly, without every call site matching on concrete error
//! types.

/// Coarse-grained classification of a failure, independent of which
/// subsystem raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Exists,
    InvalidArgument,
    InvalidState,
    Unsupported,
    Timeout,
    Internal,
    Corruption,
    Cancelled,
}

pub trait HasErrorKind {
    fn kind(&self) -> ErrorKind;
}

/// Collects the results of a batch operation (e.g. `delete` on N ids)
/// into one composite failure so callers can report partial success.
#[derive(Debug, Default)]
pub struct CompositeError {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl CompositeError {
    pub fn is_failure(&self) -> bool {
        !self.failed.is_empty()
    }
}

impl std::fmt::Display for CompositeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (id, err) in &self.failed {
            writeln!(f, "{}: {}", id, err)?;
        }
        Ok(())
    }
}

impl std::error::Error for CompositeError {}
