// Copyright (c) 2026 Podhost Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Build DAG node types. The scheduler that walks these
//! lives in [`crate::application::build_scheduler`].

use crate::domain::snapshot::Digest;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildOperation {
    /// Content digest identifying this operation (e.g. sha256 of a
    /// canonicalized RUN/COPY instruction plus its arguments).
    pub digest: String,
    pub kind: OperationKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OperationKind {
    Run { command: Vec<String>, env: HashMap<String, String> },
    Copy { sources: Vec<String>, dest: String },
    Metadata { set: HashMap<String, String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildNode {
    pub id: NodeId,
    pub operation: BuildOperation,
    pub parent: Option<Digest>,
    pub dependencies: Vec<Digest>,
    pub platform: String,
}
