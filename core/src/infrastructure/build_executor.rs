// Copyright (c) 2026 Podhost Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Default [`OperationExecutor`]: runs `Run`/`Copy`
//! instructions against a prepared snapshot's mountpoint using
//! `tokio::process::Command`, the same async-native child-process
//! primitive [`crate::application::container_service`] uses for
//! container launches. `Copy` reads sources relative to the build
//! context directory the scheduler was given; `Metadata` is pure
//! bookkeeping and needs no process.

use crate::application::build_scheduler::{EnvMetaDelta, OperationExecutor};
use crate::domain::build::OperationKind;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Executes build operations with a fixed build context directory
/// (where `Copy` sources are resolved from) and an optional override
/// for the command used to run `Run` instructions (defaults to `sh -c`
/// on Unix).
pub struct ShellOperationExecutor {
    context_root: PathBuf,
}

impl ShellOperationExecutor {
    pub fn new(context_root: impl Into<PathBuf>) -> Self {
        Self { context_root: context_root.into() }
    }
}

#[async_trait]
impl OperationExecutor for ShellOperationExecutor {
    async fn execute(&self, operation: &OperationKind, mountpoint: &Path) -> Result<EnvMetaDelta, String> {
        match operation {
            OperationKind::Run { command, env } => run_command(command, env, mountpoint).await,
            OperationKind::Copy { sources, dest } => {
                copy_sources(&self.context_root, sources, mountpoint, dest)
            }
            OperationKind::Metadata { set } => Ok(EnvMetaDelta { env: set.clone(), meta: set.clone() }),
        }
    }
}

async fn run_command(
    command: &[String],
    env: &std::collections::HashMap<String, String>,
    mountpoint: &Path,
) -> Result<EnvMetaDelta, String> {
    if command.is_empty() {
        return Err("run operation has an empty command".to_string());
    }

    let mut cmd = Command::new(&command[0]);
    cmd.args(&command[1..]);
    cmd.current_dir(mountpoint);
    cmd.envs(env.iter());
    cmd.stdin(std::process::Stdio::null());

    let output = cmd.output().await.map_err(|e| format!("failed to spawn {}: {e}", command[0]))?;
    if !output.status.success() {
        return Err(format!(
            "command {:?} exited with {}: {}",
            command,
            output.status,
            String::from_utf8_lossy(&output.stderr)
        ));
    }

    Ok(EnvMetaDelta::default())
}

fn copy_sources(
    context_root: &Path,
    sources: &[String],
    mountpoint: &Path,
    dest: &str,
) -> Result<EnvMetaDelta, String> {
    let dest_path = mountpoint.join(dest.trim_start_matches('/'));
    if let Some(parent) = dest_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }

    for source in sources {
        let src_path = context_root.join(source);
        let meta = std::fs::metadata(&src_path).map_err(|e| format!("stat {source}: {e}"))?;
        if meta.is_dir() {
            copy_dir_recursive(&src_path, &dest_path).map_err(|e| e.to_string())?;
        } else {
            if dest.ends_with('/') || sources.len() > 1 {
                std::fs::create_dir_all(&dest_path).map_err(|e| e.to_string())?;
                let file_name = src_path.file_name().ok_or("source has no file name")?;
                std::fs::copy(&src_path, dest_path.join(file_name)).map_err(|e| e.to_string())?;
            } else {
                std::fs::copy(&src_path, &dest_path).map_err(|e| e.to_string())?;
            }
        }
    }

    Ok(EnvMetaDelta::default())
}

fn copy_dir_recursive(src: &Path, dest: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in walkdir::WalkDir::new(src).min_depth(1) {
        let entry = entry?;
        let rel = entry.path().strip_prefix(src).expect("walkdir yields paths under src");
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn run_command_executes_and_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ShellOperationExecutor::new(dir.path());

        let ok = OperationKind::Run { command: vec!["true".into()], env: HashMap::new() };
        executor.execute(&ok, dir.path()).await.unwrap();

        let fail = OperationKind::Run { command: vec!["false".into()], env: HashMap::new() };
        assert!(executor.execute(&fail, dir.path()).await.is_err());
    }

    #[tokio::test]
    async fn copy_copies_a_single_file() {
        let context = tempfile::tempdir().unwrap();
        let mountpoint = tempfile::tempdir().unwrap();
        std::fs::write(context.path().join("a.txt"), b"hello").unwrap();

        let executor = ShellOperationExecutor::new(context.path());
        let op = OperationKind::Copy { sources: vec!["a.txt".into()], dest: "/b.txt".into() };
        executor.execute(&op, mountpoint.path()).await.unwrap();

        let copied = std::fs::read(mountpoint.path().join("b.txt")).unwrap();
        assert_eq!(copied, b"hello");
    }

    #[tokio::test]
    async fn metadata_operation_returns_its_set_as_env_and_meta() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ShellOperationExecutor::new(dir.path());
        let mut set = HashMap::new();
        set.insert("label".to_string(), "value".to_string());
        let op = OperationKind::Metadata { set: set.clone() };
        let delta = executor.execute(&op, dir.path()).await.unwrap();
        assert_eq!(delta.meta, set);
    }
}
