// Copyright (c) 2026 Podhost Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Container lifecycle and I/O attachment service. Owns each
//! container's [`PtySession`], wires its launch process to the
//! session's fds, and runs a per-container restart loop driven by
//! [`RestartSupervisor`].
//!
//! Background supervision tasks hold `Arc<ContainerService>` so they
//! can keep evaluating restart decisions against shared state after
//! the call that spawned them returns.

use crate::application::network_allocator::{ContainerDirectory, NetworkService};
use crate::domain::container::{
    resolve_id, Container, ContainerConfig, ContainerError, ContainerStatus,
};
use crate::domain::network::Attachment;
use crate::domain::pty::IoMode;
use crate::infrastructure::dns_server::Resolver;
use crate::infrastructure::io_multiplexer::select_ownership;
use crate::infrastructure::pty_session::{ClientStdin, ContainerIo, PtySession, PtySessionError};
use crate::infrastructure::restart_supervisor::{Decision, RestartSupervisor, RunOutcome};
use async_trait::async_trait;
use dashmap::DashMap;
use nix::sys::signal::{self, Signal};
use nix::unistd::{dup, Pid};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, Mutex as AsyncMutex, Notify};

#[derive(Debug, Error)]
pub enum ContainerServiceError {
    #[error(transparent)]
    Container(#[from] ContainerError),
    #[error(transparent)]
    Pty(#[from] PtySessionError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("signal error: {0}")]
    Signal(#[from] nix::Error),
}

impl crate::error::HasErrorKind for ContainerServiceError {
    fn kind(&self) -> crate::error::ErrorKind {
        match self {
            ContainerServiceError::Container(e) => e.kind(),
            ContainerServiceError::Pty(e) => e.kind(),
            ContainerServiceError::Io(_) => crate::error::ErrorKind::Internal,
            ContainerServiceError::Signal(_) => crate::error::ErrorKind::Internal,
        }
    }
}

use crate::error::HasErrorKind;

struct Entry {
    container: AsyncMutex<Container>,
    session: parking_lot::RwLock<Option<Arc<PtySession>>>,
    pid: parking_lot::RwLock<Option<Pid>>,
    manually_stopped: Arc<AtomicBool>,
    restart: AsyncMutex<RestartSupervisor>,
    lifecycle_lock: AsyncMutex<()>,
    stopped: Arc<Notify>,
}

/// Owns every container's lifecycle, I/O session, and restart state.
/// Attachment registration against networks goes through
/// [`NetworkService`] so the two services never hold cyclic references
/// to each other.
pub struct ContainerService {
    containers: DashMap<String, Arc<Entry>>,
    networks: Arc<NetworkService>,
}

impl ContainerService {
    pub fn new(networks: Arc<NetworkService>) -> Self {
        Self { containers: DashMap::new(), networks }
    }

    fn known_ids(&self) -> Vec<String> {
        self.containers.iter().map(|e| e.key().clone()).collect()
    }

    fn resolve(&self, query: &str) -> Result<String, ContainerServiceError> {
        let known = self.known_ids();
        Ok(resolve_id(query, &known)?.to_string())
    }

    fn entry(&self, id: &str) -> Arc<Entry> {
        self.containers.get(id).expect("resolved id is present").clone()
    }

    pub async fn create(&self, config: ContainerConfig) -> Result<Container, ContainerServiceError> {
        let id = uuid::Uuid::new_v4().to_string();
        let container = Container::new(id.clone(), config);
        let restart_policy = container.config.restart_policy;
        self.containers.insert(
            id,
            Arc::new(Entry {
                container: AsyncMutex::new(container.clone()),
                session: parking_lot::RwLock::new(None),
                pid: parking_lot::RwLock::new(None),
                manually_stopped: Arc::new(AtomicBool::new(false)),
                restart: AsyncMutex::new(RestartSupervisor::new(restart_policy)),
                lifecycle_lock: AsyncMutex::new(()),
                stopped: Arc::new(Notify::new()),
            }),
        );
        tracing::info!(container_id = %container.id, "container created");
        Ok(container)
    }

    pub async fn list(&self) -> Vec<Container> {
        let mut out = Vec::new();
        for entry in self.containers.iter() {
            out.push(entry.container.lock().await.clone());
        }
        out
    }

    pub async fn inspect(&self, query: &str) -> Result<Container, ContainerServiceError> {
        let id = self.resolve(query)?;
        Ok(self.entry(&id).container.lock().await.clone())
    }

    /// Start a container and hand the restart loop off to a background
    /// task. Requires `Arc<Self>` since that task outlives this call.
    pub async fn start(self: &Arc<Self>, query: &str) -> Result<(), ContainerServiceError> {
        let id = self.resolve(query)?;
        let entry = self.entry(&id);
        let _guard = entry.lifecycle_lock.lock().await;

        {
            let container = entry.container.lock().await;
            if container.status == ContainerStatus::Running {
                return Err(ContainerServiceError::Container(ContainerError::InvalidState(format!(
                    "container {id} is already running"
                ))));
            }
        }

        entry.manually_stopped.store(false, Ordering::SeqCst);
        let child = self.spawn_once(&id, &entry).await?;

        {
            let mut container = entry.container.lock().await;
            container.status = ContainerStatus::Running;
            for network_id in container.config.networks.clone() {
                if let Ok(addr) = self.networks.allocate(&network_id, &id, None).await {
                    container.attachments.push(Attachment {
                        network_id,
                        hostname: id.clone(),
                        ipv4: match addr {
                            std::net::IpAddr::V4(v4) => ipnet::Ipv4Net::new(v4, 32).expect("host /32 is always valid"),
                            std::net::IpAddr::V6(_) => continue,
                        },
                        ipv4_gateway: std::net::Ipv4Addr::UNSPECIFIED,
                        ipv6: None,
                        mac: None,
                    });
                }
            }
        }

        let service = self.clone();
        let id_for_task = id.clone();
        tokio::spawn(async move {
            service.supervise(id_for_task, entry, child).await;
        });

        tracing::info!(container_id = %id, "container started");
        Ok(())
    }

    /// The restart loop: wait for the current child to exit, ask the
    /// per-container [`RestartSupervisor`] what to do, and either stop
    /// or respawn after the returned backoff.
    async fn supervise(self: Arc<Self>, id: String, entry: Arc<Entry>, mut child: Child) {
        loop {
            let started = Instant::now();
            let status = child.wait().await;
            let ran_for = started.elapsed();
            let exit_code = status.as_ref().ok().and_then(|s| s.code()).unwrap_or(-1);
            let manually_stopped = entry.manually_stopped.load(Ordering::SeqCst);

            let decision = entry.restart.lock().await.evaluate(RunOutcome { exit_code, manually_stopped, ran_for });
            match decision {
                Decision::Stop => {
                    let mut container = entry.container.lock().await;
                    container.status = ContainerStatus::Stopped;
                    container.manually_stopped = manually_stopped;
                    entry.stopped.notify_waiters();
                    tracing::info!(container_id = %id, exit_code, "container exited, not restarting");
                    return;
                }
                Decision::RestartAfter(delay) => {
                    tracing::info!(container_id = %id, exit_code, delay_ms = delay.as_millis() as u64, "container exited, restarting");
                    tokio::time::sleep(delay).await;
                    if entry.manually_stopped.load(Ordering::SeqCst) {
                        let mut container = entry.container.lock().await;
                        container.status = ContainerStatus::Stopped;
                        entry.stopped.notify_waiters();
                        return;
                    }
                    match self.spawn_once(&id, &entry).await {
                        Ok(new_child) => child = new_child,
                        Err(e) => {
                            tracing::warn!(container_id = %id, error = %e, "respawn failed, stopping supervision");
                            let mut container = entry.container.lock().await;
                            container.status = ContainerStatus::Stopped;
                            entry.stopped.notify_waiters();
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn spawn_once(&self, id: &str, entry: &Arc<Entry>) -> Result<Child, ContainerServiceError> {
        let (init, terminal) = {
            let container = entry.container.lock().await;
            (container.config.init.clone(), container.config.terminal)
        };

        let mode = IoMode::for_container(terminal);
        // Containers can always be attached to after the fact, so I/O is
        // server-owned for every launch; `select_ownership` stays the
        // single place that decision is made.
        let _ownership = select_ownership(terminal, true, false);
        let (session, io) = PtySession::create(mode)?;
        *entry.session.write() = Some(Arc::new(session));

        let child = spawn_process(&init, io)?;
        let pid = child
            .id()
            .map(|raw| Pid::from_raw(raw as i32))
            .ok_or_else(|| ContainerServiceError::Io(std::io::Error::other("spawned child has no pid")))?;
        *entry.pid.write() = Some(pid);

        let _ = id;
        Ok(child)
    }

    pub async fn stop(&self, query: &str, force: bool) -> Result<(), ContainerServiceError> {
        let id = self.resolve(query)?;
        let entry = self.entry(&id);
        let _guard = entry.lifecycle_lock.lock().await;
        self.kill_and_wait(&id, &entry, force).await
    }

    /// Signals the container's process and waits for the supervisor loop
    /// to observe its exit. Callers must already hold `lifecycle_lock`.
    async fn kill_and_wait(
        &self,
        id: &str,
        entry: &Arc<Entry>,
        force: bool,
    ) -> Result<(), ContainerServiceError> {
        entry.manually_stopped.store(true, Ordering::SeqCst);
        if let Some(pid) = *entry.pid.read() {
            let sig = if force { Signal::SIGKILL } else { Signal::SIGTERM };
            signal::kill(pid, sig)?;
        }
        let _ = tokio::time::timeout(Duration::from_secs(10), entry.stopped.notified()).await;

        let mut container = entry.container.lock().await;
        container.status = ContainerStatus::Stopped;
        container.manually_stopped = true;
        tracing::info!(container_id = %id, "container stopped");
        Ok(())
    }

    pub async fn delete(&self, query: &str, force: bool) -> Result<(), ContainerServiceError> {
        let id = self.resolve(query)?;
        let entry = self.entry(&id);

        // A concurrent stop holds `lifecycle_lock` for the duration of its
        // kill-and-wait; fail fast here instead of silently blocking behind
        // it, so a delete racing a stop gets an explicit, identifiable error
        // rather than an unexplained hang or a state mutated out from under it.
        let _guard = entry.lifecycle_lock.try_lock().map_err(|_| {
            ContainerServiceError::Container(ContainerError::InvalidState(format!(
                "container {id} has a stop in progress, retry the delete"
            )))
        })?;

        {
            let container = entry.container.lock().await;
            if !container.can_remove(force) {
                return Err(ContainerServiceError::Container(ContainerError::InvalidState(format!(
                    "container {id} is running; stop it or pass force"
                ))));
            }
        }
        if force {
            let _ = self.kill_and_wait(&id, &entry, true).await;
        }

        let networks: Vec<String> = entry.container.lock().await.config.networks.clone();
        for network_id in &networks {
            let _ = self.networks.deallocate(network_id, &id).await;
        }

        self.containers.remove(&id);
        tracing::info!(container_id = %id, "container deleted");
        Ok(())
    }

    /// Attach to a container's stdout stream: history replay, whether it
    /// was truncated, and a live broadcast receiver. Attach is always
    /// server-owned ([`select_ownership`]'s interactive/attach-later
    /// case): the daemon holds the session and fans it out over RPC.
    pub async fn attach(
        &self,
        query: &str,
    ) -> Result<(Vec<u8>, bool, broadcast::Receiver<Vec<u8>>), ContainerServiceError> {
        let id = self.resolve(query)?;
        let entry = self.entry(&id);
        let session = entry
            .session
            .read()
            .clone()
            .ok_or_else(|| ContainerServiceError::Container(ContainerError::InvalidState(format!(
                "container {id} has no active session"
            ))))?;
        Ok(session.attach_stdout())
    }

    /// Hand out a detach-aware stdin writer for one attaching client.
    /// Bytes fed through it reach the container's stdin unless they
    /// complete the session's detach-key sequence.
    pub async fn attach_stdin(&self, query: &str) -> Result<ClientStdin, ContainerServiceError> {
        let id = self.resolve(query)?;
        let entry = self.entry(&id);
        let session = entry
            .session
            .read()
            .clone()
            .ok_or_else(|| ContainerServiceError::Container(ContainerError::InvalidState(format!(
                "container {id} has no active session"
            ))))?;
        Ok(session.attach_stdin())
    }

    /// Replay-only logs: history bytes without subscribing to the live
    /// stream.
    pub async fn logs(&self, query: &str) -> Result<Vec<u8>, ContainerServiceError> {
        let id = self.resolve(query)?;
        let entry = self.entry(&id);
        let session = entry
            .session
            .read()
            .clone()
            .ok_or_else(|| ContainerServiceError::Container(ContainerError::InvalidState(format!(
                "container {id} has no log history"
            ))))?;
        let (data, _wrapped, _rx) = session.attach_stdout();
        Ok(data)
    }
}

/// Spawn `init` with `io` wired to its stdio, consuming `io`.
fn spawn_process(init: &[String], io: ContainerIo) -> Result<Child, ContainerServiceError> {
    let (program, args) = init
        .split_first()
        .ok_or_else(|| ContainerServiceError::Io(std::io::Error::other("container init command is empty")))?;

    let mut command = Command::new(program);
    command.args(args);

    match io {
        ContainerIo::Pty { slave } => {
            let stdin_fd = dup(slave.as_raw_fd())?;
            let stdout_fd = dup(slave.as_raw_fd())?;
            // SAFETY: `dup` returns a fd distinct from `slave`, which is
            // itself consumed as the third stdio handle below.
            command.stdin(Stdio::from(unsafe { OwnedFd::from_raw_fd(stdin_fd) }));
            command.stdout(Stdio::from(unsafe { OwnedFd::from_raw_fd(stdout_fd) }));
            command.stderr(Stdio::from(slave));
        }
        ContainerIo::Pipes { stdin_read, stdout_write, stderr_write } => {
            command.stdin(Stdio::from(stdin_read));
            command.stdout(Stdio::from(stdout_write));
            command.stderr(Stdio::from(stderr_write));
        }
    }

    Ok(command.spawn()?)
}

#[async_trait]
impl ContainerDirectory for ContainerService {
    async fn attachments_for_network(&self, network_id: &str) -> Vec<Attachment> {
        let mut out = Vec::new();
        for entry in self.containers.iter() {
            let container = entry.container.lock().await;
            if container.attaches_network(network_id) {
                out.extend(container.attachments.iter().cloned());
            }
        }
        out
    }
}

/// Adapts [`NetworkService`]'s hostname lookups into the wire-level
/// [`Resolver`] the DNS listener talks to, applying NODATA vs. NXDOMAIN
/// normalization on every answer.
pub struct ContainerDnsResolver {
    networks: Arc<NetworkService>,
}

impl ContainerDnsResolver {
    pub fn new(networks: Arc<NetworkService>) -> Self {
        Self { networks }
    }
}

#[async_trait]
impl Resolver for ContainerDnsResolver {
    async fn resolve(&self, query: crate::domain::dns::Message) -> crate::domain::dns::Message {
        use crate::domain::dns::{RCode, RData, ResourceRecord, RrClass, RrType};

        let Some(question) = query.questions.first() else {
            return query.reply(RCode::FormatError, Vec::new());
        };

        if !matches!(question.qtype, RrType::A | RrType::Aaaa | RrType::Any) {
            return query.reply(RCode::NotImplemented, Vec::new()).normalize_empty_answer_rcode();
        }

        // Look the hostname up regardless of qtype before deciding the
        // rcode: a known host queried for a record type it doesn't have
        // (e.g. AAAA, since this allocator only ever leases IPv4) is
        // NODATA, not NXDOMAIN. Only an unknown host is NXDOMAIN.
        let hostname = question.name.trim_end_matches('.');
        let lookup = self.networks.lookup(hostname).await;

        let Some((_, addr)) = lookup else {
            return query.reply(RCode::NonExistentDomain, Vec::new()).normalize_empty_answer_rcode();
        };

        match (question.qtype, addr) {
            (RrType::Aaaa, _) => query.reply(RCode::NoError, Vec::new()),
            (_, std::net::IpAddr::V4(addr)) => {
                let answer = ResourceRecord {
                    name: question.name.clone(),
                    rtype: RrType::A,
                    rclass: RrClass::In,
                    ttl: 60,
                    rdata: RData::A(addr),
                };
                query.reply(RCode::NoError, vec![answer])
            }
            (_, std::net::IpAddr::V6(_)) => query.reply(RCode::NoError, Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::container::RestartPolicy;
    use std::collections::HashMap;

    struct EmptyDirectory;
    #[async_trait]
    impl ContainerDirectory for EmptyDirectory {
        async fn attachments_for_network(&self, _network_id: &str) -> Vec<Attachment> {
            Vec::new()
        }
    }

    fn service() -> Arc<ContainerService> {
        let networks = Arc::new(NetworkService::new(Arc::new(EmptyDirectory), |cfg| {
            let ipv4 = cfg.ipv4_cidr.expect("test configs always include an ipv4 cidr");
            Arc::new(crate::application::network_allocator::InMemoryIpamPlugin::new(ipv4, cfg.ipv6_cidr))
        }));
        Arc::new(ContainerService::new(networks))
    }

    fn config() -> ContainerConfig {
        ContainerConfig {
            image: "scratch".into(),
            init: vec!["/bin/true".into()],
            terminal: false,
            networks: Vec::new(),
            published_ports: Vec::new(),
            restart_policy: RestartPolicy::No,
            labels: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn create_then_inspect_round_trips() {
        let svc = service();
        let container = svc.create(config()).await.unwrap();
        let found = svc.inspect(&container.id).await.unwrap();
        assert_eq!(found.id, container.id);
        assert_eq!(found.status, ContainerStatus::Created);
    }

    #[tokio::test]
    async fn delete_running_container_without_force_is_rejected() {
        let svc = service();
        let container = svc.create(config()).await.unwrap();
        {
            let entry = svc.entry(&container.id);
            entry.container.lock().await.status = ContainerStatus::Running;
        }
        let err = svc.delete(&container.id, false).await.unwrap_err();
        assert!(matches!(err, ContainerServiceError::Container(ContainerError::InvalidState(_))));
    }

    #[tokio::test]
    async fn delete_unknown_id_is_not_found() {
        let svc = service();
        let err = svc.delete("nope", false).await.unwrap_err();
        assert!(matches!(err, ContainerServiceError::Container(ContainerError::NotFound(_))));
    }

    #[tokio::test]
    async fn list_reflects_created_containers() {
        let svc = service();
        svc.create(config()).await.unwrap();
        svc.create(config()).await.unwrap();
        assert_eq!(svc.list().await.len(), 2);
    }

    #[test]
    fn restart_outcome_from_manual_stop_does_not_restart() {
        let mut sup = RestartSupervisor::new(RestartPolicy::Always);
        let outcome = RunOutcome { exit_code: 0, manually_stopped: true, ran_for: Duration::ZERO };
        assert!(matches!(sup.evaluate(outcome), Decision::Stop));
    }
}
