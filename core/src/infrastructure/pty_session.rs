// Copyright (c) 2026 Podhost Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Server-owned PTY/pipe session: the reader loop that pulls bytes off
//! a container's master fd (or stdout/stderr pipes), appends them to
//! the history [`RingBuffer`], and fans them out to attached clients.

use crate::domain::pty::{DetachDetector, IoMode, DEFAULT_DETACH_SEQUENCE, DEFAULT_HISTORY_CAPACITY, READ_CHUNK_SIZE};
use crate::infrastructure::ring_buffer::RingBuffer;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::pty::{openpty, OpenptyResult};
use nix::unistd::{pipe, read, write};
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::unix::AsyncFd;
use tokio::sync::broadcast;

#[derive(Debug, Error)]
pub enum PtySessionError {
    #[error("pty/pipe setup failed: {0}")]
    Setup(#[from] nix::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl crate::error::HasErrorKind for PtySessionError {
    fn kind(&self) -> crate::error::ErrorKind {
        crate::error::ErrorKind::Internal
    }
}

fn set_nonblocking(fd: RawFd) -> nix::Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL)?;
    let mut flags = OFlag::from_bits_truncate(flags);
    flags.insert(OFlag::O_NONBLOCK);
    fcntl(fd, FcntlArg::F_SETFL(flags))?;
    Ok(())
}

/// The half of a session the container process itself connects to: a
/// PTY slave fd, or a (stdin_read, stdout_write, stderr_write) triple.
pub enum ContainerIo {
    Pty { slave: OwnedFd },
    Pipes { stdin_read: OwnedFd, stdout_write: OwnedFd, stderr_write: OwnedFd },
}

/// One live stream (stdout, or stdout+stderr combined for a PTY
/// session where the two aren't distinguishable at the fd level).
struct Stream {
    history: Arc<RingBuffer>,
    live: broadcast::Sender<Vec<u8>>,
}

impl Stream {
    fn new(capacity: usize) -> Self {
        let (live, _) = broadcast::channel(1024);
        Self { history: Arc::new(RingBuffer::new(capacity)), live }
    }
}

/// A container's PTY or pipe session: owns the server side of the I/O,
/// runs the reader loop(s), and lets clients subscribe to the live
/// stream plus request a history replay.
pub struct PtySession {
    mode: IoMode,
    stdout: Stream,
    stderr: Option<Stream>,
    stopped: Arc<AtomicBool>,
    /// Write destination for attached clients' stdin: a duplicate of
    /// the PTY master, or the pipe-mode stdin write end.
    input: OwnedFd,
}

impl PtySession {
    /// Allocate OS resources for `mode` and return both the session
    /// handle (server side) and the fds to hand to the container
    /// process (child side).
    pub fn create(mode: IoMode) -> Result<(Self, ContainerIo), PtySessionError> {
        match mode {
            IoMode::Pty => {
                let OpenptyResult { master, slave } = openpty(None, None)?;
                set_nonblocking(master.as_raw_fd())?;
                // The reader loop takes ownership of `master` to poll it
                // for readability; a dup'd fd is kept for writes so
                // attached clients' stdin can still reach the slave.
                let input_fd = fcntl(master.as_raw_fd(), FcntlArg::F_DUPFD_CLOEXEC(0))?;
                let input = unsafe { OwnedFd::from_raw_fd(input_fd) };
                let session = Self {
                    mode,
                    stdout: Stream::new(DEFAULT_HISTORY_CAPACITY),
                    stderr: None,
                    stopped: Arc::new(AtomicBool::new(false)),
                    input,
                };
                spawn_reader(master, session.stdout.history.clone(), session.stdout.live.clone(), session.stopped.clone());
                Ok((session, ContainerIo::Pty { slave }))
            }
            IoMode::Pipes => {
                let (stdin_read, stdin_write) = pipe()?;
                let (stdout_read, stdout_write) = pipe()?;
                let (stderr_read, stderr_write) = pipe()?;
                set_nonblocking(stdin_write.as_raw_fd())?;
                set_nonblocking(stdout_write.as_raw_fd())?;
                set_nonblocking(stderr_write.as_raw_fd())?;

                let session = Self {
                    mode,
                    stdout: Stream::new(DEFAULT_HISTORY_CAPACITY),
                    stderr: Some(Stream::new(DEFAULT_HISTORY_CAPACITY)),
                    stopped: Arc::new(AtomicBool::new(false)),
                    input: stdin_write,
                };
                spawn_reader(stdout_read, session.stdout.history.clone(), session.stdout.live.clone(), session.stopped.clone());
                if let Some(stderr) = &session.stderr {
                    spawn_reader(stderr_read, stderr.history.clone(), stderr.live.clone(), session.stopped.clone());
                }
                Ok((session, ContainerIo::Pipes { stdin_read, stdout_write, stderr_write }))
            }
        }
    }

    pub fn mode(&self) -> IoMode {
        self.mode
    }

    /// Hand out a fresh per-client detach-aware stdin writer. Each
    /// attaching client gets its own [`DetachDetector`] state since a
    /// detach sequence is scoped to the client that typed it.
    pub fn attach_stdin(&self) -> ClientStdin {
        ClientStdin { fd: self.input.as_raw_fd(), detector: DetachDetector::new(DEFAULT_DETACH_SEQUENCE) }
    }

    /// Subscribe a newly-attaching client: returns its replay of
    /// history (and whether history was truncated) plus a receiver for
    /// everything written from this point on.
    pub fn attach_stdout(&self) -> (Vec<u8>, bool, broadcast::Receiver<Vec<u8>>) {
        let (data, wrapped) = self.stdout.history.snapshot_and_clear_wrapped();
        (data, wrapped, self.stdout.live.subscribe())
    }

    pub fn attach_stderr(&self) -> Option<(Vec<u8>, bool, broadcast::Receiver<Vec<u8>>)> {
        self.stderr.as_ref().map(|s| {
            let (data, wrapped) = s.history.snapshot_and_clear_wrapped();
            (data, wrapped, s.live.subscribe())
        })
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// One attached client's write side of stdin: runs raw input through a
/// [`DetachDetector`] before forwarding whatever wasn't consumed by a
/// detach match into the container's stdin fd.
pub struct ClientStdin {
    fd: RawFd,
    detector: DetachDetector,
}

impl ClientStdin {
    /// Feed a chunk of this client's raw stdin. Returns whether the
    /// detach sequence completed within this call; once it has, the
    /// caller closes its local readability handler for this client (it
    /// does not affect the container or other attached clients).
    pub fn feed(&mut self, data: &[u8]) -> Result<bool, PtySessionError> {
        let (forward, detached) = self.detector.feed(data);
        if !forward.is_empty() {
            write_all(self.fd, &forward)?;
        }
        Ok(detached)
    }
}

fn write_all(fd: RawFd, mut buf: &[u8]) -> Result<(), PtySessionError> {
    while !buf.is_empty() {
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        match write(borrowed, buf) {
            Ok(0) => return Err(PtySessionError::Io(std::io::Error::from(std::io::ErrorKind::BrokenPipe))),
            Ok(n) => buf = &buf[n..],
            Err(nix::Error::EAGAIN) | Err(nix::Error::EINTR) => continue,
            Err(e) => return Err(PtySessionError::Setup(e)),
        }
    }
    Ok(())
}

fn spawn_reader(
    fd: OwnedFd,
    history: Arc<RingBuffer>,
    live: broadcast::Sender<Vec<u8>>,
    stopped: Arc<AtomicBool>,
) {
    tokio::task::spawn_blocking(move || {
        let async_fd = match AsyncFd::new(fd) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(error = %e, "failed to register pty/pipe fd for async reads");
                return;
            }
        };
        let rt = tokio::runtime::Handle::current();
        rt.block_on(async move {
            let mut buf = [0u8; READ_CHUNK_SIZE];
            loop {
                if stopped.load(Ordering::SeqCst) {
                    return;
                }
                let mut guard = match async_fd.readable().await {
                    Ok(g) => g,
                    Err(_) => return,
                };
                let n = match guard.try_io(|inner| {
                    read(inner.get_ref().as_raw_fd(), &mut buf).map_err(std::io::Error::from)
                }) {
                    Ok(Ok(n)) => n,
                    Ok(Err(_)) => return,
                    Err(_would_block) => continue,
                };
                if n == 0 {
                    return;
                }
                history.write(&buf[..n]);
                // a full broadcast channel (all clients detached) is
                // not an error; the history buffer is the record of
                // truth for late attachers
                let _ = live.send(buf[..n].to_vec());
            }
        });
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::write as nix_write;

    #[tokio::test]
    async fn pipes_mode_fans_out_writes_to_history_and_live_subscriber() {
        let (session, io) = PtySession::create(IoMode::Pipes).unwrap();
        let ContainerIo::Pipes { stdout_write, .. } = io else { panic!("expected pipes") };

        let (_, _, mut rx) = session.attach_stdout();

        tokio::task::spawn_blocking(move || {
            nix_write(&stdout_write, b"hello").unwrap();
        })
        .await
        .unwrap();

        let received = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .expect("message within timeout")
            .unwrap();
        assert_eq!(received, b"hello");

        session.stop();
    }

    #[tokio::test]
    async fn client_stdin_forwards_plain_bytes_to_the_container() {
        let (session, io) = PtySession::create(IoMode::Pipes).unwrap();
        let ContainerIo::Pipes { stdin_read, .. } = io else { panic!("expected pipes") };

        let mut stdin = session.attach_stdin();
        let detached = stdin.feed(b"echo hi").unwrap();
        assert!(!detached);

        let received = tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; 32];
            let n = read(stdin_read.as_raw_fd(), &mut buf).unwrap();
            buf[..n].to_vec()
        })
        .await
        .unwrap();
        assert_eq!(received, b"echo hi");

        session.stop();
    }

    #[tokio::test]
    async fn client_stdin_withholds_a_detach_sequence_from_the_container() {
        let (session, io) = PtySession::create(IoMode::Pipes).unwrap();
        let ContainerIo::Pipes { stdin_read, .. } = io else { panic!("expected pipes") };

        let mut stdin = session.attach_stdin();
        let detached = stdin.feed(&[b'h', b'i', 0x10, 0x11]).unwrap();
        assert!(detached);

        let received = tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; 32];
            let n = read(stdin_read.as_raw_fd(), &mut buf).unwrap();
            buf[..n].to_vec()
        })
        .await
        .unwrap();
        assert_eq!(received, b"hi");

        session.stop();
    }
}
