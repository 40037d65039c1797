// Copyright (c) 2026 Podhost Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Selects server-owned vs. client-owned stdio for a container and
//! tracks drain-on-termination with a bounded timeout.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(3);

/// Which side owns the container's stdio descriptors.
pub enum IoOwnership {
    /// The server created a [`crate::infrastructure::pty_session::PtySession`]
    /// and hands out duplicated client handles over RPC.
    ServerOwned,
    /// Legacy mode: the client process owns the pipes directly and the
    /// container writes straight into them.
    ClientOwned,
}

/// Decide ownership from the request shape. `force_client_owned` is an
/// explicit override for callers that can't rely on the inferred
/// default.
pub fn select_ownership(interactive: bool, attach_later: bool, force_client_owned: bool) -> IoOwnership {
    if force_client_owned {
        return IoOwnership::ClientOwned;
    }
    if interactive || attach_later {
        IoOwnership::ServerOwned
    } else {
        IoOwnership::ClientOwned
    }
}

/// Tracks whether a fixed set of named streams have finished draining,
/// used by both ownership modes to decide when it's safe to report a
/// container as fully stopped.
#[derive(Clone)]
pub struct IoTracker {
    remaining: Arc<watch::Sender<usize>>,
}

impl IoTracker {
    pub fn new(stream_count: usize) -> Self {
        let (tx, _) = watch::channel(stream_count);
        Self { remaining: Arc::new(tx) }
    }

    pub fn mark_drained(&self, _stream: &str) {
        self.remaining.send_modify(|n| *n = n.saturating_sub(1));
    }

    /// Waits for all streams to report drained, or returns `false` if
    /// [`DRAIN_TIMEOUT`] elapses first.
    pub async fn wait_drained(&self) -> bool {
        let mut rx = self.remaining.subscribe();
        if *rx.borrow() == 0 {
            return true;
        }
        let wait = async {
            loop {
                if rx.changed().await.is_err() {
                    return false;
                }
                if *rx.borrow() == 0 {
                    return true;
                }
            }
        };
        tokio::time::timeout(DRAIN_TIMEOUT, wait).await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_drained_returns_true_once_all_streams_report() {
        let tracker = IoTracker::new(2);
        let t2 = tracker.clone();
        tokio::spawn(async move {
            t2.mark_drained("stdout");
            t2.mark_drained("stderr");
        });
        assert!(tracker.wait_drained().await);
    }

    #[tokio::test]
    async fn wait_drained_times_out_if_a_stream_never_reports() {
        let tracker = IoTracker::new(2);
        tracker.mark_drained("stdout");
        let start = std::time::Instant::now();
        let drained = tracker.wait_drained().await;
        assert!(!drained);
        assert!(start.elapsed() >= DRAIN_TIMEOUT);
    }

    #[test]
    fn force_client_owned_overrides_interactive_request() {
        assert!(matches!(select_ownership(true, false, true), IoOwnership::ClientOwned));
    }

    #[test]
    fn interactive_without_override_is_server_owned() {
        assert!(matches!(select_ownership(true, false, false), IoOwnership::ServerOwned));
    }
}
