// Copyright (c) 2026 Podhost Contributors
// SPDX-License-Identifier: AGPL-3.0

//! FIFO async mutex used where fairness matters more than raw
//! throughput — the network allocator's per-network lock, so a queue
//! of concurrent `attach`/`delete` callers is served in arrival order
//! rather than whichever task the scheduler happens to wake first.

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::oneshot;

struct State {
    locked: bool,
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// A mutex whose waiters are granted the lock in the order they asked
/// for it. `tokio::sync::Mutex` doesn't make that guarantee explicit,
/// so callers that need strict fairness (queueing allocator requests)
/// use this instead.
#[derive(Clone)]
pub struct FairAsyncLock {
    state: Arc<parking_lot::Mutex<State>>,
}

impl Default for FairAsyncLock {
    fn default() -> Self {
        Self::new()
    }
}

impl FairAsyncLock {
    pub fn new() -> Self {
        Self { state: Arc::new(parking_lot::Mutex::new(State { locked: false, waiters: VecDeque::new() })) }
    }

    /// Acquire the lock, waiting in FIFO order if it's currently held.
    /// Returns a guard that releases on drop.
    pub async fn lock(&self) -> FairAsyncLockGuard {
        let rx = {
            let mut state = self.state.lock();
            if !state.locked {
                state.locked = true;
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                Some(rx)
            }
        };

        if let Some(rx) = rx {
            // the grantor flips `locked` to true on our behalf before
            // sending, so we just await the handoff
            let _ = rx.await;
        }

        FairAsyncLockGuard { state: self.state.clone() }
    }
}

pub struct FairAsyncLockGuard {
    state: Arc<parking_lot::Mutex<State>>,
}

impl Drop for FairAsyncLockGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        match state.waiters.pop_front() {
            Some(tx) => {
                // ownership of `locked = true` transfers straight to
                // the next waiter; it's never observed as unlocked
                let _ = tx.send(());
            }
            None => state.locked = false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn waiters_are_granted_the_lock_in_arrival_order() {
        let lock = FairAsyncLock::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let first = lock.lock().await;

        let mut handles = Vec::new();
        for i in 0..5 {
            let lock = lock.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                // stagger spawn registration so waiters queue in index order
                tokio::time::sleep(Duration::from_millis(i as u64 * 5)).await;
                let _guard = lock.lock().await;
                order.lock().push(i);
            }));
        }

        // give spawned tasks time to register as waiters before releasing
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(first);

        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn mutual_exclusion_is_enforced() {
        let lock = FairAsyncLock::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..20 {
            let lock = lock.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                let _guard = lock.lock().await;
                let before = counter.fetch_add(1, Ordering::SeqCst);
                assert_eq!(before, 0, "lock should exclude concurrent access");
                tokio::task::yield_now().await;
                counter.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
    }
}
