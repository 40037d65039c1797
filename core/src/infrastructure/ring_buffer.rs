// Copyright (c) 2026 Podhost Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Fixed-capacity history buffer backing a [`super::pty_session`].
//! Thread-safe via a single mutex; writers never block on readers and
//! vice versa since `read_all` only takes a snapshot.

use parking_lot::Mutex;
use std::collections::VecDeque;

struct Inner {
    capacity: usize,
    data: VecDeque<u8>,
    has_wrapped: bool,
}

/// A single-writer, multi-reader history buffer. `write` never stalls
/// or drops data itself — it's client fan-out pipes, not this buffer,
/// that may drop bytes for slow readers.
pub struct RingBuffer {
    inner: Mutex<Inner>,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "ring buffer capacity must be >= 1");
        Self {
            inner: Mutex::new(Inner {
                capacity,
                data: VecDeque::with_capacity(capacity),
                has_wrapped: false,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Append `data`. If `data` alone is >= capacity, the whole buffer
    /// is overwritten with its tail and `has_wrapped` becomes sticky.
    pub fn write(&self, data: &[u8]) {
        let mut inner = self.inner.lock();
        let capacity = inner.capacity;

        if data.len() >= capacity {
            inner.data.clear();
            inner.data.extend(data[data.len() - capacity..].iter().copied());
            inner.has_wrapped = true;
            return;
        }

        inner.data.extend(data.iter().copied());
        let overflow = inner.data.len().saturating_sub(capacity);
        if overflow > 0 {
            inner.data.drain(0..overflow);
            inner.has_wrapped = true;
        }
    }

    /// Returns a full snapshot of the buffer's current contents without
    /// draining it — history persists across reads.
    pub fn read_all(&self) -> Vec<u8> {
        let inner = self.inner.lock();
        inner.data.iter().copied().collect()
    }

    pub fn has_wrapped(&self) -> bool {
        self.inner.lock().has_wrapped
    }

    /// Snapshot the buffer and the wrap flag together, then clear the
    /// flag — used by history replay so a late attacher
    /// can be told "history was truncated" exactly once.
    pub fn snapshot_and_clear_wrapped(&self) -> (Vec<u8>, bool) {
        let mut inner = self.inner.lock();
        let data: Vec<u8> = inner.data.iter().copied().collect();
        let wrapped = inner.has_wrapped;
        inner.has_wrapped = false;
        (data, wrapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_under_capacity_concatenate_exactly() {
        let buf = RingBuffer::new(16);
        buf.write(b"abc");
        buf.write(b"def");
        assert_eq!(buf.read_all(), b"abcdef");
        assert!(!buf.has_wrapped());
    }

    #[test]
    fn writes_over_capacity_keep_exact_tail_and_set_wrapped() {
        let buf = RingBuffer::new(4);
        buf.write(b"abcdefgh");
        assert_eq!(buf.read_all(), b"efgh");
        assert!(buf.has_wrapped());
    }

    #[test]
    fn incremental_writes_crossing_capacity_wrap_correctly() {
        let buf = RingBuffer::new(4);
        buf.write(b"ab");
        buf.write(b"cd");
        buf.write(b"ef");
        assert_eq!(buf.read_all(), b"cdef");
        assert!(buf.has_wrapped());
    }

    #[test]
    fn has_wrapped_is_sticky_until_explicitly_cleared() {
        let buf = RingBuffer::new(4);
        buf.write(b"abcdefgh");
        assert!(buf.has_wrapped());
        // A subsequent small write that doesn't itself overflow still
        // observes the sticky flag.
        let _ = buf.read_all();
        assert!(buf.has_wrapped());
    }

    #[test]
    fn single_write_larger_than_capacity_overwrites_whole_buffer() {
        let buf = RingBuffer::new(4);
        buf.write(b"abcdefgh");
        assert_eq!(buf.read_all().len(), 4);
        assert_eq!(buf.read_all(), b"efgh");
    }

    #[test]
    fn snapshot_and_clear_wrapped_resets_flag() {
        let buf = RingBuffer::new(4);
        buf.write(b"abcdefgh");
        let (snap, wrapped) = buf.snapshot_and_clear_wrapped();
        assert_eq!(snap, b"efgh");
        assert!(wrapped);
        assert!(!buf.has_wrapped());
    }
}
