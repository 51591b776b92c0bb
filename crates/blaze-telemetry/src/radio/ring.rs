//! Fixed-capacity ring buffers for the radio link.
//!
//! Both rings keep one slot unused: the ring is empty when the read and write
//! indices are equal and full when advancing the write index would make them
//! equal.
//!
//! [`RxRing`] is shared between one producer (the byte-arrival callback, via an
//! [`RxProducer`]) and one consumer (the control loop). The write index is only
//! stored by the producer and the read index only by the consumer, so atomics
//! with acquire/release ordering are enough and no lock is taken.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

/// Receive ring shared with the byte-arrival context.
#[derive(Debug)]
pub struct RxRing {
    slots: Box<[AtomicU8]>,
    write: AtomicUsize,
    read: AtomicUsize,
}

impl RxRing {
    /// Create a ring with `capacity` slots, `capacity - 1` of them usable.
    ///
    /// A capacity below 2 is raised to 2.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            slots: (0..capacity).map(|_| AtomicU8::new(0)).collect(),
            write: AtomicUsize::new(0),
            read: AtomicUsize::new(0),
        }
    }

    /// Number of slots, including the one that is never filled.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Bytes waiting to be read.
    #[must_use]
    pub fn len(&self) -> usize {
        let write = self.write.load(Ordering::Acquire);
        let read = self.read.load(Ordering::Acquire);
        if write >= read {
            write - read
        } else {
            self.capacity() - (read - write)
        }
    }

    /// True when no bytes are waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when the next push would be dropped.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity() - 1
    }

    /// Producer side: store one byte, or drop it if the ring is full.
    fn push(&self, byte: u8) -> bool {
        let write = self.write.load(Ordering::Relaxed);
        let next = (write + 1) % self.capacity();
        if next == self.read.load(Ordering::Acquire) {
            return false;
        }
        self.slots[write].store(byte, Ordering::Relaxed);
        self.write.store(next, Ordering::Release);
        true
    }

    /// Consumer side: copy up to `buf.len()` bytes out, advancing the read index.
    pub(crate) fn read_into(&self, buf: &mut [u8]) -> usize {
        let mut read = self.read.load(Ordering::Relaxed);
        let write = self.write.load(Ordering::Acquire);
        let mut count = 0;
        while count < buf.len() && read != write {
            buf[count] = self.slots[read].load(Ordering::Relaxed);
            read = (read + 1) % self.capacity();
            count += 1;
        }
        self.read.store(read, Ordering::Release);
        count
    }

    /// Length of the first CR LF terminated frame, delimiter included, or 0.
    ///
    /// Scans without consuming and follows the ring across the wrap point.
    #[must_use]
    pub fn first_frame_length(&self) -> usize {
        let read = self.read.load(Ordering::Relaxed);
        let available = self.len();
        if available < 2 {
            return 0;
        }
        let at = |offset: usize| self.slots[(read + offset) % self.capacity()].load(Ordering::Relaxed);
        (0..available - 1)
            .find(|&i| at(i) == b'\r' && at(i + 1) == b'\n')
            .map_or(0, |i| i + 2)
    }
}

/// Handle for the byte-arrival context.
///
/// Only one producer may push at a time; clones exist so the handle can be
/// moved into a callback while the link keeps its own.
#[derive(Debug, Clone)]
pub struct RxProducer {
    ring: Arc<RxRing>,
}

impl RxProducer {
    pub(crate) fn new(ring: Arc<RxRing>) -> Self {
        Self { ring }
    }

    /// Store a received byte. Returns false if it was dropped because the ring is full.
    pub fn push(&self, byte: u8) -> bool {
        self.ring.push(byte)
    }
}

/// Transmit ring, touched only by the control loop.
#[derive(Debug)]
pub struct TxRing {
    slots: Box<[u8]>,
    write: usize,
    read: usize,
}

impl TxRing {
    /// Create a ring with `capacity` slots, `capacity - 1` of them usable.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![0; capacity.max(2)].into_boxed_slice(),
            write: 0,
            read: 0,
        }
    }

    /// Bytes waiting to be sent.
    #[must_use]
    pub fn len(&self) -> usize {
        if self.write >= self.read {
            self.write - self.read
        } else {
            self.slots.len() - (self.read - self.write)
        }
    }

    /// True when nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.write == self.read
    }

    /// Free space in bytes.
    #[must_use]
    pub fn free(&self) -> usize {
        self.slots.len() - 1 - self.len()
    }

    /// Append `bytes`. The caller makes room first; excess bytes are not stored.
    pub fn extend(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.free());
        for &byte in &bytes[..n] {
            self.slots[self.write] = byte;
            self.write = (self.write + 1) % self.slots.len();
        }
        n
    }

    /// Pending bytes in order, as at most two slices.
    #[must_use]
    pub fn as_slices(&self) -> (&[u8], &[u8]) {
        if self.write >= self.read {
            (&self.slots[self.read..self.write], &[])
        } else {
            (&self.slots[self.read..], &self.slots[..self.write])
        }
    }

    /// Discard everything pending.
    pub fn clear(&mut self) {
        self.read = self.write;
    }
}
