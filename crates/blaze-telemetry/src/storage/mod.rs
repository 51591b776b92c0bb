//! Two-tier buffered storage with priority-ordered deferred writes.
//!
//! The store owns two fixed-capacity accumulation buffers, each in front of its
//! own [`ByteSink`]:
//!
//! - **primary** for telemetry frames, fed directly or through the priority queue
//! - **archival** for the CSV flight log (see [`archive`])
//!
//! Sink failures are reported to the caller, but the failing buffer is always
//! emptied first. Losing a buffer's worth of data is preferred over writing a
//! half-flushed buffer twice.

pub mod archive;

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fmt;
use std::io::{self, Seek, SeekFrom, Write};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::config::StorageConfig;
use crate::error::{Error, Result};

/// Which of the two storage buffers an operation concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Telemetry frames.
    Primary,
    /// The CSV flight log.
    Archival,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Primary => "primary",
            Self::Archival => "archival",
        })
    }
}

/// Write priority. Lower values are served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Priority {
    /// Drained and flushed on the same tick.
    Mandatory = 0,
    /// Next after mandatory.
    Urgent = 1,
    /// Above routine telemetry.
    Important = 2,
    /// Routine telemetry.
    Standard = 3,
    /// Below routine telemetry.
    Unimportant = 4,
    /// Written when nothing else is waiting.
    Optional = 5,
}

impl TryFrom<u8> for Priority {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => Self::Mandatory,
            1 => Self::Urgent,
            2 => Self::Important,
            3 => Self::Standard,
            4 => Self::Unimportant,
            5 => Self::Optional,
            other => return Err(Error::InvalidPriority(other)),
        })
    }
}

/// Destination for a storage tier: anything that can be written, flushed and
/// measured.
///
/// Implemented for every `Write + Seek` type, so files and in-memory cursors
/// work directly.
pub trait ByteSink {
    /// Write all of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error, including short writes.
    fn put(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Push written bytes to the medium.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    fn sync(&mut self) -> io::Result<()>;

    /// Current length of the sink in bytes.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    fn size(&mut self) -> io::Result<u64>;
}

impl<T: Write + Seek> ByteSink for T {
    fn put(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_all(bytes)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.flush()
    }

    fn size(&mut self) -> io::Result<u64> {
        self.seek(SeekFrom::End(0))
    }
}

/// A fixed-capacity accumulation buffer in front of one sink.
#[derive(Debug)]
struct TieredBuffer<S> {
    tier: Tier,
    capacity: usize,
    data: Vec<u8>,
    sink: S,
}

impl<S: ByteSink> TieredBuffer<S> {
    fn new(tier: Tier, capacity: usize, sink: S) -> Self {
        Self {
            tier,
            capacity,
            data: Vec::with_capacity(capacity),
            sink,
        }
    }

    /// Fill what fits, then flush and continue until every byte is placed.
    fn append(&mut self, bytes: &[u8]) -> Result<()> {
        let room = self.capacity - self.data.len();
        let (head, mut rest) = bytes.split_at(room.min(bytes.len()));
        self.data.extend_from_slice(head);

        while !rest.is_empty() {
            self.flush()?;
            let (chunk, tail) = rest.split_at(self.capacity.min(rest.len()));
            self.data.extend_from_slice(chunk);
            rest = tail;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.data.is_empty() {
            return Ok(());
        }
        let written = self.data.len();
        let outcome = self.sink.put(&self.data).and_then(|()| self.sink.sync());
        self.data.clear();

        match outcome {
            Ok(()) => {
                trace!(tier = %self.tier, bytes = written, "buffer flushed");
                Ok(())
            }
            Err(source) => {
                warn!(tier = %self.tier, bytes = written, error = %source, "sink write failed, buffer dropped");
                Err(Error::sink(self.tier, source))
            }
        }
    }
}

/// A deferred write waiting in the priority queue.
#[derive(Debug)]
struct QueuedWrite {
    priority: Priority,
    order: u64,
    data: Vec<u8>,
}

impl PartialEq for QueuedWrite {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.order == other.order
    }
}

impl Eq for QueuedWrite {}

impl PartialOrd for QueuedWrite {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedWrite {
    // Priority first; equal priorities keep insertion order.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then(self.order.cmp(&other.order))
    }
}

/// Dual-tier buffered store.
#[derive(Debug)]
pub struct PriorityBufferedStore<P, A> {
    primary: TieredBuffer<P>,
    archival: TieredBuffer<A>,
    queue: BinaryHeap<Reverse<QueuedWrite>>,
    next_order: u64,
}

impl<P: ByteSink, A: ByteSink> PriorityBufferedStore<P, A> {
    /// Create a store with the given buffer capacities.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigValidation`] if either capacity is zero.
    pub fn new(primary: P, archival: A, config: &StorageConfig) -> Result<Self> {
        if config.primary_capacity == 0 || config.archival_capacity == 0 {
            return Err(Error::config("storage buffer capacities must be non-zero"));
        }
        Ok(Self {
            primary: TieredBuffer::new(Tier::Primary, config.primary_capacity, primary),
            archival: TieredBuffer::new(Tier::Archival, config.archival_capacity, archival),
            queue: BinaryHeap::new(),
            next_order: 0,
        })
    }

    /// Append to the primary buffer, flushing it as often as needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Sink`] if an intermediate flush fails. Bytes not yet
    /// placed are discarded.
    pub fn buffer_primary(&mut self, bytes: &[u8]) -> Result<()> {
        self.primary.append(bytes)
    }

    /// Append to the archival buffer, flushing it as often as needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Sink`] if an intermediate flush fails.
    pub fn buffer_archival(&mut self, bytes: &[u8]) -> Result<()> {
        self.archival.append(bytes)
    }

    /// Write out and empty the primary buffer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Sink`] on failure; the buffer is empty either way.
    pub fn flush_primary(&mut self) -> Result<()> {
        self.primary.flush()
    }

    /// Write out and empty the archival buffer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Sink`] on failure; the buffer is empty either way.
    pub fn flush_archival(&mut self) -> Result<()> {
        self.archival.flush()
    }

    /// Queue a copy of `bytes` for a later [`tick`](Self::tick). Empty input is ignored.
    pub fn enqueue(&mut self, priority: Priority, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.queue.push(Reverse(QueuedWrite {
            priority,
            order: self.next_order,
            data: bytes.to_vec(),
        }));
        self.next_order += 1;
    }

    /// Drain every queued write at the best priority present into the primary
    /// buffer. Mandatory writes are flushed immediately.
    ///
    /// Returns how many writes were drained.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Sink`] if buffering or the mandatory flush fails.
    /// Writes already popped are not requeued.
    pub fn tick(&mut self) -> Result<usize> {
        let Some(Reverse(head)) = self.queue.peek() else {
            return Ok(0);
        };
        let level = head.priority;

        let mut drained = 0;
        while self
            .queue
            .peek()
            .is_some_and(|Reverse(next)| next.priority == level)
        {
            if let Some(Reverse(write)) = self.queue.pop() {
                self.primary.append(&write.data)?;
                drained += 1;
            }
        }

        if level == Priority::Mandatory {
            self.primary.flush()?;
        }
        debug!(?level, drained, "storage tick");
        Ok(drained)
    }

    /// Drain the whole queue and flush both tiers.
    ///
    /// Every step is attempted; the first error is returned.
    ///
    /// # Errors
    ///
    /// Returns the first [`Error::Sink`] encountered.
    pub fn sync(&mut self) -> Result<()> {
        let mut first_error = None;
        while let Some(Reverse(write)) = self.queue.pop() {
            if let Err(err) = self.primary.append(&write.data) {
                first_error.get_or_insert(err);
            }
        }
        for outcome in [self.primary.flush(), self.archival.flush()] {
            if let Err(err) = outcome {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Write the CSV header into the archival tier if nothing has been logged yet.
    ///
    /// Returns whether the header was written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Sink`] if the archival sink cannot be measured.
    pub fn ensure_archival_header(&mut self) -> Result<bool> {
        if !self.archival.data.is_empty() {
            return Ok(false);
        }
        let size = self
            .archival
            .sink
            .size()
            .map_err(|e| Error::sink(Tier::Archival, e))?;
        if size > 0 {
            return Ok(false);
        }
        self.archival.append(archive::HEADER.as_bytes())?;
        Ok(true)
    }

    /// Number of writes waiting in the queue.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Bytes currently held in a tier's buffer.
    #[must_use]
    pub fn buffered(&self, tier: Tier) -> usize {
        match tier {
            Tier::Primary => self.primary.data.len(),
            Tier::Archival => self.archival.data.len(),
        }
    }

    /// The primary sink.
    #[must_use]
    pub fn primary_sink(&self) -> &P {
        &self.primary.sink
    }

    /// The archival sink.
    #[must_use]
    pub fn archival_sink(&self) -> &A {
        &self.archival.sink
    }

    /// Give back both sinks. Buffered and queued data is dropped.
    pub fn into_sinks(self) -> (P, A) {
        (self.primary.sink, self.archival.sink)
    }
}
