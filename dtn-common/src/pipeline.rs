use std::sync::atomic::{AtomicUsize, Ordering};

/// A fixed-capacity, index-only circular queue used to bound the number of bundles in flight.
///
/// The queue never stores data itself: it hands out slot indices into a caller-owned array of
/// the same [`ring_len`](Self::ring_len). Exactly one producer calls the write pair
/// ([`try_acquire_write`](Self::try_acquire_write) + [`commit_write`](Self::commit_write)) and
/// exactly one consumer calls the read pair ([`try_acquire_read`](Self::try_acquire_read) +
/// [`commit_read`](Self::commit_read)). Each index is only ever stored by its own side, so no
/// lock is needed: the producer publishes `end` with `Release` after the slot is fully written
/// and the consumer publishes `begin` with `Release` after the slot is fully consumed.
///
/// One ring position is kept empty to tell "full" from "empty", so a queue created with
/// `capacity` N allocates N + 1 positions and accepts exactly N outstanding writes.
#[derive(Debug)]
pub struct PipelineQueue {
    /// Number of ring positions (capacity + 1).
    ring_len: usize,
    /// Oldest committed, not yet read position. Only stored by the consumer.
    begin: AtomicUsize,
    /// Next position to write. Only stored by the producer.
    end: AtomicUsize,
}

impl PipelineQueue {
    /// Creates a new queue that accepts `capacity` outstanding entries.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "pipeline capacity must be non-zero");

        Self { ring_len: capacity + 1, begin: AtomicUsize::new(0), end: AtomicUsize::new(0) }
    }

    /// Returns the number of entries the queue accepts before reporting full.
    #[inline]
    pub const fn capacity(&self) -> usize {
        self.ring_len - 1
    }

    /// Returns the number of ring positions. Slot arrays indexed by this queue must be this long.
    #[inline]
    pub const fn ring_len(&self) -> usize {
        self.ring_len
    }

    /// Returns the position following `index`, wrapping around the ring.
    #[inline]
    pub const fn next_index(&self, index: usize) -> usize {
        (index + 1) % self.ring_len
    }

    /// Producer side: returns the slot index to fill next, or `None` if the queue is full.
    /// The index stays reserved until [`commit_write`](Self::commit_write) is called.
    #[inline]
    pub fn try_acquire_write(&self) -> Option<usize> {
        let end = self.end.load(Ordering::Relaxed);
        let begin = self.begin.load(Ordering::Acquire);

        if self.next_index(end) == begin {
            None
        } else {
            Some(end)
        }
    }

    /// Producer side: publishes the slot returned by the last successful
    /// [`try_acquire_write`](Self::try_acquire_write).
    #[inline]
    pub fn commit_write(&self) {
        let end = self.end.load(Ordering::Relaxed);
        self.end.store(self.next_index(end), Ordering::Release);
    }

    /// Consumer side: returns the index of the oldest published slot, or `None` if the queue is
    /// empty. The slot stays owned by the queue until [`commit_read`](Self::commit_read).
    #[inline]
    pub fn try_acquire_read(&self) -> Option<usize> {
        let begin = self.begin.load(Ordering::Relaxed);
        let end = self.end.load(Ordering::Acquire);

        if begin == end {
            None
        } else {
            Some(begin)
        }
    }

    /// Consumer side: releases the slot returned by the last successful
    /// [`try_acquire_read`](Self::try_acquire_read).
    #[inline]
    pub fn commit_read(&self) {
        let begin = self.begin.load(Ordering::Relaxed);
        self.begin.store(self.next_index(begin), Ordering::Release);
    }

    /// Returns the index of the oldest unreleased slot. Exact on the consumer side.
    #[inline]
    pub fn read_index(&self) -> usize {
        self.begin.load(Ordering::Acquire)
    }

    /// Returns the index one past the newest published slot, as seen by the consumer.
    ///
    /// Used by consumers that walk published-but-unreleased slots with a cursor of their own
    /// (e.g. entries already written to the wire but still awaiting a remote acknowledgment).
    #[inline]
    pub fn write_index(&self) -> usize {
        self.end.load(Ordering::Acquire)
    }

    /// Returns the number of published, unreleased entries.
    #[inline]
    pub fn len(&self) -> usize {
        let begin = self.begin.load(Ordering::Acquire);
        let end = self.end.load(Ordering::Acquire);

        (end + self.ring_len - begin) % self.ring_len
    }

    /// Returns `true` if there are no published, unreleased entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the next [`try_acquire_write`](Self::try_acquire_write) would fail.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }
}
