use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use dtn_common::PipelineQueue;
use parking_lot::Mutex;
use tokio::sync::{futures::Notified, Notify};

use crate::Bundle;

/// A bundle accepted into the pipeline.
#[derive(Debug)]
pub(crate) struct InFlight {
    pub(crate) bundle: Bundle,
    /// The byte count that confirms this bundle: bytes on the wire for locally confirmed layers,
    /// the final cumulative ack for TCPCL.
    pub(crate) expected_len: u64,
}

/// The in-flight slots of one outduct, indexed by a [`PipelineQueue`].
///
/// Producers (any thread calling `forward`) are serialised by `producer`, so the queue sees a
/// single producer. The driver task is the only consumer. Slot mutexes are never contended:
/// the queue's index protocol hands each slot to exactly one side at a time.
///
/// Besides the slot count, the payload bytes held are capped at `max_bytes`. An empty pipeline
/// accepts a bundle of any size.
#[derive(Debug)]
pub(crate) struct Pipeline {
    queue: PipelineQueue,
    slots: Box<[Mutex<Option<InFlight>>]>,
    producer: Mutex<()>,
    max_bytes: u64,
    /// Payload bytes of all unreleased slots.
    bytes: AtomicU64,
    /// Wakes the driver when a slot is published.
    notify: Notify,
}

impl Pipeline {
    pub(crate) fn new(capacity: usize, max_bytes: Option<u64>) -> Self {
        let queue = PipelineQueue::new(capacity.max(1));
        let slots = (0..queue.ring_len()).map(|_| Mutex::new(None)).collect();

        Self {
            queue,
            slots,
            producer: Mutex::new(()),
            max_bytes: max_bytes.unwrap_or(u64::MAX),
            bytes: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    /// Payload bytes held by unreleased slots.
    #[inline]
    pub(crate) fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Acquire)
    }

    /// Publishes a bundle and wakes the driver. Returns the bundle if every slot is taken or it
    /// would take the pipeline over its byte limit.
    pub(crate) fn push(&self, bundle: Bundle, expected_len: u64) -> Result<(), Bundle> {
        let guard = self.producer.lock();

        let len = bundle.payload.len() as u64;
        let held = self.bytes();
        if held > 0 && held.saturating_add(len) > self.max_bytes {
            return Err(bundle);
        }

        let Some(index) = self.queue.try_acquire_write() else {
            return Err(bundle);
        };

        self.bytes.fetch_add(len, Ordering::AcqRel);
        *self.slots[index].lock() = Some(InFlight { bundle, expected_len });
        self.queue.commit_write();
        drop(guard);

        self.notify.notify_one();
        Ok(())
    }

    /// Completes when a bundle was pushed since the last time this resolved.
    pub(crate) fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    /// Returns the oldest unreleased slot index.
    #[inline]
    pub(crate) fn read_index(&self) -> usize {
        self.queue.read_index()
    }

    /// Returns the index one past the newest published slot.
    #[inline]
    pub(crate) fn write_index(&self) -> usize {
        self.queue.write_index()
    }

    #[inline]
    pub(crate) fn next_index(&self, index: usize) -> usize {
        self.queue.next_index(index)
    }

    /// Returns the payload stored at a published, unreleased `index`.
    pub(crate) fn payload(&self, index: usize) -> Option<Bytes> {
        self.slots[index].lock().as_ref().map(|slot| slot.bundle.payload.clone())
    }

    /// Returns the index and payload of the oldest unreleased slot.
    pub(crate) fn front(&self) -> Option<(usize, Bytes)> {
        let index = self.queue.try_acquire_read()?;
        self.payload(index).map(|payload| (index, payload))
    }

    /// Returns the expected confirmation count of the oldest unreleased slot.
    pub(crate) fn front_expected_len(&self) -> Option<u64> {
        let index = self.queue.try_acquire_read()?;
        self.slots[index].lock().as_ref().map(|slot| slot.expected_len)
    }

    /// Releases the oldest slot.
    pub(crate) fn pop(&self) -> Option<InFlight> {
        let index = self.queue.try_acquire_read()?;
        let slot = self.slots[index].lock().take();
        if let Some(slot) = slot.as_ref() {
            self.bytes.fetch_sub(slot.bundle.payload.len() as u64, Ordering::AcqRel);
        }
        self.queue.commit_read();

        slot
    }

    /// Releases every published slot, oldest first.
    pub(crate) fn drain(&self) -> Vec<InFlight> {
        std::iter::from_fn(|| self.pop()).collect()
    }
}
