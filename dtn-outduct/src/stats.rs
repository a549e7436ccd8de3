use std::sync::atomic::{AtomicUsize, Ordering};

use crate::ConvergenceLayer;

/// Counters of one outduct. Written by the driver task, read by anyone.
#[derive(Debug, Default)]
pub(crate) struct OutductStats {
    /// Bundles fully written to the transport
    bundles_sent: AtomicUsize,
    /// Payload bytes fully written to the transport
    bytes_sent: AtomicUsize,
    /// Bundles released from the pipeline
    bundles_acked: AtomicUsize,
    bytes_acked: AtomicUsize,
    /// Bundles dropped after a fault or on stop
    bundles_failed: AtomicUsize,
    /// Header bytes written in front of payloads
    framing_bytes_sent: AtomicUsize,
    fragments_sent: AtomicUsize,
    fragments_acked: AtomicUsize,
    keepalives_sent: AtomicUsize,
    keepalives_received: AtomicUsize,
    bundles_received: AtomicUsize,
    bytes_received: AtomicUsize,
    link_down_events: AtomicUsize,
}

impl OutductStats {
    #[inline]
    pub(crate) fn increment_sent(&self, bytes: usize) {
        self.bundles_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_acked(&self, bytes: usize) {
        self.bundles_acked.fetch_add(1, Ordering::Relaxed);
        self.bytes_acked.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_failed(&self) {
        self.bundles_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_framing(&self, bytes: usize) {
        self.framing_bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_fragments_sent(&self) {
        self.fragments_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_fragments_acked(&self) {
        self.fragments_acked.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_keepalives_sent(&self) {
        self.keepalives_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_keepalives_received(&self) {
        self.keepalives_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_received(&self, bytes: usize) {
        self.bundles_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_link_down(&self) {
        self.link_down_events.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn bundles_sent(&self) -> usize {
        self.bundles_sent.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn bundles_acked(&self) -> usize {
        self.bundles_acked.load(Ordering::Relaxed)
    }

    /// Fills the counter fields of a telemetry record.
    pub(crate) fn snapshot(&self, telemetry: &mut OutductTelemetry) {
        telemetry.bundles_sent = self.bundles_sent.load(Ordering::Relaxed);
        telemetry.bytes_sent = self.bytes_sent.load(Ordering::Relaxed);
        telemetry.bundles_acked = self.bundles_acked.load(Ordering::Relaxed);
        telemetry.bytes_acked = self.bytes_acked.load(Ordering::Relaxed);
        telemetry.bundles_failed = self.bundles_failed.load(Ordering::Relaxed);
        telemetry.framing_bytes_sent = self.framing_bytes_sent.load(Ordering::Relaxed);
        telemetry.fragments_sent = self.fragments_sent.load(Ordering::Relaxed);
        telemetry.fragments_acked = self.fragments_acked.load(Ordering::Relaxed);
        telemetry.keepalives_sent = self.keepalives_sent.load(Ordering::Relaxed);
        telemetry.keepalives_received = self.keepalives_received.load(Ordering::Relaxed);
        telemetry.bundles_received = self.bundles_received.load(Ordering::Relaxed);
        telemetry.bytes_received = self.bytes_received.load(Ordering::Relaxed);
        telemetry.link_down_events = self.link_down_events.load(Ordering::Relaxed);
    }
}

/// Totals reported once an outduct has stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalStats {
    pub convergence_layer: ConvergenceLayer,
    /// Bundles fully written to the transport.
    pub bundles_sent: usize,
    /// Bundles confirmed and released from the pipeline.
    pub bundles_acked: usize,
}

/// A point-in-time view of an outduct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutductTelemetry {
    pub uuid: u64,
    pub convergence_layer: ConvergenceLayer,
    /// UNIX timestamp in microseconds.
    pub timestamp: u64,
    /// The transport is connected.
    pub link_up_physically: bool,
    /// The contact plan allows the link to be used.
    pub link_up_by_schedule: bool,
    pub ready_to_forward: bool,
    /// Bundles in the pipeline, sent or not, awaiting confirmation.
    pub unacked: usize,
    /// Payload bytes of the unacked bundles.
    pub unacked_bytes: u64,
    pub pipeline_capacity: usize,
    pub bundles_sent: usize,
    /// Payload bytes only, see `framing_bytes_sent`.
    pub bytes_sent: usize,
    pub bundles_acked: usize,
    pub bytes_acked: usize,
    /// Bundles returned through [`OutductEvent::Failed`](crate::OutductEvent).
    pub bundles_failed: usize,
    /// Convergence layer headers written around payloads.
    pub framing_bytes_sent: usize,
    /// TCPCL data segments.
    pub fragments_sent: usize,
    pub fragments_acked: usize,
    pub keepalives_sent: usize,
    pub keepalives_received: usize,
    /// Bundles received opportunistically from the peer.
    pub bundles_received: usize,
    pub bytes_received: usize,
    /// Transitions from ready to not ready.
    pub link_down_events: usize,
}

impl OutductTelemetry {
    pub(crate) fn new(uuid: u64, convergence_layer: ConvergenceLayer) -> Self {
        Self {
            uuid,
            convergence_layer,
            timestamp: dtn_common::unix_micros(),
            link_up_physically: false,
            link_up_by_schedule: true,
            ready_to_forward: false,
            unacked: 0,
            unacked_bytes: 0,
            pipeline_capacity: 0,
            bundles_sent: 0,
            bytes_sent: 0,
            bundles_acked: 0,
            bytes_acked: 0,
            bundles_failed: 0,
            framing_bytes_sent: 0,
            fragments_sent: 0,
            fragments_acked: 0,
            keepalives_sent: 0,
            keepalives_received: 0,
            bundles_received: 0,
            bytes_received: 0,
            link_down_events: 0,
        }
    }
}
