use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::{
    sync::{futures::Notified, mpsc, Notify},
    task::JoinHandle,
};
use tracing::{debug, error, warn};

use crate::{
    pipeline::Pipeline, stats::OutductStats, supervisor::Fault, Bundle, ConvergenceLayer,
    FinalStats, ForwardError, OutductEvent, OutductTelemetry,
};

/// Interval at which `stop` checks whether in-flight bundles drained.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Consecutive checks without progress before `stop` gives up waiting.
const STOP_POLL_ATTEMPTS: usize = 10;

/// State shared between an outduct's handle and its driver task.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) layer: ConvergenceLayer,
    pub(crate) pipeline: Pipeline,
    pub(crate) stats: OutductStats,
    uuid: AtomicU64,
    /// Session established; `forward` accepts bundles.
    ready: AtomicBool,
    /// Transport connected.
    up_physically: AtomicBool,
    /// Set by an external contact plan.
    up_by_schedule: AtomicBool,
    stopping: AtomicBool,
    stop: Notify,
    events: Mutex<Option<mpsc::UnboundedSender<OutductEvent>>>,
}

impl Shared {
    pub(crate) fn new(
        layer: ConvergenceLayer,
        pipeline_depth: usize,
        max_pipeline_bytes: Option<u64>,
    ) -> Self {
        Self {
            layer,
            pipeline: Pipeline::new(pipeline_depth, max_pipeline_bytes),
            stats: OutductStats::default(),
            uuid: AtomicU64::new(0),
            ready: AtomicBool::new(false),
            up_physically: AtomicBool::new(false),
            up_by_schedule: AtomicBool::new(true),
            stopping: AtomicBool::new(false),
            stop: Notify::new(),
            events: Mutex::new(None),
        }
    }

    #[inline]
    pub(crate) fn uuid(&self) -> u64 {
        self.uuid.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Completes once `stop` has been requested.
    pub(crate) fn stopped(&self) -> Notified<'_> {
        self.stop.notified()
    }

    pub(crate) fn request_stop(&self) {
        self.stopping.store(true, Ordering::Release);
        self.stop.notify_one();
    }

    pub(crate) fn set_event_sink(&self, sink: mpsc::UnboundedSender<OutductEvent>) {
        *self.events.lock() = Some(sink);
    }

    pub(crate) fn emit(&self, event: OutductEvent) {
        if let Some(sink) = self.events.lock().as_ref() {
            // A dropped receiver just means nobody is listening
            let _ = sink.send(event);
        }
    }

    /// Marks the transport connected without making the link ready.
    pub(crate) fn transport_up(&self) {
        self.up_physically.store(true, Ordering::Release);
    }

    /// Marks the link up and ready. Emits a link event on transition.
    pub(crate) fn link_up(&self) {
        self.up_physically.store(true, Ordering::Release);
        if !self.ready.swap(true, Ordering::AcqRel) {
            self.emit(OutductEvent::LinkStatus { outduct: self.uuid(), up: true });
        }
    }

    /// Marks the link down and fails everything in the pipeline. Emits a link event on
    /// transition.
    pub(crate) fn link_down(&self) {
        self.up_physically.store(false, Ordering::Release);
        if self.ready.swap(false, Ordering::AcqRel) {
            self.stats.increment_link_down();
            self.emit(OutductEvent::LinkStatus { outduct: self.uuid(), up: false });
        }

        self.fail_all();
    }

    /// Releases every slot and reports each bundle as failed.
    pub(crate) fn fail_all(&self) {
        let outduct = self.uuid();
        for slot in self.pipeline.drain() {
            self.stats.increment_failed();
            debug!(outduct, bytes = slot.bundle.payload.len(), "bundle failed");
            self.emit(OutductEvent::Failed { outduct, bundle: slot.bundle });
        }
    }

    /// Releases the oldest slot once `confirmed` bytes of it were sent or acknowledged.
    ///
    /// A count other than the one recorded when the bundle was queued is a fault; the slot is
    /// then left for [`link_down`](Self::link_down) to fail.
    pub(crate) fn release_front(&self, confirmed: u64) -> Result<(), Fault> {
        let expected = match self.pipeline.front_expected_len() {
            Some(expected) => expected,
            None => {
                warn!(outduct = self.uuid(), confirmed, "Release with an empty pipeline");
                return Ok(());
            }
        };

        if confirmed != expected {
            return Err(Fault::AckMismatch { expected, actual: confirmed });
        }

        if let Some(slot) = self.pipeline.pop() {
            self.stats.increment_acked(slot.bundle.payload.len());
            self.emit(OutductEvent::Sent { outduct: self.uuid(), user_data: slot.bundle.user_data });
        }

        Ok(())
    }
}

/// The part of every outduct that is independent of the convergence layer: the shared state,
/// the driver future before `connect` and the driver task after it.
pub(crate) struct Handle {
    pub(crate) shared: Arc<Shared>,
    driver: Mutex<Option<BoxFuture<'static, ()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("shared", &self.shared)
            .field("connected", &self.task.lock().is_some())
            .finish()
    }
}

impl Handle {
    pub(crate) fn new(shared: Arc<Shared>, driver: BoxFuture<'static, ()>) -> Self {
        Self { shared, driver: Mutex::new(Some(driver)), task: Mutex::new(None) }
    }

    /// Checks readiness and queues the bundle.
    pub(crate) fn forward(&self, bundle: Bundle, expected_len: u64) -> Result<(), ForwardError> {
        if !self.shared.is_ready() {
            return Err(ForwardError::NotReady(bundle));
        }

        self.shared.pipeline.push(bundle, expected_len).map_err(ForwardError::PipelineFull)
    }

    pub(crate) fn connect(&self) {
        let Some(driver) = self.driver.lock().take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => *self.task.lock() = Some(runtime.spawn(driver)),
            Err(e) => error!(outduct = self.shared.uuid(), "Cannot spawn driver: {e}"),
        }
    }

    pub(crate) async fn stop(&self) {
        let running = self.task.lock().is_some();

        if running {
            self.wait_for_drain().await;
        }

        self.shared.request_stop();

        let task = self.task.lock().take();
        match task {
            Some(task) => {
                if let Err(e) = task.await {
                    error!(outduct = self.shared.uuid(), "Driver task failed: {e}");
                }
            }
            None => {
                self.driver.lock().take();
                self.shared.fail_all();
            }
        }
    }

    /// Waits while the unacked count keeps shrinking, giving up after
    /// [`STOP_POLL_ATTEMPTS`] checks without progress.
    async fn wait_for_drain(&self) {
        let mut previous = self.shared.pipeline.len();
        let mut attempts = 0;

        while previous > 0 && attempts < STOP_POLL_ATTEMPTS {
            tokio::time::sleep(STOP_POLL_INTERVAL).await;

            let unacked = self.shared.pipeline.len();
            if unacked < previous {
                attempts = 0;
            } else {
                attempts += 1;
            }
            previous = unacked;
        }

        if previous > 0 {
            warn!(outduct = self.shared.uuid(), unacked = previous, "Stopping with bundles in flight");
        }
    }

    pub(crate) fn total_unacked(&self) -> usize {
        self.shared.pipeline.len()
    }

    pub(crate) fn pipeline_capacity(&self) -> usize {
        self.shared.pipeline.capacity()
    }

    pub(crate) fn final_stats(&self) -> FinalStats {
        FinalStats {
            convergence_layer: self.shared.layer,
            bundles_sent: self.shared.stats.bundles_sent(),
            bundles_acked: self.shared.stats.bundles_acked(),
        }
    }

    pub(crate) fn telemetry(&self) -> OutductTelemetry {
        let shared = &self.shared;
        let mut telemetry = OutductTelemetry::new(shared.uuid(), shared.layer);

        telemetry.link_up_physically = shared.up_physically.load(Ordering::Acquire);
        telemetry.link_up_by_schedule = shared.up_by_schedule.load(Ordering::Acquire);
        telemetry.ready_to_forward = shared.is_ready();
        telemetry.unacked = shared.pipeline.len();
        telemetry.unacked_bytes = shared.pipeline.bytes();
        telemetry.pipeline_capacity = shared.pipeline.capacity();
        shared.stats.snapshot(&mut telemetry);

        telemetry
    }

    pub(crate) fn set_event_sink(&self, sink: mpsc::UnboundedSender<OutductEvent>) {
        self.shared.set_event_sink(sink);
    }

    pub(crate) fn set_uuid(&self, uuid: u64) {
        self.shared.uuid.store(uuid, Ordering::Relaxed);
    }

    pub(crate) fn set_link_up_by_schedule(&self, up: bool) {
        self.shared.up_by_schedule.store(up, Ordering::Release);
    }
}

/// Implements the synchronous [`Outduct`](crate::Outduct) methods that only forward to the
/// binding's `handle` field. `stop` stays hand-written so `async_trait` sees it.
macro_rules! delegate_to_handle {
    () => {
        fn ready_to_forward(&self) -> bool {
            self.handle.shared.is_ready()
        }

        fn connect(&self) {
            self.handle.connect();
        }

        fn total_unacked(&self) -> usize {
            self.handle.total_unacked()
        }

        fn pipeline_capacity(&self) -> usize {
            self.handle.pipeline_capacity()
        }

        fn final_stats(&self) -> $crate::FinalStats {
            self.handle.final_stats()
        }

        fn telemetry(&self) -> $crate::OutductTelemetry {
            self.handle.telemetry()
        }

        fn set_event_sink(&self, sink: tokio::sync::mpsc::UnboundedSender<$crate::OutductEvent>) {
            self.handle.set_event_sink(sink);
        }

        fn uuid(&self) -> u64 {
            self.handle.shared.uuid()
        }

        fn set_uuid(&self, uuid: u64) {
            self.handle.set_uuid(uuid);
        }

        fn set_link_up_by_schedule(&self, up: bool) {
            self.handle.set_link_up_by_schedule(up);
        }
    };
}

pub(crate) use delegate_to_handle;
