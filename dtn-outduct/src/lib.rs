//! Convergence-layer outducts.
//!
//! An outduct owns one outbound link to a next-hop node and moves opaque bundles over it with
//! a bounded number of sends in flight. Four bindings are provided:
//!
//! - [`TcpclOutduct`]: TCPCL v3 with cumulative per-segment acknowledgments.
//! - [`StcpOutduct`]: 4-byte length-prefixed frames over TCP.
//! - [`UdpOutduct`]: one bundle per datagram, paced by a token bucket.
//! - [`LocalStreamOutduct`]: CCSDS-encapsulated bundles over a Unix stream socket.
//!
//! All bindings implement [`Outduct`]. Outcomes are reported asynchronously through
//! [`OutductEvent`]s on the channel installed with [`Outduct::set_event_sink`], and an
//! [`OutductRegistry`] maps destination endpoint IDs to outducts.

use async_trait::async_trait;
use bytes::Bytes;
use dtn_common::Eid;
use thiserror::Error;
use tokio::sync::mpsc;

mod config;
pub use config::*;

mod handle;
mod pipeline;

mod stats;
pub use stats::{FinalStats, OutductTelemetry};

mod supervisor;
pub use supervisor::{Backoff, ExponentialBackoff, ReconnectOptions};

pub mod local;
pub use local::{LocalStreamOptions, LocalStreamOutduct};

pub mod stcp;
pub use stcp::{StcpOptions, StcpOutduct};

pub mod tcpcl;
pub use tcpcl::{TcpclOptions, TcpclOutduct};

pub mod udp;
pub use udp::{UdpOptions, UdpOutduct};

mod registry;
pub use registry::*;

/// A bundle handed to an outduct, together with opaque caller data that is returned in the
/// matching [`OutductEvent`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bundle {
    pub payload: Bytes,
    pub user_data: Bytes,
}

impl Bundle {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self { payload: payload.into(), user_data: Bytes::new() }
    }

    /// Attaches caller data that is echoed back on success or failure.
    pub fn with_user_data(mut self, user_data: impl Into<Bytes>) -> Self {
        self.user_data = user_data.into();
        self
    }
}

/// Synchronous rejection of [`Outduct::forward`]. Every variant hands the bundle back.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("Link is not ready to forward")]
    NotReady(Bundle),
    #[error("Pipeline is full")]
    PipelineFull(Bundle),
    #[error("Bundle of {} bytes cannot be framed by this convergence layer", .0.payload.len())]
    TooLarge(Bundle),
    #[error("Empty bundles cannot be framed by this convergence layer")]
    Empty(Bundle),
    #[error("No outduct for destination {0}")]
    NoRoute(Eid, Bundle),
}

impl ForwardError {
    /// Returns the rejected bundle.
    pub fn into_bundle(self) -> Bundle {
        match self {
            Self::NotReady(bundle) |
            Self::PipelineFull(bundle) |
            Self::TooLarge(bundle) |
            Self::Empty(bundle) |
            Self::NoRoute(_, bundle) => bundle,
        }
    }
}

/// Asynchronous outcome reported by an outduct's driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutductEvent {
    /// The bundle was fully sent (and acknowledged, where the layer acknowledges).
    Sent { outduct: u64, user_data: Bytes },
    /// The bundle was dropped because the link failed or the outduct stopped.
    Failed { outduct: u64, bundle: Bundle },
    /// The link came up or went down.
    LinkStatus { outduct: u64, up: bool },
    /// A bundle was received from the peer over the outbound link.
    Received { outduct: u64, bundle: Bundle },
}

/// A convergence-layer outduct.
///
/// `forward` never blocks: it either accepts the bundle into the pipeline or hands it back.
/// Each outduct runs one driver task, spawned by [`connect`](Outduct::connect), which owns
/// the connection and reconnects on failure.
#[async_trait]
pub trait Outduct: Send + Sync + 'static {
    fn convergence_layer(&self) -> ConvergenceLayer;

    /// Queues a bundle for sending.
    fn forward(&self, bundle: Bundle) -> Result<(), ForwardError>;

    /// Returns `true` if the link is up and [`forward`](Outduct::forward) may accept bundles.
    fn ready_to_forward(&self) -> bool;

    /// Spawns the driver task on the current tokio runtime. Subsequent calls do nothing.
    fn connect(&self);

    /// Waits a bounded time for in-flight bundles to drain, then shuts the link down and joins
    /// the driver. Bundles still in flight are reported as failed.
    async fn stop(&self);

    /// Number of bundles accepted but not yet released.
    fn total_unacked(&self) -> usize;

    fn pipeline_capacity(&self) -> usize;

    fn final_stats(&self) -> FinalStats;

    fn telemetry(&self) -> OutductTelemetry;

    /// Installs the channel that receives this outduct's [`OutductEvent`]s.
    fn set_event_sink(&self, sink: mpsc::UnboundedSender<OutductEvent>);

    fn uuid(&self) -> u64;

    fn set_uuid(&self, uuid: u64);

    /// Marks the link up or down according to an external contact plan. Telemetry only.
    fn set_link_up_by_schedule(&self, up: bool);
}

impl std::fmt::Debug for dyn Outduct {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outduct")
            .field("uuid", &self.uuid())
            .field("convergence_layer", &self.convergence_layer())
            .finish()
    }
}
