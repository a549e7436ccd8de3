//! TCPCL v3 outduct.
//!
//! After the contact header exchange, every bundle is written as one or more data segments.
//! The peer acknowledges each segment with the cumulative number of payload bytes it received
//! for the bundle, and a bundle leaves the pipeline once its final segment is acknowledged.

use std::time::Duration;

use dtn_common::Eid;
use dtn_transport::HostPort;
use dtn_wire::tcpcl::DEFAULT_MAX_RX_BUNDLE_SIZE;

use crate::{OutductConfig, ReconnectOptions, DEFAULT_PIPELINE_DEPTH};

mod driver;
mod outduct;
pub use outduct::TcpclOutduct;

/// Time allowed for writing a SHUTDOWN message before the connection is closed anyway.
const SHUTDOWN_WRITE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct TcpclOptions {
    pub remote: HostPort,
    /// Our node number, sent as `ipn:<node>.0` in the contact header.
    pub local_node_id: u64,
    /// The EID the peer must present in its contact header.
    pub expected_remote_eid: Option<Eid>,
    /// Keepalive interval in seconds we offer. Zero disables keepalives.
    pub keepalive_interval: u16,
    /// Split bundles into data segments of at most this many bytes.
    pub max_fragment_size: Option<usize>,
    /// Largest bundle accepted from the peer.
    pub max_rx_bundle_size: u64,
    /// Reconnect delay we request from the peer when shutting down.
    pub shutdown_reconnect_delay_secs: u32,
    /// Deliver bundles sent by the peer as [`OutductEvent::Received`](crate::OutductEvent).
    pub allow_opportunistic_receive: bool,
    pub pipeline_depth: usize,
    /// Cap on the payload bytes held in the pipeline, unlimited when `None`.
    pub max_pipeline_bytes: Option<u64>,
    pub reconnect: ReconnectOptions,
}

impl TcpclOptions {
    pub fn new(remote: HostPort, local_node_id: u64) -> Self {
        Self {
            remote,
            local_node_id,
            expected_remote_eid: None,
            keepalive_interval: 15,
            max_fragment_size: None,
            max_rx_bundle_size: DEFAULT_MAX_RX_BUNDLE_SIZE,
            shutdown_reconnect_delay_secs: 3,
            allow_opportunistic_receive: false,
            pipeline_depth: DEFAULT_PIPELINE_DEPTH,
            max_pipeline_bytes: None,
            reconnect: ReconnectOptions::default(),
        }
    }

    pub fn with_local_node_id(mut self, node_id: u64) -> Self {
        self.local_node_id = node_id;
        self
    }

    pub fn with_expected_remote_eid(mut self, eid: Eid) -> Self {
        self.expected_remote_eid = Some(eid);
        self
    }

    pub fn with_keepalive_interval(mut self, secs: u16) -> Self {
        self.keepalive_interval = secs;
        self
    }

    pub fn with_max_fragment_size(mut self, size: usize) -> Self {
        self.max_fragment_size = Some(size);
        self
    }

    pub fn with_max_rx_bundle_size(mut self, size: u64) -> Self {
        self.max_rx_bundle_size = size;
        self
    }

    pub fn with_opportunistic_receive(mut self, allow: bool) -> Self {
        self.allow_opportunistic_receive = allow;
        self
    }

    pub fn with_pipeline_depth(mut self, depth: usize) -> Self {
        self.pipeline_depth = depth;
        self
    }

    pub fn with_max_pipeline_bytes(mut self, max: u64) -> Self {
        self.max_pipeline_bytes = Some(max);
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectOptions) -> Self {
        self.reconnect = reconnect;
        self
    }
}

impl From<&OutductConfig> for TcpclOptions {
    fn from(config: &OutductConfig) -> Self {
        Self {
            remote: HostPort::new(config.remote_hostname.clone(), config.remote_port),
            local_node_id: 0,
            expected_remote_eid: (config.next_hop_node_id != 0)
                .then(|| Eid::new(config.next_hop_node_id, 0)),
            keepalive_interval: config.keepalive_interval_secs,
            max_fragment_size: config.tcpcl_max_fragment_size,
            max_rx_bundle_size: config.max_rx_bundle_size,
            shutdown_reconnect_delay_secs: config.tcpcl_shutdown_reconnect_delay_secs,
            allow_opportunistic_receive: config.allow_opportunistic_receive,
            pipeline_depth: config.max_bundles_in_pipeline,
            max_pipeline_bytes: (config.max_sum_bundle_bytes_in_pipeline > 0)
                .then_some(config.max_sum_bundle_bytes_in_pipeline),
            reconnect: ReconnectOptions::from_delay_secs(config.reconnect_delay_secs),
        }
    }
}
