//! Local stream outduct: CCSDS-encapsulated bundles over a Unix stream socket.
//!
//! Bundles are released once the frame is written. Bundles written by the peer are decoded
//! with the same encapsulation and, when enabled, delivered as
//! [`OutductEvent::Received`](crate::OutductEvent).

use std::{path::PathBuf, time::Duration};

use dtn_wire::tcpcl::DEFAULT_MAX_RX_BUNDLE_SIZE;

use crate::{OutductConfig, ReconnectOptions, DEFAULT_PIPELINE_DEPTH};

mod driver;
mod outduct;
pub use outduct::LocalStreamOutduct;

/// Delay between attempts to reach the local socket.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);
/// Time allowed for closing the write side when stopping.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct LocalStreamOptions {
    /// Path of the Unix socket to connect to.
    pub path: PathBuf,
    pub pipeline_depth: usize,
    /// Cap on the payload bytes held in the pipeline, unlimited when `None`.
    pub max_pipeline_bytes: Option<u64>,
    pub reconnect: ReconnectOptions,
    pub allow_opportunistic_receive: bool,
    pub max_rx_bundle_size: u64,
}

impl LocalStreamOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pipeline_depth: DEFAULT_PIPELINE_DEPTH,
            max_pipeline_bytes: None,
            reconnect: ReconnectOptions::fixed(RECONNECT_DELAY),
            allow_opportunistic_receive: false,
            max_rx_bundle_size: DEFAULT_MAX_RX_BUNDLE_SIZE,
        }
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

    pub fn with_opportunistic_receive(mut self, allow: bool) -> Self {
        self.allow_opportunistic_receive = allow;
        self
    }

    pub fn with_max_rx_bundle_size(mut self, size: u64) -> Self {
        self.max_rx_bundle_size = size;
        self
    }
}

impl From<&OutductConfig> for LocalStreamOptions {
    fn from(config: &OutductConfig) -> Self {
        Self {
            path: config.local_socket_path.clone(),
            pipeline_depth: config.max_bundles_in_pipeline,
            max_pipeline_bytes: (config.max_sum_bundle_bytes_in_pipeline > 0)
                .then_some(config.max_sum_bundle_bytes_in_pipeline),
            reconnect: ReconnectOptions::fixed(RECONNECT_DELAY),
            allow_opportunistic_receive: config.allow_opportunistic_receive,
            max_rx_bundle_size: config.max_rx_bundle_size,
        }
    }
}
