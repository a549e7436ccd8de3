//! UDP outduct: one bundle per datagram on a connected socket, paced by a token bucket.

use std::time::Duration;

use dtn_transport::HostPort;

use crate::{OutductConfig, ReconnectOptions, DEFAULT_PIPELINE_DEPTH};

mod driver;
mod outduct;
pub use outduct::UdpOutduct;

mod rate;

#[derive(Debug, Clone)]
pub struct UdpOptions {
    pub remote: HostPort,
    /// Sending rate limit. Zero sends as fast as the socket accepts.
    pub rate_bits_per_sec: u64,
    /// Burst window: the bucket holds what accumulates at the configured rate over this long.
    pub rate_precision_window: Duration,
    pub pipeline_depth: usize,
    /// Cap on the payload bytes held in the pipeline, unlimited when `None`.
    pub max_pipeline_bytes: Option<u64>,
    pub reconnect: ReconnectOptions,
}

impl UdpOptions {
    pub fn new(remote: HostPort) -> Self {
        Self {
            remote,
            rate_bits_per_sec: 0,
            rate_precision_window: Duration::from_millis(100),
            pipeline_depth: DEFAULT_PIPELINE_DEPTH,
            max_pipeline_bytes: None,
            reconnect: ReconnectOptions::default(),
        }
    }

    pub fn with_rate(mut self, bits_per_sec: u64) -> Self {
        self.rate_bits_per_sec = bits_per_sec;
        self
    }

    pub fn with_rate_precision_window(mut self, window: Duration) -> Self {
        self.rate_precision_window = window;
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

impl From<&OutductConfig> for UdpOptions {
    fn from(config: &OutductConfig) -> Self {
        Self {
            remote: HostPort::new(config.remote_hostname.clone(), config.remote_port),
            rate_bits_per_sec: config.udp_rate_bits_per_sec,
            rate_precision_window: config.rate_precision_window,
            pipeline_depth: config.max_bundles_in_pipeline,
            max_pipeline_bytes: (config.max_sum_bundle_bytes_in_pipeline > 0)
                .then_some(config.max_sum_bundle_bytes_in_pipeline),
            reconnect: ReconnectOptions::from_delay_secs(config.reconnect_delay_secs),
        }
    }
}
