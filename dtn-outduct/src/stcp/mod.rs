//! STCP outduct: every bundle is written as a 4-byte big-endian length followed by the bundle.
//!
//! There are no remote acknowledgments. A bundle is released once the transport reports the
//! whole frame written. A zero-length frame is a keepalive, so empty bundles cannot be sent.

use std::time::Duration;

use dtn_transport::HostPort;

use crate::{OutductConfig, ReconnectOptions, DEFAULT_PIPELINE_DEPTH};

mod driver;
mod outduct;
pub use outduct::StcpOutduct;

/// Time allowed for closing the write side when stopping.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct StcpOptions {
    pub remote: HostPort,
    /// Seconds without a sent bundle after which a keepalive is written. Zero disables them.
    pub keepalive_interval: u16,
    pub pipeline_depth: usize,
    /// Cap on the payload bytes held in the pipeline, unlimited when `None`.
    pub max_pipeline_bytes: Option<u64>,
    pub reconnect: ReconnectOptions,
}

impl StcpOptions {
    pub fn new(remote: HostPort) -> Self {
        Self {
            remote,
            keepalive_interval: 15,
            pipeline_depth: DEFAULT_PIPELINE_DEPTH,
            max_pipeline_bytes: None,
            reconnect: ReconnectOptions::default(),
        }
    }

    pub fn with_keepalive_interval(mut self, secs: u16) -> Self {
        self.keepalive_interval = secs;
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

impl From<&OutductConfig> for StcpOptions {
    fn from(config: &OutductConfig) -> Self {
        Self {
            remote: HostPort::new(config.remote_hostname.clone(), config.remote_port),
            keepalive_interval: config.keepalive_interval_secs,
            pipeline_depth: config.max_bundles_in_pipeline,
            max_pipeline_bytes: (config.max_sum_bundle_bytes_in_pipeline > 0)
                .then_some(config.max_sum_bundle_bytes_in_pipeline),
            reconnect: ReconnectOptions::from_delay_secs(config.reconnect_delay_secs),
        }
    }
}
