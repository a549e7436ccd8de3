use std::{fmt, path::PathBuf, str::FromStr, time::Duration};

use thiserror::Error;

/// Default number of bundles a binding keeps in flight.
pub const DEFAULT_PIPELINE_DEPTH: usize = 5;

/// The convergence layer an outduct speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConvergenceLayer {
    TcpclV3,
    Stcp,
    Udp,
    LocalStream,
}

impl ConvergenceLayer {
    /// The name used in outduct configuration.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TcpclV3 => "tcpcl_v3",
            Self::Stcp => "stcp",
            Self::Udp => "udp",
            Self::LocalStream => "bp_over_encap_local_stream",
        }
    }
}

impl fmt::Display for ConvergenceLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown convergence layer {0:?}")]
pub struct UnknownConvergenceLayer(pub String);

impl FromStr for ConvergenceLayer {
    type Err = UnknownConvergenceLayer;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcpcl_v3" => Ok(Self::TcpclV3),
            "stcp" => Ok(Self::Stcp),
            "udp" => Ok(Self::Udp),
            "bp_over_encap_local_stream" => Ok(Self::LocalStream),
            other => Err(UnknownConvergenceLayer(other.to_owned())),
        }
    }
}

/// One outduct entry of a node's configuration. Fields that do not apply to the configured
/// convergence layer are ignored.
#[derive(Debug, Clone)]
pub struct OutductConfig {
    pub name: String,
    /// One of `tcpcl_v3`, `stcp`, `udp` or `bp_over_encap_local_stream`.
    pub convergence_layer: String,
    pub next_hop_node_id: u64,
    pub remote_hostname: String,
    pub remote_port: u16,
    pub local_socket_path: PathBuf,
    pub max_bundles_in_pipeline: usize,
    /// Payload bytes the pipeline may hold at once, zero for no limit. Also reported in
    /// capability telemetry.
    pub max_sum_bundle_bytes_in_pipeline: u64,
    /// Destinations routed through this outduct, as `ipn:N.S` or `ipn:N.*`.
    pub final_destination_eid_uris: Vec<String>,

    /// Initial reconnect delay in seconds. Zero disables reconnection.
    pub reconnect_delay_secs: u64,
    pub keepalive_interval_secs: u16,

    // tcpcl_v3
    pub tcpcl_max_fragment_size: Option<usize>,
    pub tcpcl_shutdown_reconnect_delay_secs: u32,

    // tcpcl_v3 and bp_over_encap_local_stream
    pub allow_opportunistic_receive: bool,
    pub max_rx_bundle_size: u64,

    // udp
    pub udp_rate_bits_per_sec: u64,
    pub rate_precision_window: Duration,
}

impl Default for OutductConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            convergence_layer: String::new(),
            next_hop_node_id: 0,
            remote_hostname: String::new(),
            remote_port: 0,
            local_socket_path: PathBuf::new(),
            max_bundles_in_pipeline: DEFAULT_PIPELINE_DEPTH,
            max_sum_bundle_bytes_in_pipeline: 50 * dtn_common::constants::MiB as u64,
            final_destination_eid_uris: Vec::new(),
            reconnect_delay_secs: 3,
            keepalive_interval_secs: 15,
            tcpcl_max_fragment_size: None,
            tcpcl_shutdown_reconnect_delay_secs: 3,
            allow_opportunistic_receive: false,
            max_rx_bundle_size: dtn_wire::tcpcl::DEFAULT_MAX_RX_BUNDLE_SIZE,
            udp_rate_bits_per_sec: 0,
            rate_precision_window: Duration::from_millis(100),
        }
    }
}

impl OutductConfig {
    pub fn new(name: impl Into<String>, convergence_layer: ConvergenceLayer) -> Self {
        Self {
            name: name.into(),
            convergence_layer: convergence_layer.as_str().to_owned(),
            ..Default::default()
        }
    }

    pub fn with_layer(mut self, convergence_layer: ConvergenceLayer) -> Self {
        self.convergence_layer = convergence_layer.as_str().to_owned();
        self
    }

    pub fn with_next_hop(mut self, node_id: u64) -> Self {
        self.next_hop_node_id = node_id;
        self
    }

    pub fn with_remote(mut self, hostname: impl Into<String>, port: u16) -> Self {
        self.remote_hostname = hostname.into();
        self.remote_port = port;
        self
    }

    pub fn with_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_socket_path = path.into();
        self
    }

    pub fn with_destination(mut self, uri: impl Into<String>) -> Self {
        self.final_destination_eid_uris.push(uri.into());
        self
    }

    pub fn with_pipeline_depth(mut self, depth: usize) -> Self {
        self.max_bundles_in_pipeline = depth;
        self
    }

    pub fn with_max_pipeline_bytes(mut self, max: u64) -> Self {
        self.max_sum_bundle_bytes_in_pipeline = max;
        self
    }
}

/// All outducts of a node.
#[derive(Debug, Clone, Default)]
pub struct OutductsConfig {
    pub elements: Vec<OutductConfig>,
}
