use std::io;

use futures::future::BoxFuture;
use tokio::net::TcpStream;
use tracing::debug;

use crate::{HostPort, PeerAddress, Transport};

#[derive(Debug, Clone)]
pub struct Config {
    /// Disable Nagle's algorithm on connected streams.
    pub nodelay: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self { nodelay: true }
    }
}

/// TCP transport. Host names are resolved on every connect.
#[derive(Debug, Default)]
pub struct Tcp {
    config: Config,
}

impl Tcp {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl PeerAddress<HostPort> for TcpStream {
    fn peer_addr(&self) -> io::Result<HostPort> {
        self.peer_addr().map(HostPort::from)
    }
}

impl Transport<HostPort> for Tcp {
    type Io = TcpStream;

    type Error = io::Error;

    type Connect = BoxFuture<'static, Result<Self::Io, Self::Error>>;

    fn connect(&mut self, addr: HostPort) -> Self::Connect {
        let nodelay = self.config.nodelay;

        Box::pin(async move {
            let stream = TcpStream::connect((addr.host.as_str(), addr.port)).await?;
            stream.set_nodelay(nodelay)?;

            debug!(remote = %addr, "TCP connection established");
            Ok(stream)
        })
    }
}
