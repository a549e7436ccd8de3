//! Connected UDP sockets.

use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
};

use tokio::net::{lookup_host, UdpSocket};
use tracing::debug;

use crate::HostPort;

/// Largest payload of a single IPv4 UDP datagram.
pub const MAX_DATAGRAM_LEN: usize = 65_507;

/// Resolves `remote`, binds an ephemeral local port of the same address family and connects the
/// socket to the first resolved address.
pub async fn connect(remote: &HostPort) -> io::Result<UdpSocket> {
    let addr = lookup_host((remote.host.as_str(), remote.port)).await?.next().ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("could not resolve {remote}"))
    })?;

    let local: SocketAddr = match addr {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };

    let socket = UdpSocket::bind(local).await?;
    socket.connect(addr).await?;

    debug!(%remote, resolved = %addr, "UDP socket connected");
    Ok(socket)
}
