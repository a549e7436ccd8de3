use std::{
    fmt::{self, Debug},
    future::Future,
    hash::Hash,
    io::{self, IoSlice},
    str::FromStr,
};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

mod ipc;
pub use ipc::{Ipc, IpcStream};

mod tcp;
pub use tcp::Tcp;

pub mod udp;

/// A transport address.
pub trait Address: Clone + Debug + Send + Sync + Unpin + Hash + Eq + 'static {}

impl<A: Clone + Debug + Send + Sync + Unpin + Hash + Eq + 'static> Address for A {}

/// Returns the address of the remote end of a connection.
pub trait PeerAddress<A: Address> {
    fn peer_addr(&self) -> Result<A, io::Error>;
}

/// A stream transport that can establish outgoing connections.
pub trait Transport<A: Address>: Send + Unpin + 'static {
    /// The result of a successful connection.
    type Io: AsyncRead + AsyncWrite + PeerAddress<A> + Unpin + Send + 'static;
    type Error: std::error::Error + From<io::Error> + Send + Sync + 'static;
    type Connect: Future<Output = Result<Self::Io, Self::Error>> + Send + 'static;

    /// Connects to the given address. The address is resolved again on every call, so a
    /// reconnect picks up changed name resolution.
    fn connect(&mut self, addr: A) -> Self::Connect;
}

/// A remote `hostname:port` pair, resolved at connect time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl HostPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl From<std::net::SocketAddr> for HostPort {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self { host: addr.ip().to_string(), port: addr.port() }
    }
}

impl FromStr for HostPort {
    type Err = io::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || io::Error::new(io::ErrorKind::InvalidInput, format!("invalid address {s:?}"));

        let (host, port) = s.rsplit_once(':').ok_or_else(invalid)?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse().map_err(|_| invalid())?;

        Ok(Self::new(host, port))
    }
}

/// Writes `header` followed by `payload` with vectored writes, returning the number of bytes
/// the writer reported as written.
///
/// The count is accumulated from the writer's own reports rather than assumed, so callers can
/// verify it against the size they expected to put on the wire.
pub async fn write_frame<W>(writer: &mut W, header: &[u8], payload: &[u8]) -> io::Result<usize>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let total = header.len() + payload.len();
    let mut written = 0;

    while written < total {
        let n = if written < header.len() {
            let bufs = [IoSlice::new(&header[written..]), IoSlice::new(payload)];
            writer.write_vectored(&bufs).await?
        } else {
            writer.write(&payload[written - header.len()..]).await?
        };

        if n == 0 {
            return Err(io::ErrorKind::WriteZero.into());
        }

        written += n;
    }

    writer.flush().await?;

    Ok(written)
}
