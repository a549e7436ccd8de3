use std::{
    io,
    path::PathBuf,
    pin::Pin,
    task::{Context, Poll},
};

use dtn_common::async_error;
use futures::future::BoxFuture;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::UnixStream,
};

use crate::{PeerAddress, Transport};

/// Local stream transport over Unix domain sockets.
///
/// Note: this implementation is specific to Unix-like operating systems.
#[derive(Debug, Default)]
pub struct Ipc;

impl Ipc {
    pub fn new() -> Self {
        Self
    }
}

/// A connected Unix stream that remembers the path it was connected to.
pub struct IpcStream {
    peer: PathBuf,
    stream: UnixStream,
}

impl IpcStream {
    pub async fn connect(peer: PathBuf) -> io::Result<Self> {
        let stream = UnixStream::connect(&peer).await?;
        Ok(Self { peer, stream })
    }
}

impl AsyncRead for IpcStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for IpcStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.stream.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

impl PeerAddress<PathBuf> for IpcStream {
    fn peer_addr(&self) -> Result<PathBuf, io::Error> {
        Ok(self.peer.clone())
    }
}

impl Transport<PathBuf> for Ipc {
    type Io = IpcStream;

    type Error = io::Error;

    type Connect = BoxFuture<'static, Result<Self::Io, Self::Error>>;

    fn connect(&mut self, addr: PathBuf) -> Self::Connect {
        if addr.as_os_str().is_empty() {
            return async_error(io::Error::new(io::ErrorKind::InvalidInput, "empty socket path"));
        }

        Box::pin(async move { IpcStream::connect(addr).await })
    }
}
