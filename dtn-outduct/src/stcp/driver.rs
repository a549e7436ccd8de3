use std::{sync::Arc, time::Duration};

use dtn_transport::{write_frame, HostPort, Transport};
use dtn_wire::stcp;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    time::{sleep, timeout, Instant},
};
use tracing::{debug, trace, warn};

use super::{StcpOptions, SHUTDOWN_TIMEOUT};
use crate::{
    handle::Shared,
    supervisor::{Fault, ReconnectionSupervisor},
};

pub(crate) struct StcpDriver<T> {
    options: Arc<StcpOptions>,
    transport: T,
    shared: Arc<Shared>,
    supervisor: ReconnectionSupervisor,
}

impl<T: Transport<HostPort>> StcpDriver<T> {
    pub(crate) fn new(options: Arc<StcpOptions>, transport: T, shared: Arc<Shared>) -> Self {
        let supervisor = ReconnectionSupervisor::new(options.reconnect.clone(), Arc::clone(&shared));
        Self { options, transport, shared, supervisor }
    }

    pub(crate) async fn run(mut self) {
        loop {
            let remote = self.options.remote.clone();
            let transport = &mut self.transport;
            let Some(io) = self.supervisor.connect(&remote, || transport.connect(remote.clone())).await
            else {
                break;
            };

            match self.session(io).await {
                Ok(()) => break,
                Err(fault) => {
                    self.supervisor.link_down(&fault);
                    if !self.supervisor.wait().await {
                        break;
                    }
                }
            }
        }

        self.supervisor.terminate();
    }

    async fn session(&self, io: T::Io) -> Result<(), Fault> {
        let (mut reader, mut writer) = tokio::io::split(io);
        self.shared.link_up();

        let keepalive = match self.options.keepalive_interval {
            0 => None,
            secs => Some(Duration::from_secs(u64::from(secs))),
        };
        let mut keepalive_timer = Box::pin(sleep(keepalive.unwrap_or_default()));
        let mut data_sent = false;

        loop {
            if self.send_pending(&mut writer).await? {
                data_sent = true;
            }

            tokio::select! {
                biased;

                _ = self.shared.stopped() => {
                    close(&mut writer, self.shared.uuid()).await;
                    return Ok(());
                }

                fault = closed(&mut reader) => return Err(fault),

                _ = keepalive_timer.as_mut(), if keepalive.is_some() => {
                    if !data_sent {
                        writer.write_all(&stcp::KEEPALIVE).await?;
                        writer.flush().await?;
                        trace!(outduct = self.shared.uuid(), "Keepalive sent");
                        self.shared.stats.increment_keepalives_sent();
                    }

                    data_sent = false;
                    keepalive_timer.as_mut().reset(Instant::now() + keepalive.unwrap_or_default());
                }

                _ = self.shared.pipeline.notified() => {}
            }
        }
    }

    /// Writes and releases queued bundles, oldest first. Returns `true` if anything was written.
    async fn send_pending<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<bool, Fault> {
        let mut sent = false;

        while let Some((_, payload)) = self.shared.pipeline.front() {
            let header = stcp::header(payload.len() as u32);
            let written = write_frame(writer, &header, &payload).await?;

            debug!(outduct = self.shared.uuid(), bytes = payload.len(), "Bundle sent");
            self.shared.stats.increment_sent(payload.len());
            self.shared.stats.increment_framing(stcp::HEADER_LEN);
            self.shared.release_front(written as u64)?;
            sent = true;
        }

        Ok(sent)
    }
}

/// Closes the write side, bounded by [`SHUTDOWN_TIMEOUT`].
async fn close<W: AsyncWrite + Unpin>(writer: &mut W, outduct: u64) {
    match timeout(SHUTDOWN_TIMEOUT, writer.shutdown()).await {
        Ok(Ok(())) => debug!(outduct, "Connection closed"),
        Ok(Err(e)) => debug!(outduct, "Failed to close connection: {e}"),
        Err(_) => warn!(outduct, "Timed out closing connection"),
    }
}

/// Completes when the peer closes the connection or sends anything: STCP is send-only.
async fn closed<R: AsyncRead + Unpin>(reader: &mut R) -> Fault {
    let mut probe = [0u8; 1];

    match reader.read(&mut probe).await {
        Ok(0) => Fault::Eof,
        Ok(_) => Fault::UnexpectedData,
        Err(e) => Fault::Io(e),
    }
}
