use std::{path::PathBuf, sync::Arc};

use bytes::{Bytes, BytesMut};
use dtn_transport::{write_frame, Transport};
use dtn_wire::encap::{self, EncapCodec, PacketType};
use futures::StreamExt;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    time::timeout,
};
use tokio_util::codec::FramedRead;
use tracing::{debug, warn};

use super::{LocalStreamOptions, SHUTDOWN_TIMEOUT};
use crate::{
    handle::Shared,
    supervisor::{Fault, ReconnectionSupervisor},
    Bundle, OutductEvent,
};

pub(crate) struct LocalStreamDriver<T> {
    options: Arc<LocalStreamOptions>,
    transport: T,
    shared: Arc<Shared>,
    supervisor: ReconnectionSupervisor,
}

impl<T: Transport<PathBuf>> LocalStreamDriver<T> {
    pub(crate) fn new(options: Arc<LocalStreamOptions>, transport: T, shared: Arc<Shared>) -> Self {
        let supervisor = ReconnectionSupervisor::new(options.reconnect.clone(), Arc::clone(&shared));
        Self { options, transport, shared, supervisor }
    }

    pub(crate) async fn run(mut self) {
        loop {
            let path = self.options.path.clone();
            let transport = &mut self.transport;
            let Some(io) =
                self.supervisor.connect(&path.display(), || transport.connect(path.clone())).await
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
        let (reader, mut writer) = tokio::io::split(io);
        let mut framed = FramedRead::new(
            reader,
            EncapCodec::new(PacketType::Bp).with_max_payload_len(self.options.max_rx_bundle_size),
        );
        self.shared.link_up();

        loop {
            self.send_pending(&mut writer).await?;

            tokio::select! {
                biased;

                _ = self.shared.stopped() => {
                    close(&mut writer, self.shared.uuid()).await;
                    return Ok(());
                }

                frame = framed.next() => match frame {
                    Some(frame) => self.on_bundle(frame?),
                    None => return Err(Fault::Eof),
                },

                _ = self.shared.pipeline.notified() => {}
            }
        }
    }

    fn on_bundle(&self, payload: Bytes) {
        let outduct = self.shared.uuid();

        if self.options.allow_opportunistic_receive {
            debug!(outduct, bytes = payload.len(), "Bundle received");
            self.shared.stats.increment_received(payload.len());
            self.shared.emit(OutductEvent::Received { outduct, bundle: Bundle::new(payload) });
        } else {
            debug!(outduct, bytes = payload.len(), "Discarding bundle received from peer");
        }
    }

    async fn send_pending<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<(), Fault> {
        let mut header = BytesMut::with_capacity(encap::MAX_HEADER_LEN);

        while let Some((_, payload)) = self.shared.pipeline.front() {
            header.clear();
            let header_len = encap::encode_header(PacketType::Bp, payload.len() as u64, &mut header)?;
            let written = write_frame(writer, &header, &payload).await?;

            debug!(outduct = self.shared.uuid(), bytes = payload.len(), "Bundle sent");
            self.shared.stats.increment_sent(payload.len());
            self.shared.stats.increment_framing(header_len);
            self.shared.release_front(written as u64)?;
        }

        Ok(())
    }
}

/// Closes the write side, bounded by [`SHUTDOWN_TIMEOUT`].
async fn close<W: AsyncWrite + Unpin>(writer: &mut W, outduct: u64) {
    match timeout(SHUTDOWN_TIMEOUT, writer.shutdown()).await {
        Ok(Ok(())) => debug!(outduct, "Stream closed"),
        Ok(Err(e)) => debug!(outduct, "Failed to close stream: {e}"),
        Err(_) => warn!(outduct, "Timed out closing stream"),
    }
}
