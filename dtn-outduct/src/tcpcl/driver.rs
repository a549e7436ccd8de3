use std::{collections::VecDeque, pin::Pin, sync::Arc, time::Duration};

use bytes::{Bytes, BytesMut};
use dtn_common::{Eid, EidError};
use dtn_transport::{write_frame, HostPort, Transport};
use dtn_wire::tcpcl::{
    tx, ContactFlags, ContactHeader, DataSegment, Message, ProtocolViolation, Shutdown,
    ShutdownReason, TcpclCodec,
};
use futures::StreamExt;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    time::{sleep, timeout, Instant, Sleep},
};
use tokio_util::codec::FramedRead;
use tracing::{debug, info, trace, warn};

use super::{TcpclOptions, SHUTDOWN_WRITE_TIMEOUT};
use crate::{
    handle::Shared,
    supervisor::{Fault, ReconnectionSupervisor},
    Bundle, OutductEvent,
};

/// An acknowledgment the peer owes for one sent data segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingAck {
    /// Payload bytes of the bundle up to and including the segment.
    cumulative: u32,
    /// Set on the bundle's final segment.
    last: bool,
}

/// State of one TCPCL session. Dropped with the connection.
#[derive(Debug)]
struct Session {
    /// The peer's contact header, once received.
    peer: Option<ContactHeader>,
    /// Negotiated keepalive interval. `None` disables keepalives.
    keepalive: Option<Duration>,
    keepalive_timer: Pin<Box<Sleep>>,
    idle_timer: Pin<Box<Sleep>>,
    /// Set when a data segment was written since the keepalive timer last fired.
    data_sent: bool,
    /// Next pipeline slot to write.
    cursor: usize,
    acks: VecDeque<PendingAck>,
    /// Bundle being received from the peer.
    rx_bundle: BytesMut,
    rx_len: u64,
}

impl Session {
    fn new(cursor: usize) -> Self {
        Self {
            peer: None,
            keepalive: None,
            keepalive_timer: Box::pin(sleep(Duration::ZERO)),
            idle_timer: Box::pin(sleep(Duration::ZERO)),
            data_sent: false,
            cursor,
            acks: VecDeque::new(),
            rx_bundle: BytesMut::new(),
            rx_len: 0,
        }
    }

    fn is_established(&self) -> bool {
        self.peer.is_some()
    }

    fn peer_requested(&self, flag: ContactFlags) -> bool {
        self.peer.as_ref().is_some_and(|peer| peer.flags.contains(flag))
    }

    /// Settles on the smaller of both offered intervals. Zero on either side disables keepalives.
    fn negotiate_keepalive(&mut self, ours: u16, theirs: u16) {
        let secs = ours.min(theirs);
        if secs == 0 {
            self.keepalive = None;
            return;
        }

        let interval = Duration::from_secs(u64::from(secs));
        self.keepalive = Some(interval);
        self.keepalive_timer.as_mut().reset(Instant::now() + interval);
        self.idle_timer.as_mut().reset(Instant::now() + idle_timeout(interval));
    }

    fn on_receive(&mut self) {
        if let Some(interval) = self.keepalive {
            self.idle_timer.as_mut().reset(Instant::now() + idle_timeout(interval));
        }
    }
}

/// How long the peer may stay silent before the session is considered dead.
fn idle_timeout(keepalive: Duration) -> Duration {
    keepalive * 5 / 2
}

/// Drives one TCPCL outduct: connects, runs sessions and reconnects after faults.
pub(crate) struct TcpclDriver<T> {
    options: Arc<TcpclOptions>,
    transport: T,
    shared: Arc<Shared>,
    supervisor: ReconnectionSupervisor,
}

impl<T: Transport<HostPort>> TcpclDriver<T> {
    pub(crate) fn new(options: Arc<TcpclOptions>, transport: T, shared: Arc<Shared>) -> Self {
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

    /// Runs one session until it is stopped (`Ok`) or faults.
    async fn session(&self, io: T::Io) -> Result<(), Fault> {
        let (reader, mut writer) = tokio::io::split(io);
        let mut framed = FramedRead::new(
            reader,
            TcpclCodec::with_max_rx_bundle_size(self.options.max_rx_bundle_size),
        );
        // Bundles left over from a previous session were failed on link down
        let mut session = Session::new(self.shared.pipeline.read_index());

        let mut buf = BytesMut::new();
        tx::encode_contact_header(&self.contact_header(), &mut buf);
        writer.write_all(&buf).await?;
        writer.flush().await?;

        loop {
            tokio::select! {
                biased;

                _ = self.shared.stopped() => {
                    self.shutdown(&mut writer, None).await;
                    return Ok(());
                }

                message = framed.next() => {
                    let message = match message {
                        Some(message) => message?,
                        None => return Err(Fault::Eof),
                    };

                    session.on_receive();
                    self.on_message(message, &mut writer, &mut session).await?;
                }

                _ = session.idle_timer.as_mut(), if session.keepalive.is_some() => {
                    let silence = idle_timeout(session.keepalive.unwrap_or_default());
                    self.shutdown(&mut writer, Some(ShutdownReason::IdleTimeout)).await;
                    return Err(Fault::IdleTimeout(silence));
                }

                _ = session.keepalive_timer.as_mut(), if session.keepalive.is_some() => {
                    self.on_keepalive_timer(&mut writer, &mut session).await?;
                }

                _ = self.shared.pipeline.notified(), if session.is_established() => {}
            }

            if session.is_established() {
                self.send_pending(&mut writer, &mut session).await?;
            }
        }
    }

    fn contact_header(&self) -> ContactHeader {
        ContactHeader {
            flags: ContactFlags::REQUEST_ACK,
            keepalive_interval: self.options.keepalive_interval,
            local_eid: Eid::new(self.options.local_node_id, 0).to_string(),
        }
    }

    async fn on_message<W: AsyncWrite + Unpin>(
        &self,
        message: Message,
        writer: &mut W,
        session: &mut Session,
    ) -> Result<(), Fault> {
        let outduct = self.shared.uuid();

        match message {
            Message::ContactHeader(header) => self.on_contact_header(header, session)?,
            Message::DataSegment(segment) => self.on_data_segment(segment, writer, session).await?,
            Message::Ack(acked) => self.on_ack(acked, session)?,
            Message::Refuse(code) => warn!(outduct, ?code, "Peer refused a bundle"),
            Message::Keepalive => {
                trace!(outduct, "Keepalive received");
                self.shared.stats.increment_keepalives_received();
            }
            Message::Length(len) => debug!(outduct, len, "Peer announced next bundle length"),
            Message::Shutdown(Shutdown { reason, reconnect_delay }) => {
                return Err(Fault::PeerShutdown { reason, reconnect_delay });
            }
        }

        Ok(())
    }

    fn on_contact_header(&self, header: ContactHeader, session: &mut Session) -> Result<(), Fault> {
        let eid: Eid = header
            .local_eid
            .parse()
            .map_err(|e: EidError| Fault::InvalidContactHeader(e.to_string()))?;

        if eid.service != 0 {
            return Err(Fault::InvalidContactHeader(format!(
                "{eid} is not an administrative endpoint"
            )));
        }

        if let Some(expected) = self.options.expected_remote_eid {
            if expected != eid {
                return Err(Fault::InvalidContactHeader(format!("expected {expected}, got {eid}")));
            }
        }

        session.negotiate_keepalive(self.options.keepalive_interval, header.keepalive_interval);
        info!(
            outduct = self.shared.uuid(),
            remote = %eid,
            keepalive = ?session.keepalive,
            flags = header.flags.bits(),
            "Session established"
        );

        session.peer = Some(header);
        self.shared.link_up();

        Ok(())
    }

    async fn on_data_segment<W: AsyncWrite + Unpin>(
        &self,
        segment: DataSegment,
        writer: &mut W,
        session: &mut Session,
    ) -> Result<(), Fault> {
        if segment.start {
            session.rx_bundle.clear();
            session.rx_len = 0;
        }

        session.rx_len += segment.payload.len() as u64;
        if session.rx_len > self.options.max_rx_bundle_size {
            return Err(ProtocolViolation::SegmentTooLarge {
                len: session.rx_len,
                max: self.options.max_rx_bundle_size,
            }
            .into());
        }

        if session.peer_requested(ContactFlags::REQUEST_ACK) {
            let mut buf = BytesMut::with_capacity(tx::MAX_DATA_SEGMENT_HEADER_LEN);
            tx::encode_ack(u32::try_from(session.rx_len).unwrap_or(u32::MAX), &mut buf);
            writer.write_all(&buf).await?;
            writer.flush().await?;
        }

        if self.options.allow_opportunistic_receive {
            session.rx_bundle.extend_from_slice(&segment.payload);
        }

        if segment.end {
            let outduct = self.shared.uuid();
            if self.options.allow_opportunistic_receive {
                let payload = session.rx_bundle.split().freeze();
                debug!(outduct, bytes = payload.len(), "Bundle received");
                self.shared.stats.increment_received(payload.len());
                self.shared.emit(OutductEvent::Received { outduct, bundle: Bundle::new(payload) });
            } else {
                debug!(outduct, bytes = session.rx_len, "Discarding bundle received from peer");
            }
        }

        Ok(())
    }

    fn on_ack(&self, acked: u32, session: &mut Session) -> Result<(), Fault> {
        let Some(pending) = session.acks.pop_front() else {
            warn!(outduct = self.shared.uuid(), acked, "Ack with nothing outstanding");
            return Ok(());
        };

        if pending.cumulative != acked {
            return Err(Fault::AckMismatch {
                expected: u64::from(pending.cumulative),
                actual: u64::from(acked),
            });
        }

        self.shared.stats.increment_fragments_acked();
        if pending.last {
            self.shared.release_front(u64::from(acked))?;
        }

        Ok(())
    }

    async fn on_keepalive_timer<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        session: &mut Session,
    ) -> Result<(), Fault> {
        let interval = session.keepalive.unwrap_or_default();

        if session.data_sent {
            // Data already proved liveness, check again sooner
            session.data_sent = false;
            session.keepalive_timer.as_mut().reset(Instant::now() + interval / 2);
            return Ok(());
        }

        let mut buf = BytesMut::with_capacity(1);
        tx::encode_keepalive(&mut buf);
        writer.write_all(&buf).await?;
        writer.flush().await?;

        trace!(outduct = self.shared.uuid(), "Keepalive sent");
        self.shared.stats.increment_keepalives_sent();
        session.keepalive_timer.as_mut().reset(Instant::now() + interval);

        Ok(())
    }

    /// Writes every published slot the session has not written yet.
    async fn send_pending<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        session: &mut Session,
    ) -> Result<(), Fault> {
        let pipeline = &self.shared.pipeline;

        while session.cursor != pipeline.write_index() {
            let Some(payload) = pipeline.payload(session.cursor) else {
                break;
            };

            self.send_bundle(&payload, writer, session).await?;
            session.cursor = pipeline.next_index(session.cursor);
        }

        Ok(())
    }

    async fn send_bundle<W: AsyncWrite + Unpin>(
        &self,
        payload: &Bytes,
        writer: &mut W,
        session: &mut Session,
    ) -> Result<(), Fault> {
        let stats = &self.shared.stats;
        let total = payload.len();
        let mut header = BytesMut::with_capacity(tx::MAX_DATA_SEGMENT_HEADER_LEN);

        if session.peer_requested(ContactFlags::REQUEST_LENGTH) {
            tx::encode_length(total as u32, &mut header);
            writer.write_all(&header).await?;
            stats.increment_framing(header.len());
        }

        let fragment_size = self.options.max_fragment_size.unwrap_or(total).max(1);
        let mut offset = 0;

        loop {
            let end = (offset + fragment_size).min(total);
            let last = end == total;

            header.clear();
            let header_len =
                tx::encode_data_segment_header(offset == 0, last, (end - offset) as u32, &mut header);

            let expected = header_len + end - offset;
            let written = write_frame(writer, &header, &payload[offset..end]).await?;
            if written != expected {
                return Err(Fault::AckMismatch { expected: expected as u64, actual: written as u64 });
            }

            stats.increment_fragments_sent();
            stats.increment_framing(header_len);
            session.acks.push_back(PendingAck { cumulative: end as u32, last });

            offset = end;
            if last {
                break;
            }
        }

        debug!(outduct = self.shared.uuid(), bytes = total, "Bundle sent");
        stats.increment_sent(total);
        session.data_sent = true;

        Ok(())
    }

    /// Sends SHUTDOWN and closes our write side, bounded by [`SHUTDOWN_WRITE_TIMEOUT`].
    async fn shutdown<W: AsyncWrite + Unpin>(&self, writer: &mut W, reason: Option<ShutdownReason>) {
        let outduct = self.shared.uuid();
        let message = Shutdown {
            reason,
            reconnect_delay: Some(self.options.shutdown_reconnect_delay_secs),
        };

        let mut buf = BytesMut::with_capacity(8);
        tx::encode_shutdown(&message, &mut buf);

        let result = timeout(SHUTDOWN_WRITE_TIMEOUT, async {
            writer.write_all(&buf).await?;
            writer.shutdown().await
        })
        .await;

        match result {
            Ok(Ok(())) => debug!(outduct, ?reason, "Shutdown sent"),
            Ok(Err(e)) => debug!(outduct, "Failed to send shutdown: {e}"),
            Err(_) => warn!(outduct, "Timed out sending shutdown"),
        }
    }
}
