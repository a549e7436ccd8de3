use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use bytes::Bytes;
use dtn_common::Eid;
use dtn_outduct::{
    Bundle, ForwardError, Outduct, OutductEvent, ReconnectOptions, TcpclOptions, TcpclOutduct,
};
use dtn_transport::{HostPort, PeerAddress, Tcp, Transport};
use dtn_wire::tcpcl::{
    ContactFlags, ContactHeader, DataSegment, Message, Shutdown, ShutdownReason, TcpclCodec,
};
use futures::{future::BoxFuture, SinkExt, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::{TcpListener, TcpStream},
    sync::mpsc,
    time::{timeout, Instant},
};
use tokio_util::codec::Framed;

use crate::common::{events, next_event, next_link_status, TIMEOUT};

/// The remote end of a TCPCL session.
struct Peer {
    framed: Framed<TcpStream, TcpclCodec>,
}

impl Peer {
    async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = timeout(TIMEOUT, listener.accept()).await.unwrap().unwrap();
        Self { framed: Framed::new(stream, TcpclCodec::new()) }
    }

    async fn recv(&mut self) -> Option<Message> {
        timeout(TIMEOUT, self.framed.next()).await.unwrap().map(|message| message.unwrap())
    }

    async fn send(&mut self, message: Message) {
        self.framed.send(message).await.unwrap();
    }

    /// Reads the outduct's contact header and answers with ours.
    async fn handshake(&mut self, local_eid: &str, keepalive_interval: u16) -> ContactHeader {
        let Some(Message::ContactHeader(theirs)) = self.recv().await else {
            panic!("expected a contact header");
        };

        self.send(Message::ContactHeader(ContactHeader {
            flags: ContactFlags::REQUEST_ACK,
            keepalive_interval,
            local_eid: local_eid.to_owned(),
        }))
        .await;

        theirs
    }

    async fn recv_segment(&mut self) -> DataSegment {
        match self.recv().await {
            Some(Message::DataSegment(segment)) => segment,
            other => panic!("expected a data segment, got {other:?}"),
        }
    }

    async fn expect_closed(&mut self) {
        match timeout(TIMEOUT, self.framed.next()).await.unwrap() {
            None | Some(Err(_)) => {}
            Some(Ok(message)) => panic!("expected the connection to close, got {message:?}"),
        }
    }
}

fn options(listener: &TcpListener) -> TcpclOptions {
    TcpclOptions::new(listener.local_addr().unwrap().into(), 1)
        .with_expected_remote_eid(Eid::new(2, 0))
        .with_keepalive_interval(0)
        .with_reconnect(ReconnectOptions::one_shot())
}

fn start(outduct: &TcpclOutduct) -> mpsc::UnboundedReceiver<OutductEvent> {
    let (tx, rx) = events();
    outduct.set_event_sink(tx);
    outduct.connect();
    rx
}

/// Connects an outduct to a fresh peer and completes the contact header exchange.
async fn established(
    configure: impl FnOnce(TcpclOptions) -> TcpclOptions,
) -> (TcpclOutduct, mpsc::UnboundedReceiver<OutductEvent>, Peer) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let outduct = TcpclOutduct::new(configure(options(&listener)));
    let mut events = start(&outduct);

    let mut peer = Peer::accept(&listener).await;
    peer.handshake("ipn:2.0", 0).await;
    assert!(next_link_status(&mut events).await);

    (outduct, events, peer)
}

fn sent(user_data: &'static str) -> OutductEvent {
    OutductEvent::Sent { outduct: 0, user_data: Bytes::from(user_data) }
}

#[tokio::test]
async fn contact_exchange_and_ack() {
    let _ = tracing_subscriber::fmt::try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let outduct = TcpclOutduct::new(options(&listener));
    let mut events = start(&outduct);

    assert!(matches!(outduct.forward(Bundle::new("early")), Err(ForwardError::NotReady(_))));

    let mut peer = Peer::accept(&listener).await;
    let header = peer.handshake("ipn:2.0", 0).await;
    assert_eq!(header.local_eid, "ipn:1.0");
    assert!(header.flags.contains(ContactFlags::REQUEST_ACK));
    assert_eq!(header.keepalive_interval, 0);

    assert!(next_link_status(&mut events).await);
    assert!(outduct.ready_to_forward());

    outduct.forward(Bundle::new("hello").with_user_data("a")).unwrap();

    let segment = peer.recv_segment().await;
    assert!(segment.start && segment.end);
    assert_eq!(segment.payload, "hello");
    assert_eq!(outduct.total_unacked(), 1);

    peer.send(Message::Ack(5)).await;
    assert_eq!(next_event(&mut events).await, sent("a"));
    assert_eq!(outduct.total_unacked(), 0);

    outduct.stop().await;

    assert_eq!(
        peer.recv().await,
        Some(Message::Shutdown(Shutdown { reason: None, reconnect_delay: Some(3) }))
    );
    peer.expect_closed().await;
    assert!(!next_link_status(&mut events).await);

    let stats = outduct.final_stats();
    assert_eq!((stats.bundles_sent, stats.bundles_acked), (1, 1));
}

#[tokio::test]
async fn pipeline_full_until_acked() {
    let _ = tracing_subscriber::fmt::try_init();

    let (outduct, mut events, mut peer) = established(|o| o.with_pipeline_depth(2)).await;
    assert_eq!(outduct.pipeline_capacity(), 2);

    outduct.forward(Bundle::new("A").with_user_data("a")).unwrap();
    outduct.forward(Bundle::new("BB").with_user_data("b")).unwrap();

    let c = Bundle::new("CCC").with_user_data("c");
    match outduct.forward(c.clone()) {
        Err(ForwardError::PipelineFull(returned)) => assert_eq!(returned, c),
        other => panic!("expected PipelineFull, got {other:?}"),
    }

    assert_eq!(peer.recv_segment().await.payload, "A");
    assert_eq!(peer.recv_segment().await.payload, "BB");

    peer.send(Message::Ack(1)).await;
    assert_eq!(next_event(&mut events).await, sent("a"));

    // A slot was released
    outduct.forward(c).unwrap();
    assert_eq!(peer.recv_segment().await.payload, "CCC");

    peer.send(Message::Ack(2)).await;
    peer.send(Message::Ack(3)).await;
    assert_eq!(next_event(&mut events).await, sent("b"));
    assert_eq!(next_event(&mut events).await, sent("c"));
    assert_eq!(outduct.total_unacked(), 0);

    outduct.stop().await;
}

#[tokio::test]
async fn pipeline_bytes_capped_until_acked() {
    let _ = tracing_subscriber::fmt::try_init();

    let (outduct, mut events, mut peer) = established(|o| o.with_max_pipeline_bytes(8)).await;

    outduct.forward(Bundle::new("hello").with_user_data("a")).unwrap();
    assert_eq!(outduct.telemetry().unacked_bytes, 5);

    let b = Bundle::new("four").with_user_data("b");
    match outduct.forward(b.clone()) {
        Err(ForwardError::PipelineFull(returned)) => assert_eq!(returned, b),
        other => panic!("expected PipelineFull, got {other:?}"),
    }
    outduct.forward(Bundle::new("abc").with_user_data("c")).unwrap();

    assert_eq!(peer.recv_segment().await.payload, "hello");
    assert_eq!(peer.recv_segment().await.payload, "abc");

    peer.send(Message::Ack(5)).await;
    assert_eq!(next_event(&mut events).await, sent("a"));

    // The acked bytes left the pipeline
    outduct.forward(b).unwrap();
    assert_eq!(peer.recv_segment().await.payload, "four");

    peer.send(Message::Ack(3)).await;
    peer.send(Message::Ack(4)).await;
    assert_eq!(next_event(&mut events).await, sent("c"));
    assert_eq!(next_event(&mut events).await, sent("b"));

    outduct.stop().await;
}

#[tokio::test]
async fn fragments_acked_cumulatively() {
    let _ = tracing_subscriber::fmt::try_init();

    let (outduct, mut events, mut peer) = established(|o| o.with_max_fragment_size(4)).await;

    outduct.forward(Bundle::new("0123456789").with_user_data("f")).unwrap();

    let segments = [
        peer.recv_segment().await,
        peer.recv_segment().await,
        peer.recv_segment().await,
    ];
    let flags: Vec<_> = segments.iter().map(|s| (s.start, s.end)).collect();
    assert_eq!(flags, vec![(true, false), (false, false), (false, true)]);
    assert_eq!(segments[0].payload, "0123");
    assert_eq!(segments[1].payload, "4567");
    assert_eq!(segments[2].payload, "89");

    peer.send(Message::Ack(4)).await;
    peer.send(Message::Ack(8)).await;
    peer.send(Message::Ack(10)).await;
    assert_eq!(next_event(&mut events).await, sent("f"));

    let telemetry = outduct.telemetry();
    assert_eq!(telemetry.fragments_sent, 3);
    assert_eq!(telemetry.fragments_acked, 3);
    assert_eq!(telemetry.bundles_acked, 1);
    assert_eq!(telemetry.bytes_acked, 10);

    outduct.stop().await;
}

#[tokio::test]
async fn wrong_ack_fails_the_link() {
    let _ = tracing_subscriber::fmt::try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let outduct = TcpclOutduct::new(
        options(&listener).with_reconnect(ReconnectOptions::fixed(Duration::from_millis(100))),
    );
    let mut events = start(&outduct);

    let mut peer = Peer::accept(&listener).await;
    peer.handshake("ipn:2.0", 0).await;
    assert!(next_link_status(&mut events).await);

    let first = Bundle::new("hello").with_user_data("a");
    let second = Bundle::new("world").with_user_data("b");
    outduct.forward(first.clone()).unwrap();
    outduct.forward(second.clone()).unwrap();
    peer.recv_segment().await;
    peer.recv_segment().await;

    peer.send(Message::Ack(3)).await;

    assert_eq!(next_event(&mut events).await, OutductEvent::LinkStatus { outduct: 0, up: false });
    assert_eq!(next_event(&mut events).await, OutductEvent::Failed { outduct: 0, bundle: first });
    assert_eq!(next_event(&mut events).await, OutductEvent::Failed { outduct: 0, bundle: second });
    peer.expect_closed().await;

    assert!(!outduct.ready_to_forward());
    assert!(matches!(outduct.forward(Bundle::new("late")), Err(ForwardError::NotReady(_))));

    let telemetry = outduct.telemetry();
    assert_eq!(telemetry.link_down_events, 1);
    assert_eq!(telemetry.bundles_failed, 2);
    assert_eq!(telemetry.bundles_acked, 0);
    assert_eq!(telemetry.unacked, 0);

    // A fresh session accepts bundles again
    let mut peer = Peer::accept(&listener).await;
    peer.handshake("ipn:2.0", 0).await;
    assert!(next_link_status(&mut events).await);

    outduct.forward(Bundle::new("again").with_user_data("c")).unwrap();
    assert_eq!(peer.recv_segment().await.payload, "again");
    peer.send(Message::Ack(5)).await;
    assert_eq!(next_event(&mut events).await, sent("c"));

    outduct.stop().await;
}

/// A TCP stream that reports one byte more than it wrote, once its first write completed.
struct OverReporting {
    inner: TcpStream,
    armed: bool,
}

impl AsyncRead for OverReporting {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for OverReporting {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let armed = self.armed;
        match Pin::new(&mut self.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                self.armed = true;
                Poll::Ready(Ok(if armed { n + 1 } else { n }))
            }
            other => other,
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl PeerAddress<HostPort> for OverReporting {
    fn peer_addr(&self) -> io::Result<HostPort> {
        self.inner.peer_addr().map(HostPort::from)
    }
}

#[derive(Default)]
struct OverReportingTcp(Tcp);

impl Transport<HostPort> for OverReportingTcp {
    type Io = OverReporting;
    type Error = io::Error;
    type Connect = BoxFuture<'static, io::Result<OverReporting>>;

    fn connect(&mut self, addr: HostPort) -> Self::Connect {
        let connect = self.0.connect(addr);
        Box::pin(async move { Ok(OverReporting { inner: connect.await?, armed: false }) })
    }
}

#[tokio::test]
async fn write_count_mismatch_fails_the_link() {
    let _ = tracing_subscriber::fmt::try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let outduct = TcpclOutduct::with_transport(options(&listener), OverReportingTcp::default());
    let mut events = start(&outduct);

    let mut peer = Peer::accept(&listener).await;
    peer.handshake("ipn:2.0", 0).await;
    assert!(next_link_status(&mut events).await);

    let bundle = Bundle::new("hello").with_user_data("a");
    outduct.forward(bundle.clone()).unwrap();

    assert_eq!(next_event(&mut events).await, OutductEvent::LinkStatus { outduct: 0, up: false });
    assert_eq!(next_event(&mut events).await, OutductEvent::Failed { outduct: 0, bundle });
    assert_eq!(outduct.final_stats().bundles_sent, 0);

    outduct.stop().await;
}

#[tokio::test]
async fn peer_shutdown_delays_reconnect() {
    let _ = tracing_subscriber::fmt::try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let outduct =
        TcpclOutduct::new(options(&listener).with_reconnect(ReconnectOptions::default()));
    let mut events = start(&outduct);

    let mut peer = Peer::accept(&listener).await;
    peer.handshake("ipn:2.0", 0).await;
    assert!(next_link_status(&mut events).await);

    let shutdown_at = Instant::now();
    peer.send(Message::Shutdown(Shutdown {
        reason: Some(ShutdownReason::Busy),
        reconnect_delay: Some(1),
    }))
    .await;
    assert!(!next_link_status(&mut events).await);

    // The requested second replaces the configured three
    let mut peer = Peer::accept(&listener).await;
    let elapsed = shutdown_at.elapsed();
    assert!(elapsed >= Duration::from_millis(900), "reconnected after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(2900), "reconnected after {elapsed:?}");

    peer.handshake("ipn:2.0", 0).await;
    assert!(next_link_status(&mut events).await);
    assert_eq!(outduct.telemetry().link_down_events, 1);

    outduct.stop().await;
}

#[tokio::test]
async fn opportunistic_receive() {
    let _ = tracing_subscriber::fmt::try_init();

    let (outduct, mut events, mut peer) =
        established(|o| o.with_opportunistic_receive(true)).await;

    peer.send(Message::DataSegment(DataSegment {
        start: true,
        end: false,
        payload: Bytes::from("from "),
    }))
    .await;
    peer.send(Message::DataSegment(DataSegment {
        start: false,
        end: true,
        payload: Bytes::from("peer"),
    }))
    .await;

    assert_eq!(peer.recv().await, Some(Message::Ack(5)));
    assert_eq!(peer.recv().await, Some(Message::Ack(9)));
    assert_eq!(
        next_event(&mut events).await,
        OutductEvent::Received { outduct: 0, bundle: Bundle::new("from peer") }
    );
    assert_eq!(outduct.telemetry().bundles_received, 1);

    outduct.stop().await;
}

#[tokio::test]
async fn rejects_unexpected_remote_eid() {
    let _ = tracing_subscriber::fmt::try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let outduct = TcpclOutduct::new(options(&listener));
    let mut events = start(&outduct);

    let mut peer = Peer::accept(&listener).await;
    peer.handshake("ipn:3.0", 0).await;
    peer.expect_closed().await;

    assert!(!outduct.ready_to_forward());
    outduct.stop().await;
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn keepalives_then_idle_timeout() {
    let _ = tracing_subscriber::fmt::try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let outduct = TcpclOutduct::new(options(&listener).with_keepalive_interval(1));
    let mut events = start(&outduct);

    let mut peer = Peer::accept(&listener).await;
    assert_eq!(peer.handshake("ipn:2.0", 1).await.keepalive_interval, 1);
    assert!(next_link_status(&mut events).await);

    assert_eq!(peer.recv().await, Some(Message::Keepalive));

    // Stay silent past two and a half intervals
    loop {
        match peer.recv().await {
            Some(Message::Keepalive) => continue,
            Some(Message::Shutdown(shutdown)) => {
                assert_eq!(shutdown.reason, Some(ShutdownReason::IdleTimeout));
                break;
            }
            other => panic!("expected keepalive or shutdown, got {other:?}"),
        }
    }

    assert!(!next_link_status(&mut events).await);
    assert!(outduct.telemetry().keepalives_sent >= 1);

    outduct.stop().await;
}
