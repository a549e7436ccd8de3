use std::time::Duration;

use bytes::Bytes;
use dtn_outduct::{
    Bundle, ForwardError, Outduct, OutductEvent, ReconnectOptions, StcpOptions, StcpOutduct,
};
use dtn_wire::stcp::StcpCodec;
use futures::StreamExt;
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    sync::mpsc,
    time::timeout,
};
use tokio_util::codec::FramedRead;

use crate::common::{events, next_event, next_link_status, TIMEOUT};

async fn setup(
    configure: impl FnOnce(StcpOptions) -> StcpOptions,
) -> (StcpOutduct, mpsc::UnboundedReceiver<OutductEvent>, TcpListener) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let options = StcpOptions::new(listener.local_addr().unwrap().into())
        .with_keepalive_interval(0)
        .with_reconnect(ReconnectOptions::one_shot());

    let outduct = StcpOutduct::new(configure(options));
    let (tx, rx) = events();
    outduct.set_event_sink(tx);
    outduct.connect();

    (outduct, rx, listener)
}

async fn accept(listener: &TcpListener) -> TcpStream {
    timeout(TIMEOUT, listener.accept()).await.unwrap().unwrap().0
}

async fn recv_frame(peer: &mut FramedRead<TcpStream, StcpCodec>) -> Bytes {
    timeout(TIMEOUT, peer.next()).await.unwrap().unwrap().unwrap()
}

#[tokio::test]
async fn length_prefixed_frames() {
    let _ = tracing_subscriber::fmt::try_init();

    let (outduct, mut events, listener) = setup(|o| o).await;
    assert!(matches!(outduct.forward(Bundle::new("early")), Err(ForwardError::NotReady(_))));

    let mut peer = FramedRead::new(accept(&listener).await, StcpCodec::new());
    assert!(next_link_status(&mut events).await);

    assert!(matches!(outduct.forward(Bundle::new(Bytes::new())), Err(ForwardError::Empty(_))));

    outduct.forward(Bundle::new("first").with_user_data("1")).unwrap();
    outduct.forward(Bundle::new("second").with_user_data("2")).unwrap();

    assert_eq!(recv_frame(&mut peer).await, "first");
    assert_eq!(recv_frame(&mut peer).await, "second");

    assert_eq!(
        next_event(&mut events).await,
        OutductEvent::Sent { outduct: 0, user_data: Bytes::from("1") }
    );
    assert_eq!(
        next_event(&mut events).await,
        OutductEvent::Sent { outduct: 0, user_data: Bytes::from("2") }
    );

    let telemetry = outduct.telemetry();
    assert_eq!(telemetry.bundles_acked, 2);
    assert_eq!(telemetry.bytes_sent, 11);
    assert_eq!(telemetry.framing_bytes_sent, 8);

    outduct.stop().await;
    assert!(timeout(TIMEOUT, peer.next()).await.unwrap().is_none());
}

#[tokio::test]
async fn keepalive_when_idle() {
    let _ = tracing_subscriber::fmt::try_init();

    let (outduct, mut events, listener) = setup(|o| o.with_keepalive_interval(1)).await;
    let mut peer = FramedRead::new(accept(&listener).await, StcpCodec::new());
    assert!(next_link_status(&mut events).await);

    // Zero-length frame
    assert!(recv_frame(&mut peer).await.is_empty());

    outduct.stop().await;
    assert!(outduct.telemetry().keepalives_sent >= 1);
}

#[tokio::test]
async fn data_from_peer_fails_the_link() {
    let _ = tracing_subscriber::fmt::try_init();

    let (outduct, mut events, listener) = setup(|o| o).await;
    let mut peer = accept(&listener).await;
    assert!(next_link_status(&mut events).await);

    peer.write_all(b"?").await.unwrap();
    assert!(!next_link_status(&mut events).await);
    assert!(!outduct.ready_to_forward());
    assert_eq!(outduct.telemetry().link_down_events, 1);

    outduct.stop().await;
}

#[tokio::test]
async fn reconnects_after_peer_closes() {
    let _ = tracing_subscriber::fmt::try_init();

    let (outduct, mut events, listener) =
        setup(|o| o.with_reconnect(ReconnectOptions::fixed(Duration::from_millis(100)))).await;

    let peer = accept(&listener).await;
    assert!(next_link_status(&mut events).await);

    drop(peer);
    assert!(!next_link_status(&mut events).await);

    let mut peer = FramedRead::new(accept(&listener).await, StcpCodec::new());
    assert!(next_link_status(&mut events).await);

    outduct.forward(Bundle::new("again")).unwrap();
    assert_eq!(recv_frame(&mut peer).await, "again");

    outduct.stop().await;
}
