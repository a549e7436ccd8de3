use std::{env::temp_dir, path::PathBuf, time::Duration};

use bytes::{Bytes, BytesMut};
use dtn_outduct::{
    Bundle, ForwardError, LocalStreamOptions, LocalStreamOutduct, Outduct, OutductEvent,
    ReconnectOptions,
};
use dtn_wire::encap::{self, EncapCodec, PacketType};
use futures::StreamExt;
use tokio::{
    io::AsyncWriteExt,
    net::{UnixListener, UnixStream},
    sync::mpsc,
    time::timeout,
};
use tokio_util::codec::FramedRead;

use crate::common::{events, next_event, next_link_status, TIMEOUT};

fn socket_path(name: &str) -> PathBuf {
    let path = temp_dir().join(format!("dtn-outduct-{}-{name}.sock", std::process::id()));
    let _ = std::fs::remove_file(&path);
    path
}

fn start(options: LocalStreamOptions) -> (LocalStreamOutduct, mpsc::UnboundedReceiver<OutductEvent>) {
    let outduct = LocalStreamOutduct::new(options.with_reconnect(ReconnectOptions::one_shot()));
    let (tx, rx) = events();
    outduct.set_event_sink(tx);
    outduct.connect();
    (outduct, rx)
}

async fn accept(listener: &UnixListener) -> UnixStream {
    timeout(TIMEOUT, listener.accept()).await.unwrap().unwrap().0
}

#[tokio::test]
async fn encapsulated_frames() {
    let _ = tracing_subscriber::fmt::try_init();

    let path = socket_path("frames");
    let listener = UnixListener::bind(&path).unwrap();
    let (outduct, mut events) = start(LocalStreamOptions::new(&path));

    let mut peer = FramedRead::new(accept(&listener).await, EncapCodec::new(PacketType::Bp));
    assert!(next_link_status(&mut events).await);

    assert!(matches!(outduct.forward(Bundle::new(Bytes::new())), Err(ForwardError::Empty(_))));

    let large = Bytes::from(vec![7u8; 1000]);
    outduct.forward(Bundle::new("small").with_user_data("s")).unwrap();
    outduct.forward(Bundle::new(large.clone()).with_user_data("l")).unwrap();

    assert_eq!(timeout(TIMEOUT, peer.next()).await.unwrap().unwrap().unwrap(), "small");
    assert_eq!(timeout(TIMEOUT, peer.next()).await.unwrap().unwrap().unwrap(), large);

    assert_eq!(
        next_event(&mut events).await,
        OutductEvent::Sent { outduct: 0, user_data: Bytes::from("s") }
    );
    assert_eq!(
        next_event(&mut events).await,
        OutductEvent::Sent { outduct: 0, user_data: Bytes::from("l") }
    );

    // Two-byte header for the small bundle, four-byte header for the large one
    assert_eq!(outduct.telemetry().framing_bytes_sent, 6);

    outduct.stop().await;
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn bundles_from_peer() {
    let _ = tracing_subscriber::fmt::try_init();

    let path = socket_path("receive");
    let listener = UnixListener::bind(&path).unwrap();
    let (outduct, mut events) = start(LocalStreamOptions::new(&path).with_opportunistic_receive(true));

    let mut peer = accept(&listener).await;
    assert!(next_link_status(&mut events).await);

    let mut frame = BytesMut::new();
    encap::encode_header(PacketType::Bp, 5, &mut frame).unwrap();
    frame.extend_from_slice(b"hello");
    peer.write_all(&frame).await.unwrap();

    assert_eq!(
        next_event(&mut events).await,
        OutductEvent::Received { outduct: 0, bundle: Bundle::new("hello") }
    );
    assert_eq!(outduct.telemetry().bundles_received, 1);

    outduct.stop().await;
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn receives_while_forwarding() {
    let _ = tracing_subscriber::fmt::try_init();

    let path = socket_path("duplex");
    let listener = UnixListener::bind(&path).unwrap();
    let (outduct, mut events) =
        start(LocalStreamOptions::new(&path).with_pipeline_depth(3).with_opportunistic_receive(true));

    let (reader, mut writer) = accept(&listener).await.into_split();
    let mut peer = FramedRead::new(reader, EncapCodec::new(PacketType::Bp));
    assert!(next_link_status(&mut events).await);

    let mut frames = BytesMut::new();
    for payload in [&b"in-1"[..], b"in-2", b"in-3"] {
        encap::encode_header(PacketType::Bp, payload.len() as u64, &mut frames).unwrap();
        frames.extend_from_slice(payload);
    }
    writer.write_all(&frames).await.unwrap();

    for n in 1..=3 {
        outduct.forward(Bundle::new(format!("out-{n}")).with_user_data(format!("{n}"))).unwrap();
    }

    let mut received = Vec::new();
    let mut sent = Vec::new();
    while received.len() < 3 || sent.len() < 3 {
        match next_event(&mut events).await {
            OutductEvent::Received { bundle, .. } => received.push(bundle.payload),
            OutductEvent::Sent { user_data, .. } => sent.push(user_data),
            event => panic!("unexpected event {event:?}"),
        }
    }

    assert_eq!(received, ["in-1", "in-2", "in-3"]);
    assert_eq!(sent, ["1", "2", "3"]);
    for n in 1..=3 {
        let frame = timeout(TIMEOUT, peer.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(frame, format!("out-{n}"));
    }

    let telemetry = outduct.telemetry();
    assert_eq!(telemetry.bundles_received, 3);
    assert_eq!(telemetry.unacked, 0);

    // Stopping closes our write side
    outduct.stop().await;
    assert!(timeout(TIMEOUT, peer.next()).await.unwrap().is_none());
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn waits_for_the_socket() {
    let _ = tracing_subscriber::fmt::try_init();

    let path = socket_path("late");
    let outduct = LocalStreamOutduct::new(
        LocalStreamOptions::new(&path).with_reconnect(ReconnectOptions::fixed(Duration::from_millis(50))),
    );
    let (tx, mut rx) = events();
    outduct.set_event_sink(tx);
    outduct.connect();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!outduct.ready_to_forward());

    let listener = UnixListener::bind(&path).unwrap();
    let _peer = accept(&listener).await;
    assert!(next_link_status(&mut rx).await);

    outduct.stop().await;
    let _ = std::fs::remove_file(&path);
}
