use std::time::Duration;

use bytes::Bytes;
use dtn_outduct::{Bundle, ForwardError, Outduct, OutductEvent, UdpOptions, UdpOutduct};
use dtn_transport::udp::MAX_DATAGRAM_LEN;
use tokio::{
    net::UdpSocket,
    sync::mpsc,
    time::{timeout, Instant},
};

use crate::common::{events, next_event, next_link_status, TIMEOUT};

async fn setup(
    configure: impl FnOnce(UdpOptions) -> UdpOptions,
) -> (UdpOutduct, mpsc::UnboundedReceiver<OutductEvent>, UdpSocket) {
    let _ = tracing_subscriber::fmt::try_init();

    let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let outduct = UdpOutduct::new(configure(UdpOptions::new(receiver.local_addr().unwrap().into())));

    let (tx, mut rx) = events();
    outduct.set_event_sink(tx);
    outduct.connect();
    assert!(next_link_status(&mut rx).await);

    (outduct, rx, receiver)
}

async fn recv_datagram(socket: &UdpSocket) -> Vec<u8> {
    let mut buf = vec![0; MAX_DATAGRAM_LEN];
    let n = timeout(TIMEOUT, socket.recv(&mut buf)).await.unwrap().unwrap();
    buf.truncate(n);
    buf
}

#[tokio::test]
async fn one_bundle_per_datagram() {
    let (outduct, mut events, receiver) = setup(|o| o).await;

    outduct.forward(Bundle::new("one").with_user_data("1")).unwrap();
    outduct.forward(Bundle::new("two").with_user_data("2")).unwrap();

    assert_eq!(recv_datagram(&receiver).await, b"one");
    assert_eq!(recv_datagram(&receiver).await, b"two");
    assert_eq!(
        next_event(&mut events).await,
        OutductEvent::Sent { outduct: 0, user_data: Bytes::from("1") }
    );
    assert_eq!(
        next_event(&mut events).await,
        OutductEvent::Sent { outduct: 0, user_data: Bytes::from("2") }
    );

    let oversized = Bundle::new(vec![0u8; MAX_DATAGRAM_LEN + 1]);
    assert!(matches!(outduct.forward(oversized), Err(ForwardError::TooLarge(_))));

    outduct.stop().await;
    assert_eq!(outduct.final_stats().bundles_acked, 2);
}

#[tokio::test]
async fn paced_by_rate() {
    // 10 000 bytes per second
    let (outduct, mut events, receiver) = setup(|o| {
        o.with_rate(80_000).with_rate_precision_window(Duration::from_millis(100))
    })
    .await;

    for _ in 0..5 {
        outduct.forward(Bundle::new(vec![0xaa; 1000])).unwrap();
    }

    let first = {
        recv_datagram(&receiver).await;
        Instant::now()
    };
    for _ in 1..5 {
        assert_eq!(recv_datagram(&receiver).await.len(), 1000);
    }

    // A full window covers one datagram, each further one waits ~100 ms for tokens
    let elapsed = first.elapsed();
    assert!(elapsed >= Duration::from_millis(300), "sent too fast: {elapsed:?}");

    for _ in 0..5 {
        assert!(matches!(next_event(&mut events).await, OutductEvent::Sent { .. }));
    }

    outduct.stop().await;
}
