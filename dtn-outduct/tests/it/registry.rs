use bytes::Bytes;
use dtn_common::Eid;
use dtn_outduct::{
    Bundle, ConvergenceLayer, ForwardError, OutductConfig, OutductEvent, OutductRegistry,
    OutductsConfig,
};
use dtn_transport::udp::MAX_DATAGRAM_LEN;
use dtn_wire::stcp::StcpCodec;
use futures::StreamExt;
use tokio::{
    net::{TcpListener, UdpSocket},
    time::timeout,
};
use tokio_util::codec::FramedRead;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::common::TIMEOUT;

async fn next(events: &mut UnboundedReceiverStream<OutductEvent>) -> OutductEvent {
    timeout(TIMEOUT, events.next()).await.unwrap().unwrap()
}

#[tokio::test]
async fn routes_bundles_to_their_outducts() {
    let _ = tracing_subscriber::fmt::try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let config = OutductsConfig {
        elements: vec![
            OutductConfig::new("to-node-2", ConvergenceLayer::Stcp)
                .with_next_hop(2)
                .with_remote("127.0.0.1", listener.local_addr().unwrap().port())
                .with_destination("ipn:2.*"),
            OutductConfig::new("to-node-3", ConvergenceLayer::Udp)
                .with_next_hop(3)
                .with_remote("127.0.0.1", receiver.local_addr().unwrap().port())
                .with_destination("ipn:3.1"),
        ],
    };

    let registry = OutductRegistry::new();
    registry.load(&config, 1).unwrap();
    let mut events = registry.take_events().unwrap();

    registry.connect_all();
    let mut stcp_peer =
        FramedRead::new(timeout(TIMEOUT, listener.accept()).await.unwrap().unwrap().0, StcpCodec::new());

    let mut up = Vec::new();
    while up.len() < 2 {
        if let OutductEvent::LinkStatus { outduct, up: true } = next(&mut events).await {
            up.push(outduct);
        }
    }
    up.sort_unstable();
    assert_eq!(up, vec![0, 1]);
    assert!(registry.all_ready_to_forward());

    registry.forward(&Eid::new(2, 9), Bundle::new("to two").with_user_data("2")).unwrap();
    registry.forward(&Eid::new(3, 1), Bundle::new("to three").with_user_data("3")).unwrap();
    assert!(matches!(
        registry.forward(&Eid::new(3, 2), Bundle::new("nowhere")),
        Err(ForwardError::NoRoute(..))
    ));

    assert_eq!(timeout(TIMEOUT, stcp_peer.next()).await.unwrap().unwrap().unwrap(), "to two");
    let mut buf = vec![0; MAX_DATAGRAM_LEN];
    let n = timeout(TIMEOUT, receiver.recv(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf[..n], b"to three");

    let mut sent = Vec::new();
    while sent.len() < 2 {
        if let OutductEvent::Sent { outduct, user_data } = next(&mut events).await {
            sent.push((outduct, user_data));
        }
    }
    sent.sort();
    assert_eq!(sent, vec![(0, Bytes::from("2")), (1, Bytes::from("3"))]);

    let telemetry = registry.telemetry();
    assert_eq!(telemetry.iter().map(|t| t.bundles_acked).sum::<usize>(), 2);

    registry.stop_all().await;
    assert!(!registry.all_ready_to_forward());
}
