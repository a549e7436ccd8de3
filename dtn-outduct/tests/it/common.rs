use std::time::Duration;

use dtn_outduct::OutductEvent;
use tokio::sync::mpsc;

/// Upper bound for anything a test waits on.
pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn events() -> (mpsc::UnboundedSender<OutductEvent>, mpsc::UnboundedReceiver<OutductEvent>) {
    mpsc::unbounded_channel()
}

pub async fn next_event(events: &mut mpsc::UnboundedReceiver<OutductEvent>) -> OutductEvent {
    tokio::time::timeout(TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

/// Skips events until a link status event arrives and returns whether the link is up.
pub async fn next_link_status(events: &mut mpsc::UnboundedReceiver<OutductEvent>) -> bool {
    loop {
        if let OutductEvent::LinkStatus { up, .. } = next_event(events).await {
            return up;
        }
    }
}
