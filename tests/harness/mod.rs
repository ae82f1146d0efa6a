//! Shared fixtures for the integration tests.

#![allow(dead_code)]

mod server;

use std::time::Duration;

use rswc::WebSocketEvent;
use tokio::sync::mpsc::UnboundedReceiver;

pub use server::TestServer;

/// Next event, failing the test after two seconds.
pub async fn next_event(events: &mut UnboundedReceiver<WebSocketEvent>) -> WebSocketEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for a websocket event")
        .expect("event channel closed")
}

/// Events up to and including `Disconnect`.
pub async fn drain_until_disconnect(
    events: &mut UnboundedReceiver<WebSocketEvent>,
) -> Vec<WebSocketEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(events).await;
        let done = event == WebSocketEvent::Disconnect;
        seen.push(event);
        if done {
            return seen;
        }
    }
}

/// Poll `check` until it holds, failing the test after two seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never held");
}
