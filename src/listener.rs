//! Caller-facing session events.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::connection::WebSocketClient;
use crate::error::Error;
use crate::message::CloseCode;

/// One observable occurrence on a WebSocket session.
///
/// Per session: `Connect` first, inbound events in arrival order, then at
/// most one `Error`, then exactly one `Disconnect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebSocketEvent {
    Connect,
    Text(String),
    Binary(Bytes),
    /// A close frame arrived. A frame without a body reports
    /// [`CloseCode::NoStatus`].
    CloseFrame {
        code: CloseCode,
        reason: String,
    },
    Ping(Bytes),
    Pong(Bytes),
    Error(Error),
    Disconnect,
}

/// Receives the events of a session, on the session's task.
pub trait WebSocketListener: Send + Sync + 'static {
    fn on_event(&self, client: &WebSocketClient, event: WebSocketEvent);
}

impl<F> WebSocketListener for F
where
    F: Fn(&WebSocketClient, WebSocketEvent) + Send + Sync + 'static,
{
    fn on_event(&self, client: &WebSocketClient, event: WebSocketEvent) {
        self(client, event);
    }
}

/// Per-event callbacks, each a no-op unless overridden. Wrap in
/// [`Callbacks`] to use as a listener.
#[allow(unused_variables)]
pub trait WebSocketCallbacks: Send + Sync + 'static {
    fn on_connect(&self, client: &WebSocketClient) {}
    fn on_text(&self, client: &WebSocketClient, text: String) {}
    fn on_binary(&self, client: &WebSocketClient, data: Bytes) {}
    fn on_close_frame(&self, client: &WebSocketClient, code: CloseCode, reason: String) {}
    fn on_ping(&self, client: &WebSocketClient, payload: Bytes) {}
    fn on_pong(&self, client: &WebSocketClient, payload: Bytes) {}
    fn on_error(&self, client: &WebSocketClient, error: Error) {}
    fn on_disconnect(&self, client: &WebSocketClient) {}
}

/// Adapter from [`WebSocketCallbacks`] to [`WebSocketListener`].
#[derive(Debug, Clone, Default)]
pub struct Callbacks<C>(pub C);

impl<C: WebSocketCallbacks> WebSocketListener for Callbacks<C> {
    fn on_event(&self, client: &WebSocketClient, event: WebSocketEvent) {
        let c = &self.0;
        match event {
            WebSocketEvent::Connect => c.on_connect(client),
            WebSocketEvent::Text(text) => c.on_text(client, text),
            WebSocketEvent::Binary(data) => c.on_binary(client, data),
            WebSocketEvent::CloseFrame { code, reason } => c.on_close_frame(client, code, reason),
            WebSocketEvent::Ping(payload) => c.on_ping(client, payload),
            WebSocketEvent::Pong(payload) => c.on_pong(client, payload),
            WebSocketEvent::Error(error) => c.on_error(client, error),
            WebSocketEvent::Disconnect => c.on_disconnect(client),
        }
    }
}

/// Listener forwarding every event into a channel.
#[derive(Debug, Clone)]
pub struct EventChannel {
    tx: mpsc::UnboundedSender<WebSocketEvent>,
}

impl WebSocketListener for EventChannel {
    fn on_event(&self, _client: &WebSocketClient, event: WebSocketEvent) {
        // receiver gone: nobody is listening any more
        let _ = self.tx.send(event);
    }
}

/// A listener plus the receiving end of its events, so they can be handled
/// on a task of the caller's choosing.
#[must_use]
pub fn event_channel() -> (Arc<EventChannel>, mpsc::UnboundedReceiver<WebSocketEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(EventChannel { tx }), rx)
}
