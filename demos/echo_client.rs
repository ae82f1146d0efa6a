//! Echo client: sends a few messages to a WebSocket echo server and prints
//! what comes back.
//!
//! Run with: cargo run --example echo_client -- ws://127.0.0.1:9001/
//!
//! Set `RUST_LOG=rswc=debug` to see the client's internals.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rswc::{
    Callbacks, ClientConfig, CloseCode, HttpClient, WebSocketCallbacks, WebSocketClient,
    WebSocketConfig,
};
use tracing_subscriber::EnvFilter;

const DEFAULT_URL: &str = "ws://127.0.0.1:9001/";

struct Printer;

impl WebSocketCallbacks for Printer {
    fn on_connect(&self, client: &WebSocketClient) {
        println!("Connected to {}", client.endpoint());
    }

    fn on_text(&self, _: &WebSocketClient, text: String) {
        println!("Received: {text}");
    }

    fn on_binary(&self, _: &WebSocketClient, data: Bytes) {
        println!("Received binary: {} bytes", data.len());
    }

    fn on_close_frame(&self, _: &WebSocketClient, code: CloseCode, reason: String) {
        println!("Server closed: {} {reason:?}", code.as_u16());
    }

    fn on_error(&self, _: &WebSocketClient, error: rswc::Error) {
        eprintln!("Session error: {error}");
    }

    fn on_disconnect(&self, _: &WebSocketClient) {
        println!("Disconnected");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let url = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_URL.to_string());
    let client = HttpClient::new(ClientConfig::default().with_user_agent("rswc-echo-client"))?;
    client.start()?;

    let config = WebSocketConfig::default()
        .with_ping_every(Duration::from_secs(5))
        .with_max_outgoing_frame_size(1024);
    let ws = client
        .websocket_with(&url, config, Arc::new(Callbacks(Printer)))
        .await?;

    ws.send_text("Hello, WebSocket!").await?;
    ws.send_binary(vec![0u8; 4000]).await?;
    ws.send_text_fragment("split ", false, 0).await?;
    ws.send_text_fragment("by hand", true, 0).await?;

    tokio::time::sleep(Duration::from_millis(500)).await;
    println!("Closing connection...");
    ws.close().await;
    client.shutdown()?;
    Ok(())
}
