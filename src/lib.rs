//! # rswc - HTTP/1.1 and WebSocket client
//!
//! `rswc` is an async client for plain HTTP/1.1 requests and RFC 6455
//! WebSocket sessions, built on tokio.
//!
//! ## Features
//!
//! - **Resumable frame decoding** with size limits enforced before buffering
//! - **Fragmentation** in both directions, with control frames interleaved
//! - **Per-endpoint admission control**: unbounded, bounded FIFO queue, or
//!   evict-oldest
//! - **Keep-alive connection pooling** with idle expiry
//! - **Exactly-once completion events** that drive slot release and
//!   connection return
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rswc::{ClientConfig, HttpClient, WebSocketClient, WebSocketEvent};
//!
//! # async fn run() -> rswc::Result<()> {
//! let client = HttpClient::new(ClientConfig::default())?;
//! client.start()?;
//!
//! let ws = client
//!     .websocket(
//!         "ws://localhost:9001/echo",
//!         Arc::new(|_: &WebSocketClient, event: WebSocketEvent| println!("{event:?}")),
//!     )
//!     .await?;
//! ws.send_text("hello").await?;
//! ws.close().await;
//! client.shutdown()?;
//! # Ok(())
//! # }
//! ```

pub mod admission;
pub mod bus;
pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod listener;
pub mod message;
pub mod pool;
pub mod protocol;
pub mod transport;

pub use admission::{Admission, AdmissionController, BackPressure, Slot, SlotId};
pub use bus::{CompletionBus, CompletionEvent, CompletionSubscriber, OperationKind, RequestContext, RequestId};
pub use client::HttpClient;
pub use codec::{FrameCodec, FramedTransport};
pub use config::{AdmissionPolicy, ClientConfig, Limits, PoolConfig, Timeouts, WebSocketConfig};
pub use connection::{ConnectionState, OutgoingFrameSplitter, Role, SendFuture, WebSocketClient};
pub use endpoint::{EndpointKey, Target};
pub use error::{Error, ErrorCategory, Result, TimeoutKind};
pub use listener::{Callbacks, WebSocketCallbacks, WebSocketEvent, WebSocketListener, event_channel};
pub use message::{CloseCode, CloseFrame, LogicalMessage, MessageKind};
pub use pool::{ConnectionId, ConnectionPool, PooledConnection};
pub use protocol::{FragmentAssembler, Frame, Method, OpCode, Request, Response};
pub use transport::{Connector, TcpConnector};
