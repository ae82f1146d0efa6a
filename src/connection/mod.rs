//! Per-connection WebSocket machinery: role, lifecycle state, outgoing
//! framing and the session task with its client handle.

mod role;
mod session;
mod splitter;
mod state;

pub use role::Role;
pub use session::{SendFuture, WebSocketClient};
pub use splitter::OutgoingFrameSplitter;
pub use state::ConnectionState;

pub(crate) use session::{SessionSetup, WebSocketSession};
