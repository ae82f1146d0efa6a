//! Error types for the client.
//!
//! Every failure maps onto one [`ErrorCategory`], which decides whether the
//! error only rejects a single operation or tears the connection down.

use thiserror::Error;

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Which timer fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeoutKind {
    /// TCP connect plus upgrade handshake.
    Connect,
    /// No inbound frame within the idle window.
    Idle,
    /// Per-request total duration, including the admission queue wait.
    Total,
}

impl std::fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TimeoutKind::Connect => "connect",
            TimeoutKind::Idle => "idle",
            TimeoutKind::Total => "total",
        })
    }
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed frame, illegal interleaving, masking violation, bad handshake.
    Protocol,
    /// Outgoing payload exceeds the configured frame size.
    Capacity,
    /// The caller used the API in a way the current state does not allow.
    Usage,
    /// Idle or total timer expired.
    Timeout,
    /// No admission slot, or the slot was evicted.
    Admission,
    /// I/O failure of the underlying connection.
    Transport,
}

/// Errors that can occur while executing requests or driving a WebSocket session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Invalid frame structure or header.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Protocol violation detected.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Invalid UTF-8 in a text message or close reason.
    #[error("Invalid UTF-8 in text payload")]
    InvalidUtf8,

    /// Incoming frame exceeds the configured maximum.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Declared payload length.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Reassembled message exceeds the configured maximum.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Size reached so far.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Too many fragments in a single message.
    #[error("Too many fragments: {count} (max: {max})")]
    TooManyFragments {
        /// Fragment count reached.
        count: usize,
        /// Maximum allowed fragments.
        max: usize,
    },

    /// Declared payload length does not fit in memory on this platform.
    #[error("Payload length {size} exceeds platform maximum {max}")]
    PayloadTooLargeForPlatform {
        /// Declared length.
        size: u64,
        /// Platform maximum.
        max: u64,
    },

    /// Outgoing payload is larger than the max outgoing frame size and
    /// splitting is disabled.
    #[error("Outgoing frame too large: {size} bytes (max: {max})")]
    OutgoingFrameTooLarge {
        /// Payload size of the rejected send.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The operation is not allowed in the current state.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Connection has been closed.
    #[error("Connection closed: {0:?}")]
    ConnectionClosed(Option<u16>),

    /// Invalid WebSocket upgrade handshake.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// Response head or handshake exceeds the header limit.
    #[error("Header block too large: {size} bytes (max: {max})")]
    HeaderTooLarge {
        /// Bytes read without finding the end of the head.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Header value contains characters that would break the request.
    #[error("Invalid header value for '{header}': {reason}")]
    InvalidHeaderValue {
        /// Header name.
        header: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Malformed or unsupported HTTP response.
    #[error("HTTP error: {0}")]
    Http(String),

    /// URL could not be parsed or has no host.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Scheme is not `http` or `ws`.
    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// Configuration rejected by validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),

    /// A timer expired.
    #[error("Timed out ({0})")]
    Timeout(TimeoutKind),

    /// Admission queue for the endpoint is full.
    #[error("Admission rejected for {0}")]
    AdmissionRejected(String),

    /// The operation was evicted to make room for a newer one.
    #[error("Evicted by a newer operation on {0}")]
    Evicted(String),

    /// The connection pool has been shut down.
    #[error("Connection pool closed")]
    PoolClosed,

    /// The client has not been started or has been shut down.
    #[error("Client is not running")]
    ClientNotRunning,

    /// Invalid close code.
    #[error("Invalid close code: {0}")]
    InvalidCloseCode(u16),

    /// Reserved opcode used.
    #[error("Reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// Control frame fragmented.
    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Incoming control frame payload over 125 bytes.
    #[error("Control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),

    /// Unmasked frame received by a server.
    #[error("Client frame must be masked")]
    UnmaskedClientFrame,

    /// Masked frame received by a client.
    #[error("Server frame must not be masked")]
    MaskedServerFrame,

    /// Reserved bits set without negotiated extension.
    #[error("Reserved bits set without negotiated extension")]
    ReservedBitsSet,

    /// Invalid opcode value.
    #[error("Invalid opcode: {0:#x}")]
    InvalidOpcode(u8),
}

impl Error {
    /// Classify this error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::OutgoingFrameTooLarge { .. } => ErrorCategory::Capacity,
            Error::IllegalState(_)
            | Error::InvalidCloseCode(_)
            | Error::InvalidHeaderValue { .. }
            | Error::InvalidUrl(_)
            | Error::UnsupportedScheme(_)
            | Error::InvalidConfig(_)
            | Error::ClientNotRunning => ErrorCategory::Usage,
            Error::Timeout(_) => ErrorCategory::Timeout,
            Error::AdmissionRejected(_) | Error::Evicted(_) => ErrorCategory::Admission,
            Error::Io(_) | Error::ConnectionClosed(_) | Error::PoolClosed => {
                ErrorCategory::Transport
            }
            _ => ErrorCategory::Protocol,
        }
    }

    /// Whether this error ends the connection it occurred on.
    ///
    /// Capacity and usage errors only reject the offending call.
    #[must_use]
    pub fn is_connection_fatal(&self) -> bool {
        match self.category() {
            ErrorCategory::Protocol | ErrorCategory::Timeout | ErrorCategory::Transport => true,
            ErrorCategory::Admission => matches!(self, Error::Evicted(_)),
            ErrorCategory::Capacity | ErrorCategory::Usage => false,
        }
    }

    /// Close code to send when this error tears a session down, if any.
    #[must_use]
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Error::InvalidUtf8 => Some(1007),
            Error::FrameTooLarge { .. }
            | Error::MessageTooLarge { .. }
            | Error::TooManyFragments { .. }
            | Error::PayloadTooLargeForPlatform { .. } => Some(1009),
            e if e.category() == ErrorCategory::Protocol => Some(1002),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::InvalidUtf8
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::InvalidUrl(err.to_string())
    }
}
