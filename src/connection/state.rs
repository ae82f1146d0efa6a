//! Lifecycle of a WebSocket session.

/// Session state as observed through a client handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Upgrade handshake in progress.
    #[default]
    Connecting,
    /// Data flows both ways.
    Open,
    /// A close frame was sent or received; waiting for the other half.
    Closing,
    /// Transport closed and completion published.
    Closed,
}

impl ConnectionState {
    /// Data frames may be sent.
    #[must_use]
    #[inline]
    pub const fn can_send(self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    /// Frames are still read from the peer.
    #[must_use]
    #[inline]
    pub const fn can_receive(self) -> bool {
        matches!(self, ConnectionState::Open | ConnectionState::Closing)
    }

    /// No further transitions happen.
    #[must_use]
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_and_receive_permissions() {
        use ConnectionState::*;
        let table = [
            (Connecting, false, false),
            (Open, true, true),
            (Closing, false, true),
            (Closed, false, false),
        ];
        for (state, send, receive) in table {
            assert_eq!(state.can_send(), send, "{state}");
            assert_eq!(state.can_receive(), receive, "{state}");
        }
    }

    #[test]
    fn test_only_closed_is_terminal() {
        assert!(ConnectionState::Closed.is_terminal());
        assert!(!ConnectionState::Closing.is_terminal());
        assert_eq!(ConnectionState::default(), ConnectionState::Connecting);
    }
}
