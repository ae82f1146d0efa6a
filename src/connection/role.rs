//! Which end of the connection a codec speaks for.

/// Endpoint role; decides the masking direction (RFC 6455 section 5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Masks every outgoing frame, rejects masked incoming frames.
    Client,
    /// Never masks, requires every incoming frame to be masked.
    Server,
}

impl Role {
    /// Outgoing frames carry a fresh masking key.
    #[inline]
    #[must_use]
    pub const fn must_mask(self) -> bool {
        matches!(self, Role::Client)
    }

    /// Incoming frames must be masked.
    #[inline]
    #[must_use]
    pub const fn expects_masked(self) -> bool {
        matches!(self, Role::Server)
    }

    /// The role of the other end.
    #[inline]
    #[must_use]
    pub const fn peer(self) -> Self {
        match self {
            Role::Client => Role::Server,
            Role::Server => Role::Client,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Role::Client => "client",
            Role::Server => "server",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masking_directions_are_complementary() {
        for role in [Role::Client, Role::Server] {
            assert_eq!(role.must_mask(), role.peer().expects_masked());
            assert_ne!(role.must_mask(), role.expects_masked());
        }
    }

    #[test]
    fn test_peer() {
        assert_eq!(Role::Client.peer(), Role::Server);
        assert_eq!(Role::Server.peer().peer(), Role::Server);
    }
}
