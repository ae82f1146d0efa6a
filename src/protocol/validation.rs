//! Header checks applied to every incoming frame before its payload is buffered.
//!
//! - Masking direction per RFC 6455 section 5.1
//! - RSV bits, unless the session accepts them
//! - Control frame shape
//! - Frame size limit

use crate::connection::Role;
use crate::error::{Error, Result};
use crate::protocol::frame::FrameHeader;

/// Validator for frames arriving at an endpoint with the given role.
#[derive(Debug, Clone)]
pub struct FrameValidator {
    role: Role,
    max_frame_size: usize,
    accept_reserved_bits: bool,
}

impl FrameValidator {
    /// Create a validator.
    #[must_use]
    pub fn new(role: Role, max_frame_size: usize) -> Self {
        Self {
            role,
            max_frame_size,
            accept_reserved_bits: false,
        }
    }

    /// Let frames with RSV bits through.
    #[must_use]
    pub fn with_accept_reserved_bits(mut self, accept: bool) -> Self {
        self.accept_reserved_bits = accept;
        self
    }

    /// Role this validator checks for.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Validate a parsed header.
    ///
    /// # Errors
    ///
    /// - [`Error::UnmaskedClientFrame`] / [`Error::MaskedServerFrame`]
    /// - [`Error::ReservedBitsSet`]
    /// - [`Error::FragmentedControlFrame`] / [`Error::ControlFrameTooLarge`]
    /// - [`Error::FrameTooLarge`]
    pub fn validate(&self, header: &FrameHeader) -> Result<()> {
        let masked = header.mask.is_some();
        if masked != self.role.expects_masked() {
            return Err(match self.role {
                Role::Server => Error::UnmaskedClientFrame,
                Role::Client => Error::MaskedServerFrame,
            });
        }

        if header.rsv != 0 && !self.accept_reserved_bits {
            return Err(Error::ReservedBitsSet);
        }

        header.check_control_rules()?;

        if header.payload_len > self.max_frame_size {
            return Err(Error::FrameTooLarge {
                size: header.payload_len,
                max: self.max_frame_size,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OpCode;

    fn header(opcode: OpCode, masked: bool, rsv: u8, len: usize) -> FrameHeader {
        FrameHeader {
            fin: true,
            rsv,
            opcode,
            mask: masked.then_some([1, 2, 3, 4]),
            payload_len: len,
            header_len: 2,
        }
    }

    // --------------------------------------------------------------------------
    // Masking (RFC 6455 section 5.1)
    // --------------------------------------------------------------------------

    #[test]
    fn test_client_rejects_masked_server_frame() {
        let v = FrameValidator::new(Role::Client, 1024);
        assert_eq!(
            v.validate(&header(OpCode::Text, true, 0, 10)),
            Err(Error::MaskedServerFrame)
        );
        assert!(v.validate(&header(OpCode::Text, false, 0, 10)).is_ok());
    }

    #[test]
    fn test_server_rejects_unmasked_client_frame() {
        let v = FrameValidator::new(Role::Server, 1024);
        assert_eq!(
            v.validate(&header(OpCode::Binary, false, 0, 10)),
            Err(Error::UnmaskedClientFrame)
        );
        assert!(v.validate(&header(OpCode::Binary, true, 0, 10)).is_ok());
    }

    // --------------------------------------------------------------------------
    // RSV bits
    // --------------------------------------------------------------------------

    #[test]
    fn test_reserved_bits() {
        let strict = FrameValidator::new(Role::Client, 1024);
        for rsv in 1..=7 {
            assert_eq!(
                strict.validate(&header(OpCode::Text, false, rsv, 1)),
                Err(Error::ReservedBitsSet)
            );
        }
        let lenient = strict.with_accept_reserved_bits(true);
        assert!(lenient.validate(&header(OpCode::Text, false, 4, 1)).is_ok());
    }

    // --------------------------------------------------------------------------
    // Size and control frames
    // --------------------------------------------------------------------------

    #[test]
    fn test_size_limit_is_inclusive() {
        let v = FrameValidator::new(Role::Client, 40);
        assert!(v.validate(&header(OpCode::Binary, false, 0, 40)).is_ok());
        assert_eq!(
            v.validate(&header(OpCode::Binary, false, 0, 41)),
            Err(Error::FrameTooLarge { size: 41, max: 40 })
        );
    }

    #[test]
    fn test_control_rules() {
        let v = FrameValidator::new(Role::Client, 1 << 20);
        let mut ping = header(OpCode::Ping, false, 0, 0);
        ping.fin = false;
        assert_eq!(v.validate(&ping), Err(Error::FragmentedControlFrame));
        assert_eq!(
            v.validate(&header(OpCode::Close, false, 0, 200)),
            Err(Error::ControlFrameTooLarge(200))
        );
    }
}
