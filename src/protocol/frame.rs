//! Frame layout, parsing and serialization (RFC 6455 section 5.2).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |                     Masking key (if MASK set)                 |
//! +---------------------------------------------------------------+
//! |                          Payload data                         |
//! +---------------------------------------------------------------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::message::CloseFrame;
use crate::protocol::OpCode;
use crate::protocol::mask::apply_mask;

/// Maximum payload size for control frames.
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// FIN bit.
    pub fin: bool,
    /// RSV1..RSV3 as a 3-bit value.
    pub rsv: u8,
    /// Opcode.
    pub opcode: OpCode,
    /// Masking key, if the MASK bit is set.
    pub mask: Option<[u8; 4]>,
    /// Declared payload length.
    pub payload_len: usize,
    /// Bytes occupied by the header, including the masking key.
    pub header_len: usize,
}

impl FrameHeader {
    /// Parse a header from the front of `buf`.
    ///
    /// Returns `Ok(None)` if `buf` does not yet hold the whole header.
    ///
    /// # Errors
    ///
    /// Reserved or invalid opcodes, a 64-bit length with the top bit set, or a
    /// length that does not fit in `usize`.
    pub fn parse(buf: &[u8]) -> Result<Option<Self>> {
        let [b0, b1, rest @ ..] = buf else {
            return Ok(None);
        };

        let fin = b0 & 0x80 != 0;
        let rsv = (b0 >> 4) & 0x07;
        let opcode = OpCode::try_from(b0 & 0x0F)?;
        let masked = b1 & 0x80 != 0;

        let (payload_len, mut header_len) = match b1 & 0x7F {
            126 => {
                let [a, b, ..] = rest else { return Ok(None) };
                (u16::from_be_bytes([*a, *b]) as usize, 4)
            }
            127 => {
                let Some(bytes) = rest.get(..8) else {
                    return Ok(None);
                };
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                let len = u64::from_be_bytes(raw);
                if len >> 63 != 0 {
                    return Err(Error::InvalidFrame(
                        "most significant bit of 64-bit length is set".into(),
                    ));
                }
                let len = usize::try_from(len).map_err(|_| Error::PayloadTooLargeForPlatform {
                    size: len,
                    max: usize::MAX as u64,
                })?;
                (len, 10)
            }
            short => (short as usize, 2),
        };

        let mask = if masked {
            let Some(key) = buf.get(header_len..header_len + 4) else {
                return Ok(None);
            };
            header_len += 4;
            Some([key[0], key[1], key[2], key[3]])
        } else {
            None
        };

        Ok(Some(Self {
            fin,
            rsv,
            opcode,
            mask,
            payload_len,
            header_len,
        }))
    }

    /// Structural rules that hold regardless of role: control frames are
    /// final and carry at most 125 bytes.
    ///
    /// # Errors
    ///
    /// [`Error::FragmentedControlFrame`] or [`Error::ControlFrameTooLarge`].
    pub fn check_control_rules(&self) -> Result<()> {
        if self.opcode.is_control() {
            if !self.fin {
                return Err(Error::FragmentedControlFrame);
            }
            if self.payload_len > MAX_CONTROL_FRAME_PAYLOAD {
                return Err(Error::ControlFrameTooLarge(self.payload_len));
            }
        }
        Ok(())
    }

    /// Header plus payload length.
    ///
    /// # Errors
    ///
    /// [`Error::PayloadTooLargeForPlatform`] on overflow.
    pub fn frame_len(&self) -> Result<usize> {
        self.header_len
            .checked_add(self.payload_len)
            .ok_or(Error::PayloadTooLargeForPlatform {
                size: self.payload_len as u64,
                max: usize::MAX as u64,
            })
    }
}

/// One unit of wire transfer.
///
/// `masked` records whether a decoded frame arrived masked; encoding takes the
/// masking key as an argument and ignores the field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment of a message.
    pub fin: bool,
    /// RSV1..RSV3 as a 3-bit value.
    pub rsv: u8,
    /// Opcode.
    pub opcode: OpCode,
    /// Unmasked payload.
    pub payload: Bytes,
    /// Whether the frame was masked on the wire.
    pub masked: bool,
}

impl Frame {
    /// Create a frame.
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin,
            rsv: 0,
            opcode,
            payload: payload.into(),
            masked: false,
        }
    }

    /// A final text frame.
    #[must_use]
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Text, payload)
    }

    /// A final binary frame.
    #[must_use]
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Binary, payload)
    }

    /// A ping frame.
    #[must_use]
    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Ping, payload)
    }

    /// A pong frame.
    #[must_use]
    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Pong, payload)
    }

    /// A close frame carrying `close`, or an empty close frame.
    ///
    /// # Errors
    ///
    /// See [`CloseFrame::to_payload`].
    pub fn close(close: Option<&CloseFrame>) -> Result<Self> {
        let payload = match close {
            Some(close) => close.to_payload()?,
            None => Bytes::new(),
        };
        Ok(Self::new(true, OpCode::Close, payload))
    }

    /// Set the reserved bits.
    #[must_use]
    pub fn with_rsv(mut self, rsv: u8) -> Self {
        self.rsv = rsv & 0x07;
        self
    }

    /// Mark the frame as masked on the wire.
    #[must_use]
    pub fn with_masked(mut self, masked: bool) -> Self {
        self.masked = masked;
        self
    }

    /// Payload bytes.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Check the invariants of a frame about to be sent.
    ///
    /// # Errors
    ///
    /// Control frames must be final and carry at most 125 bytes.
    pub fn validate(&self) -> Result<()> {
        if self.opcode.is_control() {
            if !self.fin {
                return Err(Error::FragmentedControlFrame);
            }
            if self.payload.len() > MAX_CONTROL_FRAME_PAYLOAD {
                return Err(Error::OutgoingFrameTooLarge {
                    size: self.payload.len(),
                    max: MAX_CONTROL_FRAME_PAYLOAD,
                });
            }
        }
        Ok(())
    }

    /// Decode one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` without consuming anything when more bytes are
    /// needed. A declared length above `max_payload` is rejected as soon as
    /// the header is readable, before any payload is buffered.
    ///
    /// # Errors
    ///
    /// Header errors, control frame violations and [`Error::FrameTooLarge`].
    pub fn decode(buf: &mut BytesMut, max_payload: usize) -> Result<Option<Self>> {
        let Some(header) = FrameHeader::parse(buf)? else {
            return Ok(None);
        };
        header.check_control_rules()?;
        if header.payload_len > max_payload {
            return Err(Error::FrameTooLarge {
                size: header.payload_len,
                max: max_payload,
            });
        }
        Self::take(&header, buf)
    }

    /// Split a complete frame described by `header` off the front of `buf`.
    pub(crate) fn take(header: &FrameHeader, buf: &mut BytesMut) -> Result<Option<Self>> {
        let total = header.frame_len()?;
        if buf.len() < total {
            buf.reserve(total - buf.len());
            return Ok(None);
        }

        let mut raw = buf.split_to(total);
        let mut payload = raw.split_off(header.header_len);
        if let Some(key) = header.mask {
            apply_mask(&mut payload, key);
        }

        Ok(Some(Self {
            fin: header.fin,
            rsv: header.rsv,
            opcode: header.opcode,
            payload: payload.freeze(),
            masked: header.mask.is_some(),
        }))
    }

    /// Append the wire form of this frame to `dst`, masking the payload with
    /// `mask` if given.
    pub fn encode(&self, dst: &mut BytesMut, mask: Option<[u8; 4]>) {
        let len = self.payload.len();
        dst.reserve(self.wire_size(mask.is_some()));

        let mut b0 = self.opcode.as_u8() | ((self.rsv & 0x07) << 4);
        if self.fin {
            b0 |= 0x80;
        }
        dst.put_u8(b0);

        let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
        match len {
            0..=125 => dst.put_u8(mask_bit | len as u8),
            126..=0xFFFF => {
                dst.put_u8(mask_bit | 126);
                dst.put_u16(len as u16);
            }
            _ => {
                dst.put_u8(mask_bit | 127);
                dst.put_u64(len as u64);
            }
        }

        match mask {
            Some(key) => {
                dst.put_slice(&key);
                let start = dst.len();
                dst.put_slice(&self.payload);
                apply_mask(&mut dst[start..], key);
            }
            None => dst.put_slice(&self.payload),
        }
    }

    /// Bytes needed to encode this frame.
    #[must_use]
    pub fn wire_size(&self, masked: bool) -> usize {
        let len = self.payload.len();
        let extended = match len {
            0..=125 => 0,
            126..=0xFFFF => 2,
            _ => 8,
        };
        2 + extended + if masked { 4 } else { 0 } + len
    }
}
