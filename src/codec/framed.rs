use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::connection::Role;
use crate::error::Result;
use crate::protocol::frame::FrameHeader;
use crate::protocol::mask::random_mask;
use crate::protocol::{Frame, FrameValidator};

/// Stateless frame encoder/decoder for one side of a connection.
///
/// Decoding validates each header (masking, RSV, control rules, size)
/// before any payload is buffered. Encoding masks with a fresh random key
/// when the role requires it.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    validator: FrameValidator,
}

impl FrameCodec {
    #[must_use]
    pub fn new(validator: FrameValidator) -> Self {
        Self { validator }
    }

    /// Codec for a client with the given incoming frame limit.
    #[must_use]
    pub fn client(max_frame_size: usize) -> Self {
        Self::new(FrameValidator::new(Role::Client, max_frame_size))
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.validator.role()
    }

    /// Decode one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` and leaves `buf` untouched when more bytes are
    /// needed.
    ///
    /// # Errors
    ///
    /// Any header or validation error; the stream cannot be resynchronized
    /// afterwards.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Frame>> {
        let Some(header) = FrameHeader::parse(buf)? else {
            return Ok(None);
        };
        self.validator.validate(&header)?;
        Frame::take(&header, buf)
    }

    /// Encode `frame` onto `dst`.
    ///
    /// # Errors
    ///
    /// Outgoing control frame violations, or a failure to draw a mask.
    pub fn encode(&self, frame: &Frame, dst: &mut BytesMut) -> Result<()> {
        frame.validate()?;
        let mask = if self.role().must_mask() {
            Some(random_mask()?)
        } else {
            None
        };
        frame.encode(dst, mask);
        Ok(())
    }
}

/// A byte stream carrying frames.
pub struct FramedTransport<T> {
    io: T,
    read_buf: BytesMut,
    write_buf: BytesMut,
    codec: FrameCodec,
}

impl<T> FramedTransport<T> {
    /// Wrap `io`. `leftover` holds bytes already read past the handshake.
    #[must_use]
    pub fn new(io: T, codec: FrameCodec, leftover: BytesMut, capacity: usize) -> Self {
        let mut read_buf = leftover;
        read_buf.reserve(capacity);
        Self {
            io,
            read_buf,
            write_buf: BytesMut::with_capacity(capacity),
            codec,
        }
    }

    #[must_use]
    pub fn codec(&self) -> &FrameCodec {
        &self.codec
    }

    #[must_use]
    pub fn get_ref(&self) -> &T {
        &self.io
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.io
    }

    #[must_use]
    pub fn into_inner(self) -> T {
        self.io
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> FramedTransport<T> {
    /// Read the next frame. `Ok(None)` means the peer closed the stream.
    ///
    /// Cancel safe: partial input stays buffered on `self`.
    ///
    /// # Errors
    ///
    /// I/O and decode errors.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.read_buf)? {
                return Ok(Some(frame));
            }
            if self.io.read_buf(&mut self.read_buf).await? == 0 {
                return Ok(None);
            }
        }
    }

    /// Encode and write one frame, without flushing.
    ///
    /// # Errors
    ///
    /// Encode or I/O errors.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.write_buf.clear();
        self.codec.encode(frame, &mut self.write_buf)?;
        self.io.write_all(&self.write_buf).await?;
        Ok(())
    }

    /// Write and flush a batch of frames.
    ///
    /// # Errors
    ///
    /// Encode or I/O errors.
    pub async fn send_all(&mut self, frames: &[Frame]) -> Result<()> {
        self.write_buf.clear();
        for frame in frames {
            self.codec.encode(frame, &mut self.write_buf)?;
        }
        self.io.write_all(&self.write_buf).await?;
        self.io.flush().await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.io.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.io.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::protocol::OpCode;
    use bytes::Bytes;
    use std::io::Cursor;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    struct MockStream {
        read_data: Cursor<Vec<u8>>,
        write_data: Vec<u8>,
    }

    impl MockStream {
        fn new(data: Vec<u8>) -> Self {
            Self {
                read_data: Cursor::new(data),
                write_data: Vec::new(),
            }
        }
    }

    impl AsyncRead for MockStream {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            let pos = self.read_data.position() as usize;
            let data = self.read_data.get_ref();
            if pos >= data.len() {
                return Poll::Ready(Ok(()));
            }
            // one byte per read to exercise resumable decoding
            let to_copy = 1.min(buf.remaining());
            buf.put_slice(&data[pos..pos + to_copy]);
            self.read_data.set_position((pos + to_copy) as u64);
            Poll::Ready(Ok(()))
        }
    }

    impl AsyncWrite for MockStream {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            self.write_data.extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn transport(data: Vec<u8>) -> FramedTransport<MockStream> {
        FramedTransport::new(
            MockStream::new(data),
            FrameCodec::client(1024),
            BytesMut::new(),
            64,
        )
    }

    #[test]
    fn test_decode_needs_more_without_consuming() {
        let codec = FrameCodec::client(1024);
        let mut buf = BytesMut::from(&[0x81u8, 0x05, b'H', b'e'][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn test_encode_masks_for_client() {
        let codec = FrameCodec::client(1024);
        let mut dst = BytesMut::new();
        codec.encode(&Frame::text("Hi"), &mut dst).unwrap();
        assert_eq!(dst[0], 0x81);
        assert_eq!(dst[1], 0x82);
        assert_eq!(dst.len(), 8);

        let server = FrameCodec::new(FrameValidator::new(Role::Server, 1024));
        let frame = server.decode(&mut dst).unwrap().unwrap();
        assert_eq!(&frame.payload[..], b"Hi");
        assert!(frame.masked);
    }

    #[test]
    fn test_encode_rejects_oversize_control() {
        let codec = FrameCodec::client(1024);
        let err = codec
            .encode(&Frame::ping(vec![0u8; 126]), &mut BytesMut::new())
            .unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Capacity);
    }

    #[test]
    fn test_decode_rejects_masked_from_server() {
        let codec = FrameCodec::client(1024);
        let mut buf = BytesMut::from(&[0x81u8, 0x81, 1, 2, 3, 4, 0][..]);
        assert_eq!(codec.decode(&mut buf), Err(Error::MaskedServerFrame));
    }

    #[tokio::test]
    async fn test_read_frames_byte_by_byte() {
        let mut data = vec![0x01, 0x03, b'H', b'e', b'l'];
        data.extend_from_slice(&[0x89, 0x00]);
        data.extend_from_slice(&[0x80, 0x02, b'l', b'o']);
        let mut t = transport(data);

        let first = t.read_frame().await.unwrap().unwrap();
        assert_eq!(first.opcode, OpCode::Text);
        assert!(!first.fin);
        let ping = t.read_frame().await.unwrap().unwrap();
        assert_eq!(ping.opcode, OpCode::Ping);
        let last = t.read_frame().await.unwrap().unwrap();
        assert_eq!(last.opcode, OpCode::Continuation);
        assert_eq!(last.payload, Bytes::from_static(b"lo"));
        assert!(t.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_leftover_bytes_are_decoded_first() {
        let leftover = BytesMut::from(&[0x82u8, 0x01, 0xAA][..]);
        let mut t = FramedTransport::new(
            MockStream::new(vec![]),
            FrameCodec::client(1024),
            leftover,
            64,
        );
        let frame = t.read_frame().await.unwrap().unwrap();
        assert_eq!(&frame.payload[..], &[0xAA]);
    }

    #[tokio::test]
    async fn test_oversize_frame_rejected_from_header() {
        // 16-bit length of 2000 against a 1024 limit; no payload follows
        let mut t = transport(vec![0x82, 0x7E, 0x07, 0xD0]);
        assert_eq!(
            t.read_frame().await,
            Err(Error::FrameTooLarge {
                size: 2000,
                max: 1024
            })
        );
    }

    #[tokio::test]
    async fn test_send_all_writes_every_frame() {
        let mut t = transport(vec![]);
        t.send_all(&[Frame::new(false, OpCode::Text, "ab"), Frame::new(true, OpCode::Continuation, "c")])
            .await
            .unwrap();
        let written = &t.get_ref().write_data;
        assert_eq!(written.len(), (2 + 4 + 2) + (2 + 4 + 1));
        assert_eq!(written[0], 0x01);
        assert_eq!(written[8], 0x80);
    }
}
