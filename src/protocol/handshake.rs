//! Client side of the HTTP/1.1 upgrade handshake (RFC 6455 section 4.1).

use std::collections::HashMap;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::{BufMut, BytesMut};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::endpoint::Target;
use crate::error::{Error, Result};
use crate::protocol::http::{ResponseHead, read_head, validate_header_name, validate_header_value};

/// GUID appended to the key before hashing.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// `Sec-WebSocket-Accept` for a given `Sec-WebSocket-Key`: base64(SHA-1(key + GUID)).
///
/// ```
/// use rswc::protocol::handshake::compute_accept_key;
///
/// assert_eq!(
///     compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
///     "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
/// );
/// ```
#[must_use]
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// A fresh `Sec-WebSocket-Key`: 16 random bytes, base64 encoded.
///
/// # Errors
///
/// [`Error::Io`] if the system RNG is unavailable.
pub fn generate_key() -> Result<String> {
    let mut nonce = [0u8; 16];
    getrandom::getrandom(&mut nonce).map_err(|e| Error::Io(format!("key generation: {e}")))?;
    Ok(BASE64.encode(nonce))
}

/// The upgrade request a client sends.
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    key: String,
    host: String,
    path: String,
    headers: Vec<(String, String)>,
}

impl UpgradeRequest {
    /// Build a request for `target` with a fresh key.
    ///
    /// # Errors
    ///
    /// See [`generate_key`].
    pub fn new(target: &Target) -> Result<Self> {
        Ok(Self {
            key: generate_key()?,
            host: target.host_header().to_string(),
            path: target.path().to_string(),
            headers: Vec::new(),
        })
    }

    /// Add an extra header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// The `Sec-WebSocket-Key` sent.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Serialize into `dst`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidHeaderValue`] for malformed extra headers.
    pub fn write(&self, dst: &mut BytesMut) -> Result<()> {
        let mut head = format!(
            "GET {} HTTP/1.1\r\n\
             Host: {}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {}\r\n\
             Sec-WebSocket-Version: 13\r\n",
            self.path, self.host, self.key
        );
        for (name, value) in &self.headers {
            validate_header_name(name)?;
            validate_header_value(name, value)?;
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        head.push_str("\r\n");
        dst.put_slice(head.as_bytes());
        Ok(())
    }
}

/// The server's answer to an [`UpgradeRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeResponse {
    /// Status code.
    pub status: u16,
    /// Headers, lower-cased names.
    pub headers: HashMap<String, String>,
}

impl UpgradeResponse {
    /// Parse a response head.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidHandshake`] if the head is not HTTP.
    pub fn parse(head: &[u8]) -> Result<Self> {
        let head = ResponseHead::parse(head).map_err(|e| Error::InvalidHandshake(e.to_string()))?;
        Ok(Self {
            status: head.status,
            headers: head.headers,
        })
    }

    /// Check that this response accepts `request`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidHandshake`] naming the first failed check.
    pub fn verify(&self, request: &UpgradeRequest) -> Result<()> {
        if self.status != 101 {
            return Err(Error::InvalidHandshake(format!(
                "expected status 101, got {}",
                self.status
            )));
        }
        let header = |name: &str| self.headers.get(name).map(String::as_str);

        if !header("upgrade").is_some_and(|v| v.eq_ignore_ascii_case("websocket")) {
            return Err(Error::InvalidHandshake("missing Upgrade: websocket".into()));
        }
        let connection_upgrade = header("connection").is_some_and(|v| {
            v.split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        });
        if !connection_upgrade {
            return Err(Error::InvalidHandshake("missing Connection: Upgrade".into()));
        }
        let expected = compute_accept_key(&request.key);
        match header("sec-websocket-accept") {
            Some(accept) if accept == expected => {}
            Some(accept) => {
                return Err(Error::InvalidHandshake(format!(
                    "Sec-WebSocket-Accept mismatch: {accept}"
                )));
            }
            None => {
                return Err(Error::InvalidHandshake(
                    "missing Sec-WebSocket-Accept".into(),
                ));
            }
        }
        if let Some(extensions) = header("sec-websocket-extensions").filter(|v| !v.is_empty()) {
            return Err(Error::InvalidHandshake(format!(
                "server selected unrequested extensions: {extensions}"
            )));
        }
        Ok(())
    }
}

/// Send `request` over `io` and validate the response.
///
/// Returns the response and any bytes the server sent after it, which
/// belong to the first frames.
///
/// # Errors
///
/// I/O errors, [`Error::HeaderTooLarge`], or [`Error::InvalidHandshake`].
pub async fn client_handshake<T>(
    io: &mut T,
    request: &UpgradeRequest,
    max_header_size: usize,
) -> Result<(UpgradeResponse, BytesMut)>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut out = BytesMut::new();
    request.write(&mut out)?;
    io.write_all(&out).await?;
    io.flush().await?;

    let mut buf = BytesMut::with_capacity(1024);
    let head = read_head(io, &mut buf, max_header_size).await?;
    let response = UpgradeResponse::parse(&head)?;
    response.verify(request)?;
    Ok((response, buf))
}
