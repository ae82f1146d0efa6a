//! Minimal HTTP/1.1 message framing for plain requests and the upgrade handshake.
//!
//! Bodies are delimited by `Content-Length` or by connection close. Chunked
//! transfer encoding is rejected.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use url::Url;

use crate::config::Limits;
use crate::endpoint::Target;
use crate::error::{Error, Result};

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET
    Get,
    /// HEAD
    Head,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
    /// PATCH
    Patch,
    /// OPTIONS
    Options,
}

impl Method {
    /// Token as written on the request line.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Options => "OPTIONS",
        }
    }

    /// Safe to replay on a fresh connection.
    #[must_use]
    pub const fn is_idempotent(self) -> bool {
        !matches!(self, Method::Post | Method::Patch)
    }

    const fn expects_body(self) -> bool {
        matches!(self, Method::Post | Method::Put | Method::Patch)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A plain HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: Url,
    headers: Vec<(String, String)>,
    body: Bytes,
    timeout: Option<Duration>,
}

impl Request {
    /// Create a request without body.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidUrl`] if `url` does not parse.
    pub fn new(method: Method, url: &str) -> Result<Self> {
        Ok(Self {
            method,
            url: Url::parse(url)?,
            headers: Vec::new(),
            body: Bytes::new(),
            timeout: None,
        })
    }

    /// `GET url`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidUrl`] if `url` does not parse.
    pub fn get(url: &str) -> Result<Self> {
        Self::new(Method::Get, url)
    }

    /// `POST url` with `body`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidUrl`] if `url` does not parse.
    pub fn post(url: &str, body: impl Into<Bytes>) -> Result<Self> {
        Ok(Self::new(Method::Post, url)?.with_body(body))
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Replace the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Override the client's total timeout for this request.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Method.
    #[must_use]
    pub fn method(&self) -> Method {
        self.method
    }

    /// URL.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Headers in insertion order.
    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Body.
    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Request-level timeout override.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Serialize the request head and body into `dst`.
    pub(crate) fn write_to(
        &self,
        target: &Target,
        user_agent: Option<&str>,
        dst: &mut BytesMut,
    ) -> Result<()> {
        let mut head = format!(
            "{} {} HTTP/1.1\r\nHost: {}\r\n",
            self.method,
            target.path(),
            target.host_header()
        );
        let mut has_length = false;
        let mut has_agent = false;
        for (name, value) in &self.headers {
            validate_header_name(name)?;
            validate_header_value(name, value)?;
            has_length |= name.eq_ignore_ascii_case("content-length");
            has_agent |= name.eq_ignore_ascii_case("user-agent");
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        if let (Some(agent), false) = (user_agent, has_agent) {
            validate_header_value("User-Agent", agent)?;
            head.push_str(&format!("User-Agent: {agent}\r\n"));
        }
        if !has_length && (!self.body.is_empty() || self.method.expects_body()) {
            head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        }
        head.push_str("\r\n");

        dst.reserve(head.len() + self.body.len());
        dst.put_slice(head.as_bytes());
        dst.put_slice(&self.body);
        Ok(())
    }
}

/// A plain HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: u16,
    reason: String,
    headers: HashMap<String, String>,
    body: Bytes,
}

impl Response {
    /// Status code.
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Reason phrase.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// 2xx status.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Header value by case-insensitive name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// All headers, names lower-cased.
    #[must_use]
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Body bytes.
    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body decoded as UTF-8.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidUtf8`].
    pub fn text(&self) -> Result<&str> {
        Ok(std::str::from_utf8(&self.body)?)
    }
}

/// Status line and headers of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResponseHead {
    pub status: u16,
    pub reason: String,
    pub headers: HashMap<String, String>,
}

impl ResponseHead {
    /// Parse a head terminated by an empty line.
    pub(crate) fn parse(head: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(head)
            .map_err(|_| Error::Http("response head is not UTF-8".into()))?;
        let mut lines = text.split("\r\n");
        let status_line = lines.next().unwrap_or_default();

        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        if !version.starts_with("HTTP/1.") {
            return Err(Error::Http(format!("unexpected status line: {status_line}")));
        }
        let status = parts
            .next()
            .and_then(|code| code.parse::<u16>().ok())
            .filter(|code| (100..1000).contains(code))
            .ok_or_else(|| Error::Http(format!("invalid status code: {status_line}")))?;
        let reason = parts.next().unwrap_or_default().to_string();

        Ok(Self {
            status,
            reason,
            headers: parse_headers(lines)?,
        })
    }

    /// Whether a header contains `token` in its comma-separated list.
    pub(crate) fn has_token(&self, name: &str, token: &str) -> bool {
        self.headers.get(name).is_some_and(|value| {
            value
                .split(',')
                .any(|part| part.trim().eq_ignore_ascii_case(token))
        })
    }
}

/// Parse header lines into a map keyed by lower-cased name. Repeated headers
/// are joined with `", "`.
pub(crate) fn parse_headers<'a, I>(lines: I) -> Result<HashMap<String, String>>
where
    I: Iterator<Item = &'a str>,
{
    let mut headers: HashMap<String, String> = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::Http(format!("malformed header line: {line}")))?;
        let name = name.trim().to_ascii_lowercase();
        let value = value.trim();
        headers
            .entry(name)
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    Ok(headers)
}

/// Reject header names that are empty or contain separators.
pub(crate) fn validate_header_name(name: &str) -> Result<()> {
    if name.is_empty()
        || !name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b))
    {
        return Err(Error::InvalidHeaderValue {
            header: name.to_string(),
            reason: "invalid header name".to_string(),
        });
    }
    Ok(())
}

/// Reject header values containing CR or LF.
pub(crate) fn validate_header_value(name: &str, value: &str) -> Result<()> {
    if value.contains(['\r', '\n']) {
        return Err(Error::InvalidHeaderValue {
            header: name.to_string(),
            reason: "contains CR or LF characters".to_string(),
        });
    }
    Ok(())
}

/// Read until the end of a response head and split it off `buf`.
///
/// Bytes after the head stay in `buf`.
pub(crate) async fn read_head<T>(io: &mut T, buf: &mut BytesMut, max: usize) -> Result<BytesMut>
where
    T: AsyncRead + Unpin,
{
    let mut scanned: usize = 0;
    loop {
        let from = scanned.saturating_sub(3);
        if let Some(pos) = buf[from..].windows(4).position(|w| w == b"\r\n\r\n") {
            let end = from + pos + 4;
            if end > max {
                return Err(Error::HeaderTooLarge { size: end, max });
            }
            return Ok(buf.split_to(end));
        }
        if buf.len() > max {
            return Err(Error::HeaderTooLarge {
                size: buf.len(),
                max,
            });
        }
        scanned = buf.len();

        buf.reserve(1024);
        if io.read_buf(buf).await? == 0 {
            return Err(if buf.is_empty() {
                Error::ConnectionClosed(None)
            } else {
                Error::Http("connection closed inside response head".into())
            });
        }
    }
}

/// Read one response for a request made with `method`.
///
/// Returns the response and whether the connection can carry another request.
pub(crate) async fn read_response<T>(
    io: &mut T,
    buf: &mut BytesMut,
    method: Method,
    limits: &Limits,
) -> Result<(Response, bool)>
where
    T: AsyncRead + Unpin,
{
    let head = loop {
        let raw = read_head(io, buf, limits.max_header_size).await?;
        let head = ResponseHead::parse(&raw)?;
        // 1xx responses other than 101 are interim; the final one follows.
        if (100..200).contains(&head.status) && head.status != 101 {
            continue;
        }
        break head;
    };

    let mut reusable = !head.has_token("connection", "close");

    if head.has_token("transfer-encoding", "chunked") {
        return Err(Error::Http(
            "chunked transfer encoding is not supported".into(),
        ));
    }

    let no_body = method == Method::Head || matches!(head.status, 101 | 204 | 304);
    let body = if no_body {
        Bytes::new()
    } else if let Some(length) = head.headers.get("content-length") {
        let length: usize = length
            .parse()
            .map_err(|_| Error::Http(format!("invalid content-length: {length}")))?;
        limits.check_message_size(length)?;
        while buf.len() < length {
            buf.reserve(length - buf.len());
            if io.read_buf(buf).await? == 0 {
                return Err(Error::Http("connection closed inside response body".into()));
            }
        }
        buf.split_to(length).freeze()
    } else {
        reusable = false;
        loop {
            limits.check_message_size(buf.len())?;
            buf.reserve(4096);
            if io.read_buf(buf).await? == 0 {
                break;
            }
        }
        buf.split().freeze()
    };

    if !buf.is_empty() {
        // Unsolicited bytes after the response; the stream is out of sync.
        reusable = false;
    }

    Ok((
        Response {
            status: head.status,
            reason: head.reason,
            headers: head.headers,
            body,
        },
        reusable,
    ))
}
