//! Remote endpoint identity and request targets.

use std::fmt;
use std::sync::Arc;

use url::Url;

use crate::error::{Error, Result};

/// `host:port` key under which admission slots and pooled connections are tracked.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointKey {
    host: Arc<str>,
    port: u16,
}

impl EndpointKey {
    /// Create a key. The host is lower-cased.
    #[must_use]
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_ascii_lowercase().into(),
            port,
        }
    }

    /// Host name or address literal.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// A parsed request URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    key: EndpointKey,
    host_header: String,
    path: String,
}

impl Target {
    /// Parse a URL string.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidUrl`] or [`Error::UnsupportedScheme`].
    pub fn parse(url: &str) -> Result<Self> {
        Self::from_url(&Url::parse(url)?)
    }

    /// Build a target from a parsed URL. Accepts `http` and `ws`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidUrl`] when the URL has no host, and
    /// [`Error::UnsupportedScheme`] for anything but `http`/`ws`.
    pub fn from_url(url: &Url) -> Result<Self> {
        match url.scheme() {
            "http" | "ws" => {}
            other => return Err(Error::UnsupportedScheme(other.to_string())),
        }
        let host = url
            .host_str()
            .ok_or_else(|| Error::InvalidUrl(format!("{url}: missing host")))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let port = url.port_or_known_default().unwrap_or(80);

        let key = EndpointKey::new(host, port);
        let host_header = match url.port() {
            Some(port) => format!("{}:{port}", url.host_str().unwrap_or(host)),
            None => url.host_str().unwrap_or(host).to_string(),
        };
        let path = match url.query() {
            Some(query) => format!("{}?{query}", url.path()),
            None => url.path().to_string(),
        };

        Ok(Self {
            key,
            host_header,
            path,
        })
    }

    /// Endpoint key.
    #[must_use]
    pub fn key(&self) -> &EndpointKey {
        &self.key
    }

    /// Value for the `Host` header.
    #[must_use]
    pub fn host_header(&self) -> &str {
        &self.host_header
    }

    /// Path and query, never empty.
    #[must_use]
    pub fn path(&self) -> &str {
        if self.path.is_empty() { "/" } else { &self.path }
    }
}
