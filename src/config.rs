//! Configuration for the client, its pool, admission policy and WebSocket sessions.

use std::time::Duration;

use crate::error::{Error, Result};

/// Resource limits applied to inbound data.
///
/// These prevent a misbehaving peer from exhausting memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum payload size of a single incoming frame in bytes.
    ///
    /// Default: 16 MB
    pub max_frame_size: usize,

    /// Maximum size of a reassembled message, or of an HTTP response body.
    ///
    /// Default: 64 MB
    pub max_message_size: usize,

    /// Maximum number of fragments in a single message.
    ///
    /// Default: 1024
    pub max_fragment_count: usize,

    /// Maximum size of an HTTP response head (status line plus headers).
    ///
    /// Default: 8 KB
    pub max_header_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024,   // 16 MB
            max_message_size: 64 * 1024 * 1024, // 64 MB
            max_fragment_count: 1024,
            max_header_size: 8192,
        }
    }
}

impl Limits {
    /// Create new limits with custom values.
    #[must_use]
    pub const fn new(
        max_frame_size: usize,
        max_message_size: usize,
        max_fragment_count: usize,
        max_header_size: usize,
    ) -> Self {
        Self {
            max_frame_size,
            max_message_size,
            max_fragment_count,
            max_header_size,
        }
    }

    /// Validate that a message size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_message_size(&self, size: usize) -> Result<()> {
        if size > self.max_message_size {
            Err(Error::MessageTooLarge {
                size,
                max: self.max_message_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that an incoming frame size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FrameTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_frame_size(&self, size: usize) -> Result<()> {
        if size > self.max_frame_size {
            Err(Error::FrameTooLarge {
                size,
                max: self.max_frame_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that a fragment count is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TooManyFragments`] if `count` exceeds the configured maximum.
    pub const fn check_fragment_count(&self, count: usize) -> Result<()> {
        if count > self.max_fragment_count {
            Err(Error::TooManyFragments {
                count,
                max: self.max_fragment_count,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that a response head size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HeaderTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_header_size(&self, size: usize) -> Result<()> {
        if size > self.max_header_size {
            Err(Error::HeaderTooLarge {
                size,
                max: self.max_header_size,
            })
        } else {
            Ok(())
        }
    }
}

/// Per-session WebSocket behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketConfig {
    /// Inbound limits.
    pub limits: Limits,

    /// Largest payload sent in one outgoing frame.
    ///
    /// Default: 64 KB
    pub max_outgoing_frame_size: usize,

    /// Slice full messages larger than `max_outgoing_frame_size` into
    /// continuation frames instead of rejecting them.
    ///
    /// Default: true
    pub split_large_frames: bool,

    /// Answer every inbound ping with a pong carrying the same payload.
    ///
    /// Default: true
    pub auto_pong: bool,

    /// Echo an inbound close frame before notifying the listener.
    ///
    /// Default: true
    pub auto_close_frame: bool,

    /// Send a ping at this interval, independent of traffic.
    ///
    /// Default: None
    pub ping_every: Option<Duration>,

    /// Tear the session down when no frame arrives for this long.
    ///
    /// Default: None
    pub idle_timeout: Option<Duration>,

    /// How long to wait for the peer's half of the close handshake.
    ///
    /// Default: 5 seconds
    pub close_timeout: Duration,

    /// Accept frames with RSV bits set.
    ///
    /// Default: false
    pub accept_reserved_bits: bool,

    /// Initial capacity of the read buffer.
    ///
    /// Default: 8 KB
    pub read_buffer_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            max_outgoing_frame_size: 64 * 1024,
            split_large_frames: true,
            auto_pong: true,
            auto_close_frame: true,
            ping_every: None,
            idle_timeout: None,
            close_timeout: Duration::from_secs(5),
            accept_reserved_bits: false,
            read_buffer_size: 8192,
        }
    }
}

impl WebSocketConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set inbound limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the max incoming frame size.
    #[must_use]
    pub const fn with_max_frame_size(mut self, size: usize) -> Self {
        self.limits.max_frame_size = size;
        self
    }

    /// Set the max outgoing frame size.
    #[must_use]
    pub const fn with_max_outgoing_frame_size(mut self, size: usize) -> Self {
        self.max_outgoing_frame_size = size;
        self
    }

    /// Enable or disable splitting of oversized outgoing messages.
    #[must_use]
    pub const fn with_split_large_frames(mut self, split: bool) -> Self {
        self.split_large_frames = split;
        self
    }

    /// Enable or disable automatic pongs.
    #[must_use]
    pub const fn with_auto_pong(mut self, enabled: bool) -> Self {
        self.auto_pong = enabled;
        self
    }

    /// Enable or disable the automatic close echo.
    #[must_use]
    pub const fn with_auto_close_frame(mut self, enabled: bool) -> Self {
        self.auto_close_frame = enabled;
        self
    }

    /// Send a ping every `interval`.
    #[must_use]
    pub const fn with_ping_every(mut self, interval: Duration) -> Self {
        self.ping_every = Some(interval);
        self
    }

    /// Fail the session after `timeout` without inbound frames.
    #[must_use]
    pub const fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Set the close handshake timeout.
    #[must_use]
    pub const fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Accept frames with reserved bits set.
    #[must_use]
    pub const fn with_accept_reserved_bits(mut self, accept: bool) -> Self {
        self.accept_reserved_bits = accept;
        self
    }

    /// Set the initial read buffer capacity.
    #[must_use]
    pub const fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Check the configuration for values that can never work.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for zero frame sizes, a zero read
    /// buffer, and zero durations.
    pub fn validate(&self) -> Result<()> {
        if self.ping_every.is_some_and(|d| d.is_zero()) {
            return Err(Error::InvalidConfig("ping_every must be non-zero".into()));
        }
        if self.idle_timeout.is_some_and(|d| d.is_zero()) {
            return Err(Error::InvalidConfig("idle_timeout must be non-zero".into()));
        }
        if self.close_timeout.is_zero() {
            return Err(Error::InvalidConfig("close_timeout must be non-zero".into()));
        }
        if self.read_buffer_size == 0 {
            return Err(Error::InvalidConfig(
                "read_buffer_size must be at least 1".into(),
            ));
        }
        if self.max_outgoing_frame_size == 0 {
            return Err(Error::InvalidConfig(
                "max_outgoing_frame_size must be at least 1".into(),
            ));
        }
        if self.limits.max_frame_size == 0 {
            return Err(Error::InvalidConfig(
                "max_frame_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// How many operations may be in flight per endpoint, and what happens to the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionPolicy {
    /// No bound.
    Unbounded,
    /// Bound in-flight operations; queue up to `max_queued` more, FIFO, and
    /// reject once the queue is full.
    BoundedQueue {
        /// Concurrent operations per endpoint.
        max_in_flight: usize,
        /// Waiters per endpoint.
        max_queued: usize,
    },
    /// Bound in-flight operations; a new operation evicts the oldest one.
    Evicting {
        /// Concurrent operations per endpoint.
        max_in_flight: usize,
    },
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        AdmissionPolicy::BoundedQueue {
            max_in_flight: 64,
            max_queued: 1024,
        }
    }
}

impl AdmissionPolicy {
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when `max_in_flight` is zero.
    pub fn validate(&self) -> Result<()> {
        match *self {
            AdmissionPolicy::BoundedQueue { max_in_flight: 0, .. }
            | AdmissionPolicy::Evicting { max_in_flight: 0 } => Err(Error::InvalidConfig(
                "max_in_flight must be at least 1".into(),
            )),
            _ => Ok(()),
        }
    }
}

/// Connection pool settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Keep released connections for reuse. When false every release closes.
    ///
    /// Default: true
    pub enabled: bool,

    /// Idle connections unused for longer than this are closed.
    ///
    /// Default: 60 seconds
    pub idle_timeout: Duration,

    /// Upper bound on idle connections kept per endpoint.
    ///
    /// Default: 32
    pub max_idle_per_endpoint: usize,

    /// How often the background sweeper runs.
    ///
    /// Default: 10 seconds
    pub sweep_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            idle_timeout: Duration::from_secs(60),
            max_idle_per_endpoint: 32,
            sweep_interval: Duration::from_secs(10),
        }
    }
}

impl PoolConfig {
    /// A configuration that never reuses connections.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Set the idle timeout.
    #[must_use]
    pub const fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the per-endpoint idle cap.
    #[must_use]
    pub const fn with_max_idle_per_endpoint(mut self, max: usize) -> Self {
        self.max_idle_per_endpoint = max;
        self
    }

    /// Set the sweep interval.
    #[must_use]
    pub const fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

/// Request-level timeouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    /// TCP connect plus, for WebSockets, the upgrade handshake.
    ///
    /// Default: 10 seconds
    pub connect: Duration,

    /// Whole-request deadline for plain HTTP, including the admission wait.
    ///
    /// Default: 60 seconds
    pub total: Option<Duration>,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            total: Some(Duration::from_secs(60)),
        }
    }
}

impl Timeouts {
    /// Create new timeouts with custom values.
    #[must_use]
    pub const fn new(connect: Duration, total: Option<Duration>) -> Self {
        Self { connect, total }
    }
}

/// Top-level client configuration.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Per-endpoint admission policy.
    pub admission: AdmissionPolicy,
    /// Connection pool.
    pub pool: PoolConfig,
    /// Default WebSocket session settings.
    pub websocket: WebSocketConfig,
    /// Connect and total timeouts.
    pub timeouts: Timeouts,
    /// Limits for plain HTTP responses.
    pub http_limits: Limits,
    /// Value of the `User-Agent` header, if any.
    pub user_agent: Option<String>,
}

impl ClientConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the admission policy.
    #[must_use]
    pub const fn with_admission(mut self, policy: AdmissionPolicy) -> Self {
        self.admission = policy;
        self
    }

    /// Set the pool configuration.
    #[must_use]
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Set the default WebSocket configuration.
    #[must_use]
    pub fn with_websocket(mut self, websocket: WebSocketConfig) -> Self {
        self.websocket = websocket;
        self
    }

    /// Set the timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the `User-Agent` header.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if any part is unusable.
    pub fn validate(&self) -> Result<()> {
        self.admission.validate()?;
        self.websocket.validate()?;
        if self.timeouts.connect.is_zero() {
            return Err(Error::InvalidConfig("connect timeout must be non-zero".into()));
        }
        if self.pool.sweep_interval.is_zero() {
            return Err(Error::InvalidConfig("sweep interval must be non-zero".into()));
        }
        Ok(())
    }
}
