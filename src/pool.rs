//! Keyed cache of idle transport connections.
//!
//! A connection is either idle (in the pool, available to `acquire`) or
//! leased (owned by exactly one operation). Leases end in `release` (back to
//! idle when still reusable) or `evict` (closed). WebSocket-upgraded
//! connections are never returned to the idle set.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::bus::{CompletionEvent, CompletionSubscriber};
use crate::config::PoolConfig;
use crate::endpoint::EndpointKey;
use crate::error::{Error, Result, TimeoutKind};
use crate::transport::{BoxTransport, Connector};

/// Identity of one transport connection for the lifetime of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Where a connection is in its pool lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    Idle,
    Leased,
    Closing,
}

/// A transport connection plus the bookkeeping the pool needs.
///
/// Reads and writes go straight to the transport. Dropping it closes the
/// transport.
pub struct PooledConnection {
    id: ConnectionId,
    key: EndpointKey,
    io: BoxTransport,
    created_at: Instant,
    last_used_at: Instant,
    state: LeaseState,
    upgraded: bool,
    reusable: bool,
    uses: u32,
}

impl PooledConnection {
    fn new(id: ConnectionId, key: EndpointKey, io: BoxTransport) -> Self {
        let now = Instant::now();
        Self {
            id,
            key,
            io,
            created_at: now,
            last_used_at: now,
            state: LeaseState::Leased,
            upgraded: false,
            reusable: true,
            uses: 1,
        }
    }

    /// A connection outside any pool, for driving a session directly.
    #[cfg(test)]
    pub(crate) fn detached(key: EndpointKey, io: BoxTransport) -> Self {
        Self::new(ConnectionId(0), key, io)
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[must_use]
    pub fn key(&self) -> &EndpointKey {
        &self.key
    }

    #[must_use]
    pub fn state(&self) -> LeaseState {
        self.state
    }

    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    #[must_use]
    pub fn last_used_at(&self) -> Instant {
        self.last_used_at
    }

    /// Number of leases so far, including the current one.
    #[must_use]
    pub fn uses(&self) -> u32 {
        self.uses
    }

    /// Whether this lease reuses a connection an earlier operation used.
    #[must_use]
    pub fn is_reused(&self) -> bool {
        self.uses > 1
    }

    /// The connection now speaks WebSocket and can never go back to the pool.
    pub fn mark_upgraded(&mut self) {
        self.upgraded = true;
        self.reusable = false;
    }

    #[must_use]
    pub fn is_upgraded(&self) -> bool {
        self.upgraded
    }

    /// Close instead of pooling on release.
    pub fn mark_not_reusable(&mut self) {
        self.reusable = false;
    }

    #[must_use]
    pub fn is_reusable(&self) -> bool {
        self.reusable && !self.upgraded
    }

    fn is_expired(&self, now: Instant, idle_timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_used_at) >= idle_timeout
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("state", &self.state)
            .field("upgraded", &self.upgraded)
            .field("reusable", &self.reusable)
            .field("uses", &self.uses)
            .finish_non_exhaustive()
    }
}

impl AsyncRead for PooledConnection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_read(cx, buf)
    }
}

impl AsyncWrite for PooledConnection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.io).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_shutdown(cx)
    }
}

#[derive(Default)]
struct PoolState {
    idle: HashMap<EndpointKey, Vec<PooledConnection>>,
    leased: HashMap<ConnectionId, EndpointKey>,
}

struct PoolInner {
    config: PoolConfig,
    connector: Arc<dyn Connector>,
    connect_timeout: Duration,
    state: Mutex<PoolState>,
    next_id: AtomicU64,
    opened: AtomicU64,
    closed: AtomicBool,
}

/// Shared handle to the pool.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("idle", &self.total_idle())
            .field("leased", &self.leased_count())
            .field("opened", &self.opened_count())
            .finish()
    }
}

impl ConnectionPool {
    #[must_use]
    pub fn new(config: PoolConfig, connector: Arc<dyn Connector>, connect_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                connector,
                connect_timeout,
                state: Mutex::new(PoolState::default()),
                next_id: AtomicU64::new(1),
                opened: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Lease a connection to `key`, reusing the most recently released idle
    /// one when possible.
    ///
    /// # Errors
    ///
    /// [`Error::PoolClosed`], [`Error::Timeout`] with [`TimeoutKind::Connect`],
    /// or the connector's error.
    pub async fn acquire(&self, key: &EndpointKey) -> Result<PooledConnection> {
        if let Some(conn) = self.take_idle(key)? {
            return Ok(conn);
        }

        let io = tokio::time::timeout(self.inner.connect_timeout, self.inner.connector.connect(key))
            .await
            .map_err(|_| Error::Timeout(TimeoutKind::Connect))??;

        let id = ConnectionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let conn = PooledConnection::new(id, key.clone(), io);
        {
            let mut state = self.inner.state.lock();
            if self.is_closed() {
                return Err(Error::PoolClosed);
            }
            state.leased.insert(id, key.clone());
        }
        self.inner.opened.fetch_add(1, Ordering::Relaxed);
        debug!(endpoint = %key, id = %id, "opened connection");
        Ok(conn)
    }

    fn take_idle(&self, key: &EndpointKey) -> Result<Option<PooledConnection>> {
        let mut state = self.inner.state.lock();
        if self.is_closed() {
            return Err(Error::PoolClosed);
        }
        let now = Instant::now();
        let mut found = None;
        if let Some(idle) = state.idle.get_mut(key) {
            while let Some(conn) = idle.pop() {
                if conn.is_expired(now, self.inner.config.idle_timeout) {
                    trace!(endpoint = %key, id = %conn.id, "dropping expired idle connection");
                    continue;
                }
                found = Some(conn);
                break;
            }
            if idle.is_empty() {
                state.idle.remove(key);
            }
        }
        let Some(mut conn) = found else {
            return Ok(None);
        };
        conn.state = LeaseState::Leased;
        conn.last_used_at = now;
        conn.uses += 1;
        state.leased.insert(conn.id, key.clone());
        debug!(endpoint = %key, id = %conn.id, uses = conn.uses, "reusing idle connection");
        Ok(Some(conn))
    }

    /// End a lease. Reusable connections go back to the idle set, anything
    /// else is closed. Returns whether the connection was pooled.
    pub fn release(&self, mut conn: PooledConnection) -> bool {
        let mut state = self.inner.state.lock();
        if state.leased.remove(&conn.id).is_none() {
            trace!(id = %conn.id, "release of a connection that is not leased");
        }
        let config = &self.inner.config;
        let idle_here = state.idle.get(&conn.key).map_or(0, Vec::len);
        if !config.enabled
            || self.is_closed()
            || !conn.is_reusable()
            || idle_here >= config.max_idle_per_endpoint
        {
            conn.state = LeaseState::Closing;
            debug!(endpoint = %conn.key, id = %conn.id, "closing released connection");
            return false;
        }
        conn.state = LeaseState::Idle;
        conn.last_used_at = Instant::now();
        trace!(endpoint = %conn.key, id = %conn.id, "connection returned to pool");
        state.idle.entry(conn.key.clone()).or_default().push(conn);
        true
    }

    /// End a lease by closing the connection.
    pub fn evict(&self, mut conn: PooledConnection) {
        self.inner.state.lock().leased.remove(&conn.id);
        conn.state = LeaseState::Closing;
        debug!(endpoint = %conn.key, id = %conn.id, "evicted connection");
    }

    /// Drop the lease record of a connection whose owner went away without
    /// handing it back; the transport itself was closed when it was dropped.
    pub fn forget(&self, id: ConnectionId) {
        if let Some(key) = self.inner.state.lock().leased.remove(&id) {
            debug!(endpoint = %key, id = %id, "forgot abandoned connection");
        }
    }

    /// Close idle connections past the idle timeout. Returns how many.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let timeout = self.inner.config.idle_timeout;
        let mut state = self.inner.state.lock();
        let mut closed = 0;
        state.idle.retain(|_, conns| {
            let before = conns.len();
            conns.retain(|conn| !conn.is_expired(now, timeout));
            closed += before - conns.len();
            !conns.is_empty()
        });
        if closed > 0 {
            debug!(closed, "swept idle connections");
        }
        closed
    }

    /// Close every idle connection to `key`.
    pub fn invalidate(&self, key: &EndpointKey) -> usize {
        let removed = self.inner.state.lock().idle.remove(key).map_or(0, |v| v.len());
        if removed > 0 {
            debug!(endpoint = %key, removed, "invalidated idle connections");
        }
        removed
    }

    /// Refuse new leases and close every idle connection. Leased connections
    /// are closed when their leases end.
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let idle = std::mem::take(&mut self.inner.state.lock().idle);
        debug!(idle = idle.values().map(Vec::len).sum::<usize>(), "pool shut down");
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn idle_count(&self, key: &EndpointKey) -> usize {
        self.inner.state.lock().idle.get(key).map_or(0, Vec::len)
    }

    #[must_use]
    pub fn total_idle(&self) -> usize {
        self.inner.state.lock().idle.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn leased_count(&self) -> usize {
        self.inner.state.lock().leased.len()
    }

    /// Connections opened since the pool was created.
    #[must_use]
    pub fn opened_count(&self) -> u64 {
        self.inner.opened.load(Ordering::Relaxed)
    }

    /// Run [`Self::sweep`] every `sweep_interval` until `shutdown` fires or
    /// the pool is dropped.
    pub fn spawn_sweeper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let weak: Weak<PoolInner> = Arc::downgrade(&self.inner);
        let period = self.inner.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        ConnectionPool { inner }.sweep();
                    }
                }
            }
            trace!("pool sweeper stopped");
        })
    }
}

impl CompletionSubscriber for ConnectionPool {
    fn on_completion(&self, event: &CompletionEvent) {
        let ctx = event.context();
        match (ctx.take_connection(), event) {
            (Some(conn), CompletionEvent::Success(_)) => {
                self.release(conn);
            }
            (Some(conn), CompletionEvent::Error(..)) => self.evict(conn),
            (None, _) => {
                if let Some(id) = ctx.connection_id() {
                    self.forget(id);
                }
            }
        }
    }
}
