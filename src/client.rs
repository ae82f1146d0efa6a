//! The client facade: admission, pooled connection, protocol exchange, and
//! one completion event per operation.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::admission::{AdmissionController, Slot};
use crate::bus::{CompletionBus, CompletionEvent, OperationKind, RequestContext};
use crate::config::{ClientConfig, Limits, WebSocketConfig};
use crate::connection::{SessionSetup, WebSocketClient, WebSocketSession};
use crate::endpoint::Target;
use crate::error::{Error, Result, TimeoutKind};
use crate::listener::{WebSocketEvent, WebSocketListener};
use crate::pool::{ConnectionPool, PooledConnection};
use crate::protocol::handshake::{UpgradeRequest, client_handshake};
use crate::protocol::http::{Method, Request, Response, read_response};
use crate::transport::{Connector, TcpConnector};

enum Lifecycle {
    Created,
    Running {
        shutdown: CancellationToken,
        sweeper: JoinHandle<()>,
    },
    Stopped,
}

struct ClientInner {
    config: ClientConfig,
    bus: Arc<CompletionBus>,
    admission: AdmissionController,
    pool: ConnectionPool,
    lifecycle: Mutex<Lifecycle>,
}

/// HTTP/1.1 and WebSocket client.
///
/// Cheap to clone; clones share the pool, the admission state and the
/// completion bus. Call [`HttpClient::start`] before issuing requests.
///
/// ```no_run
/// use rswc::{ClientConfig, HttpClient, Request};
///
/// # async fn run() -> rswc::Result<()> {
/// let client = HttpClient::new(ClientConfig::default())?;
/// client.start()?;
/// let response = client.execute(Request::get("http://localhost:8080/")?).await?;
/// println!("{}", response.status());
/// client.shutdown()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("running", &self.is_running())
            .field("pool", &self.inner.pool)
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    /// Create a client that connects over TCP.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] if `config` does not validate.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_connector(config, Arc::new(TcpConnector))
    }

    /// Create a client with a custom transport connector.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] if `config` does not validate.
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;
        let bus = Arc::new(CompletionBus::new());
        let admission = AdmissionController::new(&config.admission);
        let pool = ConnectionPool::new(config.pool.clone(), connector, config.timeouts.connect);

        // pool first: a freed connection is idle before a queued waiter wakes
        bus.subscribe_permanently(Arc::new(pool.clone()));
        bus.subscribe_permanently(Arc::new(admission.clone()));

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                bus,
                admission,
                pool,
                lifecycle: Mutex::new(Lifecycle::Created),
            }),
        })
    }

    /// Start background work (the idle sweeper).
    ///
    /// # Errors
    ///
    /// [`Error::IllegalState`] if already started or shut down.
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.inner.lifecycle.lock();
        match *lifecycle {
            Lifecycle::Created => {
                let shutdown = CancellationToken::new();
                let sweeper = self.inner.pool.spawn_sweeper(shutdown.child_token());
                *lifecycle = Lifecycle::Running { shutdown, sweeper };
                info!("client started");
                Ok(())
            }
            Lifecycle::Running { .. } => Err(Error::IllegalState("client already started".into())),
            Lifecycle::Stopped => Err(Error::IllegalState("client was shut down".into())),
        }
    }

    /// Force-close every session, fail in-flight requests, and close the
    /// pool.
    ///
    /// # Errors
    ///
    /// [`Error::IllegalState`] if the client is not running.
    pub fn shutdown(&self) -> Result<()> {
        let mut lifecycle = self.inner.lifecycle.lock();
        match *lifecycle {
            Lifecycle::Created => {
                return Err(Error::IllegalState("client was never started".into()));
            }
            Lifecycle::Stopped => {
                return Err(Error::IllegalState("client already shut down".into()));
            }
            Lifecycle::Running { .. } => {}
        }
        if let Lifecycle::Running { shutdown, sweeper } =
            std::mem::replace(&mut *lifecycle, Lifecycle::Stopped)
        {
            drop(lifecycle);
            shutdown.cancel();
            drop(sweeper);
            self.inner.pool.shutdown();
            self.inner.bus.shutdown();
            info!("client shut down");
        }
        Ok(())
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(*self.inner.lifecycle.lock(), Lifecycle::Running { .. })
    }

    fn shutdown_token(&self) -> Result<CancellationToken> {
        match &*self.inner.lifecycle.lock() {
            Lifecycle::Running { shutdown, .. } => Ok(shutdown.clone()),
            _ => Err(Error::ClientNotRunning),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn bus(&self) -> &Arc<CompletionBus> {
        &self.inner.bus
    }

    #[must_use]
    pub fn pool(&self) -> &ConnectionPool {
        &self.inner.pool
    }

    #[must_use]
    pub fn admission(&self) -> &AdmissionController {
        &self.inner.admission
    }

    /// Run one HTTP/1.1 request.
    ///
    /// The completion event is published before this returns.
    ///
    /// # Errors
    ///
    /// Admission, timeout, transport and HTTP errors.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        let shutdown = self.shutdown_token()?;
        let target = Target::from_url(request.url())?;
        let ctx = Arc::new(RequestContext::new(target.key().clone(), OperationKind::Http));
        debug!(request = %ctx.id(), method = %request.method(), endpoint = %ctx.key(), "executing");

        let guard = CompletionGuard::new(&ctx, &self.inner.bus);

        let total = request.timeout().or(self.inner.config.timeouts.total);
        let work = async {
            let slot = self.inner.admission.admit(ctx.key()).await?;
            ctx.attach_slot(slot.clone());
            guarded(&slot, self.exchange(&ctx, &target, &request)).await
        };
        let work = async {
            match total {
                Some(limit) => tokio::time::timeout(limit, work)
                    .await
                    .unwrap_or(Err(Error::Timeout(TimeoutKind::Total))),
                None => work.await,
            }
        };
        let result = tokio::select! {
            () = shutdown.cancelled() => Err(Error::ClientNotRunning),
            result = work => result,
        };

        guard.finish(match &result {
            Ok(_) => CompletionEvent::Success(Arc::clone(&ctx)),
            Err(err) => CompletionEvent::Error(Arc::clone(&ctx), err.clone()),
        });
        result
    }

    async fn exchange(
        &self,
        ctx: &RequestContext,
        target: &Target,
        request: &Request,
    ) -> Result<Response> {
        let mut head = BytesMut::new();
        request.write_to(target, self.inner.config.user_agent.as_deref(), &mut head)?;
        let closes = request.headers().iter().any(|(name, value)| {
            name.eq_ignore_ascii_case("connection")
                && value.split(',').any(|t| t.trim().eq_ignore_ascii_case("close"))
        });
        let limits = &self.inner.config.http_limits;

        let mut retried = false;
        loop {
            let mut conn = self.inner.pool.acquire(ctx.key()).await?;
            ctx.attach_connection_id(conn.id());
            match round_trip(&mut conn, &head, request.method(), limits).await {
                Ok((response, reusable)) => {
                    if closes || !reusable {
                        conn.mark_not_reusable();
                    }
                    ctx.park_connection(conn);
                    return Ok(response);
                }
                Err(err) => {
                    let stale = matches!(err, Error::ConnectionClosed(None) | Error::Io(_));
                    if stale && conn.is_reused() && !retried && request.method().is_idempotent() {
                        debug!(request = %ctx.id(), id = %conn.id(), "reused connection was stale, retrying");
                        self.inner.pool.evict(conn);
                        retried = true;
                        continue;
                    }
                    ctx.park_connection(conn);
                    return Err(err);
                }
            }
        }
    }

    /// Open a WebSocket session with the client's default session config.
    ///
    /// # Errors
    ///
    /// See [`HttpClient::websocket_with`].
    pub async fn websocket(
        &self,
        url: &str,
        listener: Arc<dyn WebSocketListener>,
    ) -> Result<WebSocketClient> {
        self.websocket_with(url, self.inner.config.websocket.clone(), listener)
            .await
    }

    /// Open a WebSocket session.
    ///
    /// `listener` sees [`WebSocketEvent::Connect`] before this returns.
    ///
    /// # Errors
    ///
    /// Usage errors for bad URLs or config, admission errors, connect
    /// timeouts, transport errors and handshake failures. A failed upgrade
    /// publishes its completion before the error is returned.
    pub async fn websocket_with(
        &self,
        url: &str,
        config: WebSocketConfig,
        listener: Arc<dyn WebSocketListener>,
    ) -> Result<WebSocketClient> {
        let shutdown = self.shutdown_token()?;
        config.validate()?;
        let target = Target::parse(url)?;
        let ctx = Arc::new(RequestContext::new(
            target.key().clone(),
            OperationKind::WebSocket,
        ));
        debug!(request = %ctx.id(), endpoint = %ctx.key(), "opening websocket");
        let guard = CompletionGuard::new(&ctx, &self.inner.bus);

        let setup = async {
            let slot = self.inner.admission.admit(ctx.key()).await?;
            ctx.attach_slot(slot.clone());
            let upgrade = tokio::time::timeout(
                self.inner.config.timeouts.connect,
                self.upgrade(&ctx, &target, &config.limits),
            );
            let (conn, leftover, headers) = guarded(&slot, async {
                upgrade
                    .await
                    .unwrap_or(Err(Error::Timeout(TimeoutKind::Connect)))
            })
            .await?;
            Ok::<_, Error>((slot, conn, leftover, headers))
        };
        let setup = tokio::select! {
            () = shutdown.cancelled() => Err(Error::ClientNotRunning),
            setup = setup => setup,
        };
        let (slot, conn, leftover, headers) = match setup {
            Ok(parts) => parts,
            Err(err) => {
                warn!(request = %ctx.id(), endpoint = %ctx.key(), error = %err, "websocket upgrade failed");
                guard.finish(CompletionEvent::Error(Arc::clone(&ctx), err.clone()));
                return Err(err);
            }
        };

        let (session, client) = WebSocketSession::new(SessionSetup {
            conn,
            leftover,
            headers,
            config,
            listener: Arc::clone(&listener),
            ctx,
            bus: Arc::clone(&self.inner.bus),
            abort: shutdown.child_token(),
            evicted: slot.token().clone(),
        });
        // the session publishes from here on
        guard.disarm();
        listener.on_event(&client, WebSocketEvent::Connect);
        tokio::spawn(session.run());
        Ok(client)
    }

    async fn upgrade(
        &self,
        ctx: &RequestContext,
        target: &Target,
        limits: &Limits,
    ) -> Result<(PooledConnection, BytesMut, HashMap<String, String>)> {
        let mut conn = self.inner.pool.acquire(ctx.key()).await?;
        ctx.attach_connection_id(conn.id());
        // never pooled again, whatever the handshake outcome
        conn.mark_upgraded();

        let mut request = UpgradeRequest::new(target)?;
        if let Some(agent) = &self.inner.config.user_agent {
            request = request.with_header("User-Agent", agent.as_str());
        }
        match client_handshake(&mut conn, &request, limits.max_header_size).await {
            Ok((response, leftover)) => {
                debug!(request = %ctx.id(), id = %conn.id(), "upgrade accepted");
                Ok((conn, leftover, response.headers))
            }
            Err(err) => {
                self.inner.pool.evict(conn);
                Err(err)
            }
        }
    }
}

/// Publishes an error for an operation whose future was dropped before it
/// completed, so its slot and lease are still released.
struct CompletionGuard {
    ctx: Arc<RequestContext>,
    bus: Arc<CompletionBus>,
    armed: bool,
}

impl CompletionGuard {
    fn new(ctx: &Arc<RequestContext>, bus: &Arc<CompletionBus>) -> Self {
        Self {
            ctx: Arc::clone(ctx),
            bus: Arc::clone(bus),
            armed: true,
        }
    }

    fn finish(mut self, event: CompletionEvent) {
        self.armed = false;
        self.bus.publish(event);
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if self.armed && !self.ctx.is_completed() {
            debug!(request = %self.ctx.id(), endpoint = %self.ctx.key(), "operation abandoned");
            self.bus.publish(CompletionEvent::Error(
                Arc::clone(&self.ctx),
                Error::ConnectionClosed(None),
            ));
        }
    }
}

/// Run `work` unless the slot is evicted first.
async fn guarded<T>(slot: &Slot, work: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        biased;
        () = slot.token().cancelled() => Err(Error::Evicted(format!(
            "{} evicted by a newer admission",
            slot.id()
        ))),
        result = work => result,
    }
}

async fn round_trip(
    conn: &mut PooledConnection,
    head: &[u8],
    method: Method,
    limits: &Limits,
) -> Result<(Response, bool)> {
    conn.write_all(head).await?;
    conn.flush().await?;
    let mut buf = BytesMut::with_capacity(4096);
    read_response(conn, &mut buf, method, limits).await
}
