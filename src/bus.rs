//! Completion bus: the single path every operation's terminal outcome takes.
//!
//! Each operation carries a [`RequestContext`]. Exactly one
//! [`CompletionEvent`] is published per context; a second attempt is
//! ignored. Permanent subscribers (pool, admission) run first, in
//! registration order, then transient per-request subscribers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::admission::Slot;
use crate::endpoint::EndpointKey;
use crate::error::Error;
use crate::pool::{ConnectionId, PooledConnection};

/// Identity of one request or session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Http,
    WebSocket,
}

#[derive(Default)]
struct Resources {
    slot: Option<Slot>,
    connection_id: Option<ConnectionId>,
    connection: Option<PooledConnection>,
}

/// Per-operation identity and the resources subscribers release.
pub struct RequestContext {
    id: RequestId,
    key: EndpointKey,
    kind: OperationKind,
    created_at: Instant,
    completed: AtomicBool,
    resources: Mutex<Resources>,
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("completed", &self.is_completed())
            .finish_non_exhaustive()
    }
}

impl RequestContext {
    #[must_use]
    pub fn new(key: EndpointKey, kind: OperationKind) -> Self {
        Self {
            id: RequestId::next(),
            key,
            kind,
            created_at: Instant::now(),
            completed: AtomicBool::new(false),
            resources: Mutex::new(Resources::default()),
        }
    }

    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }

    #[must_use]
    pub fn key(&self) -> &EndpointKey {
        &self.key
    }

    #[must_use]
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn attach_slot(&self, slot: Slot) {
        self.resources.lock().slot = Some(slot);
    }

    #[must_use]
    pub fn slot(&self) -> Option<Slot> {
        self.resources.lock().slot.clone()
    }

    pub fn attach_connection_id(&self, id: ConnectionId) {
        self.resources.lock().connection_id = Some(id);
    }

    #[must_use]
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.resources.lock().connection_id
    }

    /// Hand the leased connection to the completion path.
    pub fn park_connection(&self, conn: PooledConnection) {
        let mut resources = self.resources.lock();
        resources.connection_id = Some(conn.id());
        resources.connection = Some(conn);
    }

    /// Take the parked connection, if any.
    pub fn take_connection(&self) -> Option<PooledConnection> {
        self.resources.lock().connection.take()
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    fn mark_completed(&self) -> bool {
        self.completed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Terminal outcome of one operation.
#[derive(Debug, Clone)]
pub enum CompletionEvent {
    Success(Arc<RequestContext>),
    Error(Arc<RequestContext>, Error),
}

impl CompletionEvent {
    #[must_use]
    pub fn context(&self) -> &Arc<RequestContext> {
        match self {
            CompletionEvent::Success(ctx) | CompletionEvent::Error(ctx, _) => ctx,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&Error> {
        match self {
            CompletionEvent::Success(_) => None,
            CompletionEvent::Error(_, err) => Some(err),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, CompletionEvent::Success(_))
    }
}

/// Receives every published event.
pub trait CompletionSubscriber: Send + Sync + 'static {
    fn on_completion(&self, event: &CompletionEvent);
}

impl<F> CompletionSubscriber for F
where
    F: Fn(&CompletionEvent) + Send + Sync + 'static,
{
    fn on_completion(&self, event: &CompletionEvent) {
        self(event);
    }
}

type Transient = Box<dyn FnOnce(&CompletionEvent) + Send>;

/// Publish/subscribe hub owned by one client instance.
#[derive(Default)]
pub struct CompletionBus {
    permanent: RwLock<Vec<Arc<dyn CompletionSubscriber>>>,
    transient: Mutex<HashMap<RequestId, Vec<Transient>>>,
    published: AtomicU64,
}

impl fmt::Debug for CompletionBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionBus")
            .field("subscribers", &self.permanent.read().len())
            .field("published", &self.published_count())
            .finish_non_exhaustive()
    }
}

impl CompletionBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for every future event.
    pub fn subscribe_permanently(&self, subscriber: Arc<dyn CompletionSubscriber>) {
        self.permanent.write().push(subscriber);
    }

    /// Run `callback` once, when the event for `ctx` is published.
    ///
    /// Returns `false`, without registering, if the event was already
    /// published.
    pub fn subscribe_once<F>(&self, ctx: &RequestContext, callback: F) -> bool
    where
        F: FnOnce(&CompletionEvent) + Send + 'static,
    {
        let mut transient = self.transient.lock();
        if ctx.is_completed() {
            return false;
        }
        transient.entry(ctx.id()).or_default().push(Box::new(callback));
        true
    }

    #[must_use]
    pub fn pending_subscriptions(&self) -> usize {
        self.transient.lock().values().map(Vec::len).sum()
    }

    /// Publish the terminal event of an operation. Returns `false` if one was
    /// already published for the same context.
    pub fn publish(&self, event: CompletionEvent) -> bool {
        let ctx = event.context();
        // completion and the transient drain share the lock with subscribe_once
        let once = {
            let mut transient = self.transient.lock();
            if !ctx.mark_completed() {
                drop(transient);
                trace!(request = %ctx.id(), "duplicate completion ignored");
                return false;
            }
            transient.remove(&ctx.id())
        };
        match event.error() {
            None => debug!(request = %ctx.id(), endpoint = %ctx.key(), "completed"),
            Some(err) => debug!(request = %ctx.id(), endpoint = %ctx.key(), error = %err, "failed"),
        }

        let subscribers = self.permanent.read().clone();
        for subscriber in &subscribers {
            subscriber.on_completion(&event);
        }
        for callback in once.into_iter().flatten() {
            callback(&event);
        }
        self.published.fetch_add(1, Ordering::Relaxed);
        true
    }

    #[must_use]
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Drop all transient subscriptions.
    pub fn shutdown(&self) {
        let dropped = std::mem::take(&mut *self.transient.lock());
        if !dropped.is_empty() {
            debug!(pending = dropped.len(), "dropped transient subscriptions");
        }
    }
}
