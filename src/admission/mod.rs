//! Per-endpoint admission control.
//!
//! Every operation holds a [`Slot`] for its endpoint from admission until its
//! completion event is published. Policies decide what happens when an
//! endpoint is full:
//!
//! - [`Unbounded`]: never full
//! - [`BoundedQueue`]: queue up to a bound, then reject; queued requests are
//!   admitted FIFO as slots free
//! - [`Evicting`]: cancel the oldest slot to make room
//!
//! Releasing a slot is idempotent.

mod bounded;
mod evicting;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

pub use bounded::BoundedQueue;
pub use evicting::Evicting;

use crate::bus::{CompletionEvent, CompletionSubscriber};
use crate::config::AdmissionPolicy;
use crate::endpoint::EndpointKey;
use crate::error::{Error, Result};

/// Identity of one admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(u64);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot-{}", self.0)
    }
}

static NEXT_SLOT: AtomicU64 = AtomicU64::new(1);

/// A reservation for one in-flight operation against an endpoint.
///
/// The token is cancelled when the policy evicts the slot.
#[derive(Debug, Clone)]
pub struct Slot {
    id: SlotId,
    key: EndpointKey,
    cancel: CancellationToken,
}

impl Slot {
    pub(crate) fn new(key: EndpointKey) -> Self {
        Self {
            id: SlotId(NEXT_SLOT.fetch_add(1, Ordering::Relaxed)),
            key,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> SlotId {
        self.id
    }

    #[must_use]
    pub fn key(&self) -> &EndpointKey {
        &self.key
    }

    /// Cancelled when the slot is evicted.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn is_evicted(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Outcome of [`BackPressure::try_admit`].
#[derive(Debug)]
pub enum Admission {
    /// A slot is held now.
    Admitted(Slot),
    /// The request waits; the slot arrives on the receiver.
    Queued(oneshot::Receiver<Slot>),
    /// The endpoint is full and so is its queue.
    Rejected(String),
}

/// A pluggable admission policy. Implementations must make `try_admit` and
/// `release` linearizable per endpoint.
pub trait BackPressure: Send + Sync + 'static {
    /// Try to reserve a slot for `key`.
    fn try_admit(&self, key: &EndpointKey) -> Admission;

    /// Release slot `id`. Returns `false` if it was not held (already
    /// released or evicted).
    fn release(&self, key: &EndpointKey, id: SlotId) -> bool;

    /// Slots currently held for `key`.
    fn in_flight(&self, key: &EndpointKey) -> usize;

    /// Requests waiting for `key`.
    fn queued(&self, key: &EndpointKey) -> usize {
        let _ = key;
        0
    }
}

/// No bound at all; slots are still tracked so release stays idempotent.
#[derive(Debug, Default)]
pub struct Unbounded {
    slots: Mutex<HashMap<EndpointKey, HashSet<SlotId>>>,
}

impl BackPressure for Unbounded {
    fn try_admit(&self, key: &EndpointKey) -> Admission {
        let slot = Slot::new(key.clone());
        self.slots
            .lock()
            .entry(key.clone())
            .or_default()
            .insert(slot.id);
        Admission::Admitted(slot)
    }

    fn release(&self, key: &EndpointKey, id: SlotId) -> bool {
        let mut slots = self.slots.lock();
        let Some(held) = slots.get_mut(key) else {
            return false;
        };
        let released = held.remove(&id);
        if held.is_empty() {
            slots.remove(key);
        }
        released
    }

    fn in_flight(&self, key: &EndpointKey) -> usize {
        self.slots.lock().get(key).map_or(0, HashSet::len)
    }
}

/// A queued admission. Dropping it before the slot arrives gives up the
/// place in the queue; a slot delivered after that is handed back.
struct PendingSlot {
    rx: oneshot::Receiver<Slot>,
    policy: Arc<dyn BackPressure>,
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.rx.close();
        if let Ok(slot) = self.rx.try_recv() {
            trace!(endpoint = %slot.key, slot = %slot.id, "returning slot of abandoned waiter");
            self.policy.release(&slot.key, slot.id);
        }
    }
}

/// Front end over the configured [`BackPressure`] policy.
#[derive(Clone)]
pub struct AdmissionController {
    policy: Arc<dyn BackPressure>,
}

impl fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionController").finish_non_exhaustive()
    }
}

impl AdmissionController {
    /// Controller for a configured policy.
    #[must_use]
    pub fn new(policy: &AdmissionPolicy) -> Self {
        match *policy {
            AdmissionPolicy::Unbounded => Self::with_policy(Unbounded::default()),
            AdmissionPolicy::BoundedQueue {
                max_in_flight,
                max_queued,
            } => Self::with_policy(BoundedQueue::new(max_in_flight, max_queued)),
            AdmissionPolicy::Evicting { max_in_flight } => {
                Self::with_policy(Evicting::new(max_in_flight))
            }
        }
    }

    /// Controller for a custom policy.
    #[must_use]
    pub fn with_policy(policy: impl BackPressure) -> Self {
        Self {
            policy: Arc::new(policy),
        }
    }

    /// Non-blocking admission attempt.
    pub fn try_admit(&self, key: &EndpointKey) -> Admission {
        self.policy.try_admit(key)
    }

    /// Admit, waiting in the queue if the policy queues.
    ///
    /// Cancel safe: dropping the future gives up the queue position.
    ///
    /// # Errors
    ///
    /// [`Error::AdmissionRejected`] when the policy rejects or the queue is
    /// torn down.
    pub async fn admit(&self, key: &EndpointKey) -> Result<Slot> {
        match self.policy.try_admit(key) {
            Admission::Admitted(slot) => {
                trace!(endpoint = %key, slot = %slot.id, "admitted");
                Ok(slot)
            }
            Admission::Rejected(reason) => {
                debug!(endpoint = %key, %reason, "admission rejected");
                Err(Error::AdmissionRejected(reason))
            }
            Admission::Queued(rx) => {
                trace!(endpoint = %key, "queued for admission");
                let mut pending = PendingSlot {
                    rx,
                    policy: Arc::clone(&self.policy),
                };
                (&mut pending.rx)
                    .await
                    .map_err(|_| Error::AdmissionRejected(format!("admission queue for {key} closed")))
            }
        }
    }

    /// Release `slot`. Safe to call any number of times.
    pub fn release(&self, slot: &Slot) -> bool {
        let released = self.policy.release(&slot.key, slot.id);
        if released {
            trace!(endpoint = %slot.key, slot = %slot.id, "released");
        }
        released
    }

    #[must_use]
    pub fn in_flight(&self, key: &EndpointKey) -> usize {
        self.policy.in_flight(key)
    }

    #[must_use]
    pub fn queued(&self, key: &EndpointKey) -> usize {
        self.policy.queued(key)
    }
}

impl CompletionSubscriber for AdmissionController {
    fn on_completion(&self, event: &CompletionEvent) {
        if let Some(slot) = event.context().slot() {
            self.release(&slot);
        }
    }
}
