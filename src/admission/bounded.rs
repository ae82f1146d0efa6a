use std::collections::{HashMap, HashSet, VecDeque};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::trace;

use super::{Admission, BackPressure, Slot, SlotId};
use crate::endpoint::EndpointKey;

#[derive(Default)]
struct Endpoint {
    in_flight: HashSet<SlotId>,
    waiters: VecDeque<oneshot::Sender<Slot>>,
}

impl Endpoint {
    fn prune(&mut self) {
        self.waiters.retain(|tx| !tx.is_closed());
    }
}

/// At most `max_in_flight` slots per endpoint, then a FIFO queue of at most
/// `max_queued` waiters, then rejection.
pub struct BoundedQueue {
    max_in_flight: usize,
    max_queued: usize,
    endpoints: Mutex<HashMap<EndpointKey, Endpoint>>,
}

impl BoundedQueue {
    #[must_use]
    pub fn new(max_in_flight: usize, max_queued: usize) -> Self {
        Self {
            max_in_flight: max_in_flight.max(1),
            max_queued,
            endpoints: Mutex::new(HashMap::new()),
        }
    }
}

impl BackPressure for BoundedQueue {
    fn try_admit(&self, key: &EndpointKey) -> Admission {
        let mut endpoints = self.endpoints.lock();
        let endpoint = endpoints.entry(key.clone()).or_default();
        endpoint.prune();

        if endpoint.in_flight.len() < self.max_in_flight && endpoint.waiters.is_empty() {
            let slot = Slot::new(key.clone());
            endpoint.in_flight.insert(slot.id);
            return Admission::Admitted(slot);
        }
        if endpoint.waiters.len() < self.max_queued {
            let (tx, rx) = oneshot::channel();
            endpoint.waiters.push_back(tx);
            return Admission::Queued(rx);
        }
        Admission::Rejected(format!(
            "{key}: {} in flight and {} queued",
            endpoint.in_flight.len(),
            endpoint.waiters.len()
        ))
    }

    fn release(&self, key: &EndpointKey, id: SlotId) -> bool {
        let mut endpoints = self.endpoints.lock();
        let Some(endpoint) = endpoints.get_mut(key) else {
            return false;
        };
        if !endpoint.in_flight.remove(&id) {
            return false;
        }

        while let Some(waiter) = endpoint.waiters.pop_front() {
            let slot = Slot::new(key.clone());
            let next = slot.id;
            endpoint.in_flight.insert(next);
            match waiter.send(slot) {
                Ok(()) => {
                    trace!(endpoint = %key, slot = %next, "handed slot to queued waiter");
                    break;
                }
                Err(_) => {
                    endpoint.in_flight.remove(&next);
                }
            }
        }

        if endpoint.in_flight.is_empty() && endpoint.waiters.is_empty() {
            endpoints.remove(key);
        }
        true
    }

    fn in_flight(&self, key: &EndpointKey) -> usize {
        self.endpoints
            .lock()
            .get(key)
            .map_or(0, |e| e.in_flight.len())
    }

    fn queued(&self, key: &EndpointKey) -> usize {
        self.endpoints.lock().get_mut(key).map_or(0, |e| {
            e.prune();
            e.waiters.len()
        })
    }
}
