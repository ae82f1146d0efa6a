use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use tracing::debug;

use super::{Admission, BackPressure, Slot, SlotId};
use crate::endpoint::EndpointKey;

/// At most `max_in_flight` slots per endpoint; a new request cancels the
/// oldest holder instead of waiting.
pub struct Evicting {
    max_in_flight: usize,
    endpoints: Mutex<HashMap<EndpointKey, VecDeque<Slot>>>,
}

impl Evicting {
    #[must_use]
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            max_in_flight: max_in_flight.max(1),
            endpoints: Mutex::new(HashMap::new()),
        }
    }
}

impl BackPressure for Evicting {
    fn try_admit(&self, key: &EndpointKey) -> Admission {
        let mut endpoints = self.endpoints.lock();
        let held = endpoints.entry(key.clone()).or_default();
        while held.len() >= self.max_in_flight {
            let Some(victim) = held.pop_front() else { break };
            debug!(endpoint = %key, slot = %victim.id, "evicting oldest slot");
            victim.cancel.cancel();
        }
        let slot = Slot::new(key.clone());
        held.push_back(slot.clone());
        Admission::Admitted(slot)
    }

    fn release(&self, key: &EndpointKey, id: SlotId) -> bool {
        let mut endpoints = self.endpoints.lock();
        let Some(held) = endpoints.get_mut(key) else {
            return false;
        };
        let Some(pos) = held.iter().position(|slot| slot.id == id) else {
            return false;
        };
        held.remove(pos);
        if held.is_empty() {
            endpoints.remove(key);
        }
        true
    }

    fn in_flight(&self, key: &EndpointKey) -> usize {
        self.endpoints.lock().get(key).map_or(0, VecDeque::len)
    }
}
