//! Rendezvous registry - correlated request/reply between worker and observer
//!
//! An executor that needs an observer-side affordance (user input dialog,
//! client-side script evaluation, media playback) registers a slot, sends
//! the request over the telemetry stream keyed by the slot id, and blocks on
//! the slot until the observer replies or the deadline passes. The registry
//! is the only synchronization point between the two sides.
//!
//! Every `register` is balanced by exactly one slot removal: on reply
//! delivery, on await timeout, or on `release_all` during cancellation.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::events::{EventEmitter, RendezvousCategory};

#[derive(Debug, Error)]
pub enum RendezvousError {
    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("released: {0}")]
    Cancelled(String),

    #[error("reply channel closed")]
    Closed,
}

struct Slot {
    tx: oneshot::Sender<Value>,
    category: RendezvousCategory,
}

/// Registry of pending request/reply slots.
#[derive(Default)]
pub struct RendezvousRegistry {
    slots: Mutex<HashMap<Uuid, Slot>>,
}

impl RendezvousRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a slot. The returned receiver is handed to [`await_reply`].
    ///
    /// [`await_reply`]: Self::await_reply
    pub fn register(&self, category: RendezvousCategory) -> (Uuid, oneshot::Receiver<Value>) {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.slots
            .lock()
            .expect("rendezvous registry poisoned")
            .insert(id, Slot { tx, category });
        debug!(%id, %category, "RendezvousRegistry::register");
        (id, rx)
    }

    /// Send the request payload to observers, keyed by the slot id.
    /// Called by the executor just before it begins awaiting.
    pub fn dispatch(&self, emitter: &EventEmitter, category: RendezvousCategory, id: Uuid, payload: Value) {
        debug!(%id, %category, "RendezvousRegistry::dispatch");
        emitter.rendezvous_request(category, &id.to_string(), payload);
    }

    /// Block until the slot's reply arrives or the deadline passes.
    ///
    /// The slot is removed from the registry on every exit path. A synthetic
    /// cancellation reply (from [`release_all`]) surfaces as
    /// [`RendezvousError::Cancelled`].
    ///
    /// [`release_all`]: Self::release_all
    pub async fn await_reply(
        &self,
        id: Uuid,
        rx: oneshot::Receiver<Value>,
        timeout: Duration,
    ) -> Result<Value, RendezvousError> {
        let outcome = tokio::time::timeout(timeout, rx).await;
        // Whatever happened, the slot must be gone afterwards.
        self.remove(id);

        match outcome {
            Ok(Ok(reply)) => {
                if reply.get("cancelled").and_then(Value::as_bool).unwrap_or(false) {
                    let reason = reply
                        .get("reason")
                        .and_then(Value::as_str)
                        .unwrap_or("cancelled")
                        .to_string();
                    return Err(RendezvousError::Cancelled(reason));
                }
                Ok(reply)
            }
            Ok(Err(_)) => Err(RendezvousError::Closed),
            Err(_) => {
                debug!(%id, ?timeout, "RendezvousRegistry::await_reply: timed out");
                Err(RendezvousError::Timeout(timeout))
            }
        }
    }

    /// Deliver an observer reply. Unknown ids are ignored (the observer
    /// replied after a timeout already reclaimed the slot).
    pub fn deliver_reply(&self, id: Uuid, reply: Value) -> bool {
        let slot = self.slots.lock().expect("rendezvous registry poisoned").remove(&id);
        match slot {
            Some(slot) => {
                debug!(%id, category = %slot.category, "RendezvousRegistry::deliver_reply");
                slot.tx.send(reply).is_ok()
            }
            None => {
                warn!(%id, "RendezvousRegistry::deliver_reply: unknown request id, ignoring");
                false
            }
        }
    }

    /// Fire every live slot with a synthetic cancellation reply so blocked
    /// workers wake up. Used by the stop path.
    pub fn release_all(&self, reason: &str) {
        let drained: Vec<(Uuid, Slot)> = self
            .slots
            .lock()
            .expect("rendezvous registry poisoned")
            .drain()
            .collect();
        debug!(count = drained.len(), %reason, "RendezvousRegistry::release_all");
        for (id, slot) in drained {
            debug!(%id, category = %slot.category, "releasing pending rendezvous");
            let _ = slot.tx.send(json!({ "cancelled": true, "reason": reason }));
        }
    }

    fn remove(&self, id: Uuid) {
        self.slots.lock().expect("rendezvous registry poisoned").remove(&id);
    }

    /// Number of pending slots.
    pub fn len(&self) -> usize {
        self.slots.lock().expect("rendezvous registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pending slots per category (diagnostics).
    pub fn len_by_category(&self) -> HashMap<RendezvousCategory, usize> {
        let slots = self.slots.lock().expect("rendezvous registry poisoned");
        let mut counts = HashMap::new();
        for slot in slots.values() {
            *counts.entry(slot.category).or_insert(0) += 1;
        }
        counts
    }
}
