//! Senders: slot registries with pairwise connection to receivers

use std::sync::{Arc, Mutex, Weak};

use super::receiver::Receiver;
use super::slot::Slot;

/// A registry of slots, the emitting half of a connection.
///
/// A sender holds a list of weak references to its registered slots; it
/// never extends a slot's lifetime. The slot's owner, the port it is
/// registered through, keeps it alive, and entries whose owner dropped
/// them are pruned on registration, connection, and counting.
///
/// Connecting a sender to a receiver wires every registered slot to the
/// receiver; slots registered afterwards are wired retroactively to every
/// receiver the sender is already connected to. This matters for ports
/// whose slots are registered after the port has been wired up, such as
/// the per-input update slots of a multi-input.
pub struct Sender {
    slots: Mutex<Vec<Weak<Slot>>>,
    receivers: Mutex<Vec<Weak<Receiver>>>,
}

impl Sender {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            receivers: Mutex::new(Vec::new()),
        }
    }

    /// Register a slot, wiring it to every already-connected receiver.
    ///
    /// Only a weak reference is kept; the caller retains ownership.
    pub fn register_slot(&self, slot: &Arc<Slot>) {
        let live: Vec<Arc<Receiver>> = {
            let mut receivers = self.receivers.lock().unwrap();
            receivers.retain(|weak| weak.strong_count() > 0);
            receivers.iter().filter_map(Weak::upgrade).collect()
        };
        for receiver in &live {
            slot.connect(receiver);
        }
        let mut slots = self.slots.lock().unwrap();
        slots.retain(|weak| weak.strong_count() > 0);
        slots.push(Arc::downgrade(slot));
    }

    /// Connect every registered slot to `receiver`. Idempotent.
    pub fn connect(&self, receiver: &Arc<Receiver>) {
        {
            let mut receivers = self.receivers.lock().unwrap();
            let already = receivers
                .iter()
                .any(|weak| weak.upgrade().is_some_and(|r| Arc::ptr_eq(&r, receiver)));
            if !already {
                receivers.push(Arc::downgrade(receiver));
            }
        }
        for slot in self.live_slots() {
            slot.connect(receiver);
        }
    }

    /// Tear down the connection to `receiver` on every registered slot.
    pub fn disconnect(&self, receiver: &Arc<Receiver>) {
        self.receivers
            .lock()
            .unwrap()
            .retain(|weak| weak.upgrade().is_some_and(|r| !Arc::ptr_eq(&r, receiver)));
        for slot in self.live_slots() {
            slot.disconnect(receiver);
        }
    }

    /// Number of registered slots whose owner is still alive.
    pub fn num_slots(&self) -> usize {
        let mut slots = self.slots.lock().unwrap();
        slots.retain(|weak| weak.strong_count() > 0);
        slots.len()
    }

    /// True while at least one connected receiver is alive.
    pub fn is_connected(&self) -> bool {
        self.receivers
            .lock()
            .unwrap()
            .iter()
            .any(|weak| weak.strong_count() > 0)
    }

    /// Upgrade the live slots, pruning expired entries.
    fn live_slots(&self) -> Vec<Arc<Slot>> {
        let mut slots = self.slots.lock().unwrap();
        slots.retain(|weak| weak.strong_count() > 0);
        slots.iter().filter_map(Weak::upgrade).collect()
    }
}

impl Default for Sender {
    fn default() -> Self {
        Self::new()
    }
}
