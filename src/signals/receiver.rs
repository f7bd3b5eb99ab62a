//! Receivers: callback registries with policy-aware dispatch

use std::sync::{Arc, Mutex};

use super::callback::{Callback, CallbackInvocation};
use super::signal::Signal;

/// A registry of callbacks, the receiving half of a connection.
///
/// Delivery is synchronous on the emitting thread, in registration order.
/// Exclusive callbacks compete: only those with the smallest subtype
/// distance to the delivered signal fire. Transparent callbacks fire on
/// every match. Callbacks whose weak-tracked target has expired fire zero
/// times and are pruned during delivery.
pub struct Receiver {
    callbacks: Mutex<Vec<Arc<Callback>>>,
}

impl Receiver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            callbacks: Mutex::new(Vec::new()),
        })
    }

    /// Register a callback. Callbacks fire in registration order.
    pub fn register(&self, callback: Callback) {
        self.callbacks.lock().unwrap().push(Arc::new(callback));
    }

    pub fn num_callbacks(&self) -> usize {
        self.callbacks.lock().unwrap().len()
    }

    /// Deliver a signal to every matching callback.
    ///
    /// The callback list is snapshotted first so handlers may register
    /// further callbacks without deadlocking.
    pub fn deliver(&self, signal: &Signal) {
        let snapshot: Vec<Arc<Callback>> = self.callbacks.lock().unwrap().clone();
        let kind = signal.kind();

        let mut saw_dead = false;
        let mut min_exclusive: Option<u32> = None;
        for callback in &snapshot {
            if !callback.is_live() {
                saw_dead = true;
                continue;
            }
            if callback.invocation() == CallbackInvocation::Exclusive
                && let Some(distance) = kind.distance_to(callback.kind())
            {
                min_exclusive = Some(match min_exclusive {
                    Some(current) => current.min(distance),
                    None => distance,
                });
            }
        }

        for callback in &snapshot {
            if !callback.is_live() {
                continue;
            }
            let Some(distance) = kind.distance_to(callback.kind()) else {
                continue;
            };
            let fire = match callback.invocation() {
                CallbackInvocation::Transparent => true,
                CallbackInvocation::Exclusive => Some(distance) == min_exclusive,
            };
            if fire {
                callback.call(signal);
            }
        }

        if saw_dead {
            self.callbacks.lock().unwrap().retain(|cb| cb.is_live());
        }
    }
}

impl Default for Receiver {
    fn default() -> Self {
        Self {
            callbacks: Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::SignalKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(
        kind: SignalKind,
        invocation: CallbackInvocation,
        counter: &Arc<AtomicUsize>,
    ) -> Callback {
        let counter = Arc::clone(counter);
        Callback::new(
            kind,
            invocation,
            crate::signals::Tracking::Untracked,
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[test]
    fn exclusive_fires_most_specific_only() {
        let receiver = Receiver::new();
        let on_modified = Arc::new(AtomicUsize::new(0));
        let on_input_set = Arc::new(AtomicUsize::new(0));

        receiver.register(counting(
            SignalKind::Modified,
            CallbackInvocation::Exclusive,
            &on_modified,
        ));
        receiver.register(counting(
            SignalKind::InputSet,
            CallbackInvocation::Exclusive,
            &on_input_set,
        ));

        // A plain Modified only matches the Modified handler.
        receiver.deliver(&Signal::Modified);
        assert_eq!(on_modified.load(Ordering::SeqCst), 1);
        assert_eq!(on_input_set.load(Ordering::SeqCst), 0);

        // An InputSet matches both, but the more specific handler wins.
        receiver.deliver(&Signal::InputSet(None));
        assert_eq!(on_modified.load(Ordering::SeqCst), 1);
        assert_eq!(on_input_set.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn derived_signal_reaches_base_handler_without_shadow() {
        let receiver = Receiver::new();
        let on_modified = Arc::new(AtomicUsize::new(0));

        receiver.register(counting(
            SignalKind::Modified,
            CallbackInvocation::Exclusive,
            &on_modified,
        ));

        receiver.deliver(&Signal::InputSet(None));
        assert_eq!(on_modified.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn transparent_fires_alongside_exclusive() {
        let receiver = Receiver::new();
        let exclusive = Arc::new(AtomicUsize::new(0));
        let transparent = Arc::new(AtomicUsize::new(0));

        receiver.register(counting(
            SignalKind::InputSet,
            CallbackInvocation::Exclusive,
            &exclusive,
        ));
        receiver.register(counting(
            SignalKind::Modified,
            CallbackInvocation::Transparent,
            &transparent,
        ));

        receiver.deliver(&Signal::InputSet(None));
        assert_eq!(exclusive.load(Ordering::SeqCst), 1);
        assert_eq!(transparent.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn expired_weak_callback_never_fires_and_is_pruned() {
        let receiver = Receiver::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let target = Arc::new(0usize);

        let fired2 = Arc::clone(&fired);
        receiver.register(Callback::weak(
            SignalKind::Modified,
            CallbackInvocation::Exclusive,
            &target,
            move |_| {
                fired2.fetch_add(1, Ordering::SeqCst);
            },
        ));
        drop(target);

        receiver.deliver(&Signal::Modified);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(receiver.num_callbacks(), 0);
    }

    #[test]
    fn unrelated_kinds_do_not_fire() {
        let receiver = Receiver::new();
        let on_update = Arc::new(AtomicUsize::new(0));

        receiver.register(counting(
            SignalKind::Update,
            CallbackInvocation::Exclusive,
            &on_update,
        ));

        receiver.deliver(&Signal::Modified);
        assert_eq!(on_update.load(Ordering::SeqCst), 0);
    }
}
