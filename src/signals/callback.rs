//! Callbacks: signal handlers with invocation and tracking policies

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use super::signal::{Signal, SignalKind};

/// How a callback competes with other callbacks on the same receiver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackInvocation {
    /// Only the most specific matching exclusive callback fires. Lets a
    /// handler for a derived signal shadow the handler for its base.
    Exclusive,
    /// Fires whenever the signal matches, regardless of other callbacks.
    Transparent,
}

/// Lifetime link between a callback and the object it works on behalf of.
#[derive(Clone)]
pub enum Tracking {
    /// No lifetime link; the callback lives as long as its receiver.
    Untracked,
    /// The callback is dropped from its receiver once the tracked object
    /// expires; it never fires for a dead target.
    Weak(Weak<dyn Any + Send + Sync>),
    /// The callback keeps the tracked object alive for as long as the
    /// receiver holds the callback.
    Shared(Arc<dyn Any + Send + Sync>),
}

impl fmt::Debug for Tracking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tracking::Untracked => write!(f, "Untracked"),
            Tracking::Weak(_) => write!(f, "Weak"),
            Tracking::Shared(_) => write!(f, "Shared"),
        }
    }
}

type Handler = Box<dyn Fn(&Signal) + Send + Sync>;

/// A signal handler registered with a [`Receiver`](super::Receiver).
///
/// Stores the kind of signal it handles, the invocation policy deciding
/// whether it competes or stacks with other handlers, and a tracking policy
/// tying its lifetime to another object.
pub struct Callback {
    kind: SignalKind,
    invocation: CallbackInvocation,
    tracking: Tracking,
    handler: Handler,
}

impl Callback {
    pub fn new(
        kind: SignalKind,
        invocation: CallbackInvocation,
        tracking: Tracking,
        handler: Handler,
    ) -> Self {
        Self {
            kind,
            invocation,
            tracking,
            handler,
        }
    }

    /// Convenience constructor for a weak-tracked callback. The handler is
    /// silently retired once `target` is dropped.
    pub fn weak<T, F>(
        kind: SignalKind,
        invocation: CallbackInvocation,
        target: &Arc<T>,
        handler: F,
    ) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Signal) + Send + Sync + 'static,
    {
        let target_dyn: Arc<dyn Any + Send + Sync> = target.clone();
        let tracked: Weak<dyn Any + Send + Sync> = Arc::downgrade(&target_dyn);
        Self::new(kind, invocation, Tracking::Weak(tracked), Box::new(handler))
    }

    /// Convenience constructor for a shared-tracked callback. `target` is
    /// kept alive for as long as the callback is registered.
    pub fn shared<T, F>(
        kind: SignalKind,
        invocation: CallbackInvocation,
        target: &Arc<T>,
        handler: F,
    ) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Signal) + Send + Sync + 'static,
    {
        let tracked: Arc<dyn Any + Send + Sync> = target.clone();
        Self::new(kind, invocation, Tracking::Shared(tracked), Box::new(handler))
    }

    pub fn kind(&self) -> SignalKind {
        self.kind
    }

    pub fn invocation(&self) -> CallbackInvocation {
        self.invocation
    }

    /// False once a weak-tracked target has expired.
    pub fn is_live(&self) -> bool {
        match &self.tracking {
            Tracking::Untracked | Tracking::Shared(_) => true,
            Tracking::Weak(weak) => weak.strong_count() > 0,
        }
    }

    pub(crate) fn call(&self, signal: &Signal) {
        (self.handler)(signal);
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("kind", &self.kind)
            .field("invocation", &self.invocation)
            .field("tracking", &self.tracking)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn weak_callback_dies_with_target() {
        let target = Arc::new(7usize);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = Arc::clone(&fired);
        let cb = Callback::weak(
            SignalKind::Modified,
            CallbackInvocation::Exclusive,
            &target,
            move |_| {
                fired2.fetch_add(1, Ordering::SeqCst);
            },
        );

        assert!(cb.is_live());
        cb.call(&Signal::Modified);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        drop(target);
        assert!(!cb.is_live());
    }

    #[test]
    fn shared_callback_pins_target() {
        let target = Arc::new(7usize);
        let weak = Arc::downgrade(&target);
        let cb = Callback::shared(
            SignalKind::Modified,
            CallbackInvocation::Transparent,
            &target,
            |_| {},
        );

        drop(target);
        assert!(weak.upgrade().is_some(), "shared tracking keeps the target alive");
        assert!(cb.is_live());

        drop(cb);
        assert!(weak.upgrade().is_none());
    }
}
