//! Low-level signal fabric
//!
//! Typed emission points ([`Slot`], [`Slots`]) are grouped in a [`Sender`];
//! handlers ([`Callback`]) are grouped in a [`Receiver`]. Connecting a
//! sender to a receiver wires every slot to every compatible callback.
//! Emission is always synchronous on the calling thread.

pub mod callback;
pub mod receiver;
pub mod sender;
pub mod signal;
pub mod slot;

pub use callback::{Callback, CallbackInvocation, Tracking};
pub use receiver::Receiver;
pub use sender::Sender;
pub use signal::{Signal, SignalKind};
pub use slot::{Slot, Slots};
