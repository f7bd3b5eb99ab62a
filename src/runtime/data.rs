//! Type-erased payload cells
//!
//! Every value flowing through the graph is held in a [`Data`] cell: the
//! payload behind `dyn Any` plus a read/write mutex used to serialize
//! readers against the producing node during recomputation. Ports share
//! cells by `Arc`, so a downstream input keeps its value alive even if the
//! upstream output replaces its pointer mid-update.

use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::{Arc, RwLock};

/// Shared handle to a payload cell.
pub type SharedData = Arc<Data>;

/// A payload of arbitrary type, paired with its value mutex.
pub struct Data {
    type_name: &'static str,
    lock: RwLock<()>,
    value: Box<dyn Any + Send + Sync>,
}

impl Data {
    /// Wrap a value into a shared cell.
    pub fn new<T: Send + Sync + 'static>(value: T) -> SharedData {
        Arc::new(Self {
            type_name: std::any::type_name::<T>(),
            lock: RwLock::new(()),
            value: Box::new(value),
        })
    }

    /// Downcast to the payload type. `None` on mismatch.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    pub fn is<T: Send + Sync + 'static>(&self) -> bool {
        self.payload_type() == TypeId::of::<T>()
    }

    /// `TypeId` of the wrapped payload.
    pub fn payload_type(&self) -> TypeId {
        (*self.value).type_id()
    }

    pub fn payload_name(&self) -> &'static str {
        self.type_name
    }

    /// The value mutex. Locking strategies take this shared on inputs and
    /// exclusive on outputs around a node's recomputation.
    pub fn mutex(&self) -> &RwLock<()> {
        &self.lock
    }
}

impl fmt::Debug for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Data").field("type", &self.type_name).finish()
    }
}

/// Typed view onto a shared payload cell.
///
/// Constructed only after a successful downcast check, so dereferencing
/// cannot fail afterwards.
pub struct DataRef<T> {
    data: SharedData,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> DataRef<T> {
    /// Build a typed view; `None` if the cell holds a different type.
    pub(crate) fn new(data: SharedData) -> Option<Self> {
        data.is::<T>().then_some(Self {
            data,
            _marker: PhantomData,
        })
    }

    /// The underlying shared cell.
    pub fn shared(&self) -> &SharedData {
        &self.data
    }
}

impl<T: Send + Sync + 'static> Deref for DataRef<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.data
            .get::<T>()
            .expect("DataRef type checked at construction - this is a bug in the pipeline")
    }
}

impl<T> Clone for DataRef<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            _marker: PhantomData,
        }
    }
}

impl<T: Send + Sync + 'static + fmt::Debug> fmt::Debug for DataRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DataRef").field(&**self).finish()
    }
}
