//! The source contract: indexed read views over externally-owned objects.
//!
//! The tracker does not own its inputs. Slices, taint rules and device
//! classes live in an informer-style cache maintained by the embedder; the
//! tracker consults that cache synchronously while processing events and
//! must never assume an event payload is the latest value.
//!
//! [`MemorySource`] is the in-crate implementation of the contract, used by
//! tests and by embedders that feed the tracker directly. Its
//! `insert`/`remove` return the previous object so callers can synthesize
//! add-versus-update events the way informers do.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use slicetrack_core::inventory::ResourceSlice;
use slicetrack_core::rules::{DeviceClass, TaintRule};

/// Objects addressable by a unique cluster name.
pub trait Named {
    /// The object's unique name.
    fn object_name(&self) -> &str;
}

impl Named for ResourceSlice {
    fn object_name(&self) -> &str {
        &self.name
    }
}

impl Named for TaintRule {
    fn object_name(&self) -> &str {
        &self.name
    }
}

impl Named for DeviceClass {
    fn object_name(&self) -> &str {
        &self.name
    }
}

/// Indexed read view over one kind of externally-owned object.
///
/// Implementations must be cheap to call: the tracker reads them on the
/// event hot path.
pub trait ObjectSource<T>: Send + Sync {
    /// Fetch the current object stored under `name`, if any.
    fn get(&self, name: &str) -> Option<Arc<T>>;

    /// Snapshot of all current objects.
    fn list(&self) -> Vec<Arc<T>>;
}

/// In-memory [`ObjectSource`] backed by a `RwLock`ed map.
#[derive(Debug)]
pub struct MemorySource<T> {
    objects: RwLock<HashMap<String, Arc<T>>>,
}

impl<T> Default for MemorySource<T> {
    fn default() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
        }
    }
}

impl<T: Named> MemorySource<T> {
    /// Create an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object under its name, returning the previous object.
    pub fn insert(&self, object: Arc<T>) -> Option<Arc<T>> {
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(object.object_name().to_string(), object)
    }

    /// Remove an object by name, returning it if present.
    pub fn remove(&self, name: &str) -> Option<Arc<T>> {
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }
}

impl<T: Send + Sync> ObjectSource<T> for MemorySource<T> {
    fn get(&self, name: &str) -> Option<Arc<T>> {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn list(&self) -> Vec<Arc<T>> {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}
