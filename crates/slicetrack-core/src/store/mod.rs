//! The derived store of patched slices.
//!
//! Maps slice name to the fully-materialised patched slice. Every write
//! returns a [`StoreChange`] diff tag computed under semantic equality; the
//! event router turns those tags directly into subscriber notifications, so
//! `Unchanged` is what makes duplicate and resync deliveries invisible
//! downstream.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::inventory::ResourceSlice;

/// Outcome of a store write, used to decide the notification kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    /// The name was not present before.
    Added,
    /// The stored value changed under semantic equality.
    Updated {
        /// The previously stored patched slice.
        previous: Arc<ResourceSlice>,
    },
    /// The entry was removed.
    Removed {
        /// The patched slice that was stored.
        previous: Arc<ResourceSlice>,
    },
    /// Nothing observable changed; no notification should fire.
    Unchanged,
}

/// Thread-safe mapping from slice name to patched slice.
///
/// Reads return `Arc` snapshots; a concurrent writer can never tear an
/// individual entry. Writers hold the lock only for the map operation
/// itself, never across patch computation.
#[derive(Debug, Default)]
pub struct PatchedStore {
    entries: RwLock<HashMap<String, Arc<ResourceSlice>>>,
}

impl PatchedStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the patched slice stored under its name.
    ///
    /// The new value is always stored (freshest bookkeeping fields win), but
    /// the returned tag is [`StoreChange::Unchanged`] when the previous value
    /// is semantically equal.
    pub fn put(&self, patched: Arc<ResourceSlice>) -> StoreChange {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match entries.insert(patched.name.clone(), Arc::clone(&patched)) {
            None => StoreChange::Added,
            Some(previous) if previous.semantic_eq(&patched) => StoreChange::Unchanged,
            Some(previous) => StoreChange::Updated { previous },
        }
    }

    /// Remove the entry for a slice name.
    ///
    /// Removing an absent name is [`StoreChange::Unchanged`], which absorbs
    /// duplicate delete deliveries.
    pub fn delete(&self, name: &str) -> StoreChange {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match entries.remove(name) {
            Some(previous) => StoreChange::Removed { previous },
            None => StoreChange::Unchanged,
        }
    }

    /// Snapshot of one entry.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<ResourceSlice>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Snapshot of all entries, sorted by slice name.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<ResourceSlice>> {
        let mut slices: Vec<_> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        slices.sort_by(|a, b| a.name.cmp(&b.name));
        slices
    }

    /// Number of tracked slices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no slices are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
