//! # slicetrack-core
//!
//! Core primitives for the slicetrack resource-slice tracker.
//!
//! This crate holds the pure, I/O-free building blocks:
//!
//! - **Inventory model**: resource slices, devices, attributes and taints
//! - **Selector evaluation**: a sandboxed predicate language with
//!   compile/runtime error classification and memoised compilation
//! - **Rule indexing**: live taint rules with secondary indices for cheap
//!   candidate lookup
//! - **Patching**: the pure function merging rule taints into a slice
//! - **Derived store**: the diffing map from slice name to patched slice
//!
//! The event-driven tracker that wires these to informer-style sources lives
//! in the `slicetrack-tracker` crate.
//!
//! ## Example
//!
//! ```rust
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use slicetrack_core::inventory::{Device, DeviceTaint, ResourceSlice, TaintEffect};
//! use slicetrack_core::patch::{patch_slice, PatchReport};
//! use slicetrack_core::rules::{RuleIndex, TaintRule, TaintSelector};
//! use slicetrack_core::selector::ProgramCache;
//!
//! let slice = Arc::new(
//!     ResourceSlice::new("gpu-slice", "gpu.example.com", "pool-1")
//!         .with_devices(vec![Device::new("gpu-0")]),
//! );
//!
//! let mut index = RuleIndex::new();
//! index.upsert(Arc::new(
//!     TaintRule::new(
//!         "drain",
//!         DeviceTaint::new("example.com/drain", "true", TaintEffect::NoExecute),
//!     )
//!     .with_selector(TaintSelector {
//!         driver: Some("gpu.example.com".into()),
//!         ..TaintSelector::default()
//!     }),
//! ));
//!
//! let programs = ProgramCache::new();
//! let mut report = PatchReport::default();
//! let patched = patch_slice(
//!     &slice,
//!     &index.candidates_for(&slice),
//!     &HashMap::new(),
//!     &programs,
//!     &mut report,
//! );
//! assert_eq!(patched.devices[0].taints.len(), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod inventory;
pub mod patch;
pub mod rules;
pub mod selector;
pub mod store;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::inventory::{
        AttributeValue, Device, DeviceTaint, PoolRef, ResourceSlice, TaintEffect,
    };
    pub use crate::patch::{PatchReport, patch_slice};
    pub use crate::rules::{DeviceClass, RuleIndex, TaintRule, TaintSelector};
    pub use crate::selector::{DeviceView, Program, ProgramCache};
    pub use crate::store::{PatchedStore, StoreChange};
}

pub use inventory::{AttributeValue, Device, DeviceTaint, PoolRef, ResourceSlice, TaintEffect};
pub use rules::{DeviceClass, RuleIndex, TaintRule, TaintSelector};
pub use store::{PatchedStore, StoreChange};
