//! # slicetrack-tracker
//!
//! An in-memory, event-driven tracker maintaining the *patched* view of
//! cluster resource slices: each slice with all applicable declarative
//! device taints merged into its devices. Downstream consumers (schedulers,
//! admission controllers) query the tracker instead of walking three data
//! sources and recomputing taints on every lookup.
//!
//! The tracker is a read-only projection: it never writes to the cluster and
//! persists nothing. Inputs arrive as informer-style events over three
//! object kinds (resource slices, taint rules, device classes); outputs are
//! the derived store snapshot ([`Tracker::list_patched_slices`]) and
//! add/update/delete notifications to registered [`SliceEventHandler`]s.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use slicetrack_core::inventory::{Device, DeviceTaint, ResourceSlice, TaintEffect};
//! use slicetrack_core::rules::{DeviceClass, TaintRule};
//! use slicetrack_tracker::{MemorySource, MemoryWarningSink, Tracker, TrackerOptions};
//!
//! let slices: Arc<MemorySource<ResourceSlice>> = Arc::new(MemorySource::new());
//! let rules: Arc<MemorySource<TaintRule>> = Arc::new(MemorySource::new());
//! let classes: Arc<MemorySource<DeviceClass>> = Arc::new(MemorySource::new());
//!
//! let tracker = Tracker::new(TrackerOptions {
//!     enable_device_taints: true,
//!     slices: slices.clone(),
//!     rules: rules.clone(),
//!     classes: classes.clone(),
//!     warnings: Arc::new(MemoryWarningSink::new()),
//!     error_reporter: None,
//! });
//!
//! let slice = Arc::new(
//!     ResourceSlice::new("gpu-slice", "gpu.example.com", "pool-1")
//!         .with_devices(vec![Device::new("gpu-0")]),
//! );
//! slices.insert(Arc::clone(&slice));
//! tracker.slice_added(&slice);
//!
//! let rule = Arc::new(TaintRule::new(
//!     "drain",
//!     DeviceTaint::new("example.com/drain", "true", TaintEffect::NoExecute),
//! ));
//! rules.insert(Arc::clone(&rule));
//! tracker.rule_added(&rule);
//!
//! let patched = tracker.list_patched_slices().unwrap();
//! assert_eq!(patched[0].devices[0].taints.len(), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod handler;
pub mod shutdown;
pub mod sink;
pub mod source;
pub mod tracker;

pub use handler::{HandlerRegistration, SliceEventHandler};
pub use shutdown::ShutdownHandle;
pub use sink::{
    ChannelWarningSink, ErrorReporter, MemoryWarningSink, ObjectRef, WarningEvent, WarningSink,
    WarningSinkConfig, default_error_reporter,
};
pub use source::{MemorySource, Named, ObjectSource};
pub use tracker::{
    CEL_RUNTIME_ERROR_REASON, TAINT_RULE_KIND, Tracker, TrackerError, TrackerOptions,
};
