//! Cluster hardware inventory model.
//!
//! A [`ResourceSlice`] is a cluster-advertised bundle of devices published by
//! one driver for one pool. Slices are externally owned: the tracker only
//! ever reads them, and patching produces a deep copy with extra taints
//! appended (see the `patch` module).
//!
//! # Equality
//!
//! Two notions of equality exist side by side:
//!
//! - **Full equality** (`PartialEq`): every field, including server-assigned
//!   bookkeeping such as `resource_version`.
//! - **Semantic equality** ([`ResourceSlice::semantic_eq`]): ignores
//!   bookkeeping fields. The derived store diffs with semantic equality so
//!   that resyncs carrying a fresh `resource_version` over unchanged content
//!   do not produce notifications.
//!
//! Taints compare with full-tuple equality: two [`DeviceTaint`]s are equal
//! iff key, value, effect and `time_added` all match.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reference to the resource pool a slice belongs to.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolRef {
    /// Name of the pool, unique within a driver.
    pub name: String,
}

impl PoolRef {
    /// Create a pool reference.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A typed device attribute value.
///
/// Attributes are published by drivers and consumed by selector
/// expressions. Version values are carried verbatim and compare as strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeValue {
    /// Boolean attribute.
    Bool(bool),
    /// Signed integer attribute.
    Int(i64),
    /// Free-form string attribute.
    String(String),
    /// Semantic version string attribute.
    Version(String),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::String(v) | Self::Version(v) => write!(f, "{v}"),
        }
    }
}

/// Effect a taint has on scheduling decisions.
///
/// The tracker treats the effect as an opaque tag; only schedulers assign
/// meaning to the variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaintEffect {
    /// New workloads should not be placed on the device.
    NoSchedule,
    /// Running workloads should be evicted from the device.
    NoExecute,
}

impl fmt::Display for TaintEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSchedule => write!(f, "NoSchedule"),
            Self::NoExecute => write!(f, "NoExecute"),
        }
    }
}

/// A taint attached to a device.
///
/// Equality is full-tuple: all four fields must match. The taint merge in
/// the patch engine deduplicates on this equality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTaint {
    /// Taint key, conventionally a domain-qualified name.
    pub key: String,
    /// Taint value.
    pub value: String,
    /// Scheduling effect.
    pub effect: TaintEffect,
    /// When the taint was added, if recorded.
    pub time_added: Option<DateTime<Utc>>,
}

impl DeviceTaint {
    /// Create a taint without a timestamp.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>, effect: TaintEffect) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            effect,
            time_added: None,
        }
    }

    /// Attach a timestamp to the taint.
    #[must_use]
    pub fn at(mut self, time_added: DateTime<Utc>) -> Self {
        self.time_added = Some(time_added);
        self
    }
}

/// A unit of addressable hardware within a slice.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Device name, unique within the slice.
    pub name: String,
    /// Typed attributes keyed by qualified name (`domain/name`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, AttributeValue>,
    /// Taints already attached by the publishing driver.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<DeviceTaint>,
}

impl Device {
    /// Create a device with no attributes or taints.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
            taints: Vec::new(),
        }
    }

    /// Add an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Add a pre-existing taint.
    #[must_use]
    pub fn with_taint(mut self, taint: DeviceTaint) -> Self {
        self.taints.push(taint);
        self
    }
}

/// A cluster-advertised bundle of devices from one driver and pool.
///
/// Unique by `name`. `resource_version` is assigned by the cluster on every
/// write and is ignored by [`semantic_eq`](Self::semantic_eq).
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSlice {
    /// Object name, unique cluster-wide.
    pub name: String,
    /// Server-assigned bookkeeping version; not part of semantic equality.
    #[serde(default)]
    pub resource_version: u64,
    /// Driver that published the slice.
    pub driver: String,
    /// Pool the devices belong to.
    pub pool: PoolRef,
    /// Ordered device list.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<Device>,
}

impl ResourceSlice {
    /// Create an empty slice for the given driver and pool.
    #[must_use]
    pub fn new(name: impl Into<String>, driver: impl Into<String>, pool: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource_version: 0,
            driver: driver.into(),
            pool: PoolRef::new(pool),
            devices: Vec::new(),
        }
    }

    /// Replace the device list.
    #[must_use]
    pub fn with_devices(mut self, devices: Vec<Device>) -> Self {
        self.devices = devices;
        self
    }

    /// Compare content, ignoring server-assigned bookkeeping
    /// (`resource_version`).
    ///
    /// This is the equality the derived store diffs with: a resync that only
    /// bumps the resource version must not look like a change.
    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.driver == other.driver
            && self.pool == other.pool
            && self.devices == other.devices
    }

    /// Look up a device by name.
    #[must_use]
    pub fn device(&self, name: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.name == name)
    }
}
