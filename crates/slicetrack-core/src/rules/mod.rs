//! Declarative taint rules and device classes.
//!
//! A [`TaintRule`] declares "apply this taint to every device matching this
//! selector". Selector constraints are all optional and are ANDed; a rule
//! with an empty selector matches every device in the cluster.

mod index;

use serde::{Deserialize, Serialize};

pub use index::RuleIndex;

use crate::inventory::{DeviceTaint, ResourceSlice};

/// Device-selection constraints of a taint rule.
///
/// All present constraints must hold for a device to match. `driver` and
/// `pool` filter at the slice level; `device`, `device_class` and
/// `expressions` narrow further at the device level.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaintSelector {
    /// Slice driver must equal this value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    /// Slice pool name must equal this value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<String>,
    /// Device name must equal this value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    /// Device must satisfy the named device class.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    /// Selector expressions; every one must evaluate true.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expressions: Vec<String>,
}

impl TaintSelector {
    /// Whether the slice-level constraints (driver, pool) admit this slice.
    ///
    /// Device-level constraints are not consulted; a `false` here means no
    /// device in the slice can possibly match.
    #[must_use]
    pub fn matches_slice(&self, slice: &ResourceSlice) -> bool {
        self.driver.as_deref().is_none_or(|d| d == slice.driver)
            && self.pool.as_deref().is_none_or(|p| p == slice.pool.name)
    }

    /// Whether any structural constraint can rule out the whole slice,
    /// including the device-name filter.
    #[must_use]
    pub fn structurally_matches_slice(&self, slice: &ResourceSlice) -> bool {
        self.matches_slice(slice)
            && self
                .device
                .as_deref()
                .is_none_or(|name| slice.devices.iter().any(|d| d.name == name))
    }

    /// True when no constraint is present at all.
    #[must_use]
    pub fn is_match_all(&self) -> bool {
        self.driver.is_none()
            && self.pool.is_none()
            && self.device.is_none()
            && self.device_class.is_none()
            && self.expressions.is_empty()
    }
}

/// A cluster-scoped rule attaching one taint to all matching devices.
///
/// Unique by `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaintRule {
    /// Object name, unique cluster-wide.
    pub name: String,
    /// Which devices the rule applies to.
    #[serde(default)]
    pub selector: TaintSelector,
    /// The taint to attach.
    pub taint: DeviceTaint,
}

impl TaintRule {
    /// Create a rule with an empty (match-all) selector.
    #[must_use]
    pub fn new(name: impl Into<String>, taint: DeviceTaint) -> Self {
        Self {
            name: name.into(),
            selector: TaintSelector::default(),
            taint,
        }
    }

    /// Replace the selector.
    #[must_use]
    pub fn with_selector(mut self, selector: TaintSelector) -> Self {
        self.selector = selector;
        self
    }
}

/// A named bundle of device-matching expressions.
///
/// A device satisfies the class iff every expression evaluates true.
/// Referenced by taint rules via [`TaintSelector::device_class`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceClass {
    /// Object name, unique cluster-wide.
    pub name: String,
    /// Matching expressions; all must hold.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expressions: Vec<String>,
}

impl DeviceClass {
    /// Create a class from its expressions.
    #[must_use]
    pub fn new(name: impl Into<String>, expressions: Vec<String>) -> Self {
        Self {
            name: name.into(),
            expressions,
        }
    }
}
