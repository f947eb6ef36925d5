//! Secondary-indexed set of live taint rules.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use super::TaintRule;
use crate::inventory::ResourceSlice;

/// The set of live taint rules with secondary indices for cheap candidate
/// lookup.
///
/// A rule is indexed under every structural constraint it carries (driver,
/// pool, device name, device class); a rule with none of them lives in the
/// match-all bucket. [`candidates_for`](Self::candidates_for) unions the
/// buckets a slice can possibly hit and then drops rules whose structural
/// constraints already exclude every device in the slice, so the patch
/// engine never evaluates a selector that cannot match.
#[derive(Debug, Default)]
pub struct RuleIndex {
    rules: BTreeMap<String, Arc<TaintRule>>,
    match_all: BTreeSet<String>,
    by_driver: HashMap<String, BTreeSet<String>>,
    by_pool: HashMap<String, BTreeSet<String>>,
    by_device: HashMap<String, BTreeSet<String>>,
    by_class: HashMap<String, BTreeSet<String>>,
}

impl RuleIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a rule by name.
    pub fn upsert(&mut self, rule: Arc<TaintRule>) {
        self.remove(&rule.name);

        let name = rule.name.clone();
        let selector = &rule.selector;
        let mut bucketed = false;

        if let Some(driver) = &selector.driver {
            self.by_driver.entry(driver.clone()).or_default().insert(name.clone());
            bucketed = true;
        }
        if let Some(pool) = &selector.pool {
            self.by_pool.entry(pool.clone()).or_default().insert(name.clone());
            bucketed = true;
        }
        if let Some(device) = &selector.device {
            self.by_device.entry(device.clone()).or_default().insert(name.clone());
            bucketed = true;
        }
        if let Some(class) = &selector.device_class {
            self.by_class.entry(class.clone()).or_default().insert(name.clone());
            bucketed = true;
        }
        if !bucketed {
            // Expression-only rules cannot be excluded structurally either.
            self.match_all.insert(name.clone());
        }

        self.rules.insert(name, rule);
    }

    /// Remove a rule by name, returning it if present.
    pub fn remove(&mut self, name: &str) -> Option<Arc<TaintRule>> {
        let rule = self.rules.remove(name)?;

        self.match_all.remove(name);
        let selector = &rule.selector;
        unbucket(&mut self.by_driver, selector.driver.as_deref(), name);
        unbucket(&mut self.by_pool, selector.pool.as_deref(), name);
        unbucket(&mut self.by_device, selector.device.as_deref(), name);
        unbucket(&mut self.by_class, selector.device_class.as_deref(), name);

        Some(rule)
    }

    /// Look up a rule by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<TaintRule>> {
        self.rules.get(name)
    }

    /// Rules that could apply to some device in the slice, sorted by rule
    /// name.
    ///
    /// The sort keeps the patch engine's iteration order deterministic and
    /// rule-name lexicographic. Returned rules may still fail device-level
    /// checks (device class, expressions); they are only guaranteed not to
    /// be structurally excluded.
    #[must_use]
    pub fn candidates_for(&self, slice: &ResourceSlice) -> Vec<Arc<TaintRule>> {
        let mut names: BTreeSet<&str> = self.match_all.iter().map(String::as_str).collect();

        if let Some(bucket) = self.by_driver.get(&slice.driver) {
            names.extend(bucket.iter().map(String::as_str));
        }
        if let Some(bucket) = self.by_pool.get(&slice.pool.name) {
            names.extend(bucket.iter().map(String::as_str));
        }
        for device in &slice.devices {
            if let Some(bucket) = self.by_device.get(&device.name) {
                names.extend(bucket.iter().map(String::as_str));
            }
        }
        // Class-filtered rules narrow at the device level only; they are
        // always candidates (subject to their other constraints).
        for bucket in self.by_class.values() {
            names.extend(bucket.iter().map(String::as_str));
        }

        names
            .into_iter()
            .filter_map(|name| self.rules.get(name))
            .filter(|rule| rule.selector.structurally_matches_slice(slice))
            .cloned()
            .collect()
    }

    /// Rules whose selector references the named device class.
    #[must_use]
    pub fn rules_selecting_class(&self, class: &str) -> Vec<Arc<TaintRule>> {
        self.by_class
            .get(class)
            .into_iter()
            .flatten()
            .filter_map(|name| self.rules.get(name))
            .cloned()
            .collect()
    }

    /// Iterate over all live rules in name order.
    pub fn rules(&self) -> impl Iterator<Item = &Arc<TaintRule>> {
        self.rules.values()
    }

    /// Number of live rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the index holds no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn unbucket(bucket: &mut HashMap<String, BTreeSet<String>>, key: Option<&str>, name: &str) {
    if let Some(key) = key {
        if let Some(names) = bucket.get_mut(key) {
            names.remove(name);
            if names.is_empty() {
                bucket.remove(key);
            }
        }
    }
}
