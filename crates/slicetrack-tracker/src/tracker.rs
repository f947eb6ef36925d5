//! The tracker: event routing, patched-view maintenance and the public API.
//!
//! Raw informer events enter through the nine `*_added` / `*_updated` /
//! `*_removed` entry points. Each event reduces to a set of affected slice
//! names; every affected name is re-resolved against the slice source,
//! re-patched against the rule and class state current at dispatch time, and
//! the resulting derived-store diff is fanned out to subscribers.
//!
//! # Locking
//!
//! A single reconcile mutex serialises event bursts, which is what gives
//! subscribers per-slice causal order. The rule index, class map and derived
//! store each sit behind their own `RwLock`; write locks are held only to
//! swap state, never across selector evaluation. Subscriber callbacks run
//! with no tracker lock held other than the reconcile mutex itself, so a
//! handler may freely call [`Tracker::list_patched_slices`].

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use slicetrack_core::inventory::ResourceSlice;
use slicetrack_core::patch::{PatchReport, patch_slice};
use slicetrack_core::rules::{DeviceClass, RuleIndex, TaintRule};
use slicetrack_core::selector::{CompileError, ProgramCache};
use slicetrack_core::store::{PatchedStore, StoreChange};
use thiserror::Error;

use crate::handler::{HandlerRegistration, SliceEventHandler, SubscriberRegistry};
use crate::shutdown::ShutdownHandle;
use crate::sink::{ErrorReporter, ObjectRef, WarningEvent, WarningSink, default_error_reporter};
use crate::source::ObjectSource;

/// Reason attached to warning events for selector runtime failures.
pub const CEL_RUNTIME_ERROR_REASON: &str = "CELRuntimeError";

/// Object kind warning events are attributed to.
pub const TAINT_RULE_KIND: &str = "DeviceTaintRule";

/// Expression text longer than this is truncated in event messages.
const MAX_EVENT_EXPRESSION_LEN: usize = 256;

/// Errors surfaced by the tracker's public API and error reporter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum TrackerError {
    /// The tracker has been cancelled and no longer serves calls.
    #[error("tracker is shutting down")]
    ShuttingDown,

    /// A taint rule carries an expression that does not compile; the rule is
    /// excluded from patching until it changes.
    #[error("CEL compile error in {TAINT_RULE_KIND} {rule:?}, expression {expression:?}: {source}")]
    RuleConfiguration {
        /// Name of the broken rule.
        rule: String,
        /// The offending expression text.
        expression: String,
        /// The compile failure.
        #[source]
        source: CompileError,
    },

    /// The informer cache returned no object for a key the derived store
    /// knows; the entry is treated as deleted.
    #[error("object {key:?} missing from informer cache, treating as deleted")]
    CacheInconsistency {
        /// The missing key.
        key: String,
    },
}

/// Construction options for [`Tracker`].
///
/// All sources are required; the reporter defaults to logging.
pub struct TrackerOptions {
    /// When false, rules and classes are ignored and the tracker is a
    /// pass-through cache over the slice source.
    pub enable_device_taints: bool,
    /// Indexed read view over resource slices.
    pub slices: Arc<dyn ObjectSource<ResourceSlice>>,
    /// Indexed read view over taint rules.
    pub rules: Arc<dyn ObjectSource<TaintRule>>,
    /// Indexed read view over device classes.
    pub classes: Arc<dyn ObjectSource<DeviceClass>>,
    /// Destination for per-rule warning events.
    pub warnings: Arc<dyn WarningSink>,
    /// Receiver of unhandled errors; defaults to logging when `None`.
    pub error_reporter: Option<ErrorReporter>,
}

/// Per-burst bookkeeping: dedup state that resets with every raw event.
#[derive(Default)]
struct Burst {
    /// Rules already attributed a warning event in this burst.
    warned_rules: HashSet<String>,
}

/// The resource-slice tracker.
///
/// Maintains the derived store of patched slices and fans diff notifications
/// out to registered handlers. See the crate docs for the overall contract.
pub struct Tracker {
    enable_device_taints: bool,
    slices: Arc<dyn ObjectSource<ResourceSlice>>,
    rules_source: Arc<dyn ObjectSource<TaintRule>>,
    classes_source: Arc<dyn ObjectSource<DeviceClass>>,

    rule_index: RwLock<RuleIndex>,
    classes: RwLock<HashMap<String, Arc<DeviceClass>>>,
    programs: ProgramCache,
    store: PatchedStore,
    subscribers: SubscriberRegistry,

    warnings: Arc<dyn WarningSink>,
    report_error: ErrorReporter,
    /// (rule, expression) pairs already reported as broken. Cleared for a
    /// rule when the rule changes, so a fix followed by a regression reports
    /// again.
    reported_compile_errors: Mutex<HashSet<(String, String)>>,

    /// Serialises event bursts; also taken by handler registration so the
    /// replay snapshot cannot interleave with a burst.
    reconcile: Mutex<()>,
    stopping: AtomicBool,
}

impl Tracker {
    /// Build a tracker over the given sources, priming the rule index and
    /// class map from their current contents.
    #[must_use]
    pub fn new(options: TrackerOptions) -> Self {
        let mut rule_index = RuleIndex::new();
        let mut classes = HashMap::new();
        if options.enable_device_taints {
            for rule in options.rules.list() {
                rule_index.upsert(rule);
            }
            for class in options.classes.list() {
                classes.insert(class.name.clone(), class);
            }
        }

        Self {
            enable_device_taints: options.enable_device_taints,
            slices: options.slices,
            rules_source: options.rules,
            classes_source: options.classes,
            rule_index: RwLock::new(rule_index),
            classes: RwLock::new(classes),
            programs: ProgramCache::new(),
            store: PatchedStore::new(),
            subscribers: SubscriberRegistry::new(),
            warnings: options.warnings,
            report_error: options.error_reporter.unwrap_or_else(default_error_reporter),
            reported_compile_errors: Mutex::new(HashSet::new()),
            reconcile: Mutex::new(()),
            stopping: AtomicBool::new(false),
        }
    }

    // =========================================================================
    // Public API
    // =========================================================================

    /// Register a handler.
    ///
    /// The handler receives an `on_add` for every currently tracked patched
    /// slice before it observes any subsequent event; replay and
    /// registration are atomic with respect to event bursts. Must not be
    /// called from inside a handler callback.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::ShuttingDown`] after cancellation.
    pub fn add_event_handler(
        &self,
        handler: Arc<dyn SliceEventHandler>,
    ) -> Result<HandlerRegistration, TrackerError> {
        if self.is_shutting_down() {
            return Err(TrackerError::ShuttingDown);
        }
        let _burst = self.reconcile.lock().unwrap_or_else(PoisonError::into_inner);
        for slice in self.store.list() {
            handler.on_add(&slice);
        }
        let id = self.subscribers.register(handler);
        Ok(HandlerRegistration { id })
    }

    /// Deregister a handler. Returns whether it was registered.
    pub fn remove_event_handler(&self, registration: HandlerRegistration) -> bool {
        self.subscribers.remove(registration.id)
    }

    /// Snapshot of the derived store, sorted by slice name.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::ShuttingDown`] after cancellation.
    pub fn list_patched_slices(&self) -> Result<Vec<Arc<ResourceSlice>>, TrackerError> {
        if self.is_shutting_down() {
            return Err(TrackerError::ShuttingDown);
        }
        Ok(self.store.list())
    }

    /// Block until the handle is cancelled, then stop consuming events and
    /// flush pending warning events best-effort.
    pub fn run(&self, shutdown: &ShutdownHandle) {
        tracing::info!(
            device_taints = self.enable_device_taints,
            "slice tracker running"
        );
        shutdown.wait();
        self.shutdown();
    }

    /// Stop consuming events immediately. Idempotent; also invoked by
    /// [`run`](Self::run) on cancellation.
    pub fn shutdown(&self) {
        if !self.stopping.swap(true, Ordering::SeqCst) {
            self.warnings.flush();
            tracing::info!("slice tracker stopped");
        }
    }

    /// Whether the tracker has been cancelled.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Slice events
    // =========================================================================

    /// A resource slice appeared in the source.
    pub fn slice_added(&self, slice: &ResourceSlice) {
        self.slice_event(&slice.name, true);
    }

    /// A resource slice changed in the source.
    pub fn slice_updated(&self, _old: &ResourceSlice, new: &ResourceSlice) {
        self.slice_event(&new.name, true);
    }

    /// A resource slice disappeared from the source.
    pub fn slice_removed(&self, slice: &ResourceSlice) {
        self.slice_event(&slice.name, false);
    }

    fn slice_event(&self, name: &str, expect_present: bool) {
        if self.is_shutting_down() {
            return;
        }
        let _guard = self.reconcile.lock().unwrap_or_else(PoisonError::into_inner);
        let mut burst = Burst::default();
        self.sync_slice(name, expect_present, &mut burst);
    }

    // =========================================================================
    // Rule events
    // =========================================================================

    /// A taint rule appeared in the source.
    pub fn rule_added(&self, rule: &TaintRule) {
        self.rule_event(&rule.name, &[rule]);
    }

    /// A taint rule changed in the source.
    pub fn rule_updated(&self, old: &TaintRule, new: &TaintRule) {
        self.rule_event(&new.name, &[old, new]);
    }

    /// A taint rule disappeared from the source.
    pub fn rule_removed(&self, rule: &TaintRule) {
        self.rule_event(&rule.name, &[rule]);
    }

    /// Process a rule transition. `hints` are the event payloads; the
    /// affected-slice set is computed over the union of the previously
    /// indexed rule, the payloads and the current source state, so stale
    /// payloads cannot hide a slice that needs re-patching.
    fn rule_event(&self, name: &str, hints: &[&TaintRule]) {
        if !self.enable_device_taints || self.is_shutting_down() {
            return;
        }
        let _guard = self.reconcile.lock().unwrap_or_else(PoisonError::into_inner);

        let current = self.rules_source.get(name);
        let previous = {
            let index = self.rule_index.read().unwrap_or_else(PoisonError::into_inner);
            index.get(name).cloned()
        };

        let mut affected = BTreeSet::new();
        let all_slices = self.slices.list();
        let variants = previous
            .as_deref()
            .into_iter()
            .chain(current.as_deref())
            .chain(hints.iter().copied());
        for rule in variants {
            for slice in &all_slices {
                if rule.selector.structurally_matches_slice(slice) {
                    affected.insert(slice.name.clone());
                }
            }
        }

        {
            let mut index = self.rule_index.write().unwrap_or_else(PoisonError::into_inner);
            match &current {
                Some(rule) => index.upsert(Arc::clone(rule)),
                None => {
                    index.remove(name);
                }
            }
        }

        if previous != current {
            self.forget_compile_errors(name);
            self.evict_orphaned_programs();
        }

        tracing::debug!(rule = name, affected = affected.len(), "taint rule event");
        let mut burst = Burst::default();
        for slice_name in &affected {
            self.sync_slice(slice_name, true, &mut burst);
        }
    }

    // =========================================================================
    // Class events
    // =========================================================================

    /// A device class appeared in the source.
    pub fn class_added(&self, class: &DeviceClass) {
        self.class_event(&class.name);
    }

    /// A device class changed in the source.
    pub fn class_updated(&self, _old: &DeviceClass, new: &DeviceClass) {
        self.class_event(&new.name);
    }

    /// A device class disappeared from the source.
    pub fn class_removed(&self, class: &DeviceClass) {
        self.class_event(&class.name);
    }

    fn class_event(&self, name: &str) {
        if !self.enable_device_taints || self.is_shutting_down() {
            return;
        }
        let _guard = self.reconcile.lock().unwrap_or_else(PoisonError::into_inner);

        let current = self.classes_source.get(name);
        let selecting = {
            let index = self.rule_index.read().unwrap_or_else(PoisonError::into_inner);
            index.rules_selecting_class(name)
        };

        let mut affected = BTreeSet::new();
        if !selecting.is_empty() {
            for slice in self.slices.list() {
                if selecting
                    .iter()
                    .any(|rule| rule.selector.structurally_matches_slice(&slice))
                {
                    affected.insert(slice.name.clone());
                }
            }
        }

        {
            let mut classes = self.classes.write().unwrap_or_else(PoisonError::into_inner);
            match &current {
                Some(class) => {
                    classes.insert(name.to_string(), Arc::clone(class));
                }
                None => {
                    classes.remove(name);
                }
            }
        }
        self.evict_orphaned_programs();

        tracing::debug!(class = name, affected = affected.len(), "device class event");
        let mut burst = Burst::default();
        for slice_name in &affected {
            self.sync_slice(slice_name, true, &mut burst);
        }
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Bring one derived entry in line with the sources and notify
    /// subscribers of the observable difference, if any.
    fn sync_slice(&self, name: &str, expect_present: bool, burst: &mut Burst) {
        match self.slices.get(name) {
            None => {
                if expect_present && self.store.get(name).is_some() {
                    let error = TrackerError::CacheInconsistency { key: name.to_string() };
                    tracing::warn!(%error, "cache inconsistency");
                    (*self.report_error)(&error);
                }
                if let StoreChange::Removed { previous } = self.store.delete(name) {
                    tracing::debug!(slice = name, "patched slice removed");
                    self.dispatch(|handler| handler.on_delete(&previous));
                }
            }
            Some(slice) => {
                let patched = if self.enable_device_taints {
                    self.compute_patched(&slice, burst)
                } else {
                    Arc::clone(&slice)
                };
                match self.store.put(Arc::clone(&patched)) {
                    StoreChange::Added => {
                        tracing::debug!(slice = name, "patched slice added");
                        self.dispatch(|handler| handler.on_add(&patched));
                    }
                    StoreChange::Updated { previous } => {
                        tracing::debug!(slice = name, "patched slice updated");
                        self.dispatch(|handler| handler.on_update(&previous, &patched));
                    }
                    StoreChange::Removed { .. } | StoreChange::Unchanged => {}
                }
            }
        }
    }

    /// Run the patch engine for one slice against current rules and classes.
    fn compute_patched(&self, slice: &Arc<ResourceSlice>, burst: &mut Burst) -> Arc<ResourceSlice> {
        let candidates = {
            let index = self.rule_index.read().unwrap_or_else(PoisonError::into_inner);
            index.candidates_for(slice)
        };
        if candidates.is_empty() {
            return Arc::clone(slice);
        }
        let classes = self
            .classes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut report = PatchReport::default();
        let patched = patch_slice(slice, &candidates, &classes, &self.programs, &mut report);
        self.report(report, burst);
        patched
    }

    /// Route a patch report to the error reporter and the warning sink.
    fn report(&self, report: PatchReport, burst: &mut Burst) {
        for failure in report.compile_errors {
            let key = (failure.rule.clone(), failure.expression.clone());
            let first_sighting = self
                .reported_compile_errors
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key);
            if first_sighting {
                (*self.report_error)(&TrackerError::RuleConfiguration {
                    rule: failure.rule,
                    expression: failure.expression,
                    source: failure.error,
                });
            }
        }

        for failure in report.runtime_errors {
            if !burst.warned_rules.insert(failure.rule.clone()) {
                continue;
            }
            let expression = truncate(&failure.expression, MAX_EVENT_EXPRESSION_LEN);
            self.warnings.warn(WarningEvent {
                object: ObjectRef {
                    kind: TAINT_RULE_KIND,
                    name: failure.rule,
                },
                reason: CEL_RUNTIME_ERROR_REASON,
                message: format!(
                    "CEL runtime error evaluating {expression:?} against device {}/{}/{}: {}",
                    failure.driver, failure.pool, failure.device, failure.error,
                ),
            });
        }
    }

    /// Invoke every registered handler without holding any tracker lock
    /// beyond the reconcile mutex.
    fn dispatch(&self, notify: impl Fn(&dyn SliceEventHandler)) {
        for (_, handler) in self.subscribers.snapshot().iter() {
            notify(handler.as_ref());
        }
    }

    /// Drop compile-error memory for a rule whose content changed.
    fn forget_compile_errors(&self, rule: &str) {
        self.reported_compile_errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(name, _)| name != rule);
    }

    /// Evict compiled programs no rule or class references any more.
    fn evict_orphaned_programs(&self) {
        let mut live: HashSet<String> = HashSet::new();
        {
            let index = self.rule_index.read().unwrap_or_else(PoisonError::into_inner);
            for rule in index.rules() {
                live.extend(rule.selector.expressions.iter().cloned());
            }
        }
        {
            let classes = self.classes.read().unwrap_or_else(PoisonError::into_inner);
            for class in classes.values() {
                live.extend(class.expressions.iter().cloned());
            }
        }
        self.programs.retain(|expression| live.contains(expression));
    }
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
