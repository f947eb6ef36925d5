//! End-to-end scenarios for the patched-slice tracker: input events in,
//! derived snapshot and handler notifications out.
//!
//! The fixture drives the tracker the way an informer layer would: every
//! mutation first lands in the backing source, then the matching event entry
//! point fires. Updates that are fully equal to the stored object are
//! suppressed at the source layer, as informers do.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{TimeZone, Utc};
use slicetrack_core::inventory::{Device, DeviceTaint, ResourceSlice, TaintEffect};
use slicetrack_core::rules::{DeviceClass, TaintRule, TaintSelector};
use slicetrack_tracker::{
    MemorySource, MemoryWarningSink, ObjectSource, SliceEventHandler, Tracker, TrackerError,
    TrackerOptions, WarningSink,
};

const DRIVER1: &str = "driver1.example.com";
const DRIVER2: &str = "driver2.example.com";
const POOL1: &str = "pool-1";
const POOL2: &str = "pool-2";

// =============================================================================
// Fixture
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Notification {
    Add(Arc<ResourceSlice>),
    Update(Arc<ResourceSlice>, Arc<ResourceSlice>),
    Delete(Arc<ResourceSlice>),
}

#[derive(Default)]
struct RecordingHandler {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingHandler {
    fn take(&self) -> Vec<Notification> {
        std::mem::take(
            &mut *self
                .notifications
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }
}

impl SliceEventHandler for RecordingHandler {
    fn on_add(&self, new: &Arc<ResourceSlice>) {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Notification::Add(Arc::clone(new)));
    }

    fn on_update(&self, old: &Arc<ResourceSlice>, new: &Arc<ResourceSlice>) {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Notification::Update(Arc::clone(old), Arc::clone(new)));
    }

    fn on_delete(&self, old: &Arc<ResourceSlice>) {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Notification::Delete(Arc::clone(old)));
    }
}

struct Fixture {
    slices: Arc<MemorySource<ResourceSlice>>,
    rules: Arc<MemorySource<TaintRule>>,
    classes: Arc<MemorySource<DeviceClass>>,
    warnings: Arc<MemoryWarningSink>,
    errors: Arc<Mutex<Vec<TrackerError>>>,
    tracker: Tracker,
    handler: Arc<RecordingHandler>,
}

impl Fixture {
    fn new(enable_device_taints: bool) -> Self {
        let slices: Arc<MemorySource<ResourceSlice>> = Arc::new(MemorySource::new());
        let rules: Arc<MemorySource<TaintRule>> = Arc::new(MemorySource::new());
        let classes: Arc<MemorySource<DeviceClass>> = Arc::new(MemorySource::new());
        let warnings = Arc::new(MemoryWarningSink::new());
        let errors: Arc<Mutex<Vec<TrackerError>>> = Arc::new(Mutex::new(Vec::new()));

        let reporter_errors = Arc::clone(&errors);
        let reporter: slicetrack_tracker::ErrorReporter =
            Arc::new(move |error: &TrackerError| {
                reporter_errors
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(error.clone());
            });
        let tracker = Tracker::new(TrackerOptions {
            enable_device_taints,
            slices: Arc::clone(&slices) as Arc<dyn ObjectSource<ResourceSlice>>,
            rules: Arc::clone(&rules) as Arc<dyn ObjectSource<TaintRule>>,
            classes: Arc::clone(&classes) as Arc<dyn ObjectSource<DeviceClass>>,
            warnings: Arc::clone(&warnings) as Arc<dyn WarningSink>,
            error_reporter: Some(reporter),
        });

        let handler = Arc::new(RecordingHandler::default());
        tracker
            .add_event_handler(Arc::clone(&handler) as Arc<dyn SliceEventHandler>)
            .expect("register handler");

        Self {
            slices,
            rules,
            classes,
            warnings,
            errors,
            tracker,
            handler,
        }
    }

    /// Store a slice and fire the matching event, suppressing no-op updates
    /// the way an informer would.
    fn upsert_slice(&self, slice: &Arc<ResourceSlice>) {
        match self.slices.insert(Arc::clone(slice)) {
            None => self.tracker.slice_added(slice),
            Some(old) if *old != **slice => self.tracker.slice_updated(&old, slice),
            Some(_) => {}
        }
    }

    fn delete_slice(&self, name: &str) {
        let old = self.slices.remove(name).expect("deleting unknown slice");
        self.tracker.slice_removed(&old);
    }

    fn upsert_rule(&self, rule: &Arc<TaintRule>) {
        match self.rules.insert(Arc::clone(rule)) {
            None => self.tracker.rule_added(rule),
            Some(old) if *old != **rule => self.tracker.rule_updated(&old, rule),
            Some(_) => {}
        }
    }

    fn delete_rule(&self, name: &str) {
        let old = self.rules.remove(name).expect("deleting unknown rule");
        self.tracker.rule_removed(&old);
    }

    fn upsert_class(&self, class: &Arc<DeviceClass>) {
        match self.classes.insert(Arc::clone(class)) {
            None => self.tracker.class_added(class),
            Some(old) if *old != **class => self.tracker.class_updated(&old, class),
            Some(_) => {}
        }
    }

    fn snapshot(&self) -> Vec<Arc<ResourceSlice>> {
        self.tracker.list_patched_slices().expect("list patched slices")
    }

    fn reported_errors(&self) -> Vec<TrackerError> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

// =============================================================================
// Object builders
// =============================================================================

fn taint1() -> DeviceTaint {
    DeviceTaint::new("example.com/taint", "tainted", TaintEffect::NoExecute)
        .at(Utc.with_ymd_and_hms(2006, 1, 2, 15, 4, 5).unwrap())
}

fn taint2() -> DeviceTaint {
    DeviceTaint::new("example.com/taint2", "tainted2", TaintEffect::NoExecute)
        .at(Utc.with_ymd_and_hms(2006, 1, 2, 15, 4, 5).unwrap())
}

fn device(name: &str) -> Device {
    Device::new(name)
}

fn tainted(device: Device, taints: Vec<DeviceTaint>) -> Device {
    Device { taints, ..device }
}

fn slice(name: &str, driver: &str, pool: &str, devices: Vec<Device>) -> Arc<ResourceSlice> {
    Arc::new(ResourceSlice::new(name, driver, pool).with_devices(devices))
}

fn slice1() -> Arc<ResourceSlice> {
    slice("s1", DRIVER1, POOL1, vec![device("device-1")])
}

fn slice1_tainted() -> Arc<ResourceSlice> {
    slice("s1", DRIVER1, POOL1, vec![tainted(device("device-1"), vec![taint1()])])
}

fn slice2() -> Arc<ResourceSlice> {
    slice("s2", DRIVER2, POOL2, vec![device("device-2")])
}

fn slice2_tainted() -> Arc<ResourceSlice> {
    slice("s2", DRIVER2, POOL2, vec![tainted(device("device-2"), vec![taint1()])])
}

fn rule(selector: TaintSelector) -> Arc<TaintRule> {
    Arc::new(TaintRule::new("rule", taint1()).with_selector(selector))
}

fn match_all_rule() -> Arc<TaintRule> {
    rule(TaintSelector::default())
}

fn assert_snapshot(fixture: &Fixture, expected: &[Arc<ResourceSlice>]) {
    let mut expected: Vec<_> = expected.to_vec();
    expected.sort_by(|a, b| a.name.cmp(&b.name));
    assert_eq!(fixture.snapshot(), expected);
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn add_slices_no_rules() {
    let fixture = Fixture::new(true);
    fixture.upsert_slice(&slice1());
    fixture.upsert_slice(&slice2());

    assert_snapshot(&fixture, &[slice1(), slice2()]);
    assert_eq!(
        fixture.handler.take(),
        vec![Notification::Add(slice1()), Notification::Add(slice2())]
    );
    assert!(fixture.reported_errors().is_empty());
    assert!(fixture.warnings.events().is_empty());
}

#[test]
fn update_slices_no_rules() {
    let fixture = Fixture::new(true);
    let s1_empty = slice("s1", DRIVER1, POOL1, vec![]);
    let s2_empty = slice("s2", DRIVER2, POOL2, vec![]);
    let unchanged = slice("no-change", "", "", vec![]);

    fixture.upsert_slice(&s1_empty);
    fixture.upsert_slice(&s2_empty);
    fixture.upsert_slice(&unchanged);
    fixture.upsert_slice(&slice1());
    fixture.upsert_slice(&slice2());
    fixture.upsert_slice(&unchanged);

    assert_snapshot(&fixture, &[slice1(), slice2(), unchanged.clone()]);
    assert_eq!(
        fixture.handler.take(),
        vec![
            Notification::Add(s1_empty.clone()),
            Notification::Add(s2_empty.clone()),
            Notification::Add(unchanged),
            Notification::Update(s1_empty, slice1()),
            Notification::Update(s2_empty, slice2()),
        ]
    );
}

#[test]
fn delete_slices() {
    let fixture = Fixture::new(true);
    let unchanged = slice("no-change", "", "", vec![]);
    fixture.upsert_slice(&slice1());
    fixture.upsert_slice(&slice2());
    fixture.upsert_slice(&unchanged);
    fixture.delete_slice("s1");
    fixture.delete_slice("s2");

    assert_snapshot(&fixture, &[unchanged]);
    let notifications = fixture.handler.take();
    assert_eq!(
        notifications[3..],
        [Notification::Delete(slice1()), Notification::Delete(slice2())]
    );
}

#[test]
fn rule_patches_existing_slices() {
    let fixture = Fixture::new(true);
    fixture.upsert_slice(&slice1());
    fixture.upsert_rule(&match_all_rule());

    assert_snapshot(&fixture, &[slice1_tainted()]);
    assert_eq!(
        fixture.handler.take(),
        vec![
            Notification::Add(slice1()),
            Notification::Update(slice1(), slice1_tainted()),
        ]
    );
}

#[test]
fn rule_replacement_moves_the_patch() {
    // The same rule name flips from pool-1 to pool-2: s1 loses the taint,
    // s2 gains it, in one burst.
    let fixture = Fixture::new(true);
    fixture.upsert_rule(&rule(TaintSelector {
        pool: Some(POOL1.into()),
        ..TaintSelector::default()
    }));
    fixture.upsert_slice(&slice1());
    fixture.upsert_slice(&slice2());
    fixture.upsert_rule(&rule(TaintSelector {
        pool: Some(POOL2.into()),
        ..TaintSelector::default()
    }));

    assert_snapshot(&fixture, &[slice1(), slice2_tainted()]);

    let notifications = fixture.handler.take();
    assert_eq!(
        notifications[..2],
        [
            Notification::Add(slice1_tainted()),
            Notification::Add(slice2()),
        ]
    );
    // The burst touches both slices; cross-slice order is unspecified.
    let tail = &notifications[2..];
    assert_eq!(tail.len(), 2);
    assert!(tail.contains(&Notification::Update(slice1_tainted(), slice1())));
    assert!(tail.contains(&Notification::Update(slice2(), slice2_tainted())));
}

#[test]
fn merge_keeps_existing_taints_first() {
    let fixture = Fixture::new(true);
    let already_tainted =
        slice("s1", DRIVER1, POOL1, vec![tainted(device("device-1"), vec![taint2()])]);
    let merged = slice(
        "s1",
        DRIVER1,
        POOL1,
        vec![tainted(device("device-1"), vec![taint2(), taint1()])],
    );

    fixture.upsert_rule(&match_all_rule());
    fixture.upsert_slice(&already_tainted);

    assert_snapshot(&fixture, &[merged.clone()]);
    assert_eq!(fixture.handler.take(), vec![Notification::Add(merged)]);
}

#[test]
fn driver_filter_patches_matching_slices_only() {
    let fixture = Fixture::new(true);
    fixture.upsert_rule(&rule(TaintSelector {
        driver: Some(DRIVER1.into()),
        ..TaintSelector::default()
    }));
    fixture.upsert_slice(&slice1());
    fixture.upsert_slice(&slice2());

    assert_snapshot(&fixture, &[slice1_tainted(), slice2()]);
    assert_eq!(
        fixture.handler.take(),
        vec![Notification::Add(slice1_tainted()), Notification::Add(slice2())]
    );
}

#[test]
fn pool_filter_patches_matching_slices_only() {
    let fixture = Fixture::new(true);
    fixture.upsert_rule(&rule(TaintSelector {
        pool: Some(POOL1.into()),
        ..TaintSelector::default()
    }));
    fixture.upsert_slice(&slice1());
    fixture.upsert_slice(&slice2());

    assert_snapshot(&fixture, &[slice1_tainted(), slice2()]);
}

#[test]
fn device_name_filter_patches_matching_devices_only() {
    let fixture = Fixture::new(true);
    fixture.upsert_rule(&rule(TaintSelector {
        device: Some("device-1".into()),
        ..TaintSelector::default()
    }));
    fixture.upsert_slice(&slice1());
    fixture.upsert_slice(&slice2());

    assert_snapshot(&fixture, &[slice1_tainted(), slice2()]);
}

#[test]
fn expression_filter_patches_matching_devices_only() {
    let fixture = Fixture::new(true);
    fixture.upsert_rule(&rule(TaintSelector {
        expressions: vec![format!(r#"device.driver == "{DRIVER1}""#)],
        ..TaintSelector::default()
    }));
    fixture.upsert_slice(&slice1());
    fixture.upsert_slice(&slice2());

    assert_snapshot(&fixture, &[slice1_tainted(), slice2()]);
    assert!(fixture.reported_errors().is_empty());
    assert!(fixture.warnings.events().is_empty());
}

#[test]
fn non_matching_expressions_leave_slices_unchanged() {
    let fixture = Fixture::new(true);
    fixture.upsert_rule(&rule(TaintSelector {
        expressions: vec!["true".into(), "false".into(), "true".into()],
        ..TaintSelector::default()
    }));
    fixture.upsert_slice(&slice1());

    assert_snapshot(&fixture, &[slice1()]);
    assert_eq!(fixture.handler.take(), vec![Notification::Add(slice1())]);
}

#[test]
fn runtime_error_skips_device_and_emits_one_warning_event() {
    let fixture = Fixture::new(true);
    fixture.upsert_rule(&rule(TaintSelector {
        expressions: vec![r#"device.attributes["test.example.com"].deviceAttr"#.into()],
        ..TaintSelector::default()
    }));
    fixture.upsert_slice(&slice1());

    assert_snapshot(&fixture, &[slice1()]);
    assert_eq!(fixture.handler.take(), vec![Notification::Add(slice1())]);
    assert!(fixture.reported_errors().is_empty());

    let events = fixture.warnings.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].object.kind, "DeviceTaintRule");
    assert_eq!(events[0].object.name, "rule");
    assert_eq!(events[0].reason, "CELRuntimeError");
    assert!(events[0].message.contains("deviceAttr"));
    assert!(events[0].message.contains("device-1"));
}

#[test]
fn compile_error_excludes_rule_and_reports_once() {
    let fixture = Fixture::new(true);
    fixture.upsert_rule(&rule(TaintSelector {
        expressions: vec!["invalid".into()],
        ..TaintSelector::default()
    }));
    fixture.upsert_slice(&slice1());
    // A second slice event re-patches but must not re-report.
    fixture.upsert_slice(&slice("s1", DRIVER1, POOL1, vec![device("device-1"), device("device-3")]));

    // The broken rule is excluded; slices stay tracked, unpatched.
    let snapshot = fixture.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert!(snapshot[0].devices.iter().all(|d| d.taints.is_empty()));

    let errors = fixture.reported_errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].to_string().contains("CEL compile error"));
    assert!(fixture.warnings.events().is_empty());
}

#[test]
fn device_class_filter_patches_matching_devices() {
    let fixture = Fixture::new(true);
    let class = Arc::new(DeviceClass::new(
        "device-class-1",
        vec![format!(r#"device.driver == "{DRIVER1}""#)],
    ));
    fixture.upsert_class(&class);
    fixture.upsert_rule(&rule(TaintSelector {
        device_class: Some("device-class-1".into()),
        ..TaintSelector::default()
    }));
    fixture.upsert_slice(&slice1());
    fixture.upsert_slice(&slice2());

    assert_snapshot(&fixture, &[slice1_tainted(), slice2()]);
}

#[test]
fn class_arriving_after_the_rule_triggers_repatch() {
    let fixture = Fixture::new(true);
    fixture.upsert_rule(&rule(TaintSelector {
        device_class: Some("device-class-1".into()),
        ..TaintSelector::default()
    }));
    fixture.upsert_slice(&slice1());
    // Unknown class: rule matches nothing yet.
    assert_snapshot(&fixture, &[slice1()]);

    fixture.upsert_class(&Arc::new(DeviceClass::new(
        "device-class-1",
        vec![format!(r#"device.driver == "{DRIVER1}""#)],
    )));
    assert_snapshot(&fixture, &[slice1_tainted()]);
    assert_eq!(
        fixture.handler.take(),
        vec![
            Notification::Add(slice1()),
            Notification::Update(slice1(), slice1_tainted()),
        ]
    );
}

#[test]
fn all_filter_criteria_combined() {
    let fixture = Fixture::new(true);
    let class = Arc::new(DeviceClass::new(
        "device-class-1",
        vec![format!(r#"device.driver == "{DRIVER1}""#)],
    ));
    fixture.upsert_class(&class);
    fixture.upsert_rule(&rule(TaintSelector {
        driver: Some(DRIVER1.into()),
        pool: Some(POOL1.into()),
        device: Some("device-1".into()),
        device_class: Some("device-class-1".into()),
        expressions: vec!["true".into()],
    }));
    fixture.upsert_slice(&slice1());
    fixture.upsert_slice(&slice2());

    assert_snapshot(&fixture, &[slice1_tainted(), slice2()]);
}

#[test]
fn updated_slices_are_repatched() {
    let fixture = Fixture::new(true);
    let three_devices = vec![device("device-0"), device("device-1"), device("device-2")];
    let three_one_tainted = vec![
        device("device-0"),
        tainted(device("device-1"), vec![taint1()]),
        device("device-2"),
    ];

    fixture.upsert_rule(&rule(TaintSelector {
        device: Some("device-1".into()),
        ..TaintSelector::default()
    }));
    fixture.upsert_slice(&slice1());
    fixture.upsert_slice(&slice("s1", DRIVER1, POOL1, three_devices.clone()));
    fixture.upsert_slice(&slice("s2", DRIVER2, POOL2, three_devices));
    fixture.upsert_slice(&slice("s2", DRIVER2, POOL2, vec![device("device-1")]));

    assert_snapshot(
        &fixture,
        &[
            slice("s1", DRIVER1, POOL1, three_one_tainted.clone()),
            slice("s2", DRIVER2, POOL2, vec![tainted(device("device-1"), vec![taint1()])]),
        ],
    );
    assert_eq!(
        fixture.handler.take(),
        vec![
            Notification::Add(slice1_tainted()),
            Notification::Update(
                slice1_tainted(),
                slice("s1", DRIVER1, POOL1, three_one_tainted.clone()),
            ),
            Notification::Add(slice("s2", DRIVER2, POOL2, three_one_tainted.clone())),
            Notification::Update(
                slice("s2", DRIVER2, POOL2, three_one_tainted),
                slice("s2", DRIVER2, POOL2, vec![tainted(device("device-1"), vec![taint1()])]),
            ),
        ]
    );
}

#[test]
fn rule_retraction_unpatches() {
    let fixture = Fixture::new(true);
    fixture.upsert_rule(&match_all_rule());
    fixture.upsert_slice(&slice1());
    fixture.delete_rule("rule");

    assert_snapshot(&fixture, &[slice1()]);
    assert_eq!(
        fixture.handler.take(),
        vec![
            Notification::Add(slice1_tainted()),
            Notification::Update(slice1_tainted(), slice1()),
        ]
    );
}

#[test]
fn deleting_a_rule_that_never_matched_is_silent() {
    let fixture = Fixture::new(true);
    fixture.upsert_slice(&slice1());
    fixture.upsert_rule(&rule(TaintSelector {
        driver: Some(DRIVER2.into()),
        ..TaintSelector::default()
    }));
    fixture.delete_rule("rule");

    assert_eq!(fixture.handler.take(), vec![Notification::Add(slice1())]);
}

#[test]
fn duplicate_event_delivery_is_absorbed() {
    let fixture = Fixture::new(true);
    let s1 = slice1();
    let all = match_all_rule();
    fixture.upsert_slice(&s1);
    fixture.upsert_rule(&all);
    fixture.handler.take();

    // Informers may redeliver; the unchanged diff absorbs it.
    fixture.tracker.slice_added(&s1);
    fixture.tracker.rule_added(&all);

    assert!(fixture.handler.take().is_empty());
    assert_snapshot(&fixture, &[slice1_tainted()]);
}

#[test]
fn late_handler_registration_replays_current_state() {
    let fixture = Fixture::new(true);
    fixture.upsert_rule(&match_all_rule());
    fixture.upsert_slice(&slice1());
    fixture.upsert_slice(&slice2());

    let late = Arc::new(RecordingHandler::default());
    let registration = fixture
        .tracker
        .add_event_handler(Arc::clone(&late) as Arc<dyn SliceEventHandler>)
        .expect("register late handler");

    // Replay order follows slice names.
    assert_eq!(
        late.take(),
        vec![
            Notification::Add(slice1_tainted()),
            Notification::Add(slice2_tainted()),
        ]
    );

    assert!(fixture.tracker.remove_event_handler(registration));
    fixture.delete_slice("s1");
    assert!(late.take().is_empty());
}

#[test]
fn disabled_feature_gate_passes_slices_through() {
    let fixture = Fixture::new(false);
    fixture.upsert_rule(&match_all_rule());
    fixture.upsert_slice(&slice1());

    assert_snapshot(&fixture, &[slice1()]);
    assert_eq!(fixture.handler.take(), vec![Notification::Add(slice1())]);
    assert!(fixture.reported_errors().is_empty());
    assert!(fixture.warnings.events().is_empty());
}

#[test]
fn missing_cached_object_is_treated_as_delete() {
    let fixture = Fixture::new(true);
    fixture.upsert_slice(&slice1());
    fixture.handler.take();

    // The cache lost the object without a delete event; the next touch of
    // the name resolves against the cache and converges on deletion.
    let stale = fixture.slices.remove("s1").expect("stored slice");
    fixture.tracker.slice_updated(&stale, &stale);

    assert!(fixture.snapshot().is_empty());
    assert_eq!(fixture.handler.take(), vec![Notification::Delete(slice1())]);

    let errors = fixture.reported_errors();
    assert_eq!(errors, vec![TrackerError::CacheInconsistency { key: "s1".to_string() }]);
}

#[test]
fn shutdown_refuses_public_calls() {
    let fixture = Fixture::new(true);
    fixture.upsert_slice(&slice1());
    fixture.tracker.shutdown();

    assert_eq!(
        fixture.tracker.list_patched_slices(),
        Err(TrackerError::ShuttingDown)
    );
    assert!(matches!(
        fixture
            .tracker
            .add_event_handler(Arc::new(RecordingHandler::default())),
        Err(TrackerError::ShuttingDown)
    ));

    // Events after shutdown are dropped.
    fixture.handler.take();
    fixture.tracker.slice_removed(&slice1());
    assert!(fixture.handler.take().is_empty());
}

#[test]
fn run_blocks_until_cancelled() {
    use slicetrack_tracker::ShutdownHandle;

    let fixture = Fixture::new(true);
    let shutdown = ShutdownHandle::new();
    let runner = {
        let shutdown = shutdown.clone();
        let tracker = Arc::new(fixture.tracker);
        let handle = Arc::clone(&tracker);
        std::thread::spawn(move || handle.run(&shutdown))
    };

    shutdown.cancel();
    runner.join().expect("run thread");
}

#[test]
fn concurrent_events_keep_per_slice_order() {
    let fixture = Fixture::new(true);
    let tracker = &fixture.tracker;
    let slices = &fixture.slices;

    std::thread::scope(|scope| {
        for (name, driver, pool) in [("s1", DRIVER1, POOL1), ("s2", DRIVER2, POOL2)] {
            scope.spawn(move || {
                for generation in 1..=20 {
                    let devices = (0..generation).map(|i| device(&format!("device-{i}"))).collect();
                    let next = slice(name, driver, pool, devices);
                    match slices.insert(Arc::clone(&next)) {
                        None => tracker.slice_added(&next),
                        Some(old) => tracker.slice_updated(&old, &next),
                    }
                }
            });
        }
    });

    // Per slice, the observed device counts never go backwards: every
    // notification reflects source state at least as new as the last.
    let notifications = fixture.handler.take();
    for tracked in ["s1", "s2"] {
        let mut last = 0;
        for notification in &notifications {
            let new = match notification {
                Notification::Add(new) | Notification::Update(_, new) => new,
                Notification::Delete(_) => continue,
            };
            if new.name == tracked {
                assert!(new.devices.len() >= last, "regression for {tracked}");
                last = new.devices.len();
            }
        }
    }

    assert_eq!(fixture.snapshot().len(), 2);
}
