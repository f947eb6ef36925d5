//! The taint patch engine.
//!
//! [`patch_slice`] is a pure function: given a slice, the candidate rules,
//! the current device classes and a program cache, it produces the patched
//! slice. It never mutates its inputs and performs no I/O; everything the
//! caller needs to act on (compile errors, per-device runtime errors) comes
//! back in the [`PatchReport`].
//!
//! Merge semantics: a device's patched taint list is its original taints
//! followed by the taints of applying rules in rule-name lexicographic order
//! (the caller passes candidates sorted that way), deduplicated by full
//! taint-tuple equality. If no device gains a taint the input slice is
//! returned unchanged (same `Arc`).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::inventory::ResourceSlice;
use crate::rules::{DeviceClass, TaintRule};
use crate::selector::{CompileError, DeviceView, Program, ProgramCache, RuntimeError};

/// A rule excluded from patching because one of its expressions (or one of
/// its device class's expressions) does not compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleCompileError {
    /// Name of the broken rule.
    pub rule: String,
    /// The offending expression text.
    pub expression: String,
    /// Why it failed to compile.
    pub error: CompileError,
}

/// A rule that failed to evaluate against a particular device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleRuntimeError {
    /// Name of the rule whose expression failed.
    pub rule: String,
    /// The offending expression text.
    pub expression: String,
    /// Driver of the slice the device belongs to.
    pub driver: String,
    /// Pool of the slice the device belongs to.
    pub pool: String,
    /// Name of the device the evaluation failed on.
    pub device: String,
    /// The evaluation failure.
    pub error: RuntimeError,
}

/// Everything noteworthy that happened while patching one slice.
///
/// Runtime errors are deduplicated to at most one entry per rule per call;
/// compile errors to one entry per rule.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PatchReport {
    /// Rules excluded because an expression does not compile.
    pub compile_errors: Vec<RuleCompileError>,
    /// Rules that hit an evaluation error on some device.
    pub runtime_errors: Vec<RuleRuntimeError>,
}

impl PatchReport {
    /// Whether the patch completed without anything to report.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.compile_errors.is_empty() && self.runtime_errors.is_empty()
    }
}

/// A candidate rule with its expressions compiled, ready for per-device
/// evaluation.
struct PreparedRule<'a> {
    rule: &'a Arc<TaintRule>,
    /// Class expressions first, then the rule's own; all must hold.
    programs: Vec<Arc<Program>>,
}

/// Compute the patched form of a slice.
///
/// `candidates` is expected sorted by rule name (as produced by
/// `RuleIndex::candidates_for`); rules whose driver/pool constraints do not
/// admit the slice are skipped, so the function stays total over arbitrary
/// inputs. A rule referencing a class absent from `classes` matches no
/// devices.
#[must_use]
pub fn patch_slice(
    slice: &Arc<ResourceSlice>,
    candidates: &[Arc<TaintRule>],
    classes: &HashMap<String, Arc<DeviceClass>>,
    programs: &ProgramCache,
    report: &mut PatchReport,
) -> Arc<ResourceSlice> {
    let prepared = prepare_rules(slice, candidates, classes, programs, report);
    if prepared.is_empty() {
        return Arc::clone(slice);
    }

    let mut patched: Option<ResourceSlice> = None;
    // Rules already carrying a runtime-error entry in the report; the error
    // itself only skips the rule for the device it occurred on.
    let mut reported_rules: HashSet<&str> = HashSet::new();

    for (position, device) in slice.devices.iter().enumerate() {
        let view = DeviceView {
            driver: &slice.driver,
            pool: &slice.pool.name,
            device,
        };

        'rules: for entry in &prepared {
            if let Some(wanted) = &entry.rule.selector.device {
                if *wanted != device.name {
                    continue;
                }
            }

            for program in &entry.programs {
                match program.evaluate(&view) {
                    Ok(true) => {}
                    Ok(false) => continue 'rules,
                    Err(error) => {
                        if reported_rules.insert(&entry.rule.name) {
                            report.runtime_errors.push(RuleRuntimeError {
                                rule: entry.rule.name.clone(),
                                expression: program.source().to_string(),
                                driver: slice.driver.clone(),
                                pool: slice.pool.name.clone(),
                                device: device.name.clone(),
                                error,
                            });
                        }
                        continue 'rules;
                    }
                }
            }

            let taint = &entry.rule.taint;
            let already_present = match &patched {
                Some(copy) => copy.devices[position].taints.contains(taint),
                None => device.taints.contains(taint),
            };
            if !already_present {
                let copy = patched.get_or_insert_with(|| (**slice).clone());
                copy.devices[position].taints.push(taint.clone());
            }
        }
    }

    match patched {
        Some(copy) => Arc::new(copy),
        None => Arc::clone(slice),
    }
}

/// Compile every expression a candidate rule depends on.
///
/// A compile failure anywhere excludes the whole rule and is recorded once;
/// a missing device class silently excludes the rule (the class event will
/// trigger a re-patch when it appears).
fn prepare_rules<'a>(
    slice: &ResourceSlice,
    candidates: &'a [Arc<TaintRule>],
    classes: &HashMap<String, Arc<DeviceClass>>,
    programs: &ProgramCache,
    report: &mut PatchReport,
) -> Vec<PreparedRule<'a>> {
    let mut prepared = Vec::with_capacity(candidates.len());

    'candidates: for rule in candidates {
        if !rule.selector.structurally_matches_slice(slice) {
            continue;
        }

        let mut expressions: Vec<&str> = Vec::new();
        if let Some(class_name) = &rule.selector.device_class {
            match classes.get(class_name) {
                Some(class) => expressions.extend(class.expressions.iter().map(String::as_str)),
                None => continue,
            }
        }
        expressions.extend(rule.selector.expressions.iter().map(String::as_str));

        let mut compiled = Vec::with_capacity(expressions.len());
        for expression in expressions {
            match programs.get_or_compile(expression) {
                Ok(program) => compiled.push(program),
                Err(error) => {
                    report.compile_errors.push(RuleCompileError {
                        rule: rule.name.clone(),
                        expression: expression.to_string(),
                        error,
                    });
                    continue 'candidates;
                }
            }
        }

        prepared.push(PreparedRule { rule, programs: compiled });
    }

    prepared
}
