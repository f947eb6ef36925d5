//! Memoised compilation of selector expressions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use super::{CompileError, Program};

type CompileResult = Result<Arc<Program>, CompileError>;

/// Compile cache keyed by expression text.
///
/// Compilation results, successes and failures alike, are memoised: a broken
/// expression is not re-parsed on every reconciliation. Each entry is
/// initialised at most once; concurrent requests for the same expression
/// block on the single in-flight compile rather than duplicating work.
///
/// Entries live as long as some rule or device class references the
/// expression; the owner calls [`retain`](Self::retain) after rules or
/// classes are removed to evict orphans.
#[derive(Debug, Default)]
pub struct ProgramCache {
    entries: Mutex<HashMap<String, Arc<OnceLock<CompileResult>>>>,
}

impl ProgramCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the compiled program for an expression, compiling on first use.
    ///
    /// # Errors
    ///
    /// Returns the (memoised) [`CompileError`] if the expression is
    /// structurally invalid.
    pub fn get_or_compile(&self, expression: &str) -> CompileResult {
        let cell = {
            let mut entries = self
                .entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            entries
                .entry(expression.to_string())
                .or_default()
                .clone()
        };
        // The map lock is released before compiling; only callers racing on
        // this exact expression wait here.
        cell.get_or_init(|| Program::compile(expression).map(Arc::new))
            .clone()
    }

    /// Drop every entry whose expression fails the predicate.
    pub fn retain(&self, mut keep: impl FnMut(&str) -> bool) {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        entries.retain(|expression, _| keep(expression));
    }

    /// Number of cached expressions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
