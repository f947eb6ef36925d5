//! Sandboxed device-selector expressions.
//!
//! Taint rules and device classes select devices with small CEL-style
//! predicate expressions evaluated against a [`DeviceView`]. The language is
//! embedded and fully sandboxed: no I/O, no calls, no user-defined names,
//! and a per-evaluation cost budget.
//!
//! # Schema
//!
//! Expressions see a single root object, `device`:
//!
//! | Accessor | Type |
//! |---|---|
//! | `device.driver` | string |
//! | `device.name` | string |
//! | `device.pool` | string |
//! | `device.attributes["qualified"]` | typed attribute value |
//!
//! Attribute keys are qualified names of the form `domain/name`. The form
//! `device.attributes["domain"].name` is equivalent to
//! `device.attributes["domain/name"]`.
//!
//! Operators: `==`, `!=`, `<`, `<=`, `>`, `>=`, `&&`, `||`, `!`, and
//! parentheses. Literals: `true`, `false`, integers, double-quoted strings.
//! Every expression must produce a boolean.
//!
//! # Error classification
//!
//! - [`CompileError`] is **structural**: syntax errors, unknown identifiers
//!   and statically-knowable type mismatches. A rule carrying such an
//!   expression is broken as configured and is excluded from patching
//!   entirely.
//! - [`RuntimeError`] is **per-device**: a lookup of an attribute the device
//!   does not carry, a dynamic type mismatch, or an exceeded cost budget.
//!   The rule simply does not apply to that device.
//!
//! Compile results are memoised by [`ProgramCache`], keyed by expression
//! text, so each distinct expression is compiled at most once for as long as
//! a rule or class references it.

mod cache;
mod eval;
mod parse;

use std::fmt;

use thiserror::Error;

pub use cache::ProgramCache;

use crate::inventory::Device;

/// Default number of evaluation steps allowed per expression evaluation.
pub const DEFAULT_COST_LIMIT: u64 = 10_000;

/// Maximum accepted expression length in bytes.
pub const MAX_EXPRESSION_LEN: usize = 10 * 1024;

/// Structural expression error, knowable without evaluating.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// The expression is not syntactically valid.
    #[error("syntax error at offset {offset}: {message}")]
    Syntax {
        /// Byte offset of the offending token.
        offset: usize,
        /// What the parser expected or found.
        message: String,
    },

    /// The expression references a name outside the device schema.
    #[error("unknown identifier {name:?}")]
    UnknownIdentifier {
        /// The unresolved name, as written.
        name: String,
    },

    /// Operand types are statically incompatible.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// The type required by the operator or by the boolean result rule.
        expected: &'static str,
        /// The type actually inferred.
        found: &'static str,
    },

    /// The expression exceeds [`MAX_EXPRESSION_LEN`].
    #[error("expression length {len} exceeds maximum {max}")]
    TooLong {
        /// Actual length in bytes.
        len: usize,
        /// The configured maximum.
        max: usize,
    },
}

/// Per-device evaluation error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// The device does not carry the requested attribute.
    #[error("attribute {key:?} is not present on the device")]
    MissingAttribute {
        /// The qualified attribute key that was looked up.
        key: String,
    },

    /// A dynamically-typed value had the wrong type for its operator.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// The type required by the operator.
        expected: &'static str,
        /// The type actually produced.
        found: &'static str,
    },

    /// The evaluation exceeded its cost budget.
    #[error("evaluation cost exceeded budget of {limit} steps")]
    CostExceeded {
        /// The configured budget.
        limit: u64,
    },
}

/// The device data an expression evaluates against.
///
/// Borrowed view; constructing one is free. The slice-level fields come from
/// the slice the device belongs to.
#[derive(Debug, Clone, Copy)]
pub struct DeviceView<'a> {
    /// Driver of the enclosing slice.
    pub driver: &'a str,
    /// Pool name of the enclosing slice.
    pub pool: &'a str,
    /// The device under evaluation.
    pub device: &'a Device,
}

/// A compiled selector expression.
///
/// Compilation performs parsing and static checks once; evaluation is then
/// cheap and infallible except for the per-device [`RuntimeError`] cases.
#[derive(Debug, Clone)]
pub struct Program {
    source: String,
    ast: parse::Ast,
    cost_limit: u64,
}

impl Program {
    /// Compile an expression with the default cost budget.
    ///
    /// # Errors
    ///
    /// Returns a [`CompileError`] describing the first structural problem.
    pub fn compile(expression: &str) -> Result<Self, CompileError> {
        Self::compile_with_cost_limit(expression, DEFAULT_COST_LIMIT)
    }

    /// Compile an expression with an explicit per-evaluation cost budget.
    ///
    /// # Errors
    ///
    /// Returns a [`CompileError`] describing the first structural problem.
    pub fn compile_with_cost_limit(
        expression: &str,
        cost_limit: u64,
    ) -> Result<Self, CompileError> {
        if expression.len() > MAX_EXPRESSION_LEN {
            return Err(CompileError::TooLong {
                len: expression.len(),
                max: MAX_EXPRESSION_LEN,
            });
        }
        let ast = parse::parse(expression)?;
        parse::check_boolean(&ast)?;
        Ok(Self {
            source: expression.to_string(),
            ast,
            cost_limit,
        })
    }

    /// Evaluate the expression against a device.
    ///
    /// # Errors
    ///
    /// Returns a [`RuntimeError`] when the device lacks a referenced
    /// attribute, a dynamic value has the wrong type, or the cost budget is
    /// exceeded.
    pub fn evaluate(&self, view: &DeviceView<'_>) -> Result<bool, RuntimeError> {
        eval::evaluate(&self.ast, view, self.cost_limit)
    }

    /// The expression text this program was compiled from.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
