//! Evaluation of parsed selector expressions.
//!
//! Evaluation is CPU-bound and never suspends. Every AST node visited
//! charges one step against the cost budget; `&&` and `||` short-circuit, so
//! the charged cost reflects the work actually done.

use std::cmp::Ordering;

use super::parse::{Ast, CmpOp, Field};
use super::{DeviceView, RuntimeError};
use crate::inventory::AttributeValue;

/// Runtime value produced by a subexpression.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl Value {
    const fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Str(_) => "string",
        }
    }

    fn into_bool(self) -> Result<bool, RuntimeError> {
        match self {
            Self::Bool(v) => Ok(v),
            other => Err(RuntimeError::TypeMismatch {
                expected: "bool",
                found: other.type_name(),
            }),
        }
    }
}

impl From<&AttributeValue> for Value {
    fn from(value: &AttributeValue) -> Self {
        match value {
            AttributeValue::Bool(v) => Self::Bool(*v),
            AttributeValue::Int(v) => Self::Int(*v),
            // Version values compare as plain strings.
            AttributeValue::String(v) | AttributeValue::Version(v) => Self::Str(v.clone()),
        }
    }
}

struct Evaluator<'a> {
    view: &'a DeviceView<'a>,
    limit: u64,
    spent: u64,
}

impl Evaluator<'_> {
    fn charge(&mut self) -> Result<(), RuntimeError> {
        self.spent += 1;
        if self.spent > self.limit {
            Err(RuntimeError::CostExceeded { limit: self.limit })
        } else {
            Ok(())
        }
    }

    fn eval(&mut self, ast: &Ast) -> Result<Value, RuntimeError> {
        self.charge()?;
        match ast {
            Ast::Bool(v) => Ok(Value::Bool(*v)),
            Ast::Int(v) => Ok(Value::Int(*v)),
            Ast::Str(v) => Ok(Value::Str(v.clone())),
            Ast::Field(field) => {
                let value = match field {
                    Field::Driver => self.view.driver,
                    Field::Name => &self.view.device.name,
                    Field::Pool => self.view.pool,
                };
                Ok(Value::Str(value.to_string()))
            }
            Ast::Attr(key) => match self.view.device.attributes.get(key) {
                Some(value) => Ok(Value::from(value)),
                None => Err(RuntimeError::MissingAttribute { key: key.clone() }),
            },
            Ast::Not(inner) => {
                let value = self.eval(inner)?.into_bool()?;
                Ok(Value::Bool(!value))
            }
            Ast::And(lhs, rhs) => {
                if self.eval(lhs)?.into_bool()? {
                    Ok(Value::Bool(self.eval(rhs)?.into_bool()?))
                } else {
                    Ok(Value::Bool(false))
                }
            }
            Ast::Or(lhs, rhs) => {
                if self.eval(lhs)?.into_bool()? {
                    Ok(Value::Bool(true))
                } else {
                    Ok(Value::Bool(self.eval(rhs)?.into_bool()?))
                }
            }
            Ast::Cmp(op, lhs, rhs) => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                compare(*op, &lhs, &rhs).map(Value::Bool)
            }
        }
    }
}

fn compare(op: CmpOp, lhs: &Value, rhs: &Value) -> Result<bool, RuntimeError> {
    let ordering = match (lhs, rhs) {
        (Value::Bool(l), Value::Bool(r)) => {
            if op.is_ordering() {
                return Err(RuntimeError::TypeMismatch {
                    expected: "an ordered type (int or string)",
                    found: "bool",
                });
            }
            return Ok(match op {
                CmpOp::Eq => l == r,
                _ => l != r,
            });
        }
        (Value::Int(l), Value::Int(r)) => l.cmp(r),
        (Value::Str(l), Value::Str(r)) => l.cmp(r),
        (l, r) => {
            return Err(RuntimeError::TypeMismatch {
                expected: l.type_name(),
                found: r.type_name(),
            });
        }
    };

    Ok(match op {
        CmpOp::Eq => ordering == Ordering::Equal,
        CmpOp::Ne => ordering != Ordering::Equal,
        CmpOp::Lt => ordering == Ordering::Less,
        CmpOp::Le => ordering != Ordering::Greater,
        CmpOp::Gt => ordering == Ordering::Greater,
        CmpOp::Ge => ordering != Ordering::Less,
    })
}

/// Evaluate an expression against a device, producing a boolean.
pub(super) fn evaluate(
    ast: &Ast,
    view: &DeviceView<'_>,
    limit: u64,
) -> Result<bool, RuntimeError> {
    let mut evaluator = Evaluator {
        view,
        limit,
        spent: 0,
    };
    evaluator.eval(ast)?.into_bool()
}
