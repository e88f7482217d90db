//! Scalar values carried by fact fields and intermediate results.
//!
//! The value set is deliberately small: strings, double-precision numbers,
//! and booleans. Everything a constraint can compute bottoms out here.
//! Comparisons across kinds are simply false rather than errors, so a rule
//! comparing a string field against a number filters everything out instead
//! of aborting propagation.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ast::{ArithOp, CompareOp};

/// A scalar value: the leaf type of the whole engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Str(String),
    Num(f64),
    Bool(bool),
}

impl Value {
    /// Numeric view, if this value is a number.
    pub fn as_num(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Canonical rendering used inside hash inputs and synthesized fact ids.
    ///
    /// Integral floats render without a fractional part so that `23` and
    /// `23.0` hash identically regardless of how the AST spelled them.
    pub fn canonical(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::Num(n) => {
                if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    format!("{}", n)
                }
            }
            Value::Bool(b) => format!("{}", b),
        }
    }

    /// Apply an arithmetic operator. `None` on non-numeric operands or
    /// division by zero; the caller turns that into a false comparison.
    pub fn arith(op: ArithOp, left: &Value, right: &Value) -> Option<Value> {
        let (l, r) = (left.as_num()?, right.as_num()?);
        let out = match op {
            ArithOp::Add => l + r,
            ArithOp::Sub => l - r,
            ArithOp::Mul => l * r,
            ArithOp::Div => {
                if r == 0.0 {
                    return None;
                }
                l / r
            }
        };
        Some(Value::Num(out))
    }

    /// Apply a comparison operator. Cross-kind comparisons are equal-never,
    /// ordered-never.
    pub fn compare(op: CompareOp, left: &Value, right: &Value) -> bool {
        use CompareOp::*;
        match (left, right) {
            (Value::Num(l), Value::Num(r)) => match op {
                Eq => l == r,
                Ne => l != r,
                Lt => l < r,
                Le => l <= r,
                Gt => l > r,
                Ge => l >= r,
            },
            (Value::Str(l), Value::Str(r)) => match op {
                Eq => l == r,
                Ne => l != r,
                Lt => l < r,
                Le => l <= r,
                Gt => l > r,
                Ge => l >= r,
            },
            (Value::Bool(l), Value::Bool(r)) => match op {
                Eq => l == r,
                Ne => l != r,
                // Booleans are unordered.
                _ => false,
            },
            // Mismatched kinds: != holds, everything else fails.
            _ => matches!(op, Ne),
        }
    }

    /// Build a `Value` from a JSON scalar, if it is one.
    pub fn from_json(v: &serde_json::Value) -> Option<Value> {
        match v {
            serde_json::Value::String(s) => Some(Value::Str(s.clone())),
            serde_json::Value::Number(n) => n.as_f64().map(Value::Num),
            serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{}", s),
            Value::Num(_) => write!(f, "{}", self.canonical()),
            Value::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Num(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Num(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_integral_floats() {
        assert_eq!(Value::Num(23.0).canonical(), "23");
        assert_eq!(Value::Num(23.5).canonical(), "23.5");
    }

    #[test]
    fn division_by_zero_is_none() {
        assert_eq!(
            Value::arith(ArithOp::Div, &Value::Num(1.0), &Value::Num(0.0)),
            None
        );
    }

    #[test]
    fn cross_kind_comparison() {
        assert!(!Value::compare(
            CompareOp::Eq,
            &Value::Str("1".into()),
            &Value::Num(1.0)
        ));
        assert!(Value::compare(
            CompareOp::Ne,
            &Value::Str("1".into()),
            &Value::Num(1.0)
        ));
    }
}
