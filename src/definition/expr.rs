//! Expression trees evaluated against a variable store.
//!
//! Expressions are plain immutable data owned by the definition. Evaluation
//! reads from the store it is handed and allocates its result; nothing is cached
//! on the expression itself, so one tree can be evaluated from any number of
//! instances at once.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::value::{Value, ValueType};
use crate::runtime::error::EvaluationError;
use crate::runtime::store::VariableStore;

/// Binary operators over integers (and durations for `+`/`-`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/` (integer division, truncating)
    Div,
}

impl BinaryOp {
    /// Operator symbol as written in sources.
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        }
    }

    /// Look up an operator by its source symbol.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "+" => Some(BinaryOp::Add),
            "-" => Some(BinaryOp::Sub),
            "*" => Some(BinaryOp::Mul),
            "/" => Some(BinaryOp::Div),
            _ => None,
        }
    }

    fn apply(&self, lhs: Value, rhs: Value) -> Result<Value, EvaluationError> {
        match (lhs, rhs) {
            (Value::Integer(a), Value::Integer(b)) => {
                let result = match self {
                    BinaryOp::Add => a.checked_add(b),
                    BinaryOp::Sub => a.checked_sub(b),
                    BinaryOp::Mul => a.checked_mul(b),
                    BinaryOp::Div => {
                        if b == 0 {
                            return Err(EvaluationError::DivisionByZero);
                        }
                        a.checked_div(b)
                    }
                };
                result
                    .map(Value::Integer)
                    .ok_or_else(|| EvaluationError::Overflow(self.symbol().to_string()))
            }
            (Value::Duration(a), Value::Duration(b)) => match self {
                BinaryOp::Add => a
                    .checked_add(b)
                    .map(Value::Duration)
                    .ok_or_else(|| EvaluationError::Overflow(self.symbol().to_string())),
                BinaryOp::Sub => a
                    .checked_sub(b)
                    .map(Value::Duration)
                    .ok_or_else(|| EvaluationError::Overflow(self.symbol().to_string())),
                _ => Err(mismatch(self, ValueType::Duration, ValueType::Duration)),
            },
            (a, b) => Err(mismatch(self, a.value_type(), b.value_type())),
        }
    }
}

fn mismatch(op: &BinaryOp, left: ValueType, right: ValueType) -> EvaluationError {
    let expected = match op {
        BinaryOp::Add | BinaryOp::Sub => "two ints or two durations",
        BinaryOp::Mul | BinaryOp::Div => "two ints",
    };
    EvaluationError::TypeMismatch {
        operation: op.symbol().to_string(),
        expected: expected.to_string(),
        found: format!("{} and {}", left, right),
    }
}

/// Pure expression over the current variable store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Expr {
    /// Constant value.
    Literal {
        /// The constant.
        value: Value,
    },
    /// Read a variable or parameter by name.
    Var {
        /// Variable name.
        name: String,
    },
    /// Arithmetic on two operands.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
    /// Render every operand and join them into one string.
    Concat {
        /// Operands in order.
        parts: Vec<Expr>,
    },
    /// Render one operand as a string.
    Str {
        /// Operand.
        inner: Box<Expr>,
    },
    /// Convert an integer number of milliseconds into a duration.
    Millis {
        /// Integer operand.
        inner: Box<Expr>,
    },
    /// Convert an integer number of seconds into a duration.
    Seconds {
        /// Integer operand.
        inner: Box<Expr>,
    },
}

impl Expr {
    /// Integer literal.
    pub fn int(value: i64) -> Self {
        Expr::Literal {
            value: Value::Integer(value),
        }
    }

    /// String literal.
    pub fn string(value: impl Into<String>) -> Self {
        Expr::Literal {
            value: Value::String(value.into()),
        }
    }

    /// Variable reference.
    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var { name: name.into() }
    }

    /// Binary operation.
    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// `lhs + rhs`
    pub fn add(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Add, lhs, rhs)
    }

    /// `lhs - rhs`
    pub fn sub(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Sub, lhs, rhs)
    }

    /// `lhs * rhs`
    pub fn mul(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Mul, lhs, rhs)
    }

    /// `lhs / rhs`
    pub fn div(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Div, lhs, rhs)
    }

    /// String concatenation of the rendered operands.
    pub fn concat(parts: Vec<Expr>) -> Self {
        Expr::Concat { parts }
    }

    /// Render an operand as a string.
    pub fn str(inner: Expr) -> Self {
        Expr::Str {
            inner: Box::new(inner),
        }
    }

    /// Milliseconds to duration.
    pub fn millis(inner: Expr) -> Self {
        Expr::Millis {
            inner: Box::new(inner),
        }
    }

    /// Seconds to duration.
    pub fn seconds(inner: Expr) -> Self {
        Expr::Seconds {
            inner: Box::new(inner),
        }
    }

    /// Evaluate against the given store.
    pub fn eval(&self, store: &VariableStore) -> Result<Value, EvaluationError> {
        match self {
            Expr::Literal { value } => Ok(value.clone()),
            Expr::Var { name } => store.get(name).cloned(),
            Expr::Binary { op, lhs, rhs } => op.apply(lhs.eval(store)?, rhs.eval(store)?),
            Expr::Concat { parts } => {
                let mut rendered = String::new();
                for part in parts {
                    rendered.push_str(&part.eval(store)?.to_string());
                }
                Ok(Value::String(rendered))
            }
            Expr::Str { inner } => Ok(Value::String(inner.eval(store)?.to_string())),
            Expr::Millis { inner } => {
                let millis = duration_operand(inner.eval(store)?, "ms")?;
                Ok(Value::Duration(Duration::from_millis(millis)))
            }
            Expr::Seconds { inner } => {
                let secs = duration_operand(inner.eval(store)?, "secs")?;
                Ok(Value::Duration(Duration::from_secs(secs)))
            }
        }
    }

    /// Visit every variable name the expression reads.
    pub fn for_each_var<'a>(&'a self, visit: &mut impl FnMut(&'a str)) {
        match self {
            Expr::Literal { .. } => {}
            Expr::Var { name } => visit(name),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.for_each_var(visit);
                rhs.for_each_var(visit);
            }
            Expr::Concat { parts } => {
                for part in parts {
                    part.for_each_var(visit);
                }
            }
            Expr::Str { inner } | Expr::Millis { inner } | Expr::Seconds { inner } => {
                inner.for_each_var(visit)
            }
        }
    }
}

fn duration_operand(value: Value, operation: &str) -> Result<u64, EvaluationError> {
    match value {
        Value::Integer(num) if num < 0 => Err(EvaluationError::NegativeDuration(num)),
        Value::Integer(num) => Ok(num as u64),
        other => Err(EvaluationError::TypeMismatch {
            operation: operation.to_string(),
            expected: ValueType::Integer.to_string(),
            found: other.value_type().to_string(),
        }),
    }
}
