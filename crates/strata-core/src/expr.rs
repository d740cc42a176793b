//! Expression model
//!
//! [`Expr`] is the unresolved tree handed over by a query front end. Binding
//! it against a [`BindScope`] resolves every column reference to a position
//! in one of three inputs (the triggering stream event, an aggregation row,
//! or synthetic execution parameters), type-checks it, and yields a
//! [`BoundExpr`] that evaluates against a [`Frame`].

use crate::error::{CoreError, Result};
use crate::types::{AttributeType, Schema, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Which input a column reference reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// The triggering (joined) stream event
    Stream,
    /// A row of the aggregation (stored or output layout)
    Aggregate,
    /// Synthetic execution-time parameters such as range bounds
    Params,
}

impl Source {
    fn label(&self) -> &'static str {
        match self {
            Source::Stream => "stream",
            Source::Aggregate => "aggregate",
            Source::Params => "parameter",
        }
    }
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
}

impl CompareOp {
    fn matches(&self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Equal => ordering == Ordering::Equal,
            CompareOp::NotEqual => ordering != Ordering::Equal,
            CompareOp::LessThan => ordering == Ordering::Less,
            CompareOp::LessThanEqual => ordering != Ordering::Greater,
            CompareOp::GreaterThan => ordering == Ordering::Greater,
            CompareOp::GreaterThanEqual => ordering != Ordering::Less,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Equal => "==",
            CompareOp::NotEqual => "!=",
            CompareOp::LessThan => "<",
            CompareOp::LessThanEqual => "<=",
            CompareOp::GreaterThan => ">",
            CompareOp::GreaterThanEqual => ">=",
        }
    }
}

/// Arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl ArithOp {
    fn symbol(&self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Subtract => "-",
            ArithOp::Multiply => "*",
            ArithOp::Divide => "/",
        }
    }
}

/// Unresolved expression tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Column reference by name
    Column { source: Source, name: String },
    /// Literal value
    Constant(Value),
    /// Binary comparison
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Binary arithmetic
    Arithmetic {
        op: ArithOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    /// Column of the triggering stream
    pub fn stream(name: impl Into<String>) -> Self {
        Expr::Column {
            source: Source::Stream,
            name: name.into(),
        }
    }

    /// Column of the aggregation
    pub fn aggregate(name: impl Into<String>) -> Self {
        Expr::Column {
            source: Source::Aggregate,
            name: name.into(),
        }
    }

    /// Synthetic parameter column
    pub fn param(name: impl Into<String>) -> Self {
        Expr::Column {
            source: Source::Params,
            name: name.into(),
        }
    }

    pub fn constant(value: impl Into<Value>) -> Self {
        Expr::Constant(value.into())
    }

    /// The always-true condition
    pub fn truth() -> Self {
        Expr::Constant(Value::Bool(true))
    }

    pub fn compare(left: Expr, op: CompareOp, right: Expr) -> Self {
        Expr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn equal(self, right: Expr) -> Self {
        Expr::compare(self, CompareOp::Equal, right)
    }

    pub fn lt(self, right: Expr) -> Self {
        Expr::compare(self, CompareOp::LessThan, right)
    }

    pub fn le(self, right: Expr) -> Self {
        Expr::compare(self, CompareOp::LessThanEqual, right)
    }

    pub fn gt(self, right: Expr) -> Self {
        Expr::compare(self, CompareOp::GreaterThan, right)
    }

    pub fn ge(self, right: Expr) -> Self {
        Expr::compare(self, CompareOp::GreaterThanEqual, right)
    }

    pub fn arithmetic(left: Expr, op: ArithOp, right: Expr) -> Self {
        Expr::Arithmetic {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn and(self, right: Expr) -> Self {
        Expr::And(Box::new(self), Box::new(right))
    }

    pub fn or(self, right: Expr) -> Self {
        Expr::Or(Box::new(self), Box::new(right))
    }

    pub fn negate(self) -> Self {
        Expr::Not(Box::new(self))
    }

    /// Whether this is the literal `true`
    pub fn is_truth(&self) -> bool {
        matches!(self, Expr::Constant(Value::Bool(true)))
    }

    /// Whether the expression references no columns
    pub fn is_constant(&self) -> bool {
        self.columns().is_empty()
    }

    /// Top-level conjuncts (`a AND (b AND c)` yields `[a, b, c]`)
    pub fn conjuncts(&self) -> Vec<&Expr> {
        match self {
            Expr::And(left, right) => {
                let mut parts = left.conjuncts();
                parts.extend(right.conjuncts());
                parts
            }
            other => vec![other],
        }
    }

    /// Fold parts into a left-deep conjunction; None when empty
    pub fn conjunction(parts: impl IntoIterator<Item = Expr>) -> Option<Expr> {
        parts.into_iter().reduce(Expr::and)
    }

    /// All column references in evaluation order
    pub fn columns(&self) -> Vec<(Source, &str)> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<(Source, &'a str)>) {
        match self {
            Expr::Column { source, name } => out.push((*source, name.as_str())),
            Expr::Constant(_) => {}
            Expr::Compare { left, right, .. }
            | Expr::Arithmetic { left, right, .. }
            | Expr::And(left, right)
            | Expr::Or(left, right) => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Expr::Not(inner) => inner.collect_columns(out),
        }
    }

    /// Resolve column references and type-check
    pub fn bind(&self, scope: &BindScope<'_>) -> Result<BoundExpr> {
        match self {
            Expr::Column { source, name } => {
                let schema = scope
                    .schema(*source)
                    .ok_or(CoreError::SourceNotInScope(source.label()))?;
                let index = schema
                    .index_of(name)
                    .ok_or_else(|| CoreError::AttributeNotFound(format!("{}.{}", source.label(), name)))?;
                let attr_type = schema.attributes()[index].attr_type;
                Ok(BoundExpr::Column {
                    source: *source,
                    index,
                    attr_type,
                })
            }
            Expr::Constant(value) => match value.attribute_type() {
                Some(_) => Ok(BoundExpr::Constant(value.clone())),
                None => Err(CoreError::TypeMismatch {
                    expected: "non-null constant".to_string(),
                    actual: "null".to_string(),
                }),
            },
            Expr::Compare { op, left, right } => {
                let left = left.bind(scope)?;
                let right = right.bind(scope)?;
                let (lt, rt) = (left.return_type(), right.return_type());
                if lt != rt && !(lt.is_numeric() && rt.is_numeric()) {
                    return Err(CoreError::TypeMismatch {
                        expected: lt.to_string(),
                        actual: rt.to_string(),
                    });
                }
                Ok(BoundExpr::Compare {
                    op: *op,
                    left: Box::new(left),
                    right: Box::new(right),
                })
            }
            Expr::Arithmetic { op, left, right } => {
                let left = left.bind(scope)?;
                let right = right.bind(scope)?;
                for side in [&left, &right] {
                    if !side.return_type().is_numeric() {
                        return Err(CoreError::TypeMismatch {
                            expected: "numeric".to_string(),
                            actual: side.return_type().to_string(),
                        });
                    }
                }
                let result_type = match op {
                    ArithOp::Divide => AttributeType::Float,
                    _ if left.return_type() == AttributeType::Int
                        && right.return_type() == AttributeType::Int =>
                    {
                        AttributeType::Int
                    }
                    _ => AttributeType::Float,
                };
                Ok(BoundExpr::Arithmetic {
                    op: *op,
                    left: Box::new(left),
                    right: Box::new(right),
                    result_type,
                })
            }
            Expr::And(left, right) => Ok(BoundExpr::And(
                Box::new(bind_bool(left, scope)?),
                Box::new(bind_bool(right, scope)?),
            )),
            Expr::Or(left, right) => Ok(BoundExpr::Or(
                Box::new(bind_bool(left, scope)?),
                Box::new(bind_bool(right, scope)?),
            )),
            Expr::Not(inner) => Ok(BoundExpr::Not(Box::new(bind_bool(inner, scope)?))),
        }
    }
}

fn bind_bool(expr: &Expr, scope: &BindScope<'_>) -> Result<BoundExpr> {
    let bound = expr.bind(scope)?;
    if bound.return_type() != AttributeType::Bool {
        return Err(CoreError::TypeMismatch {
            expected: AttributeType::Bool.to_string(),
            actual: bound.return_type().to_string(),
        });
    }
    Ok(bound)
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column { source, name } => write!(f, "{}.{}", source.label(), name),
            Expr::Constant(Value::String(s)) => write!(f, "'{}'", s),
            Expr::Constant(v) => write!(f, "{}", v),
            Expr::Compare { op, left, right } => write!(f, "({} {} {})", left, op.symbol(), right),
            Expr::Arithmetic { op, left, right } => write!(f, "({} {} {})", left, op.symbol(), right),
            Expr::And(left, right) => write!(f, "({} and {})", left, right),
            Expr::Or(left, right) => write!(f, "({} or {})", left, right),
            Expr::Not(inner) => write!(f, "not {}", inner),
        }
    }
}

/// Schemas visible while binding an expression
#[derive(Debug, Clone, Copy, Default)]
pub struct BindScope<'a> {
    pub stream: Option<&'a Schema>,
    pub aggregate: Option<&'a Schema>,
    pub params: Option<&'a Schema>,
}

impl<'a> BindScope<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stream(mut self, schema: &'a Schema) -> Self {
        self.stream = Some(schema);
        self
    }

    pub fn with_aggregate(mut self, schema: &'a Schema) -> Self {
        self.aggregate = Some(schema);
        self
    }

    pub fn with_params(mut self, schema: &'a Schema) -> Self {
        self.params = Some(schema);
        self
    }

    fn schema(&self, source: Source) -> Option<&'a Schema> {
        match source {
            Source::Stream => self.stream,
            Source::Aggregate => self.aggregate,
            Source::Params => self.params,
        }
    }
}

/// Rows visible while evaluating a bound expression
#[derive(Debug, Clone, Copy, Default)]
pub struct Frame<'a> {
    pub stream: Option<&'a [Value]>,
    pub aggregate: Option<&'a [Value]>,
    pub params: Option<&'a [Value]>,
}

impl<'a> Frame<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stream(mut self, row: &'a [Value]) -> Self {
        self.stream = Some(row);
        self
    }

    pub fn with_aggregate(mut self, row: &'a [Value]) -> Self {
        self.aggregate = Some(row);
        self
    }

    pub fn with_params(mut self, row: &'a [Value]) -> Self {
        self.params = Some(row);
        self
    }

    fn row(&self, source: Source) -> Option<&'a [Value]> {
        match source {
            Source::Stream => self.stream,
            Source::Aggregate => self.aggregate,
            Source::Params => self.params,
        }
    }
}

/// Resolved, type-checked expression
#[derive(Debug, Clone, PartialEq)]
pub enum BoundExpr {
    Column {
        source: Source,
        index: usize,
        attr_type: AttributeType,
    },
    Constant(Value),
    Compare {
        op: CompareOp,
        left: Box<BoundExpr>,
        right: Box<BoundExpr>,
    },
    Arithmetic {
        op: ArithOp,
        left: Box<BoundExpr>,
        right: Box<BoundExpr>,
        result_type: AttributeType,
    },
    And(Box<BoundExpr>, Box<BoundExpr>),
    Or(Box<BoundExpr>, Box<BoundExpr>),
    Not(Box<BoundExpr>),
}

impl BoundExpr {
    /// Declared result type
    pub fn return_type(&self) -> AttributeType {
        match self {
            BoundExpr::Column { attr_type, .. } => *attr_type,
            BoundExpr::Constant(value) => value.attribute_type().unwrap_or(AttributeType::Bool),
            BoundExpr::Arithmetic { result_type, .. } => *result_type,
            BoundExpr::Compare { .. } | BoundExpr::And(..) | BoundExpr::Or(..) | BoundExpr::Not(_) => {
                AttributeType::Bool
            }
        }
    }

    /// The constant value, if this expression is a literal
    pub fn as_constant(&self) -> Option<&Value> {
        match self {
            BoundExpr::Constant(value) => Some(value),
            _ => None,
        }
    }

    /// Evaluate against a frame. Missing columns and incomparable operands
    /// evaluate to null.
    pub fn evaluate(&self, frame: &Frame<'_>) -> Value {
        match self {
            BoundExpr::Column { source, index, .. } => frame
                .row(*source)
                .and_then(|row| row.get(*index))
                .cloned()
                .unwrap_or(Value::Null),
            BoundExpr::Constant(value) => value.clone(),
            BoundExpr::Compare { op, left, right } => {
                match left.evaluate(frame).compare(&right.evaluate(frame)) {
                    Some(ordering) => Value::Bool(op.matches(ordering)),
                    None => Value::Null,
                }
            }
            BoundExpr::Arithmetic {
                op,
                left,
                right,
                result_type,
            } => arithmetic(*op, *result_type, &left.evaluate(frame), &right.evaluate(frame)),
            BoundExpr::And(left, right) => Value::Bool(left.test(frame) && right.test(frame)),
            BoundExpr::Or(left, right) => Value::Bool(left.test(frame) || right.test(frame)),
            BoundExpr::Not(inner) => match inner.evaluate(frame) {
                Value::Bool(b) => Value::Bool(!b),
                _ => Value::Null,
            },
        }
    }

    /// Evaluate as a predicate; null counts as false
    pub fn test(&self, frame: &Frame<'_>) -> bool {
        matches!(self.evaluate(frame), Value::Bool(true))
    }
}

fn arithmetic(op: ArithOp, result_type: AttributeType, left: &Value, right: &Value) -> Value {
    if result_type == AttributeType::Int {
        let (Some(a), Some(b)) = (left.as_i64(), right.as_i64()) else {
            return Value::Null;
        };
        // overflow is null, like division
        let result = match op {
            ArithOp::Add => a.checked_add(b),
            ArithOp::Subtract => a.checked_sub(b),
            ArithOp::Multiply => a.checked_mul(b),
            ArithOp::Divide => None,
        };
        return result.map(Value::Int).unwrap_or(Value::Null);
    }
    let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
        return Value::Null;
    };
    match op {
        ArithOp::Add => Value::Float(a + b),
        ArithOp::Subtract => Value::Float(a - b),
        ArithOp::Multiply => Value::Float(a * b),
        ArithOp::Divide if b == 0.0 => Value::Null,
        ArithOp::Divide => Value::Float(a / b),
    }
}
