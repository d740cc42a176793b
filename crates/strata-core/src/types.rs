//! Core data types for the Strata aggregation engine

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Millisecond-precision Unix epoch timestamp
pub type Timestamp = i64;

/// A row of positional values laid out according to some [`Schema`]
pub type Row = Vec<Value>;

/// Declared type of an attribute or expression result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    /// 64-bit signed integer (also used for timestamps)
    Int,
    /// 64-bit floating point
    Float,
    /// UTF-8 string
    String,
    /// Boolean
    Bool,
}

impl AttributeType {
    /// Get the type name
    pub fn name(&self) -> &'static str {
        match self {
            AttributeType::Int => "int",
            AttributeType::Float => "float",
            AttributeType::String => "string",
            AttributeType::Bool => "bool",
        }
    }

    /// Whether arithmetic is defined on this type
    pub fn is_numeric(&self) -> bool {
        matches!(self, AttributeType::Int | AttributeType::Float)
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A dynamically typed value flowing through events, buckets and tables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum Value {
    /// Absent value
    #[default]
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit floating point
    Float(f64),
    /// UTF-8 string
    String(String),
}

impl Value {
    /// Get the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
        }
    }

    /// Get the attribute type of this value (None for null)
    pub fn attribute_type(&self) -> Option<AttributeType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(AttributeType::Bool),
            Value::Int(_) => Some(AttributeType::Int),
            Value::Float(_) => Some(AttributeType::Float),
            Value::String(_) => Some(AttributeType::String),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to convert to f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Try to convert to i64 (floats are truncated)
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// Try to get as string reference
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// SQL-style comparison: numbers compare across int/float, null and
    /// mismatched types are incomparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
        }
    }

    /// Total order used for deterministic sorting of result rows:
    /// null < bool < numbers < strings.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Null => 0,
                Value::Bool(_) => 1,
                Value::Int(_) | Value::Float(_) => 2,
                Value::String(_) => 3,
            }
        }
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (a, b) if rank(a) == 2 && rank(b) == 2 => {
                let x = a.as_f64().unwrap_or_default();
                let y = b.as_f64().unwrap_or_default();
                x.total_cmp(&y)
            }
            (a, b) => rank(a).cmp(&rank(b)),
        }
    }

    /// Null-absorbing addition: `null + x = x`. Int + int stays int unless
    /// it overflows, in which case the sum is carried on as a float.
    pub fn add(&self, other: &Value) -> Value {
        match (self, other) {
            (Value::Null, v) | (v, Value::Null) => v.clone(),
            (Value::Int(a), Value::Int(b)) => match a.checked_add(*b) {
                Some(sum) => Value::Int(sum),
                None => Value::Float(*a as f64 + *b as f64),
            },
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => Value::Float(x + y),
                _ => Value::Null,
            },
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            _ => false,
        }
    }
}

// Floats compare by bit pattern so values can be used in grouping keys.
impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::String(s) => s.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(s) => f.write_str(s),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

/// A named, typed attribute
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    #[serde(rename = "type")]
    pub attr_type: AttributeType,
}

impl Attribute {
    /// Create a new attribute
    pub fn new(name: impl Into<String>, attr_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attr_type,
        }
    }
}

/// Ordered list of attributes describing a row layout
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    attributes: Vec<Attribute>,
}

impl Schema {
    /// Create a schema, rejecting empty or duplicate attribute names
    pub fn new(attributes: Vec<Attribute>) -> Result<Self> {
        let mut schema = Self::default();
        for attribute in attributes {
            schema.push(attribute)?;
        }
        Ok(schema)
    }

    /// Append an attribute
    pub fn push(&mut self, attribute: Attribute) -> Result<()> {
        if attribute.name.is_empty() {
            return Err(CoreError::EmptyAttributeName);
        }
        if self.index_of(&attribute.name).is_some() {
            return Err(CoreError::DuplicateAttribute(attribute.name));
        }
        self.attributes.push(attribute);
        Ok(())
    }

    /// Position of an attribute by name
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.name == name)
    }

    /// Get an attribute by name
    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Get an attribute by position
    pub fn attribute(&self, index: usize) -> Option<&Attribute> {
        self.attributes.get(index)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Attribute names in order
    pub fn names(&self) -> Vec<&str> {
        self.attributes.iter().map(|a| a.name.as_str()).collect()
    }
}

/// An incoming stream event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event time in milliseconds since Unix epoch
    pub timestamp: Timestamp,
    /// Attribute values laid out according to the stream schema
    pub values: Row,
}

impl Event {
    /// Create a new event
    pub fn new(timestamp: Timestamp, values: Vec<Value>) -> Self {
        Self { timestamp, values }
    }

    /// Get a value by position
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }
}

/// Time range for queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp (inclusive)
    pub start: Timestamp,
    /// End timestamp (exclusive)
    pub end: Timestamp,
}

impl TimeRange {
    /// Create a new time range
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Check if a timestamp falls within this range
    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.start && ts < self.end
    }

    /// Check if this range overlaps with another
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Get the duration of this range in milliseconds
    pub fn duration_millis(&self) -> i64 {
        self.end.saturating_sub(self.start)
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self {
            start: i64::MIN,
            end: i64::MAX,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_value_conversions() {
        let v = Value::Float(3.5);
        assert_eq!(v.as_f64(), Some(3.5));
        assert_eq!(v.type_name(), "float");

        let v = Value::Int(-42);
        assert_eq!(v.as_i64(), Some(-42));
        assert_eq!(v.as_f64(), Some(-42.0));

        let v: Value = "hello".into();
        assert_eq!(v.as_str(), Some("hello"));
        assert_eq!(v.as_f64(), None);

        let v: Value = true.into();
        assert_eq!(v.as_bool(), Some(true));
        assert_eq!(v.attribute_type(), Some(AttributeType::Bool));
        assert_eq!(Value::Null.attribute_type(), None);
    }

    #[test]
    fn test_value_compare_across_numeric_types() {
        assert_eq!(Value::Int(2).compare(&Value::Float(2.5)), Some(Ordering::Less));
        assert_eq!(Value::Float(3.0).compare(&Value::Int(3)), Some(Ordering::Equal));
        assert_eq!(Value::Int(1).compare(&Value::from("1")), None);
        assert_eq!(Value::Null.compare(&Value::Null), None);
    }

    #[test]
    fn test_value_add_absorbs_null() {
        assert_eq!(Value::Null.add(&Value::Int(4)), Value::Int(4));
        assert_eq!(Value::Int(4).add(&Value::Int(5)), Value::Int(9));
        assert_eq!(Value::Int(4).add(&Value::Float(0.5)), Value::Float(4.5));
        assert_eq!(Value::from("a").add(&Value::Int(1)), Value::Null);
    }

    #[test]
    fn test_value_add_overflow_promotes_to_float() {
        assert_eq!(Value::Int(i64::MAX).add(&Value::Int(1)), Value::Float(i64::MAX as f64 + 1.0));
        assert_eq!(Value::Int(i64::MIN).add(&Value::Int(-1)), Value::Float(i64::MIN as f64 - 1.0));
        assert_eq!(Value::Int(i64::MAX - 1).add(&Value::Int(1)), Value::Int(i64::MAX));
    }

    #[test]
    fn test_value_hash_eq_for_grouping() {
        let mut set = HashSet::new();
        set.insert(Value::Float(1.5));
        set.insert(Value::Float(1.5));
        set.insert(Value::from("A"));
        set.insert(Value::Int(1));
        assert_eq!(set.len(), 3);
        assert_ne!(Value::Int(1), Value::Float(1.0));
    }

    #[test]
    fn test_total_cmp_orders_kinds() {
        let mut values = vec![
            Value::from("b"),
            Value::Int(3),
            Value::Null,
            Value::Float(1.5),
            Value::from("a"),
        ];
        values.sort_by(|a, b| a.total_cmp(b));
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Float(1.5),
                Value::Int(3),
                Value::from("a"),
                Value::from("b"),
            ]
        );
    }

    #[test]
    fn test_schema_validation() {
        let schema = Schema::new(vec![
            Attribute::new("symbol", AttributeType::String),
            Attribute::new("price", AttributeType::Float),
        ])
        .unwrap();
        assert_eq!(schema.index_of("price"), Some(1));
        assert_eq!(schema.names(), vec!["symbol", "price"]);

        let dup = Schema::new(vec![
            Attribute::new("a", AttributeType::Int),
            Attribute::new("a", AttributeType::Int),
        ]);
        assert!(matches!(dup, Err(CoreError::DuplicateAttribute(_))));

        let empty = Schema::new(vec![Attribute::new("", AttributeType::Int)]);
        assert!(matches!(empty, Err(CoreError::EmptyAttributeName)));
    }

    #[test]
    fn test_time_range() {
        let range = TimeRange::new(100, 200);

        assert!(range.contains(100));
        assert!(range.contains(150));
        assert!(!range.contains(200)); // end is exclusive
        assert!(!range.contains(50));

        assert!(range.overlaps(&TimeRange::new(150, 250)));
        assert!(!range.overlaps(&TimeRange::new(200, 300)));
        assert!(TimeRange::new(5, 5).is_empty());

        assert_eq!(range.duration_millis(), 100);
    }

    #[test]
    fn test_event_serialization_roundtrip() {
        let event = Event::new(1_000, vec![Value::from("IBM"), Value::Float(12.5)]);

        let encoded = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&encoded).unwrap();
        assert_eq!(event, decoded);

        let json = serde_json::to_string(&event).unwrap();
        let decoded: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event, decoded);
    }
}
