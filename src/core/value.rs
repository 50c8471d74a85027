//! Typed cell values carried by rows

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The logical type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    #[default]
    None,
    String,
    Integer,
    Number,
    #[serde(alias = "decimal", alias = "big_number")]
    BigNumber,
    Boolean,
    Date,
    Timestamp,
    Binary,
}

impl ValueType {
    pub fn name(&self) -> &'static str {
        match self {
            ValueType::None => "None",
            ValueType::String => "String",
            ValueType::Integer => "Integer",
            ValueType::Number => "Number",
            ValueType::BigNumber => "BigNumber",
            ValueType::Boolean => "Boolean",
            ValueType::Date => "Date",
            ValueType::Timestamp => "Timestamp",
            ValueType::Binary => "Binary",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ValueType::Integer | ValueType::Number | ValueType::BigNumber
        )
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single cell of a row
///
/// `Null` is a first-class value of every type; which type a null belongs
/// to is described by the field's [`ValueMeta`](crate::core::ValueMeta).
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    String(String),
    Integer(i64),
    Number(f64),
    BigNumber(BigDecimal),
    Boolean(bool),
    /// Local date-time without zone, millisecond precision
    Date(NaiveDateTime),
    /// Instant in time, nanosecond precision
    Timestamp(DateTime<Utc>),
    Binary(Vec<u8>),
}

impl Value {
    /// The type of the stored variant, `ValueType::None` for nulls
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::None,
            Value::String(_) => ValueType::String,
            Value::Integer(_) => ValueType::Integer,
            Value::Number(_) => ValueType::Number,
            Value::BigNumber(_) => ValueType::BigNumber,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Date(_) => ValueType::Date,
            Value::Timestamp(_) => ValueType::Timestamp,
            Value::Binary(_) => ValueType::Binary,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<BigDecimal> for Value {
    fn from(value: BigDecimal) -> Self {
        Value::BigNumber(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}
