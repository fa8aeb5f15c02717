use crate::errexec;
use crate::error::{Error, Result};

use rusqlite::types::{ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// A logical column data type. SQLite has no boolean storage class, so
/// Boolean is stored as an INTEGER restricted to 0 and 1.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    /// A boolean, stored as INTEGER 0 or 1.
    Boolean,
    /// A 64-bit signed integer.
    Integer,
    /// A 64-bit floating point number.
    Real,
    /// A UTF-8 encoded string.
    Text,
    /// Any value. Used for mirrored columns with NUMERIC, BLOB or no
    /// declared type, which the store types per value.
    Any,
}

impl DataType {
    /// Returns the SQLite storage type used in DDL.
    pub fn storage(&self) -> &'static str {
        match self {
            Self::Boolean | Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
            Self::Any => "ANY",
        }
    }

    /// Parses a declared SQLite column type, as reported by PRAGMA table_info.
    /// Uses SQLite's type affinity rules.
    /// Types without an affinity of their own map to Any.
    pub fn from_declared(declared: &str) -> Self {
        let declared = declared.to_uppercase();
        let any = |names: &[&str]| names.iter().any(|name| declared.contains(name));
        if declared.contains("INT") {
            Self::Integer
        } else if any(&["CHAR", "CLOB", "TEXT"]) {
            Self::Text
        } else if any(&["REAL", "FLOA", "DOUB"]) {
            Self::Real
        } else if declared.contains("BOOL") {
            Self::Boolean
        } else {
            Self::Any
        }
    }

    /// Returns whether this is a numeric type.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Real)
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(match self {
            Self::Boolean => "BOOLEAN",
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
            Self::Any => "ANY",
        })
    }
}

/// A primitive value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// An unknown value of unknown type.
    Null,
    /// A boolean.
    Boolean(bool),
    /// A 64-bit signed integer.
    Integer(i64),
    /// A 64-bit floating point number.
    Real(f64),
    /// A UTF-8 encoded string.
    Text(String),
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        match (self, other) {
            // NULL sorts first, like SQLite.
            (Self::Null, Self::Null) => Some(std::cmp::Ordering::Equal),
            (Self::Null, _) => Some(std::cmp::Ordering::Less),
            (_, Self::Null) => Some(std::cmp::Ordering::Greater),
            (Self::Boolean(a), Self::Boolean(b)) => a.partial_cmp(b),
            (Self::Real(a), Self::Real(b)) => a.partial_cmp(b),
            (Self::Real(a), Self::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Self::Integer(a), Self::Real(b)) => (*a as f64).partial_cmp(b),
            (Self::Integer(a), Self::Integer(b)) => a.partial_cmp(b),
            (Self::Text(a), Self::Text(b)) => a.partial_cmp(b),
            (_, _) => None,
        }
    }
}

impl Value {
    /// Returns the value's datatype, or None for null values.
    pub fn datatype(&self) -> Option<DataType> {
        match self {
            Self::Null => None,
            Self::Boolean(_) => Some(DataType::Boolean),
            Self::Integer(_) => Some(DataType::Integer),
            Self::Real(_) => Some(DataType::Real),
            Self::Text(_) => Some(DataType::Text),
        }
    }

    /// Returns the SQL truth value: NULL is unknown, numbers are true when
    /// non-zero, text is converted numerically (so mostly false).
    pub fn truthy(&self) -> Option<bool> {
        match self {
            Value::Null => None,
            Value::Boolean(b) => Some(*b),
            Value::Integer(i) => Some(*i != 0),
            Value::Real(f) => Some(*f != 0.0),
            Value::Text(s) => Some(s.trim().parse::<f64>().is_ok_and(|f| f != 0.0)),
        }
    }

    /// Returns true if the value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Formats the value as an SQL literal, for inlining into DDL where bound
    /// parameters aren't allowed (defaults and CHECK clauses).
    pub fn as_sql(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Boolean(b) => (*b as i64).to_string(),
            Self::Integer(i) => i.to_string(),
            // The store has no NaN, and reads overflowing literals as infinity.
            Self::Real(f) if f.is_nan() => "NULL".to_string(),
            Self::Real(f) if f.is_infinite() && *f > 0.0 => "9e999".to_string(),
            Self::Real(f) if f.is_infinite() => "-9e999".to_string(),
            Self::Real(f) if f.fract() == 0.0 => format!("{f:.1}"),
            Self::Real(f) => f.to_string(),
            Self::Text(s) => format!("'{}'", s.replace('\'', "''")),
        }
    }

    /// Adds two numeric values. Integers overflow into an error rather than
    /// wrapping.
    pub fn checked_add(&self, other: &Self) -> Result<Self> {
        use Value::*;
        Ok(match (self, other) {
            (Integer(lhs), Integer(rhs)) => match lhs.checked_add(*rhs) {
                Some(i) => Integer(i),
                None => return errexec!("integer overflow"),
            },
            (Integer(lhs), Real(rhs)) => Real(*lhs as f64 + rhs),
            (Real(lhs), Integer(rhs)) => Real(lhs + *rhs as f64),
            (Real(lhs), Real(rhs)) => Real(lhs + rhs),
            (Null, Integer(_) | Real(_) | Null) | (Integer(_) | Real(_), Null) => Null,
            (lhs, rhs) => return errexec!("can't add {lhs} and {rhs}"),
        })
    }

    /// Subtracts two numeric values.
    pub fn checked_sub(&self, other: &Self) -> Result<Self> {
        use Value::*;
        Ok(match (self, other) {
            (Integer(lhs), Integer(rhs)) => match lhs.checked_sub(*rhs) {
                Some(i) => Integer(i),
                None => return errexec!("integer overflow"),
            },
            (Integer(lhs), Real(rhs)) => Real(*lhs as f64 - rhs),
            (Real(lhs), Integer(rhs)) => Real(lhs - *rhs as f64),
            (Real(lhs), Real(rhs)) => Real(lhs - rhs),
            (Null, Integer(_) | Real(_) | Null) | (Integer(_) | Real(_), Null) => Null,
            (lhs, rhs) => return errexec!("can't subtract {lhs} and {rhs}"),
        })
    }

    /// Multiplies two numeric values.
    pub fn checked_mul(&self, other: &Self) -> Result<Self> {
        use Value::*;
        Ok(match (self, other) {
            (Integer(lhs), Integer(rhs)) => match lhs.checked_mul(*rhs) {
                Some(i) => Integer(i),
                None => return errexec!("integer overflow"),
            },
            (Integer(lhs), Real(rhs)) => Real(*lhs as f64 * rhs),
            (Real(lhs), Integer(rhs)) => Real(lhs * *rhs as f64),
            (Real(lhs), Real(rhs)) => Real(lhs * rhs),
            (Null, Integer(_) | Real(_) | Null) | (Integer(_) | Real(_), Null) => Null,
            (lhs, rhs) => return errexec!("can't multiply {lhs} and {rhs}"),
        })
    }

    /// Divides two numeric values in the floating point path. Division by
    /// zero yields NULL, as in SQLite.
    pub fn checked_div(&self, other: &Self) -> Result<Self> {
        use Value::*;
        Ok(match (self, other) {
            (Integer(_) | Real(_), Integer(0)) => Null,
            (Integer(_) | Real(_), Real(rhs)) if *rhs == 0.0 => Null,
            (Integer(lhs), Integer(rhs)) => Real(*lhs as f64 / *rhs as f64),
            (Integer(lhs), Real(rhs)) => Real(*lhs as f64 / rhs),
            (Real(lhs), Integer(rhs)) => Real(lhs / *rhs as f64),
            (Real(lhs), Real(rhs)) => Real(lhs / rhs),
            (Null, Integer(_) | Real(_) | Null) | (Integer(_) | Real(_), Null) => Null,
            (lhs, rhs) => return errexec!("can't divide {lhs} and {rhs}"),
        })
    }

    /// Divides two integers, truncating towards zero. Division by zero yields
    /// NULL, as in SQLite.
    pub fn checked_int_div(&self, other: &Self) -> Result<Self> {
        use Value::*;
        Ok(match (self, other) {
            (Integer(_), Integer(0)) => Null,
            (Integer(lhs), Integer(rhs)) => match lhs.checked_div(*rhs) {
                Some(i) => Integer(i),
                None => return errexec!("integer overflow"),
            },
            (Null, Integer(_) | Null) | (Integer(_), Null) => Null,
            (lhs, rhs) => return errexec!("can't integer-divide {lhs} and {rhs}"),
        })
    }

    /// Converts a value read from the store.
    pub fn from_sql(value: ValueRef<'_>) -> Result<Self> {
        Ok(match value {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(i) => Self::Integer(i),
            ValueRef::Real(f) => Self::Real(f),
            ValueRef::Text(bytes) => Self::Text(std::str::from_utf8(bytes)?.to_string()),
            ValueRef::Blob(_) => return errexec!("blob values are not supported"),
        })
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Boolean(true) => f.write_str("TRUE"),
            Self::Boolean(false) => f.write_str("FALSE"),
            Self::Integer(integer) => integer.fmt(f),
            Self::Real(float) => float.fmt(f),
            Self::Text(string) => f.write_str(string),
        }
    }
}

impl rusqlite::ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Self::Boolean(b) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*b as i64)),
            Self::Integer(i) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*i)),
            Self::Real(f) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*f)),
            Self::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Boolean(b) => b.into(),
            Value::Integer(i) => i.into(),
            Value::Real(f) => f.into(),
            Value::Text(s) => s.into(),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_owned())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl TryFrom<Value> for bool {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Boolean(b) => Ok(b),
            Value::Integer(i @ (0 | 1)) => Ok(i == 1),
            value => errexec!("not boolean: {value}"),
        }
    }
}

impl TryFrom<Value> for f64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Real(f) => Ok(f),
            Value::Integer(i) => Ok(i as f64),
            value => errexec!("not real: {value}"),
        }
    }
}

impl TryFrom<Value> for i64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        let Value::Integer(i) = value else { return errexec!("not integer: {value}") };
        Ok(i)
    }
}

impl TryFrom<Value> for String {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        let Value::Text(s) = value else { return errexec!("not text: {value}") };
        Ok(s)
    }
}
