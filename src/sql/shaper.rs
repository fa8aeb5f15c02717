//! Maps raw result tuples into named records.

use super::planner::OutputColumn;
use super::types::{DataType, Value};
use crate::errexec;
use crate::error::Result;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A naming convention for declared output names. Rendered expression
/// names, e.g. `COUNT(*)`, are never recased.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Casing {
    /// Names are kept as declared.
    #[default]
    Preserve,
    /// release_date
    SnakeCase,
    /// releaseDate
    CamelCase,
}

impl Casing {
    /// Applies the convention to a name.
    pub fn apply(&self, name: &str) -> String {
        match self {
            Self::Preserve => name.to_string(),
            Self::SnakeCase => words(name).join("_"),
            Self::CamelCase => {
                let mut words = words(name).into_iter();
                let mut camel = words.next().unwrap_or_default();
                for word in words {
                    let mut chars = word.chars();
                    if let Some(first) = chars.next() {
                        camel.extend(first.to_uppercase());
                        camel.extend(chars);
                    }
                }
                camel
            }
        }
    }
}

/// Splits a name into lowercase words, at underscores and at lower to upper
/// case transitions.
fn words(name: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut lower = false;
    for c in name.chars() {
        if c == '_' || (c.is_uppercase() && lower) {
            if !word.is_empty() {
                words.push(std::mem::take(&mut word));
            }
            lower = false;
            if c == '_' {
                continue;
            }
        }
        lower = c.is_lowercase() || c.is_ascii_digit();
        word.extend(c.to_lowercase());
    }
    if !word.is_empty() {
        words.push(word);
    }
    words
}

/// A result record: named values in projection order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Record(Vec<(String, Value)>);

impl Record {
    /// Fetches a value by name. With duplicate names, the first one wins.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// The record's names, in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(n, _)| n.as_str())
    }

    /// The record's values, in order.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.0.iter().map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decodes the record into a caller struct, by field name.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(serde_json::Value::from(self.clone()))?)
    }
}

impl From<Record> for serde_json::Value {
    fn from(record: Record) -> Self {
        let mut map = serde_json::Map::new();
        for (name, value) in record.0 {
            map.entry(name).or_insert_with(|| value.into());
        }
        serde_json::Value::Object(map)
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<S: Into<String>, V: Into<Value>> FromIterator<(S, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (S, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(n, v)| (n.into(), v.into())).collect())
    }
}

impl std::fmt::Display for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match value {
                Value::Text(text) => write!(f, "{name}: {text:?}")?,
                value => write!(f, "{name}: {value}")?,
            }
        }
        Ok(())
    }
}

/// Shapes raw result tuples into records, naming values by the projection
/// and restoring the declared types the store doesn't keep.
#[derive(Clone, Copy, Debug, Default)]
pub struct Shaper {
    casing: Casing,
}

impl Shaper {
    pub fn new(casing: Casing) -> Self {
        Self { casing }
    }

    /// Shapes a result set. Each row must have one value per column.
    pub fn shape(&self, columns: &[OutputColumn], rows: Vec<Vec<Value>>) -> Result<Vec<Record>> {
        let names: Vec<String> = columns
            .iter()
            .map(|c| if c.declared { self.casing.apply(&c.name) } else { c.name.clone() })
            .collect();
        rows.into_iter()
            .map(|row| {
                if row.len() != columns.len() {
                    return errexec!("expected {} result columns, got {}", columns.len(), row.len());
                }
                Ok(Record(
                    names
                        .iter()
                        .zip(columns)
                        .zip(row)
                        .map(|((name, column), value)| {
                            (name.clone(), native(column.datatype, value))
                        })
                        .collect(),
                ))
            })
            .collect()
    }
}

/// Restores a value's declared type. Integers in a real column are widened
/// (the store returns whole reals as integers in some paths), and booleans
/// come back as 0 or 1. Reals in an integer column are kept as they are,
/// never truncated.
fn native(datatype: Option<DataType>, value: Value) -> Value {
    match (datatype, value) {
        (Some(DataType::Real), Value::Integer(i)) => Value::Real(i as f64),
        (Some(DataType::Boolean), Value::Integer(0)) => Value::Boolean(false),
        (Some(DataType::Boolean), Value::Integer(1)) => Value::Boolean(true),
        (_, value) => value,
    }
}
