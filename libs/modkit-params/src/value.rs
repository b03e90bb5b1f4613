//! Parameter identifiers and the processed value model.

use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Deref;

use chrono::NaiveDate;
use serde::Serialize;

/// Canonical, registry-wide identifier of a parameter template.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ParamId(String);

impl ParamId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for ParamId {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ParamId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ParamId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParamId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for ParamId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&ParamId> for ParamId {
    fn from(id: &ParamId) -> Self {
        id.clone()
    }
}

/// Processed values of other parameters, handed to hooks as context.
pub type ParamValues = BTreeMap<ParamId, Value>;

/// A processed (or raw) parameter value.
///
/// Raw input enters as `Str` tokens (or a `List` of them); scalar types turn
/// those into typed scalars and composite types wrap scalar sequences into
/// `Range` / `Set`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// Absent or explicitly blank.
    Empty,
    Bool(bool),
    Int(i64),
    Str(String),
    Date(NaiveDate),
    /// Inclusive range.
    Range {
        start: Box<Value>,
        end: Box<Value>,
    },
    Set(BTreeSet<Value>),
    List(Vec<Value>),
}

impl Value {
    /// Build a raw token sequence.
    pub fn tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Value::List(tokens.into_iter().map(|t| Value::Str(t.into())).collect())
    }

    #[must_use]
    pub fn range(start: Value, end: Value) -> Self {
        Value::Range {
            start: Box::new(start),
            end: Box::new(end),
        }
    }

    pub fn set<I: IntoIterator<Item = Value>>(items: I) -> Self {
        Value::Set(items.into_iter().collect())
    }

    /// `true` for `Empty`, blank strings and empty sequences.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        match self {
            Value::Empty => true,
            Value::Str(s) => s.trim().is_empty(),
            Value::List(items) => items.is_empty(),
            Value::Set(items) => items.is_empty(),
            _ => false,
        }
    }

    /// Flatten into a scalar sequence without any composite knowledge.
    ///
    /// Lists and sets yield their elements, ranges yield their bounds
    /// (collapsed to one element for a single-point range), `Empty` yields
    /// nothing.
    #[must_use]
    pub fn into_sequence(self) -> Vec<Value> {
        match self {
            Value::Empty => Vec::new(),
            Value::List(items) => items,
            Value::Set(items) => items.into_iter().collect(),
            Value::Range { start, end } => {
                if start == end {
                    vec![*start]
                } else {
                    vec![*start, *end]
                }
            }
            scalar => vec![scalar],
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_set(&self) -> Option<&BTreeSet<Value>> {
        match self {
            Value::Set(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_seq<'a>(
            f: &mut fmt::Formatter<'_>,
            items: impl Iterator<Item = &'a Value>,
        ) -> fmt::Result {
            for (i, item) in items.enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{item}")?;
            }
            Ok(())
        }

        match self {
            Value::Empty => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Str(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Range { start, end } => write!(f, "{start}..{end}"),
            Value::Set(items) => {
                f.write_str("{")?;
                write_seq(f, items.iter())?;
                f.write_str("}")
            }
            Value::List(items) => {
                f.write_str("[")?;
                write_seq(f, items.iter())?;
                f.write_str("]")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i.into())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<Vec<&str>> for Value {
    fn from(items: Vec<&str>) -> Self {
        Value::tokens(items)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Empty, Into::into)
    }
}
