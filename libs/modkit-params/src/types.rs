//! Scalar and composite types used by templates to coerce raw tokens.
//!
//! A [`ScalarType`] turns one raw token into a typed [`Value`]; a
//! [`CompositeType`] wraps the ordered sequence of coerced scalars into a
//! single value (a range, a set) and decomposes it again for serialization.
//!
//! Both accept values that are already coerced, so processing a processed
//! value is a no-op.

use std::fmt;

use chrono::NaiveDate;
use indexmap::IndexMap;
use regex::Regex;

use crate::error::CoercionError;
use crate::value::Value;

/// Coercion of a single raw token.
pub trait ScalarType: Send + Sync + fmt::Debug {
    /// Short type name used in diagnostics.
    fn name(&self) -> &str;

    /// Coerce a raw token (or an already coerced scalar).
    ///
    /// # Errors
    /// Returns `CoercionError` carrying the offending value when it does not
    /// belong to this type.
    fn coerce(&self, raw: &Value) -> Result<Value, CoercionError>;
}

/// Construction/decomposition of a value made of several scalars.
pub trait CompositeType: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Whether `value` already is a value of this composite type.
    fn accepts(&self, value: &Value) -> bool;

    /// Build the composite value from an ordered scalar sequence.
    ///
    /// # Errors
    /// Returns `CoercionError` if the sequence does not form a valid value.
    fn construct(&self, items: Vec<Value>) -> Result<Value, CoercionError>;

    /// Decompose into the ordered scalar sequence `construct` accepts.
    fn unwind(&self, value: &Value) -> Vec<Value> {
        value.clone().into_sequence()
    }
}

fn scalar_text(raw: &Value, ty: &str) -> Result<String, CoercionError> {
    match raw {
        Value::Str(s) => Ok(s.clone()),
        Value::Int(_) | Value::Bool(_) | Value::Date(_) => Ok(raw.to_string()),
        other => Err(CoercionError::new(
            other.to_string(),
            format!("expected a single {ty} value"),
        )),
    }
}

/// Free-form text, optionally constrained by a pattern and a length limit.
#[derive(Debug, Clone, Default)]
pub struct StringType {
    pattern: Option<Regex>,
    max_len: Option<usize>,
}

impl StringType {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require every value to fully match `pattern`.
    ///
    /// # Errors
    /// Returns `regex::Error` if the pattern does not compile.
    pub fn matching(pattern: &str) -> Result<Self, regex::Error> {
        let anchored = format!("^(?:{pattern})$");
        Ok(Self {
            pattern: Some(Regex::new(&anchored)?),
            max_len: None,
        })
    }

    #[must_use]
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = Some(max_len);
        self
    }
}

impl ScalarType for StringType {
    fn name(&self) -> &'static str {
        "string"
    }

    fn coerce(&self, raw: &Value) -> Result<Value, CoercionError> {
        let text = scalar_text(raw, "string")?;
        if let Some(max) = self.max_len
            && text.chars().count() > max
        {
            return Err(CoercionError::new(
                text,
                format!("longer than {max} characters"),
            ));
        }
        if let Some(pattern) = &self.pattern
            && !pattern.is_match(&text)
        {
            return Err(CoercionError::new(text, "does not match the expected format"));
        }
        Ok(Value::Str(text))
    }
}

/// Signed 64-bit integer with optional inclusive bounds.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegerType {
    min: Option<i64>,
    max: Option<i64>,
}

impl IntegerType {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn bounded(min: Option<i64>, max: Option<i64>) -> Self {
        Self { min, max }
    }

    fn check(self, value: i64) -> Result<Value, CoercionError> {
        if let Some(min) = self.min
            && value < min
        {
            return Err(CoercionError::new(value.to_string(), format!("below {min}")));
        }
        if let Some(max) = self.max
            && value > max
        {
            return Err(CoercionError::new(value.to_string(), format!("above {max}")));
        }
        Ok(Value::Int(value))
    }
}

impl ScalarType for IntegerType {
    fn name(&self) -> &'static str {
        "integer"
    }

    fn coerce(&self, raw: &Value) -> Result<Value, CoercionError> {
        match raw {
            Value::Int(i) => self.check(*i),
            Value::Str(s) => {
                let parsed = s
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| CoercionError::new(s.as_str(), "not an integer"))?;
                self.check(parsed)
            }
            other => Err(CoercionError::new(other.to_string(), "not an integer")),
        }
    }
}

/// Boolean accepting the usual textual spellings.
#[derive(Debug, Clone, Copy, Default)]
pub struct BooleanType;

impl ScalarType for BooleanType {
    fn name(&self) -> &'static str {
        "boolean"
    }

    fn coerce(&self, raw: &Value) -> Result<Value, CoercionError> {
        match raw {
            Value::Bool(b) => Ok(Value::Bool(*b)),
            Value::Str(s) => match s.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
                "false" | "0" | "no" | "off" => Ok(Value::Bool(false)),
                _ => Err(CoercionError::new(
                    s.as_str(),
                    "expected true/false, yes/no, on/off or 1/0",
                )),
            },
            other => Err(CoercionError::new(other.to_string(), "not a boolean")),
        }
    }
}

/// Calendar date parsed with a `chrono` format string.
#[derive(Debug, Clone)]
pub struct DateType {
    format: String,
}

impl Default for DateType {
    fn default() -> Self {
        Self {
            format: "%Y-%m-%d".to_owned(),
        }
    }
}

impl DateType {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_format(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
        }
    }

    #[must_use]
    pub fn format(&self) -> &str {
        &self.format
    }
}

impl ScalarType for DateType {
    fn name(&self) -> &'static str {
        "date"
    }

    fn coerce(&self, raw: &Value) -> Result<Value, CoercionError> {
        match raw {
            Value::Date(d) => Ok(Value::Date(*d)),
            Value::Str(s) => NaiveDate::parse_from_str(s.trim(), &self.format)
                .map(Value::Date)
                .map_err(|e| CoercionError::new(s.as_str(), format!("not a date: {e}"))),
            other => Err(CoercionError::new(other.to_string(), "not a date")),
        }
    }
}

/// Closed vocabulary. Several spellings may map onto one canonical value.
#[derive(Debug, Clone, Default)]
pub struct ChoiceType {
    spellings: IndexMap<String, String>,
    ignore_case: bool,
}

impl ChoiceType {
    /// Vocabulary where every value is its own canonical spelling.
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut choice = Self::default();
        for value in values {
            let value = value.into();
            choice.spellings.insert(value.clone(), value);
        }
        choice
    }

    /// Add an alternate spelling for `canonical`.
    #[must_use]
    pub fn with_spelling(mut self, spelling: impl Into<String>, canonical: impl Into<String>) -> Self {
        self.spellings
            .entry(spelling.into())
            .or_insert_with(|| canonical.into());
        self
    }

    #[must_use]
    pub fn ignore_case(mut self) -> Self {
        self.ignore_case = true;
        self
    }

    /// Canonical values, in declaration order, without duplicates.
    pub fn values(&self) -> impl Iterator<Item = &str> {
        let mut seen = std::collections::HashSet::new();
        self.spellings
            .values()
            .filter(move |v| seen.insert(v.as_str()))
            .map(String::as_str)
    }

    fn lookup(&self, token: &str) -> Option<&String> {
        self.spellings.get(token).or_else(|| {
            if self.ignore_case {
                self.spellings
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(token))
                    .map(|(_, v)| v)
            } else {
                None
            }
        })
    }
}

impl ScalarType for ChoiceType {
    fn name(&self) -> &'static str {
        "choice"
    }

    fn coerce(&self, raw: &Value) -> Result<Value, CoercionError> {
        let token = scalar_text(raw, "choice")?;
        self.lookup(token.trim())
            .map(|canonical| Value::Str(canonical.clone()))
            .ok_or_else(|| CoercionError::new(token, "not one of the accepted values"))
    }
}

/// Inclusive range built from one (`a..a`) or two (`a..b`) ordered bounds.
#[derive(Debug, Clone, Copy, Default)]
pub struct RangeType;

impl CompositeType for RangeType {
    fn name(&self) -> &'static str {
        "range"
    }

    fn accepts(&self, value: &Value) -> bool {
        matches!(value, Value::Range { .. })
    }

    fn construct(&self, items: Vec<Value>) -> Result<Value, CoercionError> {
        let mut items = items.into_iter();
        match (items.next(), items.next(), items.next()) {
            (Some(point), None, None) => Ok(Value::range(point.clone(), point)),
            (Some(start), Some(end), None) => {
                if start > end {
                    return Err(CoercionError::new(
                        format!("{start}..{end}"),
                        "range start is after its end",
                    ));
                }
                Ok(Value::range(start, end))
            }
            (None, _, _) => Err(CoercionError::new("", "a range needs at least one bound")),
            (Some(start), Some(end), Some(_)) => Err(CoercionError::new(
                format!("{start}..{end}.."),
                "a range takes at most two bounds",
            )),
            (Some(start), None, Some(_)) => Err(CoercionError::new(
                start.to_string(),
                "malformed range bounds",
            )),
        }
    }
}

/// Sorted, de-duplicated set of scalars.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetType;

impl CompositeType for SetType {
    fn name(&self) -> &'static str {
        "set"
    }

    fn accepts(&self, value: &Value) -> bool {
        matches!(value, Value::Set(_))
    }

    fn construct(&self, items: Vec<Value>) -> Result<Value, CoercionError> {
        Ok(Value::set(items))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn integer_bounds_and_parsing() {
        let ty = IntegerType::bounded(Some(1), Some(10));
        assert_eq!(ty.coerce(&Value::from(" 7 ")).unwrap(), Value::Int(7));
        assert_eq!(ty.coerce(&Value::Int(3)).unwrap(), Value::Int(3));
        assert!(ty.coerce(&Value::from("11")).is_err());
        let err = ty.coerce(&Value::from("x")).unwrap_err();
        assert_eq!(err.value, "x");
    }

    #[test]
    fn boolean_spellings() {
        let ty = BooleanType;
        assert_eq!(ty.coerce(&Value::from("Yes")).unwrap(), Value::Bool(true));
        assert_eq!(ty.coerce(&Value::from("off")).unwrap(), Value::Bool(false));
        assert!(ty.coerce(&Value::from("maybe")).is_err());
    }

    #[test]
    fn date_parses_iso_by_default() {
        let ty = DateType::new();
        let d = ty.coerce(&Value::from("2023-10-04")).unwrap();
        assert_eq!(d, Value::Date(NaiveDate::from_ymd_opt(2023, 10, 4).unwrap()));
        assert!(ty.coerce(&Value::from("2023-13-04")).is_err());
        assert_eq!(ty.coerce(&d).unwrap(), d);
    }

    #[test]
    fn string_pattern_is_anchored() {
        let ty = StringType::matching("[a-z]+").unwrap();
        assert!(ty.coerce(&Value::from("abc")).is_ok());
        assert!(ty.coerce(&Value::from("abc1")).is_err());
        let short = StringType::new().with_max_len(2);
        assert!(short.coerce(&Value::from("abc")).is_err());
    }

    #[test]
    fn choice_maps_spellings_to_canonical() {
        let ty = ChoiceType::new(["red", "green"])
            .with_spelling("r", "red")
            .ignore_case();
        assert_eq!(ty.coerce(&Value::from("r")).unwrap(), Value::from("red"));
        assert_eq!(ty.coerce(&Value::from("GREEN")).unwrap(), Value::from("green"));
        assert!(ty.coerce(&Value::from("blue")).is_err());
        assert_eq!(ty.values().collect::<Vec<_>>(), vec!["red", "green"]);
    }

    #[test]
    fn range_construction() {
        let ty = RangeType;
        assert_eq!(
            ty.construct(vec![Value::Int(1), Value::Int(10)]).unwrap(),
            Value::range(Value::Int(1), Value::Int(10))
        );
        assert_eq!(
            ty.construct(vec![Value::Int(4)]).unwrap(),
            Value::range(Value::Int(4), Value::Int(4))
        );
        assert!(ty.construct(vec![Value::Int(10), Value::Int(1)]).is_err());
        assert!(ty.construct(vec![]).is_err());
    }

    #[test]
    fn set_sorts_and_dedups() {
        let set = SetType
            .construct(vec![Value::from("b"), Value::from("a"), Value::from("b")])
            .unwrap();
        assert_eq!(SetType.unwind(&set), vec![Value::from("a"), Value::from("b")]);
    }
}
