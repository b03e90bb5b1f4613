//! User-supplied functions attached to a template.
//!
//! Every hook receives the owning [`Template`] explicitly, so it can consult
//! the template's universe, dependencies or slug without hidden context.

use std::sync::Arc;

use crate::error::HookError;
use crate::template::Template;
use crate::value::{ParamValues, Value};

/// Synthesizes this template's raw input from the processed values of the
/// templates it consumes.
pub type Preprocessor =
    Arc<dyn Fn(&Template, &Value, &ParamValues) -> Result<Value, HookError> + Send + Sync>;

/// Decomposes a composite value into its ordered scalars, given the
/// processed values of the template's dependencies.
pub type Unwinder =
    Arc<dyn Fn(&Template, &Value, &ParamValues) -> Result<Vec<Value>, HookError> + Send + Sync>;

/// Adjusts an unwound sequence using the processed values of dependencies.
pub type Contextualizer = Arc<
    dyn Fn(&Template, Vec<Value>, &ParamValues) -> Result<Vec<Value>, HookError> + Send + Sync,
>;

/// Computes the complement of a composite value within the template's universe.
pub type Complementer = Arc<dyn Fn(&Template, &Value) -> Result<Value, HookError> + Send + Sync>;

/// Produces the maximal value of a template.
pub type UniverseGenerator = Arc<dyn Fn(&Template) -> Result<Value, HookError> + Send + Sync>;

/// Renders one scalar.
pub type Formatter = Arc<dyn Fn(&Value) -> String + Send + Sync>;

/// How a scalar is rendered into a query string token.
#[derive(Clone, Default)]
pub enum Format {
    /// Canonical `Display` form of the value.
    #[default]
    Display,
    /// Every `{}` in the pattern is replaced by the canonical form.
    Pattern(String),
    /// `chrono` format string applied to dates; other values use `Display`.
    Date(String),
    Custom(Formatter),
}

impl Format {
    #[must_use]
    pub fn render(&self, value: &Value) -> String {
        match self {
            Format::Display => value.to_string(),
            Format::Pattern(pattern) => pattern.replace("{}", &value.to_string()),
            Format::Date(fmt) => match value {
                Value::Date(d) => d.format(fmt).to_string(),
                other => other.to_string(),
            },
            Format::Custom(f) => f(value),
        }
    }
}

impl std::fmt::Debug for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Format::Display => f.write_str("Display"),
            Format::Pattern(p) => f.debug_tuple("Pattern").field(p).finish(),
            Format::Date(p) => f.debug_tuple("Date").field(p).finish(),
            Format::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Stock complement for set-valued templates: `universe - value`.
#[must_use]
pub fn set_complement() -> Complementer {
    Arc::new(|template: &Template, value: &Value| -> Result<Value, HookError> {
        let universe = template
            .universe()?
            .ok_or("template declares no universe")?;
        match (universe.as_set(), value) {
            (Some(all), Value::Set(chosen)) => {
                Ok(Value::Set(all.difference(chosen).cloned().collect()))
            }
            (Some(all), Value::Empty) => Ok(Value::Set(all.clone())),
            _ => Err("set complement needs set values".into()),
        }
    })
}
