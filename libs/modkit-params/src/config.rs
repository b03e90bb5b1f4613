//! Declarative parameter schema.
//!
//! A schema lists templates in registration order (dependencies first) and
//! the named groups that reuse them. It is plain serde data, loaded through
//! `figment` like the rest of the platform configuration:
//!
//! ```yaml
//! complement_key: complement
//! templates:
//!   - id: page
//!     slug: p
//!     type: { kind: integer, min: 1 }
//!     default: ["1"]
//!   - id: tags
//!     composite: set
//!     max: ~
//!     universe: [red, green, blue]
//!     complement: true
//! groups:
//!   listing: [page, tags]
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use figment::Figment;
use figment::providers::{Format as _, Yaml};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::registry::{DEFAULT_COMPLEMENT_KEY, Registry, TemplateSource};
use crate::template::{Format, Template, TemplateBuilder};
use crate::types::{BooleanType, ChoiceType, DateType, IntegerType, RangeType, SetType, StringType};
use crate::value::Value;

/// Whole-registry schema.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParamsConfig {
    /// Key of the complement meta-parameter.
    pub complement_key: String,

    /// Templates, registered in order.
    pub templates: Vec<TemplateConfig>,

    /// Named groups: group name to the ids it contains, in order.
    pub groups: BTreeMap<String, Vec<String>>,
}

impl Default for ParamsConfig {
    fn default() -> Self {
        Self {
            complement_key: DEFAULT_COMPLEMENT_KEY.to_owned(),
            templates: Vec::new(),
            groups: BTreeMap::new(),
        }
    }
}

impl ParamsConfig {
    /// Extract the schema from a figment.
    ///
    /// # Errors
    /// Returns `ConfigError::Load` when the figment does not hold a valid schema.
    pub fn from_figment(figment: &Figment) -> Result<Self, ConfigError> {
        figment
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))
    }

    /// Load the schema from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError::Load` when the file cannot be read or parsed.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_figment(&Figment::new().merge(Yaml::file_exact(path.as_ref())))
    }
}

/// Scalar type of a template, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScalarKind {
    String {
        #[serde(default)]
        pattern: Option<String>,
        #[serde(default)]
        max_length: Option<usize>,
    },
    Integer {
        #[serde(default)]
        min: Option<i64>,
        #[serde(default)]
        max: Option<i64>,
    },
    Boolean,
    Date {
        #[serde(default)]
        format: Option<String>,
    },
    Choice { values: Vec<String> },
}

impl Default for ScalarKind {
    fn default() -> Self {
        ScalarKind::String {
            pattern: None,
            max_length: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositeKind {
    Range,
    Set,
}

fn default_max() -> Option<usize> {
    Some(1)
}

/// One template. `max: null` means unbounded.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
#[allow(clippy::struct_excessive_bools)]
pub struct TemplateConfig {
    pub id: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(rename = "type", default)]
    pub scalar: ScalarKind,
    #[serde(default)]
    pub composite: Option<CompositeKind>,
    #[serde(default)]
    pub min: usize,
    #[serde(default = "default_max")]
    pub max: Option<usize>,
    #[serde(default)]
    pub shift_from_back: bool,
    #[serde(default)]
    pub keep_empty: bool,
    #[serde(default)]
    pub reverse: bool,
    /// Raw default tokens.
    #[serde(default)]
    pub default: Option<Vec<String>>,
    #[serde(default)]
    pub depends: Vec<String>,
    #[serde(default)]
    pub conflicts: Vec<String>,
    #[serde(default)]
    pub consumes: Vec<String>,
    /// Static universe, as raw tokens.
    #[serde(default)]
    pub universe: Option<Vec<String>>,
    /// Serialize as the set complement when shorter.
    #[serde(default)]
    pub complement: bool,
    /// Output pattern; `{}` stands for the value.
    #[serde(default)]
    pub format: Option<String>,
}

impl TemplateConfig {
    /// Build the template this entry describes.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidPattern` for a string pattern that does
    /// not compile, or any error of [`TemplateBuilder::build`].
    pub fn build(&self) -> Result<Template, ConfigError> {
        let mut builder = self.builder()?;
        if let Some(slug) = &self.slug {
            builder = builder.slug(slug);
        }
        for alias in &self.aliases {
            builder = builder.alias(alias);
        }
        builder = match self.composite {
            Some(CompositeKind::Range) => builder.composite(RangeType),
            Some(CompositeKind::Set) => builder.composite(SetType),
            None => builder,
        };
        builder = builder.cardinality(self.min, self.max);
        if self.shift_from_back {
            builder = builder.shift_from_back();
        }
        if self.keep_empty {
            builder = builder.keep_empty();
        }
        if self.reverse {
            builder = builder.reverse();
        }
        for id in &self.depends {
            builder = builder.depends(id.as_str());
        }
        for id in &self.conflicts {
            builder = builder.conflicts(id.as_str());
        }
        for id in &self.consumes {
            builder = builder.consumes(id.as_str());
        }
        if let Some(universe) = &self.universe {
            builder = builder.universe_values(Value::tokens(universe.iter().cloned()));
        }
        if self.complement {
            builder = builder.set_complement();
        }
        if let Some(pattern) = &self.format {
            builder = builder.format(Format::Pattern(pattern.clone()));
        }
        if let Some(default) = &self.default {
            builder = builder.default(Value::tokens(default.iter().cloned()));
        }
        builder.build()
    }

    fn builder(&self) -> Result<TemplateBuilder, ConfigError> {
        let id = self.id.as_str();
        Ok(match &self.scalar {
            ScalarKind::String { pattern, max_length } => {
                let mut ty = match pattern {
                    Some(pattern) => StringType::matching(pattern).map_err(|source| {
                        ConfigError::InvalidPattern {
                            param: id.into(),
                            source,
                        }
                    })?,
                    None => StringType::new(),
                };
                if let Some(max) = max_length {
                    ty = ty.with_max_len(*max);
                }
                Template::builder(id, ty)
            }
            ScalarKind::Integer { min, max } => {
                Template::builder(id, IntegerType::bounded(*min, *max))
            }
            ScalarKind::Boolean => Template::builder(id, BooleanType),
            ScalarKind::Date { format: Some(format) } => {
                Template::builder(id, DateType::with_format(format.as_str()))
                    .format(Format::Date(format.clone()))
            }
            ScalarKind::Date { format: None } => Template::builder(id, DateType::new()),
            ScalarKind::Choice { values } => {
                Template::builder(id, ChoiceType::new(values.iter().map(String::as_str)))
            }
        })
    }
}

impl Registry {
    /// Build a registry from a schema: templates in declaration order, then
    /// named groups.
    ///
    /// # Errors
    /// Returns the first `ConfigError` raised by a template or group.
    pub fn from_config(config: &ParamsConfig) -> Result<Self, ConfigError> {
        let mut registry = Registry::with_complement_key(config.complement_key.as_str());
        for template in &config.templates {
            registry.register(template.build()?)?;
        }
        for (name, ids) in &config.groups {
            registry.set_group(
                name,
                ids.iter().map(|id| (id.as_str(), TemplateSource::Existing)),
            )?;
        }
        tracing::debug!(
            templates = config.templates.len(),
            groups = config.groups.len(),
            "parameter registry built from config"
        );
        Ok(registry)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use figment::providers::Serialized;
    use serde_json::json;

    use super::*;

    fn figment(value: &serde_json::Value) -> Figment {
        Figment::new().merge(Serialized::defaults(value))
    }

    #[test]
    fn cardinality_defaults_and_unbounded_max() {
        let config = ParamsConfig::from_figment(&figment(&json!({
            "templates": [
                { "id": "page", "type": { "kind": "integer", "min": 1 } },
                { "id": "tags", "max": null }
            ]
        })))
        .unwrap();
        assert_eq!(config.complement_key, "complement");
        assert_eq!(config.templates[0].max, Some(1));
        assert_eq!(config.templates[0].min, 0);
        assert_eq!(config.templates[1].max, None);
        assert_eq!(config.templates[1].scalar, ScalarKind::default());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = ParamsConfig::from_figment(&figment(&json!({
            "templates": [{ "id": "page", "colour": "red" }]
        })))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }

    #[test]
    fn bad_pattern_is_reported() {
        let config = ParamsConfig::from_figment(&figment(&json!({
            "templates": [{ "id": "q", "type": { "kind": "string", "pattern": "(" } }]
        })))
        .unwrap();
        let err = Registry::from_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { .. }));
    }

    #[test]
    fn date_format_is_used_both_ways() {
        let config = ParamsConfig::from_figment(&figment(&json!({
            "templates": [{ "id": "on", "type": { "kind": "date", "format": "%d.%m.%Y" } }]
        })))
        .unwrap();
        let registry = Registry::from_config(&config).unwrap();
        let instance = registry.process("on=04.10.2023", false, false).unwrap();
        assert_eq!(instance.to_query_string(false, false).unwrap(), "on=04.10.2023");
    }
}
