//! Per-parameter contract.
//!
//! A [`Template`] describes how one named parameter is coerced, how many
//! values it takes, how a composite value is built from and decomposed into
//! scalars, and which other parameters it depends on, conflicts with or
//! consumes. Templates are immutable once built, except for the lazily
//! memoized universe.
//!
//! # Example
//!
//! ```rust,ignore
//! use modkit_params::{IntegerType, RangeType, Template, Value};
//!
//! let pages = Template::builder("pages", IntegerType::new())
//!     .composite(RangeType)
//!     .cardinality(1, Some(2))
//!     .default(Value::range(Value::Int(1), Value::Int(100)))
//!     .build()?;
//! ```

pub mod hooks;

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{ConfigError, HookError, ParamError};
use crate::types::{CompositeType, ScalarType};
use crate::value::{ParamId, ParamValues, Value};

pub use hooks::{
    Complementer, Contextualizer, Format, Formatter, Preprocessor, UniverseGenerator, Unwinder,
};

/// Contract for one named parameter.
pub struct Template {
    id: ParamId,
    slug: Option<String>,
    aliases: Vec<String>,
    scalar: Arc<dyn ScalarType>,
    composite: Option<Arc<dyn CompositeType>>,
    min: usize,
    max: Option<usize>,
    shift_from_back: bool,
    keep_empty: bool,
    reverse: bool,
    default: Option<Value>,
    depends: BTreeSet<ParamId>,
    conflicts: BTreeSet<ParamId>,
    consumes: BTreeSet<ParamId>,
    preprocessor: Option<Preprocessor>,
    unwind: Option<Unwinder>,
    contextualize: Option<Contextualizer>,
    format: Format,
    universe_fn: Option<UniverseGenerator>,
    universe: RwLock<Option<Value>>,
    complement: Option<Complementer>,
}

impl Template {
    /// Start building a template coercing its tokens with `scalar`.
    pub fn builder(id: impl Into<ParamId>, scalar: impl ScalarType + 'static) -> TemplateBuilder {
        TemplateBuilder::new(id.into(), Arc::new(scalar))
    }

    /// Like [`Template::builder`], sharing an existing scalar type.
    pub fn builder_with(id: impl Into<ParamId>, scalar: Arc<dyn ScalarType>) -> TemplateBuilder {
        TemplateBuilder::new(id.into(), scalar)
    }

    #[must_use]
    pub fn id(&self) -> &ParamId {
        &self.id
    }

    #[must_use]
    pub fn slug(&self) -> Option<&str> {
        self.slug.as_deref()
    }

    /// Name used for serialization: the slug, falling back to the id.
    #[must_use]
    pub fn name(&self) -> &str {
        self.slug.as_deref().unwrap_or(self.id.as_str())
    }

    #[must_use]
    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    #[must_use]
    pub fn scalar_type(&self) -> &dyn ScalarType {
        self.scalar.as_ref()
    }

    #[must_use]
    pub fn composite_type(&self) -> Option<&dyn CompositeType> {
        self.composite.as_deref()
    }

    #[must_use]
    pub fn min(&self) -> usize {
        self.min
    }

    #[must_use]
    pub fn max(&self) -> Option<usize> {
        self.max
    }

    #[must_use]
    pub fn keep_empty(&self) -> bool {
        self.keep_empty
    }

    #[must_use]
    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    #[must_use]
    pub fn depends(&self) -> &BTreeSet<ParamId> {
        &self.depends
    }

    /// Declared conflicts, extended by the consumed ids.
    #[must_use]
    pub fn conflicts(&self) -> &BTreeSet<ParamId> {
        &self.conflicts
    }

    #[must_use]
    pub fn consumes(&self) -> &BTreeSet<ParamId> {
        &self.consumes
    }

    /// Dependencies that order processing: `depends`, plus `consumes` when a
    /// preprocessor synthesizes this template from them.
    pub fn effective_depends(&self) -> impl Iterator<Item = &ParamId> {
        let consumed = self
            .preprocessor
            .is_some()
            .then_some(&self.consumes)
            .into_iter()
            .flatten();
        self.depends.iter().chain(consumed)
    }

    /// Dependencies whose processed values are handed to unwind/contextualize.
    pub fn context_depends(&self) -> impl Iterator<Item = &ParamId> {
        self.depends.iter().filter(|id| !self.consumes.contains(*id))
    }

    #[must_use]
    pub fn has_preprocessor(&self) -> bool {
        self.preprocessor.is_some()
    }

    #[must_use]
    pub fn is_complementable(&self) -> bool {
        self.complement.is_some()
    }

    /// Current universe, computed on first use.
    ///
    /// # Errors
    /// Returns `ParamError::Internal` if the universe generator fails.
    pub fn universe(&self) -> Result<Option<Value>, ParamError> {
        if let Some(universe) = self.universe.read().as_ref() {
            return Ok(Some(universe.clone()));
        }
        if self.universe_fn.is_none() {
            return Ok(None);
        }
        self.refresh()?;
        Ok(self.universe.read().clone())
    }

    /// Recompute the universe from its generator.
    ///
    /// The generator runs outside the lock; only the store is exclusive.
    ///
    /// # Errors
    /// Returns `ParamError::Internal` if the generator fails, or
    /// `ParamError::Syntax` if its output does not fit the composite type.
    pub fn refresh(&self) -> Result<(), ParamError> {
        let Some(generate) = &self.universe_fn else {
            return Ok(());
        };
        let universe = generate(self).map_err(|e| ParamError::internal(&self.id, "universe", e))?;
        let universe = self.wrap(universe)?;
        *self.universe.write() = Some(universe);
        tracing::debug!(param = %self.id, "universe refreshed");
        Ok(())
    }

    /// Coerce raw tokens (or an already processed value) into this
    /// template's processed value.
    ///
    /// # Errors
    /// Returns `ParamError::Syntax` when a token fails coercion or the
    /// composite cannot be built, `ParamError::Cardinality` when fewer than
    /// `min` values survive, and `ParamError::Internal` when a custom unwind
    /// hook fails.
    pub fn process(&self, input: &Value) -> Result<Value, ParamError> {
        let items = match (&self.composite, input) {
            (Some(composite), value) if composite.accepts(value) => {
                self.unwind_value(value, &ParamValues::new())?
            }
            (_, Value::List(items)) => self.raw_order(items.clone()),
            (_, Value::Set(items)) => self.raw_order(items.iter().cloned().collect()),
            (_, Value::Empty) => Vec::new(),
            (_, scalar) => vec![scalar.clone()],
        };

        let mut values = Vec::with_capacity(items.len());
        for item in items {
            if item.is_blank() {
                if self.keep_empty {
                    values.push(Value::Empty);
                }
                continue;
            }
            let coerced = self
                .scalar
                .coerce(&item)
                .map_err(|source| self.syntax(source))?;
            values.push(coerced);
        }

        if values.len() < self.min {
            return Err(ParamError::Cardinality {
                param: self.id.clone(),
                min: self.min,
                got: values.len(),
            });
        }
        if let Some(max) = self.max
            && values.len() > max
        {
            if self.shift_from_back {
                values.drain(..values.len() - max);
            } else {
                values.truncate(max);
            }
        }

        if values.is_empty() {
            return Ok(Value::Empty);
        }
        if let Some(composite) = &self.composite {
            return composite
                .construct(values)
                .map_err(|source| self.syntax(source));
        }
        if self.max == Some(1) {
            return Ok(values.pop().unwrap_or(Value::Empty));
        }
        Ok(Value::List(values))
    }

    /// Serialize a processed value into string tokens.
    ///
    /// `deps` carries the processed values of [`Template::context_depends`].
    /// With `want_complement`, a complement-capable template substitutes its
    /// complement when that unwinds to a strictly shorter, non-empty sequence;
    /// the returned flag reports the substitution.
    ///
    /// # Errors
    /// Returns `ParamError::Internal` when a hook fails, or the errors of
    /// [`Template::process`] when `value` must be coerced first.
    pub fn unprocess(
        &self,
        value: &Value,
        deps: &ParamValues,
        want_complement: bool,
    ) -> Result<(Vec<String>, bool), ParamError> {
        if value.is_blank() {
            let tokens = if self.keep_empty && self.max == Some(1) {
                vec![String::new()]
            } else {
                Vec::new()
            };
            return Ok((tokens, false));
        }

        let mut complemented = false;
        let mut sequence = match &self.composite {
            Some(composite) => {
                let value = if composite.accepts(value) {
                    Cow::Borrowed(value)
                } else {
                    Cow::Owned(self.process(value)?)
                };
                let direct = self.unwind_value(&value, deps)?;
                if want_complement && self.is_complementable() {
                    let inverse = self.complement(&value)?;
                    let shorter = self.unwind_value(&inverse, deps)?;
                    if !shorter.is_empty() && shorter.len() < direct.len() {
                        complemented = true;
                        shorter
                    } else {
                        direct
                    }
                } else {
                    direct
                }
            }
            None => value.clone().into_sequence(),
        };

        if let Some(contextualize) = &self.contextualize {
            sequence = contextualize(self, sequence, deps)
                .map_err(|e| ParamError::internal(&self.id, "contextualize", e))?;
        }
        if self.reverse && self.composite.is_some() {
            sequence.reverse();
        }

        let tokens = sequence
            .iter()
            .filter(|v| self.keep_empty || !v.is_blank())
            .map(|v| self.format.render(v))
            .collect();
        Ok((tokens, complemented))
    }

    /// Complement of `value` within the universe; unchanged when the
    /// template is not complement-capable.
    ///
    /// # Errors
    /// Returns `ParamError::Internal` if the complement hook fails.
    pub fn complement(&self, value: &Value) -> Result<Value, ParamError> {
        let Some(complement) = &self.complement else {
            return Ok(value.clone());
        };
        let inverse =
            complement(self, value).map_err(|e| ParamError::internal(&self.id, "complement", e))?;
        self.wrap(inverse)
    }

    /// Run the preprocessor, synthesizing raw input from consumed values.
    /// Without a preprocessor the raw input is returned as is.
    ///
    /// # Errors
    /// Returns `ParamError::Internal` if the preprocessor fails.
    pub fn preprocess(&self, raw: &Value, consumed: &ParamValues) -> Result<Value, ParamError> {
        match &self.preprocessor {
            Some(preprocess) => preprocess(self, raw, consumed)
                .map_err(|e| ParamError::internal(&self.id, "preprocessor", e)),
            None => Ok(raw.clone()),
        }
    }

    fn unwind_value(&self, value: &Value, deps: &ParamValues) -> Result<Vec<Value>, ParamError> {
        if let Some(unwind) = &self.unwind {
            return unwind(self, value, deps)
                .map_err(|e| ParamError::internal(&self.id, "unwind", e));
        }
        Ok(match &self.composite {
            Some(composite) => composite.unwind(value),
            None => value.clone().into_sequence(),
        })
    }

    /// Coerce a hook result into the composite type, if it is not one yet.
    fn wrap(&self, value: Value) -> Result<Value, ParamError> {
        let Some(composite) = &self.composite else {
            return Ok(value);
        };
        if composite.accepts(&value) {
            return Ok(value);
        }
        let items = value
            .into_sequence()
            .iter()
            .filter(|item| !item.is_blank())
            .map(|item| self.scalar.coerce(item))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| self.syntax(source))?;
        composite
            .construct(items)
            .map_err(|source| self.syntax(source))
    }

    /// Raw token order before composite construction. Without a composite
    /// a list may already be processed, so its order is kept.
    fn raw_order(&self, mut items: Vec<Value>) -> Vec<Value> {
        if self.reverse && self.composite.is_some() {
            items.reverse();
        }
        items
    }

    fn syntax(&self, source: crate::error::CoercionError) -> ParamError {
        ParamError::Syntax {
            param: self.id.clone(),
            source,
        }
    }
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("id", &self.id)
            .field("slug", &self.slug)
            .field("aliases", &self.aliases)
            .field("scalar", &self.scalar.name())
            .field("composite", &self.composite.as_ref().map(|c| c.name()))
            .field("min", &self.min)
            .field("max", &self.max)
            .field("default", &self.default)
            .field("depends", &self.depends)
            .field("conflicts", &self.conflicts)
            .field("consumes", &self.consumes)
            .finish_non_exhaustive()
    }
}

/// Strongly-typed template configuration, validated by [`TemplateBuilder::build`].
#[must_use]
pub struct TemplateBuilder {
    id: ParamId,
    slug: Option<String>,
    aliases: Vec<String>,
    scalar: Arc<dyn ScalarType>,
    composite: Option<Arc<dyn CompositeType>>,
    min: usize,
    max: Option<usize>,
    shift_from_back: bool,
    keep_empty: bool,
    reverse: bool,
    default: Option<Value>,
    depends: BTreeSet<ParamId>,
    conflicts: BTreeSet<ParamId>,
    consumes: BTreeSet<ParamId>,
    preprocessor: Option<Preprocessor>,
    unwind: Option<Unwinder>,
    contextualize: Option<Contextualizer>,
    format: Format,
    universe_fn: Option<UniverseGenerator>,
    complement: Option<Complementer>,
}

impl TemplateBuilder {
    fn new(id: ParamId, scalar: Arc<dyn ScalarType>) -> Self {
        Self {
            id,
            slug: None,
            aliases: Vec::new(),
            scalar,
            composite: None,
            min: 0,
            max: Some(1),
            shift_from_back: false,
            keep_empty: false,
            reverse: false,
            default: None,
            depends: BTreeSet::new(),
            conflicts: BTreeSet::new(),
            consumes: BTreeSet::new(),
            preprocessor: None,
            unwind: None,
            contextualize: None,
            format: Format::Display,
            universe_fn: None,
            complement: None,
        }
    }

    pub fn slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn composite(mut self, composite: impl CompositeType + 'static) -> Self {
        self.composite = Some(Arc::new(composite));
        self
    }

    /// `max = None` means unbounded.
    pub fn cardinality(mut self, min: usize, max: Option<usize>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn min(mut self, min: usize) -> Self {
        self.min = min;
        self
    }

    pub fn max(mut self, max: usize) -> Self {
        self.max = Some(max);
        self
    }

    /// Accept any number of values.
    pub fn many(mut self) -> Self {
        self.max = None;
        self
    }

    /// Keep the trailing values when truncating to `max`.
    pub fn shift_from_back(mut self) -> Self {
        self.shift_from_back = true;
        self
    }

    /// Retain blank tokens as explicit empty values.
    pub fn keep_empty(mut self) -> Self {
        self.keep_empty = true;
        self
    }

    /// Reverse the token order around composite construction. Has no
    /// effect on templates without a composite.
    pub fn reverse(mut self) -> Self {
        self.reverse = true;
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn depends(mut self, id: impl Into<ParamId>) -> Self {
        self.depends.insert(id.into());
        self
    }

    pub fn conflicts(mut self, id: impl Into<ParamId>) -> Self {
        self.conflicts.insert(id.into());
        self
    }

    pub fn consumes(mut self, id: impl Into<ParamId>) -> Self {
        self.consumes.insert(id.into());
        self
    }

    pub fn preprocessor<F>(mut self, f: F) -> Self
    where
        F: Fn(&Template, &Value, &ParamValues) -> Result<Value, HookError> + Send + Sync + 'static,
    {
        self.preprocessor = Some(Arc::new(f));
        self
    }

    pub fn unwind<F>(mut self, f: F) -> Self
    where
        F: Fn(&Template, &Value, &ParamValues) -> Result<Vec<Value>, HookError>
            + Send
            + Sync
            + 'static,
    {
        self.unwind = Some(Arc::new(f));
        self
    }

    pub fn contextualize<F>(mut self, f: F) -> Self
    where
        F: Fn(&Template, Vec<Value>, &ParamValues) -> Result<Vec<Value>, HookError>
            + Send
            + Sync
            + 'static,
    {
        self.contextualize = Some(Arc::new(f));
        self
    }

    pub fn format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    pub fn universe<F>(mut self, f: F) -> Self
    where
        F: Fn(&Template) -> Result<Value, HookError> + Send + Sync + 'static,
    {
        self.universe_fn = Some(Arc::new(f));
        self
    }

    /// Fixed universe.
    pub fn universe_values(self, universe: impl Into<Value>) -> Self {
        let universe = universe.into();
        self.universe(move |_| Ok(universe.clone()))
    }

    pub fn complement<F>(mut self, f: F) -> Self
    where
        F: Fn(&Template, &Value) -> Result<Value, HookError> + Send + Sync + 'static,
    {
        self.complement = Some(Arc::new(f));
        self
    }

    /// Complement set values within the universe, see [`hooks::set_complement`].
    pub fn set_complement(mut self) -> Self {
        self.complement = Some(hooks::set_complement());
        self
    }

    /// Validate and build the template. The default value, if any, is
    /// processed here so it is stored in canonical form.
    ///
    /// # Errors
    /// Returns `ConfigError` for an empty id, `max == 0`, `min > max`, or a
    /// default value the template itself rejects.
    pub fn build(mut self) -> Result<Template, ConfigError> {
        if self.id.as_str().is_empty() {
            return Err(ConfigError::EmptyId);
        }
        match self.max {
            Some(0) => return Err(ConfigError::ZeroMax { param: self.id }),
            Some(max) if self.min > max => {
                return Err(ConfigError::InvalidCardinality {
                    param: self.id,
                    min: self.min,
                    max,
                });
            }
            _ => {}
        }

        let default = self.default.take();
        let mut template = self.assemble();
        if let Some(default) = default {
            let processed = template
                .process(&default)
                .map_err(|e| ConfigError::InvalidDefault {
                    param: template.id.clone(),
                    source: Box::new(e),
                })?;
            template.default = Some(processed);
        }
        Ok(template)
    }

    /// Assemble without validation. The default value is dropped.
    pub(crate) fn assemble(self) -> Template {
        let mut conflicts = self.conflicts;
        conflicts.extend(self.consumes.iter().cloned());

        Template {
            id: self.id,
            slug: self.slug,
            aliases: self.aliases,
            scalar: self.scalar,
            composite: self.composite,
            min: self.min,
            max: self.max,
            shift_from_back: self.shift_from_back,
            keep_empty: self.keep_empty,
            reverse: self.reverse,
            default: None,
            depends: self.depends,
            conflicts,
            consumes: self.consumes,
            preprocessor: self.preprocessor,
            unwind: self.unwind,
            contextualize: self.contextualize,
            format: self.format,
            universe_fn: self.universe_fn,
            universe: RwLock::new(None),
            complement: self.complement,
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests;
