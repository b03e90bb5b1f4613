//! One processed snapshot of raw input against a group.
//!
//! Processing runs in four phases: input keys are resolved to canonical ids
//! (unknown keys are kept aside as extras), the complement meta-parameter is
//! read, templates are applied rank by rank, and finally the values consumed
//! by preprocessors are dropped. Per-parameter failures are collected and
//! reported together as one [`ProcessingError`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use indexmap::IndexMap;

use crate::encoding;
use crate::error::{Correction, ParamError, ProcessingError};
use crate::group::GroupView;
use crate::input::RawParams;
use crate::registry::Registry;
use crate::selection::Selection;
use crate::template::Template;
use crate::value::{ParamId, ParamValues, Value};

#[derive(Clone, Copy)]
struct Mode {
    forced: bool,
    defaults: bool,
    from_caller: bool,
}

/// Processed parameters plus the unrecognized part of the input.
#[derive(Debug, Clone)]
pub struct Instance<'r> {
    view: GroupView<'r>,
    content: ParamValues,
    extra: IndexMap<String, Value>,
    complemented: BTreeSet<ParamId>,
    corrections: BTreeMap<ParamId, Correction>,
}

impl<'r> Instance<'r> {
    pub(crate) fn new(
        view: GroupView<'r>,
        input: RawParams,
        defaults: &Selection,
        force: &Selection,
    ) -> Result<Self, ProcessingError> {
        let registry = view.registry();
        let mut instance = Self {
            view,
            content: ParamValues::new(),
            extra: IndexMap::new(),
            complemented: BTreeSet::new(),
            corrections: BTreeMap::new(),
        };
        let mut errors = BTreeMap::new();

        let mut bound: BTreeMap<ParamId, Vec<String>> = BTreeMap::new();
        let mut complement_tokens = Vec::new();
        for (key, tokens) in input {
            if key == registry.complement_key().as_str() {
                complement_tokens.extend(tokens);
            } else if let Some(id) = view.canonical(&key) {
                bound.entry(id.clone()).or_default().extend(tokens);
            } else {
                instance.extra.insert(key, Value::tokens(tokens));
            }
        }

        if !complement_tokens.is_empty()
            && let Err(err) = instance.apply_complement(&Value::tokens(complement_tokens))
        {
            tracing::debug!(param = %registry.complement_key(), error = %err, "parameter rejected");
            errors.insert(registry.complement_key().clone(), err);
        }

        let defaults = defaults.resolve(&view);
        let force = force.resolve(&view);
        let mut deletions = BTreeSet::new();
        for bucket in view.ranked() {
            for template in bucket {
                let id = template.id();
                let raw = bound.remove(id).map(Value::tokens);
                let mode = Mode {
                    forced: force.contains(id),
                    defaults: defaults.contains(id),
                    from_caller: true,
                };
                if let Err(err) = instance.process_one(template, raw, mode, &mut deletions) {
                    tracing::debug!(param = %id, error = %err, "parameter rejected");
                    errors.insert(id.clone(), err);
                }
            }
        }

        for id in &deletions {
            instance.content.remove(id);
            instance.corrections.remove(id);
        }

        if errors.is_empty() {
            Ok(instance)
        } else {
            Err(ProcessingError::new(errors))
        }
    }

    fn apply_complement(&mut self, raw: &Value) -> Result<(), ParamError> {
        let meta = self.view.registry().complement_param();
        self.complemented = match meta.process(raw)? {
            Value::Set(ids) => ids
                .into_iter()
                .filter_map(|id| id.as_str().map(ParamId::from))
                .collect(),
            _ => BTreeSet::new(),
        };
        Ok(())
    }

    /// Replace the complemented set and flip the stored values of every
    /// parameter whose membership changed.
    fn reassign_complement(&mut self, raw: &Value) -> Result<(), ParamError> {
        let previous = self.complemented.clone();
        self.apply_complement(raw)?;
        let changed: Vec<ParamId> = previous
            .symmetric_difference(&self.complemented)
            .cloned()
            .collect();
        let mut flipped = Vec::with_capacity(changed.len());
        for id in changed {
            let (Some(template), Some(value)) = (self.view.get(&id), self.content.get(&id)) else {
                continue;
            };
            match template.complement(value) {
                Ok(inverse) => flipped.push((id, inverse)),
                Err(err) => {
                    self.complemented = previous;
                    return Err(err);
                }
            }
        }
        self.content.extend(flipped);
        Ok(())
    }

    fn process_one(
        &mut self,
        template: &Template,
        raw: Option<Value>,
        mode: Mode,
        deletions: &mut BTreeSet<ParamId>,
    ) -> Result<(), ParamError> {
        let id = template.id();
        let mut raw = raw.unwrap_or(Value::Empty);
        let mut from_caller = mode.from_caller;

        if template.has_preprocessor()
            && template.consumes().iter().all(|c| self.content.contains_key(c))
        {
            let consumed: ParamValues = template
                .consumes()
                .iter()
                .filter_map(|c| self.content.get(c).map(|v| (c.clone(), v.clone())))
                .collect();
            raw = template.preprocess(&raw, &consumed)?;
            deletions.extend(template.consumes().iter().cloned());
            from_caller = false;
        }

        // Forced parameters skip the default and go through validation.
        if is_absent(&raw) && !mode.forced {
            if mode.defaults
                && let Some(default) = template.default_value()
            {
                self.content.insert(id.clone(), default.clone());
            }
            return Ok(());
        }

        let value = template.process(&raw)?;
        if value.is_blank() && !template.keep_empty() {
            return Ok(());
        }

        let clashes: Vec<ParamId> = template
            .conflicts()
            .iter()
            .filter(|c| !template.consumes().contains(*c) && !deletions.contains(*c))
            .filter(|c| self.content.contains_key(*c))
            .cloned()
            .collect();
        if !clashes.is_empty() {
            return Err(ParamError::Conflict {
                param: id.clone(),
                with: clashes,
            });
        }

        let value = if template.is_complementable() && self.complemented.contains(id) {
            template.complement(&value)?
        } else {
            value
        };

        if from_caller {
            self.track_correction(template, &raw, &value);
        }
        self.content.insert(id.clone(), value);
        Ok(())
    }

    fn track_correction(&mut self, template: &Template, raw: &Value, value: &Value) {
        let given: Vec<String> = raw
            .clone()
            .into_sequence()
            .iter()
            .map(ToString::to_string)
            .collect();
        match template.unprocess(value, &self.context(template), true) {
            Ok((canonical, _)) if canonical != given => {
                tracing::trace!(param = %template.id(), ?given, ?canonical, "input corrected");
                self.corrections.insert(
                    template.id().clone(),
                    Correction {
                        param: template.id().clone(),
                        given,
                        canonical,
                    },
                );
            }
            Ok(_) => {
                self.corrections.remove(template.id());
            }
            Err(err) => {
                tracing::debug!(param = %template.id(), error = %err, "canonical form unavailable");
            }
        }
    }

    /// Processed values of the dependencies handed to unwind/contextualize.
    fn context(&self, template: &Template) -> ParamValues {
        template
            .context_depends()
            .filter_map(|dep| self.content.get(dep).map(|v| (dep.clone(), v.clone())))
            .collect()
    }

    #[must_use]
    pub fn group(&self) -> GroupView<'r> {
        self.view
    }

    #[must_use]
    pub fn registry(&self) -> &'r Registry {
        self.view.registry()
    }

    /// Processed value for an id, slug or alias; unrecognized names fall
    /// back to the extras.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        match self.view.canonical(name) {
            Some(id) => self.content.get(id),
            None => self.extra.get(name),
        }
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Assign a value, re-running the template pipeline for that parameter
    /// as if it had been supplied (forced, so blank input is still checked).
    /// The complement key replaces the complemented set and complements the
    /// stored value of every parameter entering or leaving it; unrecognized
    /// names are stored as extras.
    ///
    /// # Errors
    /// Returns the `ParamError` of the template; the previous value is kept.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), ParamError> {
        let value = value.into();
        let registry = self.view.registry();
        if name == registry.complement_key().as_str() {
            return self.reassign_complement(&value);
        }
        let Some(template) = self.view.get(name) else {
            let tokens = value
                .into_sequence()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>();
            self.extra.insert(name.to_owned(), Value::tokens(tokens));
            return Ok(());
        };

        let id = template.id();
        let previous = self.content.remove(id);
        let mode = Mode {
            forced: true,
            defaults: false,
            from_caller: false,
        };
        let mut deletions = BTreeSet::new();
        if let Err(err) = self.process_one(template, Some(value), mode, &mut deletions) {
            if let Some(previous) = previous {
                self.content.insert(id.clone(), previous);
            }
            return Err(err);
        }
        self.corrections.remove(id);
        for consumed in &deletions {
            self.content.remove(consumed);
        }
        Ok(())
    }

    /// Remove a parameter (or extra) and return its value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        match self.view.canonical(name) {
            Some(id) => {
                self.corrections.remove(id);
                self.content.remove(id)
            }
            None => self.extra.shift_remove(name),
        }
    }

    /// Processed values keyed by canonical id.
    #[must_use]
    pub fn content(&self) -> &ParamValues {
        &self.content
    }

    /// Unrecognized input keys with their raw tokens, in input order.
    #[must_use]
    pub fn extra(&self) -> &IndexMap<String, Value> {
        &self.extra
    }

    /// Ids the input asked to be read as complements.
    #[must_use]
    pub fn complemented(&self) -> &BTreeSet<ParamId> {
        &self.complemented
    }

    /// Parameters whose canonical serialization differs from their input.
    pub fn corrections(&self) -> impl Iterator<Item = &Correction> {
        self.corrections.values()
    }

    /// Canonical query string.
    ///
    /// Parameters appear in the default group's order under their slug (or
    /// id). A value equal to its template's default is omitted unless
    /// `defaults` selects it. Set-valued parameters whose complement is
    /// shorter are written as the complement and listed under the
    /// complement key. With `extra`, unrecognized input is appended as given.
    ///
    /// # Errors
    /// Returns `ParamError::Internal` when a serialization hook fails.
    pub fn to_query_string(
        &self,
        defaults: impl Into<Selection>,
        extra: bool,
    ) -> Result<String, ParamError> {
        let registry = self.view.registry();
        let defaults: Selection = defaults.into();
        let defaults = defaults.resolve(&self.view);
        let mut pairs: Vec<(&str, Vec<String>)> = Vec::with_capacity(self.content.len() + 1);
        let mut complemented = BTreeSet::new();

        for template in registry.default_group().templates() {
            let id = template.id();
            let Some(value) = self.content.get(id) else {
                continue;
            };
            if !defaults.contains(id) && template.default_value() == Some(value) {
                continue;
            }
            let (tokens, flipped) = template.unprocess(value, &self.context(template), true)?;
            if tokens.is_empty() {
                continue;
            }
            if flipped {
                complemented.insert(Value::from(id.as_str()));
            }
            pairs.push((template.name(), tokens));
        }

        if !complemented.is_empty() {
            let meta = registry.complement_param();
            let (tokens, _) =
                meta.unprocess(&Value::Set(complemented), &ParamValues::new(), false)?;
            pairs.push((meta.name(), tokens));
        }

        if extra {
            for (key, value) in &self.extra {
                let tokens = value
                    .clone()
                    .into_sequence()
                    .iter()
                    .map(ToString::to_string)
                    .collect();
                pairs.push((key.as_str(), tokens));
            }
        }

        Ok(encoding::encode_pairs(pairs))
    }

    /// Processed values in the default group's order, keyed by slug (or id)
    /// with `use_slugs`, by id otherwise. With `include_extra`, unrecognized
    /// input follows.
    #[must_use]
    pub fn to_mapping(&self, use_slugs: bool, include_extra: bool) -> IndexMap<String, Value> {
        let mut mapping = IndexMap::with_capacity(self.content.len());
        for template in self.view.registry().default_group().templates() {
            if let Some(value) = self.content.get(template.id()) {
                let key = if use_slugs {
                    template.name()
                } else {
                    template.id().as_str()
                };
                mapping.insert(key.to_owned(), value.clone());
            }
        }
        if include_extra {
            for (key, value) in &self.extra {
                mapping
                    .entry(key.clone())
                    .or_insert_with(|| value.clone());
            }
        }
        mapping
    }
}

/// Canonical query string without defaults or extras.
impl fmt::Display for Instance<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let query = self
            .to_query_string(Selection::None, false)
            .map_err(|_| fmt::Error)?;
        f.write_str(&query)
    }
}

fn is_absent(raw: &Value) -> bool {
    match raw {
        Value::Empty => true,
        Value::List(items) => items.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::{IntegerType, SetType, StringType};

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .register(
                Template::builder("page", IntegerType::new())
                    .slug("p")
                    .alias("pg")
                    .default(1)
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
            .register(
                Template::builder("tags", StringType::new())
                    .composite(SetType)
                    .many()
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
    }

    #[test]
    fn slug_and_id_tokens_are_merged() {
        let registry = registry();
        let instance = registry.process("p=4&page=5", false, false).unwrap();
        assert_eq!(instance.get("page"), Some(&Value::Int(4)));
        let correction = instance.corrections().next().unwrap();
        assert_eq!(correction.given, vec!["4", "5"]);
        assert_eq!(correction.canonical, vec!["4"]);
    }

    #[test]
    fn unknown_keys_are_extras() {
        let registry = registry();
        let instance = registry.process("utm=x&p=2", false, false).unwrap();
        assert_eq!(instance.get("utm"), Some(&Value::tokens(["x"])));
        assert_eq!(instance.to_query_string(false, false).unwrap(), "p=2");
        assert_eq!(instance.to_query_string(false, true).unwrap(), "p=2&utm=x");
    }

    #[test]
    fn defaults_installed_only_on_request() {
        let registry = registry();
        let plain = registry.process("", false, false).unwrap();
        assert!(plain.get("page").is_none());

        let with_defaults = registry.process("", true, false).unwrap();
        assert_eq!(with_defaults.get("pg"), Some(&Value::Int(1)));
        assert_eq!(with_defaults.to_query_string(false, false).unwrap(), "");
        assert_eq!(with_defaults.to_query_string("page", false).unwrap(), "p=1");
    }

    #[test]
    fn forced_blank_input_is_validated() {
        let mut registry = Registry::new();
        registry
            .register(Template::builder("q", StringType::new()).min(1).build().unwrap())
            .unwrap();
        assert!(registry.process("", false, false).is_ok());
        let err = registry.process("", false, "q").unwrap_err();
        assert_eq!(err.get("q").unwrap().kind(), ErrorKind::Cardinality);
    }

    #[test]
    fn forcing_takes_precedence_over_defaults() {
        let mut registry = Registry::new();
        registry
            .register(
                Template::builder("q", IntegerType::new())
                    .min(1)
                    .default(5)
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let instance = registry.process("", true, false).unwrap();
        assert_eq!(instance.get("q"), Some(&Value::Int(5)));

        let err = registry.process("", true, true).unwrap_err();
        assert_eq!(err.get("q").unwrap().kind(), ErrorKind::Cardinality);

        let instance = registry.process("q=2", true, true).unwrap();
        assert_eq!(instance.get("q"), Some(&Value::Int(2)));
    }

    #[test]
    fn set_reprocesses_and_keeps_previous_on_error() {
        let registry = registry();
        let mut instance = registry.process("p=2", false, false).unwrap();
        instance.set("pg", "7").unwrap();
        assert_eq!(instance.get("page"), Some(&Value::Int(7)));

        assert!(instance.set("page", "x").is_err());
        assert_eq!(instance.get("page"), Some(&Value::Int(7)));

        instance.set("ref", "home").unwrap();
        assert_eq!(instance.extra().get("ref"), Some(&Value::tokens(["home"])));

        assert_eq!(instance.remove("p"), Some(Value::Int(7)));
        assert!(instance.get("page").is_none());
    }

    #[test]
    fn mapping_uses_slugs_or_ids() {
        let registry = registry();
        let instance = registry.process("tags=b&tags=a&p=3&x=1", false, false).unwrap();
        let by_slug = instance.to_mapping(true, false);
        assert_eq!(by_slug.keys().collect::<Vec<_>>(), vec!["p", "tags"]);
        let by_id = instance.to_mapping(false, true);
        assert_eq!(by_id.keys().collect::<Vec<_>>(), vec!["page", "tags", "x"]);
        let json = serde_json::to_value(&by_id).unwrap();
        assert_eq!(json["tags"], serde_json::json!(["a", "b"]));
    }

    #[test]
    fn display_is_the_canonical_query() {
        let registry = registry();
        let instance = registry.process("tags=b&tags=a&p=3", false, false).unwrap();
        assert_eq!(instance.to_string(), "p=3&tags=a&tags=b");
    }
}
