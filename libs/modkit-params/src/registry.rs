//! Template ownership: the arena, the default group, named groups and the
//! complement meta-parameter.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{ConfigError, ProcessingError};
use crate::group::{Group, GroupView};
use crate::input::RawParams;
use crate::instance::Instance;
use crate::selection::Selection;
use crate::template::Template;
use crate::types::{ChoiceType, SetType};
use crate::value::{ParamId, Value};

/// Default id of the complement meta-parameter.
pub const DEFAULT_COMPLEMENT_KEY: &str = "complement";

static NEXT_REGISTRY: AtomicU64 = AtomicU64::new(1);

/// Stable reference to a template owned by one [`Registry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TemplateHandle {
    registry: u64,
    slot: usize,
}

/// Slot storage for templates. Removed templates leave a tombstone so stale
/// handles resolve to nothing.
#[derive(Debug)]
pub(crate) struct Arena {
    uid: u64,
    slots: Vec<Option<Template>>,
}

impl Arena {
    fn new() -> Self {
        Self {
            uid: NEXT_REGISTRY.fetch_add(1, Ordering::Relaxed),
            slots: Vec::new(),
        }
    }

    pub(crate) fn get(&self, handle: TemplateHandle) -> Option<&Template> {
        if handle.registry != self.uid {
            return None;
        }
        self.slots.get(handle.slot)?.as_ref()
    }

    fn insert(&mut self, template: Template) -> TemplateHandle {
        self.slots.push(Some(template));
        TemplateHandle {
            registry: self.uid,
            slot: self.slots.len() - 1,
        }
    }

    fn remove(&mut self, handle: TemplateHandle) -> Option<Template> {
        if handle.registry != self.uid {
            return None;
        }
        self.slots.get_mut(handle.slot)?.take()
    }

    fn owns(&self, handle: TemplateHandle) -> bool {
        handle.registry == self.uid
    }

    fn templates(&self) -> impl Iterator<Item = &Template> {
        self.slots.iter().flatten()
    }
}

/// Where [`Registry::assign`] takes its template from.
#[derive(Debug)]
pub enum TemplateSource {
    /// The template already registered under the same id.
    Existing,
    /// A template of this registry, by handle.
    Handle(TemplateHandle),
    /// A new template, registered in the default group first.
    Spec(Box<Template>),
}

impl From<TemplateHandle> for TemplateSource {
    fn from(handle: TemplateHandle) -> Self {
        TemplateSource::Handle(handle)
    }
}

impl From<Template> for TemplateSource {
    fn from(template: Template) -> Self {
        TemplateSource::Spec(Box::new(template))
    }
}

impl From<Option<Template>> for TemplateSource {
    fn from(template: Option<Template>) -> Self {
        template.map_or(TemplateSource::Existing, Into::into)
    }
}

/// Owner of every template, the default group and any named groups.
///
/// Named groups reference the same templates as the default group; a template
/// is never copied between groups.
#[derive(Debug)]
pub struct Registry {
    arena: Arena,
    default: Group,
    groups: BTreeMap<String, Group>,
    complement_key: ParamId,
    complement: Template,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::with_complement_key(DEFAULT_COMPLEMENT_KEY)
    }

    /// Registry whose complement meta-parameter is read and written under `key`.
    #[must_use]
    pub fn with_complement_key(key: impl Into<ParamId>) -> Self {
        let complement_key = key.into();
        let complement = complement_template(&complement_key, &[]);
        Self {
            arena: Arena::new(),
            default: Group::new(None),
            groups: BTreeMap::new(),
            complement_key,
            complement,
        }
    }

    /// Register a new template in the default group.
    ///
    /// # Errors
    /// See [`Registry::assign`].
    pub fn register(&mut self, template: Template) -> Result<TemplateHandle, ConfigError> {
        let id = template.id().clone();
        self.assign(None, id, template)
    }

    /// Install a template under `id` in `group` (the default group for
    /// `None`). Templates new to the registry are registered in the default
    /// group first; a named group is created on first use.
    ///
    /// # Errors
    /// Returns `ConfigError` when the source cannot be resolved, the id is
    /// taken or reserved, a dependency is unknown, a slug collides, or the
    /// assignment would introduce a dependency cycle.
    pub fn assign(
        &mut self,
        group: Option<&str>,
        id: impl Into<ParamId>,
        source: impl Into<TemplateSource>,
    ) -> Result<TemplateHandle, ConfigError> {
        self.install(group, id.into(), source.into())
            .map(|(handle, _)| handle)
    }

    /// [`Registry::assign`], also reporting whether the template was created.
    fn install(
        &mut self,
        group: Option<&str>,
        id: ParamId,
        source: TemplateSource,
    ) -> Result<(TemplateHandle, bool), ConfigError> {
        let (handle, created) = match source {
            TemplateSource::Existing => {
                let handle = self
                    .default
                    .handle(&id)
                    .ok_or_else(|| ConfigError::UnknownTemplate(id.to_string()))?;
                (handle, false)
            }
            TemplateSource::Handle(handle) => {
                if !self.arena.owns(handle) {
                    return Err(ConfigError::ForeignTemplate);
                }
                let template = self
                    .arena
                    .get(handle)
                    .ok_or_else(|| ConfigError::UnknownTemplate(id.to_string()))?;
                if template.id() != &id {
                    return Err(ConfigError::IdMismatch {
                        expected: id,
                        found: template.id().clone(),
                    });
                }
                (handle, false)
            }
            TemplateSource::Spec(template) => (self.create(&id, *template)?, true),
        };

        if let Some(name) = group {
            let group = self
                .groups
                .entry(name.to_owned())
                .or_insert_with(|| Group::new(Some(name.to_owned())));
            let installed = match self.arena.get(handle) {
                Some(template) => group.install(handle, template, &self.arena),
                None => Err(ConfigError::UnknownTemplate(id.to_string())),
            };
            if let Err(err) = installed {
                if created {
                    self.discard(&id, handle);
                }
                return Err(err);
            }
        }

        tracing::debug!(param = %id, group = ?group, "template assigned");
        Ok((handle, created))
    }

    /// Drop a template created by a failed assignment.
    fn discard(&mut self, id: &ParamId, handle: TemplateHandle) {
        self.default.remove(id, &self.arena);
        self.arena.remove(handle);
        self.rebuild_complement();
        tracing::debug!(param = %id, "created template rolled back");
    }

    fn create(&mut self, id: &ParamId, template: Template) -> Result<TemplateHandle, ConfigError> {
        if template.id() != id {
            return Err(ConfigError::IdMismatch {
                expected: id.clone(),
                found: template.id().clone(),
            });
        }
        if *id == self.complement_key || template.slug() == Some(self.complement_key.as_str()) {
            return Err(ConfigError::ReservedId(id.clone()));
        }
        if self.default.contains(id) {
            return Err(ConfigError::DuplicateTemplate(id.clone()));
        }
        if let Some(dependency) = template
            .depends()
            .iter()
            .chain(template.consumes())
            .find(|dep| !self.default.contains(dep))
        {
            return Err(ConfigError::UnknownDependency {
                param: id.clone(),
                dependency: dependency.clone(),
            });
        }

        let handle = self.arena.insert(template);
        let installed = match self.arena.get(handle) {
            Some(template) => self.default.install(handle, template, &self.arena),
            None => Err(ConfigError::UnknownTemplate(id.to_string())),
        };
        if let Err(err) = installed {
            self.arena.remove(handle);
            return Err(err);
        }
        self.rebuild_complement();
        Ok(handle)
    }

    /// Replace the named group with `entries`, assigned in order. On failure
    /// the previous group is restored and templates created by earlier
    /// entries are removed again.
    ///
    /// # Errors
    /// See [`Registry::assign`].
    pub fn set_group<I, K, S>(&mut self, name: &str, entries: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (K, S)>,
        K: Into<ParamId>,
        S: Into<TemplateSource>,
    {
        let previous = self
            .groups
            .insert(name.to_owned(), Group::new(Some(name.to_owned())));
        let mut created = Vec::new();
        for (id, source) in entries {
            let id: ParamId = id.into();
            match self.install(Some(name), id.clone(), source.into()) {
                Ok((handle, true)) => created.push((id, handle)),
                Ok(_) => {}
                Err(err) => {
                    match previous {
                        Some(group) => self.groups.insert(name.to_owned(), group),
                        None => self.groups.remove(name),
                    };
                    for (id, handle) in created.into_iter().rev() {
                        self.discard(&id, handle);
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Remove a template (by id, slug or alias) from the registry. The
    /// removal cascades to every named group.
    pub fn remove(&mut self, name: &str) -> Option<ParamId> {
        let id = self.default.canonical(name)?.clone();
        let handle = self.default.handle(&id)?;
        self.default.remove(&id, &self.arena);
        for group in self.groups.values_mut() {
            if group.remove(&id, &self.arena).is_some() {
                tracing::debug!(param = %id, group = ?group.name(), "cascaded template removal");
            }
        }
        self.arena.remove(handle);
        self.rebuild_complement();
        tracing::debug!(param = %id, "template removed");
        Some(id)
    }

    /// Remove a template from one named group only; the default group
    /// (`None`) cascades as [`Registry::remove`]. Returns the canonical id,
    /// or `None` when the group has no such member.
    ///
    /// # Errors
    /// Returns `ConfigError::UnknownGroup` when the named group does not exist.
    pub fn remove_from_group(
        &mut self,
        group: Option<&str>,
        name: &str,
    ) -> Result<Option<ParamId>, ConfigError> {
        match group {
            None => Ok(self.remove(name)),
            Some(group) => {
                let members = self
                    .groups
                    .get_mut(group)
                    .ok_or_else(|| ConfigError::UnknownGroup(group.to_owned()))?;
                Ok(members.remove(name, &self.arena))
            }
        }
    }

    /// Drop a named group. Its templates stay registered.
    pub fn remove_group(&mut self, name: &str) -> bool {
        self.groups.remove(name).is_some()
    }

    #[must_use]
    pub fn default_group(&self) -> GroupView<'_> {
        GroupView::new(self, &self.default)
    }

    #[must_use]
    pub fn group(&self, name: &str) -> Option<GroupView<'_>> {
        self.groups.get(name).map(|group| GroupView::new(self, group))
    }

    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    /// Template by id, slug or alias in the default group.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Template> {
        self.default_group().get(name)
    }

    #[must_use]
    pub fn handle(&self, name: &str) -> Option<TemplateHandle> {
        self.default.handle(self.default.canonical(name)?)
    }

    /// Resolve a handle. Handles of removed templates or of another registry
    /// resolve to `None`.
    #[must_use]
    pub fn template(&self, handle: TemplateHandle) -> Option<&Template> {
        self.arena.get(handle)
    }

    #[must_use]
    pub fn complement_key(&self) -> &ParamId {
        &self.complement_key
    }

    /// The meta-parameter listing which parameters are serialized as their
    /// complement.
    #[must_use]
    pub fn complement_param(&self) -> &Template {
        &self.complement
    }

    /// Recompute every template's universe.
    ///
    /// # Errors
    /// Returns `ProcessingError` with every template whose universe could not
    /// be computed; the others are still refreshed.
    pub fn refresh(&self) -> Result<(), ProcessingError> {
        let mut errors = BTreeMap::new();
        for template in self.arena.templates() {
            if let Err(err) = template.refresh() {
                tracing::debug!(param = %template.id(), error = %err, "universe refresh failed");
                errors.insert(template.id().clone(), err);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProcessingError::new(errors))
        }
    }

    /// Process `input` against the default group.
    ///
    /// # Errors
    /// Returns `ProcessingError` with every rejected parameter.
    pub fn process(
        &self,
        input: impl Into<RawParams>,
        defaults: impl Into<Selection>,
        force: impl Into<Selection>,
    ) -> Result<Instance<'_>, ProcessingError> {
        self.default_group().process(input, defaults, force)
    }

    fn rebuild_complement(&mut self) {
        let capable: Vec<&Template> = self
            .default_group()
            .templates()
            .filter(|t| t.is_complementable())
            .collect();
        self.complement = complement_template(&self.complement_key, &capable);
    }
}

/// The complement meta-parameter: a set of complement-capable ids, accepted
/// by id or slug and serialized as sorted slugs.
fn complement_template(key: &ParamId, capable: &[&Template]) -> Template {
    let mut choice = ChoiceType::new(capable.iter().map(|t| t.id().as_str()));
    let mut names = HashMap::with_capacity(capable.len());
    for template in capable {
        if let Some(slug) = template.slug() {
            choice = choice.with_spelling(slug, template.id().as_str());
        }
        names.insert(template.id().to_string(), template.name().to_owned());
    }
    let universe = Value::set(capable.iter().map(|t| Value::from(t.id().as_str())));

    Template::builder(key.clone(), choice)
        .composite(SetType)
        .many()
        .universe_values(universe)
        .contextualize(move |_, ids, _| {
            let mut rendered: Vec<Value> = ids
                .into_iter()
                .map(|id| match id {
                    Value::Str(id) => Value::Str(names.get(&id).cloned().unwrap_or(id)),
                    other => other,
                })
                .collect();
            rendered.sort();
            Ok(rendered)
        })
        .assemble()
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::types::{IntegerType, StringType};

    fn int(id: &str) -> Template {
        Template::builder(id, IntegerType::new()).build().unwrap()
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let mut registry = Registry::new();
        let t = Template::builder("b", IntegerType::new())
            .depends("a")
            .build()
            .unwrap();
        let err = registry.register(t).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownDependency { .. }));
        assert!(registry.get("b").is_none());
    }

    #[test]
    fn duplicate_and_reserved_ids() {
        let mut registry = Registry::new();
        registry.register(int("a")).unwrap();
        assert!(matches!(
            registry.register(int("a")).unwrap_err(),
            ConfigError::DuplicateTemplate(_)
        ));
        assert!(matches!(
            registry.register(int("complement")).unwrap_err(),
            ConfigError::ReservedId(_)
        ));
    }

    #[test]
    fn handles_from_other_registries_are_foreign() {
        let mut one = Registry::new();
        let mut two = Registry::new();
        let handle = one.register(int("a")).unwrap();
        let err = two.assign(Some("g"), "a", handle).unwrap_err();
        assert!(matches!(err, ConfigError::ForeignTemplate));
        assert!(two.template(handle).is_none());
    }

    #[test]
    fn id_mismatch_is_rejected() {
        let mut registry = Registry::new();
        let handle = registry.register(int("a")).unwrap();
        let err = registry.assign(Some("g"), "b", handle).unwrap_err();
        assert!(matches!(err, ConfigError::IdMismatch { .. }));
    }

    #[test]
    fn slug_collision_is_rejected() {
        let mut registry = Registry::new();
        registry
            .register(Template::builder("a", StringType::new()).slug("x").build().unwrap())
            .unwrap();
        let err = registry
            .register(Template::builder("b", StringType::new()).slug("x").build().unwrap())
            .unwrap_err();
        assert!(matches!(err, ConfigError::SlugCollision { .. }));
        assert!(registry.get("b").is_none());
    }

    #[test]
    fn cycle_through_readded_template_is_reported() {
        let mut registry = Registry::new();
        registry.register(int("a")).unwrap();
        registry
            .register(Template::builder("b", IntegerType::new()).depends("a").build().unwrap())
            .unwrap();
        registry.remove("a");
        let err = registry
            .register(Template::builder("a", IntegerType::new()).depends("b").build().unwrap())
            .unwrap_err();
        match err {
            ConfigError::DependencyCycle { cycle } => {
                assert_eq!(cycle.first(), cycle.last());
                assert!(cycle.len() >= 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(registry.get("a").is_none());
        assert_eq!(registry.default_group().rank("b"), Some(0));
    }

    #[test]
    fn complement_universe_tracks_capable_templates() {
        let mut registry = Registry::new();
        registry
            .register(
                Template::builder("tags", StringType::new())
                    .composite(SetType)
                    .many()
                    .universe_values(Value::tokens(["x", "y"]))
                    .set_complement()
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry.register(int("page")).unwrap();

        let universe = registry.complement_param().universe().unwrap().unwrap();
        assert_eq!(universe, Value::set([Value::from("tags")]));

        registry.remove("tags");
        let universe = registry.complement_param().universe().unwrap().unwrap();
        assert_eq!(universe, Value::Set(std::collections::BTreeSet::new()));
    }
}
