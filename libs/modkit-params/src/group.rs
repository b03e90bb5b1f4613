//! Ordered, alias-aware template collections with dependency ranks.
//!
//! A group never owns templates: it stores arena handles into its
//! [`Registry`](crate::Registry), so the same template can appear in the
//! default group and in any number of named groups.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::error::{ConfigError, ProcessingError};
use crate::input::RawParams;
use crate::instance::Instance;
use crate::registry::{Arena, Registry, TemplateHandle};
use crate::selection::Selection;
use crate::template::Template;
use crate::value::ParamId;

#[derive(Debug, Clone, Default)]
pub(crate) struct Group {
    name: Option<String>,
    members: IndexMap<ParamId, TemplateHandle>,
    slugs: HashMap<String, ParamId>,
    aliases: HashMap<String, ParamId>,
    ranks: HashMap<ParamId, usize>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done(usize),
}

impl Group {
    pub(crate) fn new(name: Option<String>) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    pub(crate) fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn handle(&self, id: &str) -> Option<TemplateHandle> {
        self.members.get(id).copied()
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.members.contains_key(id)
    }

    pub(crate) fn members(&self) -> impl Iterator<Item = (&ParamId, TemplateHandle)> {
        self.members.iter().map(|(id, handle)| (id, *handle))
    }

    /// Resolve an id, slug or alias to the canonical id. Ids win over slugs,
    /// slugs win over aliases.
    pub(crate) fn canonical(&self, name: &str) -> Option<&ParamId> {
        if let Some((id, _)) = self.members.get_key_value(name) {
            return Some(id);
        }
        self.slugs.get(name).or_else(|| self.aliases.get(name))
    }

    pub(crate) fn rank(&self, id: &str) -> Option<usize> {
        self.ranks.get(id).copied()
    }

    /// Install `template` under `handle`, then recompute ranks. On failure
    /// the group is left as it was.
    pub(crate) fn install(
        &mut self,
        handle: TemplateHandle,
        template: &Template,
        arena: &Arena,
    ) -> Result<(), ConfigError> {
        let id = template.id();
        if let Some(slug) = template.slug()
            && let Some(owner) = self.slugs.get(slug)
            && owner != id
        {
            return Err(ConfigError::SlugCollision {
                slug: slug.to_owned(),
                param: id.clone(),
                owner: owner.clone(),
            });
        }

        let previous = self.clone();
        self.detach(id);
        self.members.insert(id.clone(), handle);
        if let Some(slug) = template.slug() {
            self.slugs.insert(slug.to_owned(), id.clone());
        }
        for alias in template.aliases() {
            match self.aliases.get(alias) {
                Some(owner) if owner != id => {
                    tracing::debug!(
                        alias = %alias,
                        param = %id,
                        owner = %owner,
                        "alias already taken, keeping first registrant"
                    );
                }
                _ => {
                    self.aliases.insert(alias.clone(), id.clone());
                }
            }
        }

        if let Err(err) = self.recompute_ranks(arena) {
            tracing::warn!(param = %id, group = ?self.name, error = %err, "assignment rejected");
            *self = previous;
            return Err(err);
        }
        Ok(())
    }

    /// Remove a template by id, slug or alias. Returns the canonical id.
    pub(crate) fn remove(&mut self, name: &str, arena: &Arena) -> Option<ParamId> {
        let id = self.canonical(name)?.clone();
        self.detach(&id);
        // Removing a node cannot introduce a cycle.
        if let Err(err) = self.recompute_ranks(arena) {
            tracing::warn!(group = ?self.name, error = %err, "rank recomputation failed");
        }
        Some(id)
    }

    fn detach(&mut self, id: &ParamId) {
        self.members.shift_remove(id);
        self.slugs.retain(|_, owner| owner != id);
        self.aliases.retain(|_, owner| owner != id);
        self.ranks.remove(id);
    }

    /// Rank every member: `1 + max(rank(dep))` over the effective
    /// dependencies present in this group, `0` without any.
    fn recompute_ranks(&mut self, arena: &Arena) -> Result<(), ConfigError> {
        let mut marks: HashMap<ParamId, Mark> = HashMap::with_capacity(self.members.len());
        let mut stack = Vec::new();
        for id in self.members.keys() {
            self.visit(id, arena, &mut marks, &mut stack)?;
        }
        self.ranks = marks
            .into_iter()
            .filter_map(|(id, mark)| match mark {
                Mark::Done(rank) => Some((id, rank)),
                Mark::Visiting => None,
            })
            .collect();
        tracing::trace!(group = ?self.name, ranks = ?self.ranks, "ranks recomputed");
        Ok(())
    }

    fn visit(
        &self,
        id: &ParamId,
        arena: &Arena,
        marks: &mut HashMap<ParamId, Mark>,
        stack: &mut Vec<ParamId>,
    ) -> Result<usize, ConfigError> {
        match marks.get(id) {
            Some(Mark::Done(rank)) => return Ok(*rank),
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|s| s == id).unwrap_or(0);
                let mut cycle = stack[start..].to_vec();
                cycle.push(id.clone());
                return Err(ConfigError::DependencyCycle { cycle });
            }
            None => {}
        }
        let Some(template) = self.members.get(id).and_then(|h| arena.get(*h)) else {
            return Ok(0);
        };

        marks.insert(id.clone(), Mark::Visiting);
        stack.push(id.clone());
        let mut rank = 0;
        for dep in template.effective_depends() {
            if self.members.contains_key(dep) {
                rank = rank.max(self.visit(dep, arena, marks, stack)? + 1);
            }
        }
        stack.pop();
        marks.insert(id.clone(), Mark::Done(rank));
        Ok(rank)
    }

    /// Members bucketed by rank, lowest first; insertion order within a bucket.
    pub(crate) fn ranked(&self) -> Vec<Vec<TemplateHandle>> {
        let depth = self.ranks.values().copied().max().map_or(0, |max| max + 1);
        let mut buckets = vec![Vec::new(); depth];
        for (id, handle) in &self.members {
            if let Some(rank) = self.ranks.get(id) {
                buckets[*rank].push(*handle);
            }
        }
        buckets
    }
}

/// Read access to one group of a registry.
#[derive(Clone, Copy)]
pub struct GroupView<'r> {
    registry: &'r Registry,
    group: &'r Group,
}

impl<'r> GroupView<'r> {
    pub(crate) fn new(registry: &'r Registry, group: &'r Group) -> Self {
        Self { registry, group }
    }

    /// Group name; `None` for the default group.
    #[must_use]
    pub fn name(&self) -> Option<&'r str> {
        self.group.name()
    }

    #[must_use]
    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    /// Canonical id for an id, slug or alias.
    #[must_use]
    pub fn canonical(&self, name: &str) -> Option<&'r ParamId> {
        let id = self.group.canonical(name)?;
        self.get_by_id(id).map(Template::id)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&'r Template> {
        self.get_by_id(self.group.canonical(name)?)
    }

    fn get_by_id(&self, id: &str) -> Option<&'r Template> {
        self.registry.template(self.group.handle(id)?)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    #[must_use]
    pub fn rank(&self, name: &str) -> Option<usize> {
        self.group.rank(self.group.canonical(name)?)
    }

    /// Templates in registration order.
    pub fn templates(&self) -> impl Iterator<Item = &'r Template> + 'r {
        let registry = self.registry;
        self.group
            .members()
            .filter_map(move |(_, handle)| registry.template(handle))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.templates().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rank buckets, rank 0 first. The complement parameter is never a
    /// member of a group and so never appears here.
    #[must_use]
    pub fn ranked(&self) -> Vec<Vec<&'r Template>> {
        self.group
            .ranked()
            .into_iter()
            .map(|bucket| {
                bucket
                    .into_iter()
                    .filter_map(|handle| self.registry.template(handle))
                    .collect()
            })
            .collect()
    }

    /// Process `input` against this group.
    ///
    /// # Errors
    /// Returns `ProcessingError` with every rejected parameter.
    pub fn process(
        &self,
        input: impl Into<RawParams>,
        defaults: impl Into<Selection>,
        force: impl Into<Selection>,
    ) -> Result<Instance<'r>, ProcessingError> {
        Instance::new(*self, input.into(), &defaults.into(), &force.into())
    }
}

impl std::fmt::Debug for GroupView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupView")
            .field("name", &self.group.name())
            .field("members", &self.group.members.keys().collect::<Vec<_>>())
            .finish()
    }
}
