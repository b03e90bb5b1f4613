//! The `defaults` / `force` option: everything, nothing, or a set of names.

use std::collections::BTreeSet;

use crate::group::GroupView;
use crate::value::ParamId;

/// Which parameters an option applies to.
///
/// Names are resolved through the active group, so an id, slug or alias
/// all select the same template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Selection {
    #[default]
    None,
    All,
    Only(BTreeSet<String>),
}

impl Selection {
    /// Select a single name.
    #[must_use]
    pub fn one(name: impl Into<String>) -> Self {
        Selection::Only(BTreeSet::from([name.into()]))
    }

    /// Resolve the selected names to canonical ids of `group`. Unknown names
    /// are ignored.
    pub(crate) fn resolve(&self, group: &GroupView<'_>) -> Resolved {
        match self {
            Selection::None => Resolved::None,
            Selection::All => Resolved::All,
            Selection::Only(names) => Resolved::Only(
                names
                    .iter()
                    .filter_map(|name| group.canonical(name).cloned())
                    .collect(),
            ),
        }
    }
}

/// A [`Selection`] resolved against one group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) enum Resolved {
    #[default]
    None,
    All,
    Only(BTreeSet<ParamId>),
}

impl Resolved {
    pub(crate) fn contains(&self, id: &str) -> bool {
        match self {
            Resolved::None => false,
            Resolved::All => true,
            Resolved::Only(ids) => ids.contains(id),
        }
    }
}

impl From<bool> for Selection {
    fn from(all: bool) -> Self {
        if all { Selection::All } else { Selection::None }
    }
}

impl From<&str> for Selection {
    fn from(name: &str) -> Self {
        Selection::one(name)
    }
}

impl From<String> for Selection {
    fn from(name: String) -> Self {
        Selection::one(name)
    }
}

impl From<&ParamId> for Selection {
    fn from(id: &ParamId) -> Self {
        Selection::one(id.as_str())
    }
}

impl<S: Into<String>> From<Vec<S>> for Selection {
    fn from(names: Vec<S>) -> Self {
        Selection::Only(names.into_iter().map(Into::into).collect())
    }
}

impl<S: Into<String>, const N: usize> From<[S; N]> for Selection {
    fn from(names: [S; N]) -> Self {
        Selection::Only(names.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeSet<String>> for Selection {
    fn from(names: BTreeSet<String>) -> Self {
        Selection::Only(names)
    }
}
