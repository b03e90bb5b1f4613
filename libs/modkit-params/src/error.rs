//! Error taxonomy for parameter processing.
//!
//! Runtime failures are argument-level: a single parameter fails with a
//! [`ParamError`], and an instance run collects those into one
//! [`ProcessingError`]. Schema mistakes surface immediately as [`ConfigError`].

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::value::ParamId;

/// Boxed failure raised by a user-supplied hook (preprocessor, unwind, ...).
pub type HookError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A raw value could not be coerced by a scalar or composite type.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid value '{value}': {reason}")]
pub struct CoercionError {
    pub value: String,
    pub reason: String,
}

impl CoercionError {
    pub fn new(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Stable classification of a [`ParamError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Syntax,
    Cardinality,
    Conflict,
    Dependency,
    Internal,
}

impl ErrorKind {
    /// Machine-readable code, suitable for API payloads.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Syntax => "params.syntax",
            ErrorKind::Cardinality => "params.cardinality",
            ErrorKind::Conflict => "params.conflict",
            ErrorKind::Dependency => "params.dependency",
            ErrorKind::Internal => "params.internal",
        }
    }

    /// Conflicts are a specialization of dependency failures.
    #[must_use]
    pub fn is_dependency(self) -> bool {
        matches!(self, ErrorKind::Dependency | ErrorKind::Conflict)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Failure of a single parameter.
#[derive(thiserror::Error, Debug)]
pub enum ParamError {
    #[error("parameter '{param}': {source}")]
    Syntax {
        param: ParamId,
        #[source]
        source: CoercionError,
    },

    #[error("parameter '{param}' needs at least {min} value(s), got {got}")]
    Cardinality {
        param: ParamId,
        min: usize,
        got: usize,
    },

    #[error("parameter '{param}' cannot be combined with {}", join_ids(.with))]
    Conflict { param: ParamId, with: Vec<ParamId> },

    #[error("parameter '{param}' requires {}", join_ids(.missing))]
    Dependency {
        param: ParamId,
        missing: Vec<ParamId>,
    },

    #[error("parameter '{param}': {stage} failed: {source}")]
    Internal {
        param: ParamId,
        stage: &'static str,
        #[source]
        source: HookError,
    },
}

impl ParamError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            ParamError::Syntax { .. } => ErrorKind::Syntax,
            ParamError::Cardinality { .. } => ErrorKind::Cardinality,
            ParamError::Conflict { .. } => ErrorKind::Conflict,
            ParamError::Dependency { .. } => ErrorKind::Dependency,
            ParamError::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Id of the parameter this error is reported against.
    #[must_use]
    pub fn param(&self) -> &ParamId {
        match self {
            ParamError::Syntax { param, .. }
            | ParamError::Cardinality { param, .. }
            | ParamError::Conflict { param, .. }
            | ParamError::Dependency { param, .. }
            | ParamError::Internal { param, .. } => param,
        }
    }

    pub(crate) fn internal(param: &ParamId, stage: &'static str, source: HookError) -> Self {
        ParamError::Internal {
            param: param.clone(),
            stage,
            source,
        }
    }
}

fn join_ids(ids: &[ParamId]) -> String {
    ids.iter()
        .map(|id| format!("'{id}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Signal that the canonical form of a parameter differs from what was supplied.
///
/// Corrections are informational and never fail processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Correction {
    pub param: ParamId,
    pub given: Vec<String>,
    pub canonical: Vec<String>,
}

/// Field-level report entry, shaped like an RFC 9457 validation violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    /// Canonical parameter id.
    pub field: String,
    /// Human-readable message.
    pub message: String,
    /// Machine-readable error code, see [`ErrorKind::code`].
    pub code: String,
}

/// Aggregate error of an instance run: every failed parameter, keyed by id.
#[derive(thiserror::Error, Debug)]
#[error("{} parameter(s) rejected: {}", .errors.len(), summarize(.errors))]
pub struct ProcessingError {
    errors: BTreeMap<ParamId, ParamError>,
}

impl ProcessingError {
    pub(crate) fn new(errors: BTreeMap<ParamId, ParamError>) -> Self {
        Self { errors }
    }

    #[must_use]
    pub fn errors(&self) -> &BTreeMap<ParamId, ParamError> {
        &self.errors
    }

    #[must_use]
    pub fn get(&self, param: &str) -> Option<&ParamError> {
        self.errors.get(param)
    }

    #[must_use]
    pub fn into_errors(self) -> BTreeMap<ParamId, ParamError> {
        self.errors
    }

    /// Flatten into per-field violations, ordered by parameter id.
    #[must_use]
    pub fn violations(&self) -> Vec<FieldViolation> {
        self.errors
            .iter()
            .map(|(id, err)| FieldViolation {
                field: id.to_string(),
                message: err.to_string(),
                code: err.kind().code().to_owned(),
            })
            .collect()
    }
}

fn summarize(errors: &BTreeMap<ParamId, ParamError>) -> String {
    errors
        .values()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Schema-time failure. These indicate a programming error in the parameter
/// schema rather than bad runtime input.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("template id must not be empty")]
    EmptyId,

    #[error("template '{param}': min ({min}) exceeds max ({max})")]
    InvalidCardinality {
        param: ParamId,
        min: usize,
        max: usize,
    },

    #[error("template '{param}': max must be positive")]
    ZeroMax { param: ParamId },

    #[error("template '{param}': invalid default value: {source}")]
    InvalidDefault {
        param: ParamId,
        #[source]
        source: Box<ParamError>,
    },

    #[error("template '{param}': invalid pattern: {source}")]
    InvalidPattern {
        param: ParamId,
        #[source]
        source: regex::Error,
    },

    #[error("template '{param}' depends on unknown template '{dependency}'")]
    UnknownDependency { param: ParamId, dependency: ParamId },

    #[error("template '{0}' is already registered")]
    DuplicateTemplate(ParamId),

    #[error("slug '{slug}' of template '{param}' is already used by '{owner}'")]
    SlugCollision {
        slug: String,
        param: ParamId,
        owner: ParamId,
    },

    #[error("id '{0}' is reserved for the complement parameter")]
    ReservedId(ParamId),

    #[error("dependency cycle: {}", .cycle.iter().map(ToString::to_string).collect::<Vec<_>>().join(" -> "))]
    DependencyCycle { cycle: Vec<ParamId> },

    #[error("unknown template '{0}'")]
    UnknownTemplate(String),

    #[error("unknown group '{0}'")]
    UnknownGroup(String),

    #[error("template handle does not belong to this registry")]
    ForeignTemplate,

    #[error("template '{found}' cannot be assigned as '{expected}'")]
    IdMismatch { expected: ParamId, found: ParamId },

    #[error("failed to load parameter schema: {0}")]
    Load(#[source] Box<figment::Error>),
}
