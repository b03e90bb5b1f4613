//! Schema-driven codec for named query parameters.
//!
//! Templates describe one parameter each (coercion, cardinality, composite
//! values, dependencies); a [`Registry`] owns them and groups them; an
//! [`Instance`] is one input processed against a group, which serializes
//! back to a canonical query string.
//!
//! ```rust,ignore
//! use modkit_params::{IntegerType, RangeType, Registry, Template, Value};
//!
//! let mut registry = Registry::new();
//! registry.register(
//!     Template::builder("boundary", IntegerType::new())
//!         .composite(RangeType)
//!         .cardinality(1, Some(2))
//!         .default(Value::range(Value::Int(1), Value::Int(100)))
//!         .build()?,
//! )?;
//!
//! let instance = registry.process("boundary=1&boundary=10", false, false)?;
//! assert_eq!(instance.to_query_string(false, false)?, "boundary=1&boundary=10");
//! ```
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod config;
pub mod encoding;
pub mod error;
pub mod group;
pub mod input;
pub mod instance;
pub mod registry;
pub mod selection;
pub mod template;
pub mod types;
pub mod value;

pub use config::{CompositeKind, ParamsConfig, ScalarKind, TemplateConfig};
pub use error::{
    ConfigError, CoercionError, Correction, ErrorKind, FieldViolation, HookError, ParamError,
    ProcessingError,
};
pub use group::GroupView;
pub use input::RawParams;
pub use instance::Instance;
pub use registry::{DEFAULT_COMPLEMENT_KEY, Registry, TemplateHandle, TemplateSource};
pub use selection::Selection;
pub use template::{Format, Template, TemplateBuilder};
pub use types::{
    BooleanType, ChoiceType, CompositeType, DateType, IntegerType, RangeType, ScalarType, SetType,
    StringType,
};
pub use value::{ParamId, ParamValues, Value};
