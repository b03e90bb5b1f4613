#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Building registries from declarative schemas.

use figment::Figment;
use figment::providers::{Format, Serialized, Yaml};
use modkit_params::{ConfigError, ParamsConfig, Registry, Value};
use serde_json::json;

const SCHEMA: &str = r"
complement_key: without
templates:
  - id: page
    slug: p
    type: { kind: integer, min: 1 }
    default: ['1']
  - id: sort
    type: { kind: choice, values: [name, date] }
    conflicts: [random]
  - id: random
    type: { kind: boolean }
    conflicts: [sort]
  - id: status
    slug: s
    type: { kind: choice, values: [open, closed, draft, archived] }
    composite: set
    max: ~
    universe: [open, closed, draft, archived]
    complement: true
  - id: price
    type: { kind: integer }
    composite: range
    min: 1
    max: 2
    format: '{}'
groups:
  listing: [page, status]
";

fn registry() -> Registry {
    let config = ParamsConfig::from_figment(&Figment::new().merge(Yaml::string(SCHEMA))).unwrap();
    Registry::from_config(&config).unwrap()
}

#[test]
fn schema_builds_templates_and_groups() {
    let registry = registry();
    assert_eq!(registry.complement_key().as_str(), "without");
    assert_eq!(registry.default_group().len(), 5);
    assert_eq!(registry.get("p").unwrap().default_value(), Some(&Value::Int(1)));

    let listing = registry.group("listing").unwrap();
    let ids: Vec<_> = listing.templates().map(|t| t.id().as_str()).collect();
    assert_eq!(ids, vec!["page", "status"]);
}

#[test]
fn configured_templates_process_and_serialize() {
    let registry = registry();
    let instance = registry
        .process("s=open&s=closed&s=draft&price=10&price=20&p=1", false, false)
        .unwrap();
    assert_eq!(
        instance.to_query_string(false, false).unwrap(),
        "s=archived&price=10&price=20&without=s"
    );
    assert_eq!(
        instance.to_query_string(true, false).unwrap(),
        "p=1&s=archived&price=10&price=20&without=s"
    );

    let err = registry.process("sort=name&random=yes", false, false).unwrap_err();
    assert!(err.get("random").is_some());
}

#[test]
fn schema_loads_from_yaml_file() {
    let path = std::env::temp_dir().join(format!("modkit-params-{}.yaml", std::process::id()));
    std::fs::write(&path, SCHEMA).unwrap();
    let config = ParamsConfig::from_yaml_file(&path);
    std::fs::remove_file(&path).unwrap();

    let config = config.unwrap();
    assert_eq!(config.templates.len(), 5);
    assert_eq!(config.groups["listing"], vec!["page", "status"]);
}

#[test]
fn missing_file_is_a_load_error() {
    let err = ParamsConfig::from_yaml_file("/nonexistent/params.yaml").unwrap_err();
    assert!(matches!(err, ConfigError::Load(_)));
}

#[test]
fn dependency_order_is_enforced() {
    let config = ParamsConfig::from_figment(&Figment::new().merge(Serialized::defaults(json!({
        "templates": [
            { "id": "offset", "type": { "kind": "integer" }, "depends": ["page"] },
            { "id": "page", "type": { "kind": "integer" } }
        ]
    }))))
    .unwrap();
    let err = Registry::from_config(&config).unwrap_err();
    assert!(matches!(
        err,
        ConfigError::UnknownDependency { ref param, ref dependency }
            if param.as_str() == "offset" && dependency.as_str() == "page"
    ));
}

#[test]
fn unknown_group_member_is_rejected() {
    let config = ParamsConfig::from_figment(&Figment::new().merge(Serialized::defaults(json!({
        "templates": [{ "id": "page" }],
        "groups": { "listing": ["page", "ghost"] }
    }))))
    .unwrap();
    let err = Registry::from_config(&config).unwrap_err();
    assert!(matches!(err, ConfigError::UnknownTemplate(ref id) if id == "ghost"));
}
