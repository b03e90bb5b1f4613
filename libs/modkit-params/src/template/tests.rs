use super::*;
use crate::error::ErrorKind;
use crate::types::{ChoiceType, DateType, IntegerType, RangeType, SetType, StringType};

fn letters() -> Value {
    Value::set(["a", "b", "c", "d", "e"].map(Value::from))
}

fn letter_set() -> Template {
    Template::builder("letters", ChoiceType::new(["a", "b", "c", "d", "e"]))
        .composite(SetType)
        .many()
        .universe_values(letters())
        .set_complement()
        .build()
        .unwrap()
}

#[test]
fn single_value_requires_one_token() {
    let t = Template::builder("page", IntegerType::new())
        .cardinality(1, Some(1))
        .build()
        .unwrap();

    let err = t.process(&Value::tokens(Vec::<String>::new())).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cardinality);

    let v = t.process(&Value::tokens(["3", "4", "5"])).unwrap();
    assert_eq!(v, Value::Int(3));
}

#[test]
fn shift_from_back_keeps_trailing_values() {
    let t = Template::builder("page", IntegerType::new())
        .shift_from_back()
        .build()
        .unwrap();
    assert_eq!(t.process(&Value::tokens(["3", "4", "5"])).unwrap(), Value::Int(5));

    let many = Template::builder("ids", IntegerType::new())
        .cardinality(0, Some(2))
        .shift_from_back()
        .build()
        .unwrap();
    assert_eq!(
        many.process(&Value::tokens(["1", "2", "3"])).unwrap(),
        Value::List(vec![Value::Int(2), Value::Int(3)])
    );
}

#[test]
fn syntax_error_carries_value_and_id() {
    let t = Template::builder("page", IntegerType::new()).build().unwrap();
    let err = t.process(&Value::from("abc")).unwrap_err();
    match err {
        ParamError::Syntax { param, source } => {
            assert_eq!(param.as_str(), "page");
            assert_eq!(source.value, "abc");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn blank_tokens_are_dropped_or_kept() {
    let dropping = Template::builder("tags", StringType::new())
        .many()
        .build()
        .unwrap();
    assert_eq!(
        dropping.process(&Value::tokens(["a", "", "b"])).unwrap(),
        Value::List(vec![Value::from("a"), Value::from("b")])
    );

    let keeping = Template::builder("tags", StringType::new())
        .many()
        .keep_empty()
        .build()
        .unwrap();
    assert_eq!(
        keeping.process(&Value::tokens(["a", ""])).unwrap(),
        Value::List(vec![Value::from("a"), Value::Empty])
    );

    let single = Template::builder("q", StringType::new())
        .keep_empty()
        .build()
        .unwrap();
    assert_eq!(single.process(&Value::from("")).unwrap(), Value::Empty);
    assert_eq!(
        single.unprocess(&Value::Empty, &ParamValues::new(), false).unwrap(),
        (vec![String::new()], false)
    );
}

#[test]
fn processing_a_processed_composite_is_a_noop() {
    let t = Template::builder("pages", IntegerType::new())
        .composite(RangeType)
        .cardinality(1, Some(2))
        .build()
        .unwrap();
    let once = t.process(&Value::tokens(["1", "10"])).unwrap();
    assert_eq!(once, Value::range(Value::Int(1), Value::Int(10)));
    assert_eq!(t.process(&once).unwrap(), once);
}

#[test]
fn reversed_range_round_trips() {
    let t = Template::builder("window", IntegerType::new())
        .composite(RangeType)
        .cardinality(1, Some(2))
        .reverse()
        .build()
        .unwrap();
    let v = t.process(&Value::tokens(["10", "1"])).unwrap();
    assert_eq!(v, Value::range(Value::Int(1), Value::Int(10)));
    let (tokens, _) = t.unprocess(&v, &ParamValues::new(), false).unwrap();
    assert_eq!(tokens, vec!["10", "1"]);
}

#[test]
fn reverse_leaves_plain_lists_alone() {
    let t = Template::builder("labels", StringType::new())
        .many()
        .reverse()
        .build()
        .unwrap();
    let once = t.process(&Value::tokens(["a", "b"])).unwrap();
    assert_eq!(once, Value::List(vec![Value::from("a"), Value::from("b")]));
    assert_eq!(t.process(&once).unwrap(), once);
    let (tokens, _) = t.unprocess(&once, &ParamValues::new(), false).unwrap();
    assert_eq!(tokens, vec!["a", "b"]);
}

#[test]
fn default_is_validated_and_canonical() {
    let t = Template::builder("flag", crate::types::BooleanType)
        .default("yes")
        .build()
        .unwrap();
    assert_eq!(t.default_value(), Some(&Value::Bool(true)));

    let err = Template::builder("page", IntegerType::new())
        .default("x")
        .build()
        .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidDefault { .. }));
}

#[test]
fn invalid_cardinality_is_rejected() {
    let err = Template::builder("x", IntegerType::new())
        .cardinality(3, Some(2))
        .build()
        .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidCardinality { min: 3, max: 2, .. }));

    let err = Template::builder("x", IntegerType::new())
        .cardinality(0, Some(0))
        .build()
        .unwrap_err();
    assert!(matches!(err, ConfigError::ZeroMax { .. }));
}

#[test]
fn complement_substitutes_only_when_shorter() {
    let t = letter_set();
    let nearly_all = t.process(&Value::tokens(["a", "b", "c", "d"])).unwrap();
    let (tokens, flipped) = t.unprocess(&nearly_all, &ParamValues::new(), true).unwrap();
    assert!(flipped);
    assert_eq!(tokens, vec!["e"]);

    let few = t.process(&Value::tokens(["a"])).unwrap();
    let (tokens, flipped) = t.unprocess(&few, &ParamValues::new(), true).unwrap();
    assert!(!flipped);
    assert_eq!(tokens, vec!["a"]);

    let (tokens, flipped) = t.unprocess(&nearly_all, &ParamValues::new(), false).unwrap();
    assert!(!flipped);
    assert_eq!(tokens.len(), 4);
}

#[test]
fn full_universe_is_not_complemented_to_nothing() {
    let t = letter_set();
    let all = t.process(&letters()).unwrap();
    let (tokens, flipped) = t.unprocess(&all, &ParamValues::new(), true).unwrap();
    assert!(!flipped);
    assert_eq!(tokens.len(), 5);
}

#[test]
fn refresh_rewraps_universe_in_composite() {
    let t = Template::builder("letters", StringType::new())
        .composite(SetType)
        .many()
        .universe(|_| Ok(Value::tokens(["b", "a"])))
        .build()
        .unwrap();
    assert_eq!(
        t.universe().unwrap(),
        Some(Value::set([Value::from("a"), Value::from("b")]))
    );
    t.refresh().unwrap();
    assert!(t.universe().unwrap().is_some());
}

#[test]
fn hook_failures_become_internal_errors() {
    let t = Template::builder("letters", StringType::new())
        .composite(SetType)
        .many()
        .complement(|_, _| Err("boom".into()))
        .build()
        .unwrap();
    let v = t.process(&Value::tokens(["a", "b"])).unwrap();
    let err = t.unprocess(&v, &ParamValues::new(), true).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert!(err.to_string().contains("complement failed: boom"));
}

#[test]
fn contextualize_sees_dependency_values() {
    let t = Template::builder("day", IntegerType::new())
        .depends("month")
        .contextualize(|_, seq, deps| {
            if deps.contains_key("month") {
                Ok(seq)
            } else {
                Ok(Vec::new())
            }
        })
        .build()
        .unwrap();

    let mut deps = ParamValues::new();
    let (tokens, _) = t.unprocess(&Value::Int(4), &deps, false).unwrap();
    assert!(tokens.is_empty());

    deps.insert("month".into(), Value::Int(10));
    let (tokens, _) = t.unprocess(&Value::Int(4), &deps, false).unwrap();
    assert_eq!(tokens, vec!["4"]);
}

#[test]
fn pattern_and_date_formats() {
    let t = Template::builder("when", DateType::new())
        .format(Format::Date("%Y%m%d".to_owned()))
        .build()
        .unwrap();
    let v = t.process(&Value::from("2023-10-04")).unwrap();
    let (tokens, _) = t.unprocess(&v, &ParamValues::new(), false).unwrap();
    assert_eq!(tokens, vec!["20231004"]);

    assert_eq!(Format::Pattern("p{}".to_owned()).render(&Value::Int(2)), "p2");
}

#[test]
fn effective_depends_include_consumed_only_with_preprocessor() {
    let plain = Template::builder("date", DateType::new())
        .depends("tz")
        .consumes("year")
        .build()
        .unwrap();
    assert_eq!(plain.effective_depends().count(), 1);
    assert!(plain.conflicts().contains("year"));

    let synthesized = Template::builder("date", DateType::new())
        .depends("tz")
        .consumes("year")
        .preprocessor(|_, raw, _| Ok(raw.clone()))
        .build()
        .unwrap();
    let deps: Vec<_> = synthesized.effective_depends().map(ParamId::as_str).collect();
    assert_eq!(deps, vec!["tz", "year"]);
}
