use action_test::path::{self, Path, PathError, all_paths};
use action_test::value::Value;
use serde_json::json;

fn v(j: serde_json::Value) -> Value {
    j.into()
}

#[test]
fn put_grows_maps_and_lists() {
    let mut root = Value::map();
    path::put(&mut root, &Path::parse("foo.bar.2.baz").unwrap(), Value::text("x")).unwrap();
    assert_eq!(root, v(json!({"foo": {"bar": [{}, {}, {"baz": "x"}]}})));
}

#[test]
fn braces_escape_dots() {
    let p = Path::parse("foo.{bar.baz}").unwrap();
    let mut root = Value::map();
    root.put_path(&p, Value::text("x")).unwrap();
    assert_eq!(root, v(json!({"foo": {"bar.baz": "x"}})));
    assert_eq!(root.get_path(&p).unwrap(), &Value::text("x"));
}

#[test]
fn get_returns_what_put_stored() {
    for (text, value) in [
        ("a", Value::Int(1)),
        ("a.b.c", Value::text("deep")),
        ("list.0", Value::Bool(true)),
        ("{get_user.0}.user.name", Value::text("Jamie")),
        ("x.3.y.{1}", Value::Null),
    ] {
        let p = Path::parse(text).unwrap();
        let mut root = Value::map();
        root.put_path(&p, value.clone()).unwrap();
        assert_eq!(root.get_path(&p).unwrap(), &value, "path {text}");
    }
}

#[test]
fn all_paths_lists_every_written_path() {
    let written = ["user.name", "user.emails.0.address", "user.emails.1.address", "{a.b}.c", "flag"];
    let mut root = Value::map();
    for p in written {
        root.put_path(&Path::parse(p).unwrap(), Value::text("v")).unwrap();
    }
    let mut found: Vec<String> = all_paths(&root, false).map(|p| p.to_string()).collect();
    let mut expected: Vec<String> = written.iter().map(|s| s.to_string()).collect();
    found.sort();
    expected.sort();
    assert_eq!(found, expected);
}

#[test]
fn lookups_report_why_they_failed() {
    let root = v(json!({"user": {"emails": ["a"]}, "n": 1}));
    assert!(matches!(
        root.get_path(&Path::parse("user.phone").unwrap()),
        Err(PathError::NotFound(_))
    ));
    assert!(matches!(
        root.get_path(&Path::parse("user.emails.3").unwrap()),
        Err(PathError::IndexOutOfRange { index: 3, len: 1, .. })
    ));
    assert!(matches!(
        root.get_path(&Path::parse("n.x").unwrap()),
        Err(PathError::TypeMismatch { .. })
    ));
}

#[test]
fn put_refuses_to_descend_into_scalars() {
    let mut root = v(json!({"n": 1}));
    assert!(matches!(
        root.put_path(&Path::parse("n.x").unwrap(), Value::Int(2)),
        Err(PathError::TypeMismatch { .. })
    ));
}

#[test]
fn awkward_keys_round_trip_through_text() {
    for key in ["plain", "a.b", "12", "", "a}b", "a{b", "}{", "{x.y}", r"back\slash"] {
        let p = Path::root().key(key).key("tail");
        let text = p.to_string();
        assert_eq!(Path::parse(&text).unwrap(), p, "key {key:?} written as {text:?}");
    }
    assert_eq!(Path::root().key("a}b").to_string(), r"{a\}b}");
    assert!(matches!(Path::parse(r"a\"), Err(PathError::Invalid { .. })));
}

#[test]
fn all_paths_rebuild_the_tree() {
    let original = v(json!({
        "a}b": {"x": 1},
        "dot.ted": [1, 2],
        "7": "seven",
        "{ok}": true,
    }));
    let mut found: Vec<String> = all_paths(&original, false).map(|p| p.to_string()).collect();
    found.sort();
    assert_eq!(found, [r"{7}", r"{a\}b}.x", "{dot.ted}.0", "{dot.ted}.1", "{{ok}}"]);

    let mut rebuilt = Value::map();
    for text in &found {
        let p = Path::parse(text).unwrap();
        let leaf = original.get_path(&p).unwrap().clone();
        rebuilt.put_path(&p, leaf).unwrap();
    }
    assert_eq!(rebuilt, original);
}
