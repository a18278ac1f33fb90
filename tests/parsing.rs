use action_test::directive::{Directive, DirectiveMatch, DirectiveRegistry};
use action_test::directives::{TestNameDirective, default_registry};
use action_test::error::Result;
use action_test::parser::FixtureParser;
use action_test::path::Path;
use action_test::types::{ActionCase, ActionPath, TestCase, TestFixture};
use action_test::value::{Kind, Value, Wildcard};
use serde_json::json;

fn v(j: serde_json::Value) -> Value {
    j.into()
}

fn parse(text: &str) -> std::result::Result<TestFixture, action_test::error::FixtureSyntaxError> {
    let registry = default_registry().unwrap();
    let parser = FixtureParser::new(&registry).unwrap();
    parser.parse("users", "users.fixture", text)
}

#[test]
fn single_case_end_to_end() {
    let fixture = parse("test name: t1\ntest description: d\necho: input: msg: hi\necho: expect: no errors\n\n").unwrap();
    assert_eq!(fixture.cases.len(), 1);
    let case = &fixture.cases[0];
    assert_eq!(case.name(), "t1");
    assert_eq!(case.description(), "d");
    assert_eq!(case.action_paths, vec![ActionPath::new("echo", 0)]);
    let action = case.action(&ActionPath::new("echo", 0)).unwrap();
    assert_eq!(action.get("inputs"), Some(&v(json!({"msg": "hi"}))));
    assert_eq!(action.get("expects_no_errors"), Some(&Value::Bool(true)));
    assert_eq!(case.fixture_name, "users");
    assert_eq!(case.fixture_file, "users.fixture");
    assert_eq!(case.line_number, 1);
}

#[test]
fn missing_description_points_at_the_case() {
    let err = parse("test name: t1\necho: input: msg: hi\n\ntest name: t2\ntest description: d\necho: input: a: b\n")
        .unwrap_err();
    assert_eq!(err.file, "users.fixture");
    assert_eq!(err.line, 2);
    assert!(err.message.contains("description"), "{}", err.message);
}

#[test]
fn unknown_statement_reports_its_column() {
    let err = parse("test name: t1\n  frobnicate the widget\n").unwrap_err();
    assert_eq!(err.line, 2);
    assert_eq!(err.column, 3);
    assert_eq!(err.source_line, "  frobnicate the widget");
}

#[test]
fn bad_typed_literal_is_a_syntax_error() {
    let err = parse("test name: t1\ntest description: d\nget_user: input int: id: twelve\n").unwrap_err();
    assert_eq!(err.line, 3);
    assert!(err.message.contains("twelve"), "{}", err.message);
}

#[test]
fn duplicate_names_are_rejected() {
    let err = parse("test name: a\ntest description: d\necho: input: x: 1\n\ntest name: a\ntest description: e\necho: input: x: 2\n")
        .unwrap_err();
    assert_eq!(err.line, 7);
    assert!(err.message.contains("duplicate"));

    let err = parse("test name: a\ntest name: b\n").unwrap_err();
    assert_eq!(err.line, 2);
}

#[test]
fn actions_keep_declaration_order_and_indexes() {
    let fixture = parse(concat!(
        "test name: create_then_fetch\n",
        "test description: the second call sees the first\n",
        "create_user: input: user.name: Jamie\n",
        "create_user: input int: user.age: 30\n",
        "get_user: input: id: [[CREATE_USER.user.id]]\n",
        "get_user: expect int: attribute value: user.age: 30\n",
        "create_user.1: input bool: user.admin: true\n",
        "create_user.1: expect any str: attribute value: user.id\n",
    ))
    .unwrap();
    let case = &fixture.cases[0];
    assert_eq!(
        case.action_paths,
        vec![
            ActionPath::new("create_user", 0),
            ActionPath::new("get_user", 0),
            ActionPath::new("create_user", 1),
        ]
    );
    let create = case.action(&ActionPath::new("create_user", 0)).unwrap();
    assert_eq!(create.get("inputs"), Some(&v(json!({"user": {"name": "Jamie", "age": 30}}))));
    let get = case.action(&ActionPath::new("get_user", 0)).unwrap();
    assert_eq!(get.get("inputs"), Some(&v(json!({"id": "[[CREATE_USER.user.id]]"}))));
    assert_eq!(get.get("expects"), Some(&v(json!({"user": {"age": 30}}))));
    let second = case.action(&ActionPath::new("create_user", 1)).unwrap();
    assert_eq!(
        second.get("expects_any").and_then(|e| e.lookup("user")).and_then(|u| u.lookup("id")),
        Some(&Value::Wildcard(Wildcard::new(Kind::Text, false)))
    );
}

#[test]
fn error_expectations_are_collected() {
    let fixture = parse(concat!(
        "test name: bad_email\n",
        "test description: rejects a malformed address\n",
        "create_user: input: email: nope\n",
        "create_user: expect: error: code=INVALID, field=email\n",
        "create_user: expect: not error: code=FORBIDDEN\n",
        "create_user: expect: job error: code=PARTIAL, message=one action failed\n",
    ))
    .unwrap();
    let action = fixture.cases[0].action(&ActionPath::new("create_user", 0)).unwrap();
    assert_eq!(action.get("expects_errors"), Some(&v(json!([{"code": "INVALID", "field": "email"}]))));
    assert_eq!(action.get("not_expects_errors"), Some(&v(json!([{"code": "FORBIDDEN"}]))));
    assert_eq!(
        action.get("expects_job_errors"),
        Some(&v(json!([{"code": "PARTIAL", "message": "one action failed"}])))
    );
}

#[test]
fn no_errors_conflicts_with_error_expectations() {
    let err = parse(concat!(
        "test name: confused\n",
        "test description: cannot have both\n",
        "echo: expect: no errors\n",
        "echo: expect: error: code=X\n",
    ))
    .unwrap_err();
    assert!(err.message.contains("both"), "{}", err.message);
}

#[test]
fn globals_apply_to_every_case() {
    let fixture = parse(concat!(
        "# shared by everything below\n",
        "echo: global input job context: tenant: acme\n",
        "\n",
        "test name: one\n",
        "test description: first\n",
        "echo: input: msg: a\n",
        "\n",
        "test name: two\n",
        "test description: second\n",
        "echo: input: msg: b\n",
        "echo: input job context: tenant: other\n",
    ))
    .unwrap();
    assert_eq!(fixture.cases.len(), 2);
    let echo = ActionPath::new("echo", 0);
    let one = fixture.cases[0].action(&echo).unwrap();
    assert_eq!(one.get("job_context"), Some(&v(json!({"tenant": "acme"}))));
    assert_eq!(one.get("inputs"), Some(&v(json!({"msg": "a"}))));
    let two = fixture.cases[1].action(&echo).unwrap();
    assert_eq!(two.get("job_context"), Some(&v(json!({"tenant": "other"}))));
    assert_eq!(fixture.cases[1].line_number, 8);
}

#[test]
fn skip_marks_cases() {
    let fixture = parse(concat!(
        "test name: later\n",
        "test description: not ready\n",
        "test skip: waiting on the new schema\n",
        "echo: input: msg: a\n",
        "\n",
        "test name: now\n",
        "test description: runs\n",
        "echo: input: msg: b\n",
    ))
    .unwrap();
    assert_eq!(fixture.cases[0].skip.as_deref(), Some("waiting on the new schema"));
    assert_eq!(fixture.cases[1].skip, None);
}

#[test]
fn mocks_and_stubs_are_recorded_per_scope() {
    let fixture = parse(concat!(
        "test name: notify\n",
        "test description: sends mail through the patched client\n",
        "mock: mailer.client: send: {\"ok\": true}\n",
        "stub action: billing: charge: body: receipt.id: r-1\n",
        "stub action: billing: charge: expect called: amount: 10\n",
        "notify: mock: mailer.client: expect called send: [\"to@example.com\"]\n",
        "notify: freeze time: 2024-01-02T03:04:05\n",
        "notify: input: user: 7\n",
    ))
    .unwrap();
    let case = &fixture.cases[0];
    let mocks = case.field("mocks").unwrap();
    assert_eq!(
        mocks.lookup("{mailer.client}").and_then(|m| m.lookup("values")),
        Some(&v(json!({"send": {"ok": true}})))
    );
    let stub = case.field("stubs").and_then(|s| s.lookup("{billing.charge}")).unwrap();
    assert_eq!(stub.lookup("body"), Some(&v(json!({"receipt": {"id": "r-1"}}))));
    assert_eq!(stub.lookup("expect_called"), Some(&v(json!([{"amount": "10"}]))));

    let notify = case.action(&ActionPath::new("notify", 0)).unwrap();
    let expected_call = notify
        .get("mocks")
        .and_then(|m| m.lookup("{mailer.client}"))
        .and_then(|m| m.lookup("expect_called"));
    assert_eq!(expected_call, Some(&v(json!([{"path": "send", "args": ["to@example.com"]}]))));
    assert!(notify.get("freeze_time").is_some());
}

#[test]
fn globals_alone_make_a_case() {
    let fixture = parse(concat!(
        "get_user: global input: id: 1\n",
        "get_user: global expect: no errors\n",
        "\n",
        "test name: t1\n",
        "test description: d\n",
    ))
    .unwrap();
    let case = &fixture.cases[0];
    let get_user = ActionPath::new("get_user", 0);
    assert_eq!(case.action_paths, vec![get_user.clone()]);
    assert_eq!(case.action(&get_user).and_then(|a| a.get("inputs")), Some(&v(json!({"id": "1"}))));
    assert_eq!(case.line_number, 4);
}

#[test]
fn no_actions_and_no_globals_is_an_error() {
    let err = parse("test name: t1\ntest description: d\n").unwrap_err();
    assert_eq!(err.line, 2);
    assert!(err.message.contains("no actions"), "{}", err.message);
}

/// Claims `test name:` lines for itself and records them under a different field.
struct Alias;

impl Directive for Alias {
    fn name(&self) -> &'static str {
        "alias"
    }

    fn grammar(&self) -> String {
        r"test name:\s*(?P<value>.+)".to_string()
    }

    fn ingest(
        &self,
        _action_case: Option<&mut ActionCase>,
        test_case: &mut TestCase,
        matched: &DirectiveMatch<'_>,
        _file_name: &str,
        _line_number: usize,
    ) -> Result<()> {
        let value = Value::text(matched.get("value").unwrap_or_default());
        test_case.fields.put_path(&Path::root().key("alias"), value)?;
        Ok(())
    }
}

#[test]
fn earlier_directive_wins_overlapping_lines() {
    let mut first = DirectiveRegistry::new();
    first.register(Alias).unwrap().register(TestNameDirective).unwrap();
    let (index, _) = first.grammar().unwrap().match_line("test name: t1").unwrap();
    assert_eq!(first.get(index).map(|d| d.name()), Some("alias"));

    let mut second = DirectiveRegistry::new();
    second.register(TestNameDirective).unwrap().register(Alias).unwrap();
    let (index, _) = second.grammar().unwrap().match_line("test name: t1").unwrap();
    assert_eq!(second.get(index).map(|d| d.name()), Some(TestNameDirective.name()));
}

#[test]
fn duplicate_directive_names_are_rejected() {
    let mut registry = default_registry().unwrap();
    registry.register(Alias).unwrap();
    assert!(registry.register(Alias).is_err());
}
