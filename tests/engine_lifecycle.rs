use std::sync::Arc;

use action_test::caller::{ActionCaller, ActionRequest, ActionResult, JobResult};
use action_test::directive::{Directive, DirectiveMatch, DirectiveRegistry, HookContext};
use action_test::directives::default_registry;
use action_test::engine::{RunContext, fixture_test_cases, run_fixture};
use action_test::error::Result;
use action_test::harness::{FrozenClock, Harness, InMemoryMocks};
use action_test::parser::FixtureParser;
use action_test::types::{
    ActionCase, ActionPath, ActionResponse, ErrorInfo, TestCase, TestCaseResults, TestFixture, TestFixtureResults,
};
use action_test::value::Value;
use anyhow::anyhow;
use parking_lot::Mutex;
use serde_json::json;

type Log = Arc<Mutex<Vec<String>>>;
type Respond = dyn Fn(&ActionRequest) -> anyhow::Result<JobResult> + Send + Sync;

/// Records every call and answers from a closure.
struct RecordingCaller {
    log: Log,
    requests: Mutex<Vec<ActionRequest>>,
    respond: Box<Respond>,
}

impl RecordingCaller {
    fn new(log: Log, respond: impl Fn(&ActionRequest) -> anyhow::Result<JobResult> + Send + Sync + 'static) -> Self {
        Self {
            log,
            requests: Mutex::new(Vec::new()),
            respond: Box::new(respond),
        }
    }

    fn echo(log: Log) -> Self {
        Self::new(log, |request| Ok(body(&request.action, request.body.clone())))
    }
}

impl ActionCaller for RecordingCaller {
    fn call(&self, _service: &str, actions: &[ActionRequest], _context: &Value, _control: &Value) -> anyhow::Result<JobResult> {
        let request = actions.first().ok_or_else(|| anyhow!("empty job"))?;
        self.log.lock().push(format!("call {}", request.action));
        self.requests.lock().push(request.clone());
        (self.respond)(request)
    }
}

fn body(action: &str, body: Value) -> JobResult {
    JobResult {
        errors: Vec::new(),
        actions: vec![ActionResult {
            action: action.to_string(),
            errors: Vec::new(),
            body,
        }],
    }
}

/// Writes one log line per lifecycle hook.
struct Trace {
    log: Log,
}

impl Directive for Trace {
    fn name(&self) -> &'static str {
        "trace"
    }

    fn grammar(&self) -> String {
        r"trace marker".to_string()
    }

    fn ingest(
        &self,
        _action_case: Option<&mut ActionCase>,
        _test_case: &mut TestCase,
        _matched: &DirectiveMatch<'_>,
        _file_name: &str,
        _line_number: usize,
    ) -> Result<()> {
        Ok(())
    }

    fn set_up_test_fixture(&self, fixture: &TestFixture, _ctx: &mut HookContext<'_>) -> Result<()> {
        self.log.lock().push(format!("fixture set-up {}", fixture.name));
        Ok(())
    }

    fn set_up_test_case(&self, test_case: &TestCase, _ctx: &mut HookContext<'_>) -> Result<()> {
        self.log.lock().push(format!("case set-up {}", test_case.name()));
        Ok(())
    }

    fn set_up_test_case_action(
        &self,
        action_path: &ActionPath,
        _action_case: &ActionCase,
        _test_case: &TestCase,
        _ctx: &mut HookContext<'_>,
    ) -> Result<()> {
        self.log.lock().push(format!("action set-up {action_path}"));
        Ok(())
    }

    fn assert_test_case_action_results(
        &self,
        action_path: &ActionPath,
        _action_case: &ActionCase,
        _test_case: &TestCase,
        _response: &ActionResponse,
        _results: &TestCaseResults,
        _ctx: &mut HookContext<'_>,
    ) -> Result<()> {
        self.log.lock().push(format!("action assert {action_path}"));
        Ok(())
    }

    fn tear_down_test_case_action(
        &self,
        action_path: &ActionPath,
        _action_case: &ActionCase,
        _test_case: &TestCase,
        _ctx: &mut HookContext<'_>,
    ) -> Result<()> {
        self.log.lock().push(format!("action tear-down {action_path}"));
        Ok(())
    }

    fn assert_test_case_results(
        &self,
        test_case: &TestCase,
        _results: &TestCaseResults,
        _ctx: &mut HookContext<'_>,
    ) -> Result<()> {
        self.log.lock().push(format!("case assert {}", test_case.name()));
        Ok(())
    }

    fn tear_down_test_case(&self, test_case: &TestCase, _ctx: &mut HookContext<'_>) -> Result<()> {
        self.log.lock().push(format!("case tear-down {}", test_case.name()));
        Ok(())
    }

    fn assert_test_fixture_results(
        &self,
        fixture: &TestFixture,
        results: &TestFixtureResults,
        _ctx: &mut HookContext<'_>,
    ) -> Result<()> {
        self.log
            .lock()
            .push(format!("fixture assert {} ({} cases)", fixture.name, results.cases.len()));
        Ok(())
    }

    fn tear_down_test_fixture(&self, fixture: &TestFixture, _ctx: &mut HookContext<'_>) -> Result<()> {
        self.log.lock().push(format!("fixture tear-down {}", fixture.name));
        Ok(())
    }
}

fn traced_registry(log: &Log) -> DirectiveRegistry {
    let mut registry = default_registry().unwrap();
    registry.register(Trace { log: Arc::clone(log) }).unwrap();
    registry
}

fn fixture(registry: &DirectiveRegistry, text: &str) -> TestFixture {
    FixtureParser::new(registry)
        .unwrap()
        .parse("lifecycle", "lifecycle.fixture", text)
        .unwrap()
}

fn context(registry: DirectiveRegistry, caller: Arc<dyn ActionCaller>, harness: Harness) -> Arc<RunContext> {
    Arc::new(RunContext {
        service: "users".to_string(),
        registry: Arc::new(registry),
        caller,
        harness,
        constants: Value::from(json!({"admin": {"name": "root"}})),
    })
}

const TWO_CASES: &str = "\
test name: first
test description: echoes a constant
echo: input: who: [[admin.name]]
echo: expect: attribute value: who: root

test name: second
test description: reads the first response
echo: input: msg: hi
lookup: input: previous: [[ECHO.msg]]
lookup: expect: attribute value: previous: hi
";

#[test]
fn hooks_run_in_lifecycle_order() {
    let log: Log = Arc::default();
    let registry = traced_registry(&log);
    let fixture = fixture(&registry, TWO_CASES);
    let caller = Arc::new(RecordingCaller::echo(Arc::clone(&log)));
    let summary = run_fixture(fixture, context(registry, caller.clone(), Harness::default()));

    assert_eq!(summary.total, 2);
    assert_eq!(summary.passed, 2, "{:?}", summary.cases);
    assert_eq!(
        *log.lock(),
        vec![
            "fixture set-up lifecycle",
            "case set-up first",
            "action set-up echo.0",
            "call echo",
            "action assert echo.0",
            "action tear-down echo.0",
            "case assert first",
            "case tear-down first",
            "case set-up second",
            "action set-up echo.0",
            "call echo",
            "action assert echo.0",
            "action tear-down echo.0",
            "action set-up lookup.0",
            "call lookup",
            "action assert lookup.0",
            "action tear-down lookup.0",
            "case assert second",
            "case tear-down second",
            "fixture assert lifecycle (2 cases)",
            "fixture tear-down lifecycle",
        ]
    );

    let requests = caller.requests.lock();
    assert_eq!(requests[0].body, Value::from(json!({"who": "root"})));
    assert_eq!(requests[2].body, Value::from(json!({"previous": "hi"})));
}

#[test]
fn failed_action_stops_the_case_but_tears_down() {
    let log: Log = Arc::default();
    let registry = traced_registry(&log);
    let fixture = fixture(
        &registry,
        "\
test name: mismatch
test description: the first action returns something else
echo: input: msg: hi
echo: expect: attribute value: msg: bye
after: input: x: 1

test name: sibling
test description: still runs
echo: input: msg: ok
",
    );
    let caller = Arc::new(RecordingCaller::echo(Arc::clone(&log)));
    let summary = run_fixture(fixture, context(registry, caller.clone(), Harness::default()));

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.passed, 1);
    let failure = summary.cases[0].error.as_deref().unwrap();
    assert!(failure.contains("echo.0"), "{failure}");
    assert!(failure.contains("msg"), "{failure}");

    let log = log.lock();
    assert!(!log.iter().any(|l| l == "call after"));
    assert!(log.iter().any(|l| l == "action tear-down echo.0"));
    assert!(log.iter().any(|l| l == "case tear-down mismatch"));
    assert!(!log.iter().any(|l| l == "case assert mismatch"));
    assert_eq!(log.last().map(String::as_str), Some("fixture tear-down lifecycle"));
}

#[test]
fn errors_without_expectation_fail_the_action() {
    let log: Log = Arc::default();
    let registry = default_registry().unwrap();
    let fixture = fixture(
        &registry,
        "\
test name: surprised
test description: the service rejects the input
create_user: input: email: nope

test name: prepared
test description: the rejection is expected
create_user: input: email: nope
create_user: expect: error: code=INVALID, field=email
",
    );
    let caller = Arc::new(RecordingCaller::new(Arc::clone(&log), |request| {
        Ok(JobResult {
            errors: Vec::new(),
            actions: vec![ActionResult {
                action: request.action.clone(),
                errors: vec![ErrorInfo {
                    code: "INVALID".to_string(),
                    message: "not an email address".to_string(),
                    field: Some("email".to_string()),
                }],
                body: Value::map(),
            }],
        })
    }));
    let summary = run_fixture(fixture, context(registry, caller, Harness::default()));

    assert_eq!(summary.failed, 1);
    assert!(summary.cases[0].error.as_deref().unwrap().contains("unexpected errors"));
    assert!(summary.cases[1].passed, "{:?}", summary.cases[1].error);
}

#[test]
fn skipped_cases_are_not_called() {
    let log: Log = Arc::default();
    let registry = traced_registry(&log);
    let fixture = fixture(
        &registry,
        "\
test name: runs
test description: plain
echo: input: msg: a

test name: waits
test description: skipped
test skip: not today
echo: input: msg: b
",
    );
    let caller = Arc::new(RecordingCaller::echo(Arc::clone(&log)));
    let summary = run_fixture(fixture, context(registry, caller.clone(), Harness::default()));

    assert_eq!((summary.passed, summary.failed, summary.skipped), (1, 0, 1));
    assert_eq!(summary.cases[1].skipped.as_deref(), Some("not today"));
    assert_eq!(caller.requests.lock().len(), 1);
    // the last runnable case closes the fixture
    assert_eq!(log.lock().last().map(String::as_str), Some("fixture tear-down lifecycle"));
}

#[test]
fn host_runner_can_stop_after_a_subset() {
    let log: Log = Arc::default();
    let registry = traced_registry(&log);
    let fixture = fixture(&registry, TWO_CASES);
    let caller = Arc::new(RecordingCaller::echo(Arc::clone(&log)));
    let mut cases = fixture_test_cases(fixture, context(registry, caller, Harness::default()));

    assert_eq!(cases.cases.len(), 2);
    assert_eq!(cases.cases[1].name, "second");
    let first = cases.cases.remove(0).run();
    assert!(first.passed, "{:?}", first.error);
    assert!(!log.lock().iter().any(|l| l.starts_with("fixture tear-down")));

    let errors = cases.finish();
    assert!(errors.is_empty(), "{errors:?}");
    assert_eq!(log.lock().last().map(String::as_str), Some("fixture tear-down lifecycle"));
}

#[test]
fn unresolved_reference_fails_the_case() {
    let log: Log = Arc::default();
    let registry = default_registry().unwrap();
    let fixture = fixture(
        &registry,
        "\
test name: dangling
test description: nothing called lookup ran before
echo: input: id: [[LOOKUP.id]]
",
    );
    let caller = Arc::new(RecordingCaller::echo(Arc::clone(&log)));
    let summary = run_fixture(fixture, context(registry, caller.clone(), Harness::default()));

    assert_eq!(summary.failed, 1);
    assert!(summary.cases[0].error.as_deref().unwrap().contains("LOOKUP.id"));
    assert!(caller.requests.lock().is_empty());
}

#[test]
fn caller_failures_are_reported() {
    let log: Log = Arc::default();
    let registry = default_registry().unwrap();
    let fixture = fixture(
        &registry,
        "\
test name: offline
test description: the service is down
echo: input: msg: a
",
    );
    let caller = Arc::new(RecordingCaller::new(Arc::clone(&log), |_| Err(anyhow!("connection refused"))));
    let summary = run_fixture(fixture, context(registry, caller, Harness::default()));

    let error = summary.cases[0].error.as_deref().unwrap();
    assert!(error.contains("action caller failed"), "{error}");
    assert!(error.contains("connection refused"), "{error}");
}

#[test]
fn mocks_are_active_only_around_their_action() {
    let log: Log = Arc::default();
    let registry = default_registry().unwrap();
    let fixture = fixture(
        &registry,
        "\
test name: notify
test description: the mailer is patched during the call
notify: mock: mailer.client: send: {\"ok\": true}
notify: freeze time: 2024-01-02T03:04:05
notify: input: user: 7
",
    );
    let mocks = InMemoryMocks::new();
    let clock = FrozenClock::new();
    let seen = Arc::new(Mutex::new(None));
    let caller = {
        let mocks = mocks.clone();
        let clock = clock.clone();
        let seen = Arc::clone(&seen);
        RecordingCaller::new(Arc::clone(&log), move |request| {
            *seen.lock() = Some((mocks.active_patch("mailer.client"), clock.frozen_at()));
            Ok(body(&request.action, Value::map()))
        })
    };
    let harness = Harness::new(Arc::new(mocks.clone()), Arc::new(clock.clone()));
    let summary = run_fixture(fixture, context(registry, Arc::new(caller), harness));

    assert_eq!(summary.passed, 1, "{:?}", summary.cases[0].error);
    let (patch, frozen) = seen.lock().clone().unwrap();
    assert_eq!(
        patch.and_then(|p| p.lookup("values.send").cloned()),
        Some(Value::from(json!({"ok": true})))
    );
    assert_eq!(frozen.map(|t| t.to_string()), Some("2024-01-02 03:04:05".to_string()));
    assert_eq!(mocks.active_patch("mailer.client"), None);
    assert_eq!(clock.frozen_at(), None);
}

#[test]
fn mocks_need_a_collaborator() {
    let log: Log = Arc::default();
    let registry = default_registry().unwrap();
    let fixture = fixture(
        &registry,
        "\
test name: unpatched
test description: no mocking collaborator configured
mock: mailer.client: send: ok
notify: input: user: 7
",
    );
    let caller = Arc::new(RecordingCaller::echo(Arc::clone(&log)));
    let summary = run_fixture(fixture, context(registry, caller.clone(), Harness::default()));

    assert!(summary.cases[0].error.as_deref().unwrap().contains("mocking"));
    assert!(caller.requests.lock().is_empty());
}

#[test]
fn running_only_the_last_case_ends_the_fixture() {
    let log: Log = Arc::default();
    let registry = traced_registry(&log);
    let fixture = fixture(&registry, TWO_CASES);
    let caller = Arc::new(RecordingCaller::echo(Arc::clone(&log)));
    let mut cases = fixture_test_cases(fixture, context(registry, caller, Harness::default()));

    let last = cases.cases.pop().unwrap().run();
    assert!(last.passed, "{:?} {:?}", last.error, last.secondary_errors);
    {
        let log = log.lock();
        assert_eq!(log.first().map(String::as_str), Some("fixture set-up lifecycle"));
        assert!(!log.iter().any(|l| l == "case set-up first"));
        assert_eq!(
            log[log.len() - 2..],
            ["fixture assert lifecycle (1 cases)", "fixture tear-down lifecycle"]
        );
    }

    assert!(cases.finish().is_empty());
    let tear_downs = log.lock().iter().filter(|l| l.starts_with("fixture tear-down")).count();
    assert_eq!(tear_downs, 1);
}

#[test]
fn stubs_check_the_calls_they_received() {
    let log: Log = Arc::default();
    let registry = default_registry().unwrap();
    let fixture = fixture(
        &registry,
        "\
test name: any call
test description: login consults the auth service
stub action: auth: check: body: ok: true
stub action: auth: check: expect called
login: input: token: x

test name: matching call
test description: the request carries the token
stub action: auth: check: body: ok: true
stub action: auth: check: expect called: token: x
login: input: token: x

test name: wrong token
test description: the request carries another token
stub action: auth: check: body: ok: true
stub action: auth: check: expect called: token: y
login: input: token: x

test name: never called
test description: logout does not consult auth
stub action: auth: check: body: ok: true
stub action: auth: check: expect called
logout: input: token: x

test name: forbidden call
test description: login must not consult auth here
stub action: auth: check: body: ok: true
stub action: auth: check: expect not called
login: input: token: x
",
    );
    let mocks = InMemoryMocks::new();
    let caller = {
        let mocks = mocks.clone();
        RecordingCaller::new(Arc::clone(&log), move |request| {
            if request.action == "login" && mocks.active_stub("auth", "check").is_some() {
                mocks.record_stub_call("auth", "check", request.body.clone());
            }
            Ok(body(&request.action, Value::map()))
        })
    };
    let harness = Harness::new(Arc::new(mocks.clone()), Arc::new(FrozenClock::new()));
    let summary = run_fixture(fixture, context(registry, Arc::new(caller), harness));

    let outcome = |i: usize| summary.cases[i].error.clone().unwrap_or_default();
    assert!(summary.cases[0].passed, "{}", outcome(0));
    assert!(summary.cases[1].passed, "{}", outcome(1));
    assert!(outcome(2).contains("was not called with"), "{}", outcome(2));
    assert!(outcome(3).contains("auth.check was not called"), "{}", outcome(3));
    assert!(outcome(4).contains("auth.check was called"), "{}", outcome(4));
    assert_eq!(mocks.active_stub("auth", "check"), None);
}

#[test]
fn cases_without_actions_run_the_global_ones() {
    let log: Log = Arc::default();
    let registry = default_registry().unwrap();
    let fixture = fixture(
        &registry,
        "\
echo: global input: msg: shared

test name: only globals
test description: names the global echo and nothing else
",
    );
    let caller = Arc::new(RecordingCaller::echo(Arc::clone(&log)));
    let summary = run_fixture(fixture, context(registry, caller.clone(), Harness::default()));

    assert_eq!(summary.passed, 1, "{:?}", summary.cases[0].error);
    let requests = caller.requests.lock();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].action, "echo");
    assert_eq!(requests[0].body, Value::from(json!({"msg": "shared"})));
}
