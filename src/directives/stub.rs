use indexmap::IndexMap;

use crate::assertion::{Policy, diff};
use crate::directive::{Directive, DirectiveMatch, DirectiveShape, HookContext};
use crate::directives::{field_path, parse_error_fields, push_item, scope_fields, syntax_error};
use crate::error::{AssertionFailure, DirectiveError, Result};
use crate::path::Path;
use crate::types::{ActionCase, ActionPath, ActionResponse, TestCase, TestCaseResults};
use crate::value::{TYPE_KEYWORDS, Value, typed_value};

/// `stub action: service: action: body|error|expect [not] called ...`
///
/// Replaces a downstream action with a canned response and records what it was sent.
pub struct StubActionDirective {
    shape: DirectiveShape,
}

impl StubActionDirective {
    pub fn new(shape: DirectiveShape) -> Self {
        Self { shape }
    }

    fn set_up(&self, stubs: Option<&Value>, ctx: &mut HookContext<'_>) -> Result<()> {
        let Some(Value::Map(stubs)) = stubs else {
            return Ok(());
        };
        let collaborator = ctx.harness.mocks.clone().ok_or_else(|| DirectiveError::MissingCollaborator {
            name: self.name().to_string(),
            collaborator: "mocking",
        })?;
        for declared in stubs.values() {
            let (service, action) = service_action(declared);
            let mut stub = IndexMap::new();
            stub.insert("body".to_string(), declared.lookup("body").cloned().unwrap_or_else(Value::map));
            stub.insert(
                "errors".to_string(),
                declared.lookup("errors").cloned().unwrap_or(Value::Sequence(Vec::new())),
            );
            ctx.acquire(collaborator.stub_action(service, action, &Value::Map(stub)));
        }
        Ok(())
    }

    fn check_calls(&self, stubs: Option<&Value>, ctx: &HookContext<'_>, context: &str) -> Result<()> {
        let Some(Value::Map(stubs)) = stubs else {
            return Ok(());
        };
        for declared in stubs.values() {
            let expected = declared.lookup("expect_called").and_then(Value::as_sequence);
            let not_called = declared.lookup("expect_not_called").and_then(Value::as_bool).unwrap_or(false);
            if expected.is_none() && !not_called {
                continue;
            }
            let (service, action) = service_action(declared);
            let Some(collaborator) = ctx.harness.mocks.as_deref() else {
                return Err(DirectiveError::MissingCollaborator {
                    name: self.name().to_string(),
                    collaborator: "mocking",
                }
                .into());
            };
            let calls = collaborator.stub_calls(service, action);
            if not_called && !calls.is_empty() {
                return Err(AssertionFailure::with_details(
                    format!("stubbed action {service}.{action} was called"),
                    calls.iter().map(|c| format!("request: {c}")).collect(),
                )
                .in_context(context)
                .into());
            }
            let Some(expected) = expected else {
                continue;
            };
            if calls.is_empty() {
                return Err(AssertionFailure::new(format!("stubbed action {service}.{action} was not called"))
                    .in_context(context)
                    .into());
            }
            for body in expected {
                let found = calls
                    .iter()
                    .any(|c| diff(body, c, Policy::Subset { subset_lists: false }).is_empty());
                if !found {
                    return Err(AssertionFailure::with_details(
                        format!("stubbed action {service}.{action} was not called with {body}"),
                        calls.iter().map(|c| format!("request: {c}")).collect(),
                    )
                    .in_context(context)
                    .into());
                }
            }
        }
        Ok(())
    }
}

fn service_action(declared: &Value) -> (&str, &str) {
    (
        declared.lookup("service").and_then(Value::as_str).unwrap_or_default(),
        declared.lookup("action").and_then(Value::as_str).unwrap_or_default(),
    )
}

impl Directive for StubActionDirective {
    fn name(&self) -> &'static str {
        match self.shape {
            DirectiveShape::Plain => "stub_action",
            DirectiveShape::Action => "action_stub_action",
        }
    }

    fn shape(&self) -> DirectiveShape {
        self.shape
    }

    fn grammar(&self) -> String {
        format!(
            concat!(
                r"stub action:\s*(?P<service>[^:\s]+):\s*(?P<stub_action>[^:\s]+):\s*(?:",
                r"body(?:\s+(?P<type>{types}))?:\s*(?P<path>[^:\s][^:]*?)(?:\s*:\s?(?P<value>.*?))?",
                r"|error:\s*(?P<error_fields>.+?)",
                r"|expect\s+(?P<not_called>not\s+)?called(?:(?:\s+(?P<call_type>{types}))?:\s*(?P<call_path>[^:\s][^:]*?)\s*:\s?(?P<call_value>.*?))?",
                r")"
            ),
            types = TYPE_KEYWORDS
        )
    }

    fn vocabulary(&self) -> &'static [(&'static str, &'static str)] {
        &[
            ("stub action: <service>: <action>: body [type]: <path>: <value>", "Canned response body"),
            ("stub action: <service>: <action>: error: code=<c>[, field=<f>][, message=<m>]", "Canned error"),
            ("stub action: <service>: <action>: expect called [[type]: <path>: <value>]", "The stub must receive a matching request"),
            ("stub action: <service>: <action>: expect not called", "The stub must not be called"),
        ]
    }

    fn ingest(
        &self,
        action_case: Option<&mut ActionCase>,
        test_case: &mut TestCase,
        matched: &DirectiveMatch<'_>,
        file_name: &str,
        line_number: usize,
    ) -> Result<()> {
        let service = matched.get("service").unwrap_or_default();
        let action = matched.get("stub_action").unwrap_or_default();
        let base = Path::root().key("stubs").key(format!("{service}.{action}"));
        let fields = scope_fields(action_case, test_case);
        fields.put_path(&base.key("service"), Value::text(service))?;
        fields.put_path(&base.key("action"), Value::text(action))?;

        if let Some(path) = matched.get("path") {
            let value = typed_value(matched.get("type"), matched.get("value"))?;
            let path = base.join(&field_path("body", path)?);
            fields.put_path(&path, value)?;
            return Ok(());
        }
        if let Some(error_text) = matched.get("error_fields") {
            let error = parse_error_fields(error_text).ok_or_else(|| {
                syntax_error(
                    file_name,
                    line_number,
                    matched.column("error_fields"),
                    format!("invalid stub error {error_text:?}, expected code=<code>[, field=<field>][, message=<message>]"),
                )
            })?;
            return push_item(fields, &base.key("errors"), error);
        }
        if matched.has("not_called") {
            fields.put_path(&base.key("expect_not_called"), Value::Bool(true))?;
            return Ok(());
        }
        let called = base.key("expect_called");
        let Some(path) = matched.get("call_path") else {
            // any call at all satisfies an empty list
            if fields.get_path(&called).is_err() {
                fields.put_path(&called, Value::Sequence(Vec::new()))?;
            }
            return Ok(());
        };
        let mut request = Value::map();
        let value = typed_value(matched.get("call_type"), matched.get("call_value"))?;
        request.put_path(&Path::parse(path)?, value)?;
        // repeated lines with a path build up one expected request
        let expected = called.index(0);
        let mut merged = fields.get_path(&expected).cloned().unwrap_or_else(|_| Value::map());
        merged.deep_merge(request);
        fields.put_path(&expected, merged)?;
        Ok(())
    }

    fn set_up_test_case(&self, test_case: &TestCase, ctx: &mut HookContext<'_>) -> Result<()> {
        if self.shape != DirectiveShape::Plain {
            return Ok(());
        }
        self.set_up(test_case.field("stubs"), ctx)
    }

    fn set_up_test_case_action(
        &self,
        _action_path: &ActionPath,
        action_case: &ActionCase,
        _test_case: &TestCase,
        ctx: &mut HookContext<'_>,
    ) -> Result<()> {
        if self.shape != DirectiveShape::Action {
            return Ok(());
        }
        self.set_up(action_case.get("stubs"), ctx)
    }

    fn assert_test_case_action_results(
        &self,
        action_path: &ActionPath,
        action_case: &ActionCase,
        _test_case: &TestCase,
        _response: &ActionResponse,
        _results: &TestCaseResults,
        ctx: &mut HookContext<'_>,
    ) -> Result<()> {
        if self.shape != DirectiveShape::Action {
            return Ok(());
        }
        self.check_calls(action_case.get("stubs"), ctx, &action_path.to_string())
    }

    fn assert_test_case_results(
        &self,
        test_case: &TestCase,
        _results: &TestCaseResults,
        ctx: &mut HookContext<'_>,
    ) -> Result<()> {
        if self.shape != DirectiveShape::Plain {
            return Ok(());
        }
        self.check_calls(test_case.field("stubs"), ctx, test_case.name())
    }
}
