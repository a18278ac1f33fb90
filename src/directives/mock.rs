use indexmap::IndexMap;

use crate::directive::{Directive, DirectiveMatch, DirectiveShape, HookContext};
use crate::directives::{json_or_text, push_item, scope_fields};
use crate::error::{AssertionFailure, DirectiveError, Result};
use crate::harness::MockingCollaborator;
use crate::path::Path;
use crate::types::{ActionCase, ActionPath, ActionResponse, TestCase, TestCaseResults};
use crate::value::Value;

/// `mock: target: path: value` and `mock: target: expect [not] called [path]: args`.
///
/// The plain form patches for the whole test case, the action-scoped form for one action.
pub struct MockDirective {
    shape: DirectiveShape,
}

impl MockDirective {
    pub fn new(shape: DirectiveShape) -> Self {
        Self { shape }
    }

    fn mocking<'h>(&self, ctx: &HookContext<'h>) -> Result<&'h dyn MockingCollaborator> {
        ctx.harness.mocks.as_deref().ok_or_else(|| {
            DirectiveError::MissingCollaborator {
                name: self.name().to_string(),
                collaborator: "mocking",
            }
            .into()
        })
    }

    fn set_up(&self, mocks: Option<&Value>, ctx: &mut HookContext<'_>) -> Result<()> {
        let Some(Value::Map(targets)) = mocks else {
            return Ok(());
        };
        let collaborator = self.mocking(ctx)?;
        for (target, declared) in targets {
            let patch: IndexMap<String, Value> = ["values", "exceptions", "deletes"]
                .into_iter()
                .filter_map(|k| declared.lookup(k).map(|v| (k.to_string(), v.clone())))
                .collect();
            if patch.is_empty() {
                continue;
            }
            ctx.acquire(collaborator.patch(target, &Value::Map(patch)));
        }
        Ok(())
    }

    fn check_calls(&self, mocks: Option<&Value>, ctx: &HookContext<'_>, context: &str) -> Result<()> {
        let Some(Value::Map(targets)) = mocks else {
            return Ok(());
        };
        for (target, declared) in targets {
            let expected = declared.lookup("expect_called").and_then(Value::as_sequence).unwrap_or_default();
            let unexpected = declared
                .lookup("expect_not_called")
                .and_then(Value::as_sequence)
                .unwrap_or_default();
            if expected.is_empty() && unexpected.is_empty() {
                continue;
            }
            let calls = self.mocking(ctx)?.calls(target);
            let matches = |e: &Value| {
                let path = e.lookup("path").and_then(Value::as_str).unwrap_or_default();
                let args = e.lookup("args").unwrap_or(&Value::Null);
                calls
                    .iter()
                    .any(|c| c.path == path && (args.is_null() || *args == c.args))
            };
            let observed = || {
                calls
                    .iter()
                    .map(|c| format!("called {}{}: {}", target, dotted(&c.path), c.args))
                    .collect::<Vec<_>>()
            };
            for e in expected {
                if !matches(e) {
                    return Err(AssertionFailure::with_details(
                        format!("mock {target}{} was not called as expected", describe(e)),
                        observed(),
                    )
                    .in_context(context)
                    .into());
                }
            }
            for e in unexpected {
                if matches(e) {
                    return Err(AssertionFailure::with_details(
                        format!("mock {target}{} was called", describe(e)),
                        observed(),
                    )
                    .in_context(context)
                    .into());
                }
            }
        }
        Ok(())
    }
}

fn dotted(path: &str) -> String {
    if path.is_empty() { String::new() } else { format!(".{path}") }
}

fn describe(expectation: &Value) -> String {
    let path = expectation.lookup("path").and_then(Value::as_str).unwrap_or_default();
    match expectation.lookup("args") {
        Some(args) if !args.is_null() => format!("{} with {args}", dotted(path)),
        _ => dotted(path),
    }
}

impl Directive for MockDirective {
    fn name(&self) -> &'static str {
        match self.shape {
            DirectiveShape::Plain => "mock",
            DirectiveShape::Action => "action_mock",
        }
    }

    fn shape(&self) -> DirectiveShape {
        self.shape
    }

    fn grammar(&self) -> String {
        concat!(
            r"mock:\s*(?P<target>[^:\s]+):\s*(?:",
            r"expect\s+(?P<not_called>not\s+)?called(?:\s+(?P<call_path>[^:\s]+))?(?:\s*:\s*(?P<call_args>.+?))?",
            r"|(?P<attribute>[^:\s]+):\s*(?:(?P<exception>exception)\s+(?P<exception_value>.+?)|(?P<delete>delete)|(?P<value>.*?))",
            r")"
        )
        .to_string()
    }

    fn vocabulary(&self) -> &'static [(&'static str, &'static str)] {
        &[
            ("mock: <target>: <path>: <json or text>", "Patch an attribute of the target"),
            ("mock: <target>: <path>: exception <value>", "Make the attribute raise"),
            ("mock: <target>: <path>: delete", "Remove the attribute"),
            ("mock: <target>: expect [not] called [<path>]: [args, kwargs]", "Check calls made on the mock"),
        ]
    }

    fn ingest(
        &self,
        action_case: Option<&mut ActionCase>,
        test_case: &mut TestCase,
        matched: &DirectiveMatch<'_>,
        _file_name: &str,
        _line_number: usize,
    ) -> Result<()> {
        let target = matched.get("target").unwrap_or_default();
        let base = Path::root().key("mocks").key(target);
        let fields = scope_fields(action_case, test_case);

        if let Some(attribute) = matched.get("attribute") {
            let attribute_path = Path::parse(attribute)?;
            if matched.has("delete") {
                return push_item(fields, &base.key("deletes"), Value::text(attribute));
            }
            if matched.has("exception") {
                let raised = Value::text(matched.get("exception_value").unwrap_or_default());
                fields.put_path(&base.key("exceptions").join(&attribute_path), raised)?;
                return Ok(());
            }
            let value = json_or_text(matched.get("value").unwrap_or_default());
            fields.put_path(&base.key("values").join(&attribute_path), value)?;
            return Ok(());
        }

        let mut call = IndexMap::new();
        call.insert(
            "path".to_string(),
            Value::text(matched.get("call_path").unwrap_or_default()),
        );
        call.insert(
            "args".to_string(),
            matched.get("call_args").map_or(Value::Null, json_or_text),
        );
        let list = if matched.has("not_called") { "expect_not_called" } else { "expect_called" };
        push_item(fields, &base.key(list), Value::Map(call))
    }

    fn set_up_test_case(&self, test_case: &TestCase, ctx: &mut HookContext<'_>) -> Result<()> {
        if self.shape != DirectiveShape::Plain {
            return Ok(());
        }
        self.set_up(test_case.field("mocks"), ctx)
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
        self.set_up(action_case.get("mocks"), ctx)
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
        self.check_calls(action_case.get("mocks"), ctx, &action_path.to_string())
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
        self.check_calls(test_case.field("mocks"), ctx, test_case.name())
    }
}
