use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;

use crate::assertion::{lists_match_any_order, render};
use crate::directive::{Directive, DirectiveMatch, DirectiveShape, HookContext};
use crate::directives::{items, push_item, syntax_error};
use crate::error::{AssertionFailure, DirectiveError, Result};
use crate::path::Path;
use crate::types::{ActionCase, ActionPath, ActionResponse, ErrorInfo, TestCase, TestCaseResults};
use crate::value::{Kind, Value, Wildcard};

static ERROR_FIELDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^code=(?P<code>[^,]+?)\s*(?:,\s*field=(?P<field>[^,]+?)\s*)?(?:,\s*message=(?P<message>.+?))?\s*$")
        .unwrap()
});

const ERROR_KEYS: [&str; 6] = [
    "expects_errors",
    "expects_exact_errors",
    "not_expects_errors",
    "expects_job_errors",
    "expects_exact_job_errors",
    "not_expects_job_errors",
];

/// `code=X[, field=Y][, message=Z]` as `{code, field, message}`, omitted parts absent.
pub fn parse_error_fields(fields: &str) -> Option<Value> {
    let caps = ERROR_FIELDS.captures(fields.trim())?;
    let mut map = IndexMap::new();
    for part in ["code", "field", "message"] {
        if let Some(m) = caps.name(part) {
            map.insert(part.to_string(), Value::text(m.as_str().trim()));
        }
    }
    Some(Value::Map(map))
}

/// Fill the parts an expectation left out. Loose matching accepts anything there; exact
/// matching requires the field to be absent.
fn expected_error(fields: &Value, exact: bool) -> Value {
    let any = Value::Wildcard(Wildcard::new(Kind::Any, true));
    let mut map = IndexMap::new();
    for part in ["code", "field", "message"] {
        let value = match fields.lookup(part) {
            Some(v) => v.clone(),
            None if exact && part == "field" => Value::Null,
            None => any.clone(),
        };
        map.insert(part.to_string(), value);
    }
    Value::Map(map)
}

fn describe_errors(errors: &[ErrorInfo]) -> Vec<String> {
    errors
        .iter()
        .map(|e| match &e.field {
            Some(field) => format!("{}: {} (field {field})", e.code, e.message),
            None => format!("{}: {}", e.code, e.message),
        })
        .collect()
}

pub struct ExpectNoErrorsDirective;

impl Directive for ExpectNoErrorsDirective {
    fn name(&self) -> &'static str {
        "expect_no_errors"
    }

    fn shape(&self) -> DirectiveShape {
        DirectiveShape::Action
    }

    fn grammar(&self) -> String {
        r"expect:\s*no errors".to_string()
    }

    fn vocabulary(&self) -> &'static [(&'static str, &'static str)] {
        &[("expect: no errors", "The action and its job must not return errors")]
    }

    fn ingest(
        &self,
        action_case: Option<&mut ActionCase>,
        _test_case: &mut TestCase,
        _matched: &DirectiveMatch<'_>,
        _file_name: &str,
        _line_number: usize,
    ) -> Result<()> {
        if let Some(ac) = action_case {
            ac.put(&Path::root().key("expects_no_errors"), Value::Bool(true))?;
        }
        Ok(())
    }

    fn post_parse_test_case_action(
        &self,
        action_path: &ActionPath,
        action_case: &mut ActionCase,
        _test_case: &TestCase,
    ) -> Result<()> {
        let declares_errors = ERROR_KEYS.iter().any(|f| action_case.contains(f));
        if action_case.contains("expects_no_errors") && declares_errors {
            return Err(DirectiveError::Invalid {
                name: self.name().to_string(),
                message: format!("{action_path} expects both no errors and errors"),
            }
            .into());
        }
        Ok(())
    }

    fn assert_test_case_action_results(
        &self,
        action_path: &ActionPath,
        action_case: &ActionCase,
        _test_case: &TestCase,
        response: &ActionResponse,
        _results: &TestCaseResults,
        _ctx: &mut HookContext<'_>,
    ) -> Result<()> {
        if !action_case.contains("expects_no_errors") {
            return Ok(());
        }
        let mut details = describe_errors(&response.job_errors);
        details.extend(describe_errors(&response.errors));
        if details.is_empty() {
            return Ok(());
        }
        Err(AssertionFailure::with_details("expected no errors", details)
            .in_context(&action_path.to_string())
            .into())
    }
}

/// `expect: [not] [exact] [job] error: code=..[, field=..][, message=..]`
pub struct ExpectErrorsDirective;

impl Directive for ExpectErrorsDirective {
    fn name(&self) -> &'static str {
        "expect_errors"
    }

    fn shape(&self) -> DirectiveShape {
        DirectiveShape::Action
    }

    fn grammar(&self) -> String {
        r"expect:\s*(?P<not>not\s+)?(?P<exact>exact\s+)?(?P<job>job\s+)?error:\s*(?P<error_fields>.+?)".to_string()
    }

    fn vocabulary(&self) -> &'static [(&'static str, &'static str)] {
        &[
            ("expect: error: code=<c>[, field=<f>][, message=<m>]", "This error must be among the action errors"),
            ("expect: exact error: ...", "The action errors must be exactly the listed ones"),
            ("expect: not error: ...", "This error must not be returned"),
            ("expect: job error: ...", "The same, against job-level errors"),
        ]
    }

    fn ingest(
        &self,
        action_case: Option<&mut ActionCase>,
        _test_case: &mut TestCase,
        matched: &DirectiveMatch<'_>,
        file_name: &str,
        line_number: usize,
    ) -> Result<()> {
        let Some(ac) = action_case else {
            return Ok(());
        };
        let fields = matched.get("error_fields").unwrap_or_default();
        let error = parse_error_fields(fields).ok_or_else(|| {
            syntax_error(
                file_name,
                line_number,
                matched.column("error_fields"),
                format!("invalid error expectation {fields:?}, expected code=<code>[, field=<field>][, message=<message>]"),
            )
        })?;
        let job = if matched.has("job") { "job_" } else { "" };
        let field = if matched.has("not") {
            format!("not_expects_{job}errors")
        } else if matched.has("exact") {
            format!("expects_exact_{job}errors")
        } else {
            format!("expects_{job}errors")
        };
        push_item(ac.fields_mut(), &Path::root().key(field), error)
    }

    fn assert_test_case_action_results(
        &self,
        action_path: &ActionPath,
        action_case: &ActionCase,
        _test_case: &TestCase,
        response: &ActionResponse,
        _results: &TestCaseResults,
        _ctx: &mut HookContext<'_>,
    ) -> Result<()> {
        let context = action_path.to_string();
        let declared = action_case.contains("expects_no_errors")
            || ERROR_KEYS.iter().any(|f| action_case.contains(f));
        if !declared {
            let mut details = describe_errors(&response.job_errors);
            details.extend(describe_errors(&response.errors));
            if !details.is_empty() {
                return Err(AssertionFailure::with_details("unexpected errors", details)
                    .in_context(&context)
                    .into());
            }
            return Ok(());
        }
        let fields = action_case.fields();
        for (job, actual) in [("", &response.errors), ("job_", &response.job_errors)] {
            let actual: Vec<Value> = actual.iter().map(ErrorInfo::to_value).collect();

            let loose: Vec<Value> = items(fields, &format!("expects_{job}errors"))
                .iter()
                .map(|e| expected_error(e, false))
                .collect();
            if !loose.is_empty() {
                lists_match_any_order(&loose, &actual, true)
                    .map_err(|e| e.in_context(&format!("{context}: expected {job}errors")))?;
            }

            let exact: Vec<Value> = items(fields, &format!("expects_exact_{job}errors"))
                .iter()
                .map(|e| expected_error(e, true))
                .collect();
            if !exact.is_empty() {
                lists_match_any_order(&exact, &actual, false)
                    .map_err(|e| e.in_context(&format!("{context}: expected exact {job}errors")))?;
            }

            let present: Vec<String> = items(fields, &format!("not_expects_{job}errors"))
                .iter()
                .map(|e| expected_error(e, false))
                .filter(|e| actual.iter().any(|a| e == a))
                .map(|e| format!("present: {}", render(&e)))
                .collect();
            if !present.is_empty() {
                return Err(AssertionFailure::with_details(
                    format!("{job}errors returned that were expected not to be"),
                    present,
                )
                .in_context(&context)
                .into());
            }
        }
        Ok(())
    }
}
