use crate::assertion::{assert_exact, assert_not_expected, assert_not_present, assert_subset};
use crate::directive::{Directive, DirectiveMatch, DirectiveShape, HookContext};
use crate::directives::{field_path, items, push_item};
use crate::error::{AssertionFailure, Result};
use crate::path::Path;
use crate::types::{ActionCase, ActionPath, ActionResponse, TestCase, TestCaseResults};
use crate::value::{DataType, Kind, TYPE_KEYWORDS, Value, Wildcard, typed_value};

fn in_action(action_path: &ActionPath) -> impl Fn(AssertionFailure) -> AssertionFailure + '_ {
    move |e| e.in_context(&action_path.to_string())
}

/// `expect [exact] [type]: [not] attribute value: path[: value]`
pub struct ExpectValueDirective;

impl Directive for ExpectValueDirective {
    fn name(&self) -> &'static str {
        "expect_value"
    }

    fn shape(&self) -> DirectiveShape {
        DirectiveShape::Action
    }

    fn grammar(&self) -> String {
        format!(
            r"expect(?:\s+(?P<exact>exact))?(?:\s+(?P<type>{TYPE_KEYWORDS}))?:\s*(?P<not>not\s+)?attribute value:\s*(?P<path>[^:\s][^:]*?)(?:\s*:\s?(?P<value>.*?))?"
        )
    }

    fn vocabulary(&self) -> &'static [(&'static str, &'static str)] {
        &[
            ("expect [type]: attribute value: <path>: <value>", "The response body holds this value"),
            ("expect exact [type]: attribute value: <path>: <value>", "Build the complete expected response body"),
            ("expect [type]: not attribute value: <path>: <value>", "The response body does not hold this value"),
        ]
    }

    fn ingest(
        &self,
        action_case: Option<&mut ActionCase>,
        _test_case: &mut TestCase,
        matched: &DirectiveMatch<'_>,
        _file_name: &str,
        _line_number: usize,
    ) -> Result<()> {
        let Some(ac) = action_case else {
            return Ok(());
        };
        let field = if matched.has("not") {
            "not_expects"
        } else if matched.has("exact") {
            "expects_exact"
        } else {
            "expects"
        };
        let value = typed_value(matched.get("type"), matched.get("value"))?;
        let path = field_path(field, matched.get("path").unwrap_or_default())?;
        ac.put(&path, value)?;
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
        let body = &response.body;
        if let Some(expected) = action_case.get("expects") {
            assert_subset(expected, body, false).map_err(in_action(action_path))?;
        }
        if let Some(expected) = action_case.get("expects_exact") {
            assert_exact(expected, body).map_err(in_action(action_path))?;
        }
        if let Some(expected) = action_case.get("not_expects") {
            assert_not_expected(expected, body).map_err(in_action(action_path))?;
        }
        Ok(())
    }
}

/// `expect any [type] [or None]: attribute value: path`
pub struct ExpectAnyDirective;

impl Directive for ExpectAnyDirective {
    fn name(&self) -> &'static str {
        "expect_any"
    }

    fn shape(&self) -> DirectiveShape {
        DirectiveShape::Action
    }

    fn grammar(&self) -> String {
        format!(
            r"expect any(?:\s+(?P<type>{TYPE_KEYWORDS}))?(?P<or_none>\s+or None)?:\s*attribute value:\s*(?P<path>[^:\s][^:]*?)"
        )
    }

    fn vocabulary(&self) -> &'static [(&'static str, &'static str)] {
        &[(
            "expect any [type] [or None]: attribute value: <path>",
            "The path is present with any value of the type",
        )]
    }

    fn ingest(
        &self,
        action_case: Option<&mut ActionCase>,
        _test_case: &mut TestCase,
        matched: &DirectiveMatch<'_>,
        _file_name: &str,
        _line_number: usize,
    ) -> Result<()> {
        let Some(ac) = action_case else {
            return Ok(());
        };
        let kind = match matched.get("type") {
            Some(t) => t.parse::<DataType>()?.kind(),
            None => Kind::Any,
        };
        let wildcard = Value::Wildcard(Wildcard::new(kind, matched.has("or_none")));
        let path = field_path("expects_any", matched.get("path").unwrap_or_default())?;
        ac.put(&path, wildcard)?;
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
        if let Some(expected) = action_case.get("expects_any") {
            assert_subset(expected, &response.body, false).map_err(in_action(action_path))?;
        }
        Ok(())
    }
}

/// `expect not present: attribute value: path`
pub struct ExpectNotPresentDirective;

impl Directive for ExpectNotPresentDirective {
    fn name(&self) -> &'static str {
        "expect_not_present"
    }

    fn shape(&self) -> DirectiveShape {
        DirectiveShape::Action
    }

    fn grammar(&self) -> String {
        r"expect not present:\s*attribute value:\s*(?P<path>[^:\s][^:]*?)".to_string()
    }

    fn vocabulary(&self) -> &'static [(&'static str, &'static str)] {
        &[(
            "expect not present: attribute value: <path>",
            "The path must not exist in the response body",
        )]
    }

    fn ingest(
        &self,
        action_case: Option<&mut ActionCase>,
        _test_case: &mut TestCase,
        matched: &DirectiveMatch<'_>,
        _file_name: &str,
        _line_number: usize,
    ) -> Result<()> {
        let Some(ac) = action_case else {
            return Ok(());
        };
        let path = matched.get("path").unwrap_or_default();
        Path::parse(path)?;
        push_item(ac.fields_mut(), &Path::root().key("expects_not_present"), Value::text(path))
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
        let paths = items(action_case.fields(), "expects_not_present")
            .iter()
            .filter_map(Value::as_str)
            .map(Path::parse)
            .collect::<Result<Vec<_>, _>>()?;
        if paths.is_empty() {
            return Ok(());
        }
        assert_not_present(&paths, &response.body).map_err(in_action(action_path))?;
        Ok(())
    }
}
