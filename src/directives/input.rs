use crate::directive::{Directive, DirectiveMatch, DirectiveShape};
use crate::directives::{field_path, scope_fields};
use crate::error::Result;
use crate::types::{ActionCase, TestCase};
use crate::value::{TYPE_KEYWORDS, typed_value};

/// `action: input [job control|job context] [type]: path: value`
pub struct InputDirective;

impl Directive for InputDirective {
    fn name(&self) -> &'static str {
        "input"
    }

    fn shape(&self) -> DirectiveShape {
        DirectiveShape::Action
    }

    fn grammar(&self) -> String {
        format!(
            r"input(?:\s+(?P<input_kind>job control|job context))?(?:\s+(?P<type>{TYPE_KEYWORDS}))?:\s*(?P<path>[^:\s][^:]*?)(?:\s*:\s?(?P<value>.*?))?"
        )
    }

    fn vocabulary(&self) -> &'static [(&'static str, &'static str)] {
        &[
            ("input [type]: <path>: <value>", "Set a field of the action request body"),
            ("input job control [type]: <path>: <value>", "Override a job control header"),
            ("input job context [type]: <path>: <value>", "Set a job context value"),
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
        let field = match matched.get("input_kind") {
            Some("job control") => "job_control",
            Some(_) => "job_context",
            None => "inputs",
        };
        let value = typed_value(matched.get("type"), matched.get("value"))?;
        let path = field_path(field, matched.get("path").unwrap_or_default())?;
        scope_fields(action_case, test_case).put_path(&path, value)?;
        Ok(())
    }
}
