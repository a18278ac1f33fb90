use crate::directive::{Directive, DirectiveMatch};
use crate::directives::syntax_error;
use crate::error::Result;
use crate::types::{ActionCase, TestCase};

pub struct TestNameDirective;

impl Directive for TestNameDirective {
    fn name(&self) -> &'static str {
        "test_name"
    }

    fn grammar(&self) -> String {
        r"test name:\s*(?P<name>[\w.\-]+)".to_string()
    }

    fn vocabulary(&self) -> &'static [(&'static str, &'static str)] {
        &[("test name: <identifier>", "Starts a test case and names it")]
    }

    fn ingest(
        &self,
        _action_case: Option<&mut ActionCase>,
        test_case: &mut TestCase,
        matched: &DirectiveMatch<'_>,
        file_name: &str,
        line_number: usize,
    ) -> Result<()> {
        if test_case.name.is_some() {
            return Err(syntax_error(
                file_name,
                line_number,
                1,
                "duplicate test name; separate test cases with a blank line",
            ));
        }
        test_case.name = matched.get("name").map(str::to_string);
        Ok(())
    }
}

pub struct TestDescriptionDirective;

impl Directive for TestDescriptionDirective {
    fn name(&self) -> &'static str {
        "test_description"
    }

    fn grammar(&self) -> String {
        r"test description:\s*(?P<description>.+?)".to_string()
    }

    fn vocabulary(&self) -> &'static [(&'static str, &'static str)] {
        &[("test description: <text>", "What the test case checks")]
    }

    fn ingest(
        &self,
        _action_case: Option<&mut ActionCase>,
        test_case: &mut TestCase,
        matched: &DirectiveMatch<'_>,
        file_name: &str,
        line_number: usize,
    ) -> Result<()> {
        if test_case.description.is_some() {
            return Err(syntax_error(
                file_name,
                line_number,
                1,
                "duplicate test description; separate test cases with a blank line",
            ));
        }
        test_case.description = matched.get("description").map(str::to_string);
        Ok(())
    }
}

pub struct CommentDirective;

impl Directive for CommentDirective {
    fn name(&self) -> &'static str {
        "comment"
    }

    fn grammar(&self) -> String {
        "#.*".to_string()
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
}

/// `test skip: <reason>`. With `global` it skips every test case in the file.
pub struct TestSkipDirective;

impl Directive for TestSkipDirective {
    fn name(&self) -> &'static str {
        "test_skip"
    }

    fn grammar(&self) -> String {
        r"test skip(?:\s+(?P<global>global))?:\s*(?P<reason>.+?)".to_string()
    }

    fn vocabulary(&self) -> &'static [(&'static str, &'static str)] {
        &[
            ("test skip: <reason>", "Skip this test case"),
            ("test skip global: <reason>", "Skip every test case in the file"),
        ]
    }

    fn ingest(
        &self,
        _action_case: Option<&mut ActionCase>,
        test_case: &mut TestCase,
        matched: &DirectiveMatch<'_>,
        _file_name: &str,
        _line_number: usize,
    ) -> Result<()> {
        test_case.skip = matched.get("reason").map(str::to_string);
        Ok(())
    }
}
