//! Statement types and how they compose into the fixture line grammar.
//!
//! A [`Directive`] contributes one regex fragment and any number of lifecycle hooks. The
//! [`Grammar`] tries fragments in registration order and the first match wins, so a directive
//! registered earlier shadows any later one whose fragment also matches the line.

use regex::{Captures, Regex};
use tracing::debug;

use crate::error::{DirectiveError, Result};
use crate::harness::{Harness, ScopedResource};
use crate::types::{
    ActionCase, ActionPath, ActionResponse, TestCase, TestCaseResults, TestFixture,
    TestFixtureResults,
};

/// Leading `action[.index]: [global] ` of every action-scoped statement.
const ACTION_PREFIX: &str =
    r"(?P<action>[A-Za-z_][A-Za-z0-9_]*)(?:\.(?P<action_index>\d+))?:\s*(?:(?P<global>global)\s+)?";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveShape {
    /// Test-case statements such as `test name:`.
    Plain,
    /// Statements prefixed by `action[.index]:`.
    Action,
}

/// What the orchestrator hands to every hook: the collaborators and a place to leave
/// scoped resources for it to start.
pub struct HookContext<'h> {
    pub harness: &'h Harness,
    pending: Vec<Box<dyn ScopedResource>>,
}

impl<'h> HookContext<'h> {
    pub fn new(harness: &'h Harness) -> Self {
        Self {
            harness,
            pending: Vec::new(),
        }
    }

    /// Hand a resource to the orchestrator. It is started after the hook returns and stopped
    /// at the matching tear-down.
    pub fn acquire(&mut self, resource: Box<dyn ScopedResource>) {
        self.pending.push(resource);
    }

    pub fn take_pending(&mut self) -> Vec<Box<dyn ScopedResource>> {
        std::mem::take(&mut self.pending)
    }
}

/// A matched line, as seen by the directive that owns the matching fragment.
pub struct DirectiveMatch<'t> {
    captures: Captures<'t>,
    pub action: Option<ActionPath>,
    pub global: bool,
}

impl<'t> DirectiveMatch<'t> {
    /// A named capture, trimmed. Empty captures read as absent.
    pub fn get(&self, name: &str) -> Option<&'t str> {
        self.captures
            .name(name)
            .map(|m| m.as_str().trim())
            .filter(|s| !s.is_empty())
    }

    pub fn has(&self, name: &str) -> bool {
        self.captures.name(name).is_some()
    }

    /// 1-based column where a capture starts, or 1 if it did not participate.
    pub fn column(&self, name: &str) -> usize {
        self.captures.name(name).map_or(1, |m| m.start() + 1)
    }
}

/// A registered statement type. Directives hold no per-run state: everything they need flows
/// through the hook parameters, so one registry can be shared across threads.
pub trait Directive: Send + Sync {
    fn name(&self) -> &'static str;

    fn shape(&self) -> DirectiveShape {
        DirectiveShape::Plain
    }

    /// Regex fragment for this statement. Action-scoped fragments cover only the part after
    /// the `action[.index]: [global]` prefix.
    fn grammar(&self) -> String;

    /// Term/description pairs for documentation.
    fn vocabulary(&self) -> &'static [(&'static str, &'static str)] {
        &[]
    }

    fn ingest(
        &self,
        action_case: Option<&mut ActionCase>,
        test_case: &mut TestCase,
        matched: &DirectiveMatch<'_>,
        file_name: &str,
        line_number: usize,
    ) -> Result<()>;

    fn post_parse_test_case_action(
        &self,
        _action_path: &ActionPath,
        _action_case: &mut ActionCase,
        _test_case: &TestCase,
    ) -> Result<()> {
        Ok(())
    }

    fn post_parse_test_case(&self, _test_case: &mut TestCase) -> Result<()> {
        Ok(())
    }

    fn set_up_test_fixture(&self, _fixture: &TestFixture, _ctx: &mut HookContext<'_>) -> Result<()> {
        Ok(())
    }

    fn set_up_test_case(&self, _test_case: &TestCase, _ctx: &mut HookContext<'_>) -> Result<()> {
        Ok(())
    }

    fn set_up_test_case_action(
        &self,
        _action_path: &ActionPath,
        _action_case: &ActionCase,
        _test_case: &TestCase,
        _ctx: &mut HookContext<'_>,
    ) -> Result<()> {
        Ok(())
    }

    fn assert_test_case_action_results(
        &self,
        _action_path: &ActionPath,
        _action_case: &ActionCase,
        _test_case: &TestCase,
        _response: &ActionResponse,
        _results: &TestCaseResults,
        _ctx: &mut HookContext<'_>,
    ) -> Result<()> {
        Ok(())
    }

    fn tear_down_test_case_action(
        &self,
        _action_path: &ActionPath,
        _action_case: &ActionCase,
        _test_case: &TestCase,
        _ctx: &mut HookContext<'_>,
    ) -> Result<()> {
        Ok(())
    }

    fn assert_test_case_results(
        &self,
        _test_case: &TestCase,
        _results: &TestCaseResults,
        _ctx: &mut HookContext<'_>,
    ) -> Result<()> {
        Ok(())
    }

    fn tear_down_test_case(&self, _test_case: &TestCase, _ctx: &mut HookContext<'_>) -> Result<()> {
        Ok(())
    }

    fn assert_test_fixture_results(
        &self,
        _fixture: &TestFixture,
        _results: &TestFixtureResults,
        _ctx: &mut HookContext<'_>,
    ) -> Result<()> {
        Ok(())
    }

    fn tear_down_test_fixture(&self, _fixture: &TestFixture, _ctx: &mut HookContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// The ordered set of directives in use. Built once and passed by reference.
#[derive(Default)]
pub struct DirectiveRegistry {
    directives: Vec<Box<dyn Directive>>,
}

impl DirectiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<D: Directive + 'static>(&mut self, directive: D) -> Result<&mut Self, DirectiveError> {
        if self.directives.iter().any(|d| d.name() == directive.name()) {
            return Err(DirectiveError::DuplicateName(directive.name().to_string()));
        }
        debug!(name = directive.name(), "registering directive");
        self.directives.push(Box::new(directive));
        Ok(self)
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Directive> {
        self.directives.iter().map(|d| d.as_ref())
    }

    pub fn get(&self, index: usize) -> Option<&dyn Directive> {
        self.directives.get(index).map(|d| d.as_ref())
    }

    pub fn len(&self) -> usize {
        self.directives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    /// Compose the line grammar from every registered fragment, in registration order.
    pub fn grammar(&self) -> Result<Grammar, DirectiveError> {
        if self.directives.is_empty() {
            return Err(DirectiveError::NoDirectives);
        }
        let rules = self
            .directives
            .iter()
            .enumerate()
            .map(|(index, d)| {
                let source = match d.shape() {
                    DirectiveShape::Plain => format!(r"^(?:{})\s*$", d.grammar()),
                    DirectiveShape::Action => format!(r"^{ACTION_PREFIX}(?:{})\s*$", d.grammar()),
                };
                let regex = Regex::new(&source).map_err(|e| DirectiveError::InvalidGrammar {
                    name: d.name().to_string(),
                    reason: e.to_string(),
                })?;
                Ok(Rule {
                    directive: index,
                    shape: d.shape(),
                    regex,
                })
            })
            .collect::<Result<Vec<_>, DirectiveError>>()?;
        Ok(Grammar { rules })
    }

    /// `(directive name, vocabulary)` for every directive that documents its terms.
    pub fn vocabulary(&self) -> Vec<(&'static str, &'static [(&'static str, &'static str)])> {
        self.directives
            .iter()
            .map(|d| (d.name(), d.vocabulary()))
            .collect()
    }
}

struct Rule {
    directive: usize,
    shape: DirectiveShape,
    regex: Regex,
}

/// The composed line grammar.
pub struct Grammar {
    rules: Vec<Rule>,
}

impl Grammar {
    /// Match `line` against each fragment in order. Returns the index of the winning directive.
    pub fn match_line<'t>(&self, line: &'t str) -> Option<(usize, DirectiveMatch<'t>)> {
        self.rules.iter().find_map(|rule| {
            let captures = rule.regex.captures(line)?;
            let action = match rule.shape {
                DirectiveShape::Plain => None,
                DirectiveShape::Action => {
                    let name = captures.name("action")?.as_str();
                    let index = captures
                        .name("action_index")
                        .and_then(|m| m.as_str().parse().ok())
                        .unwrap_or(0);
                    Some(ActionPath::new(name, index))
                }
            };
            let global = captures.name("global").is_some();
            Some((
                rule.directive,
                DirectiveMatch {
                    captures,
                    action,
                    global,
                },
            ))
        })
    }
}
