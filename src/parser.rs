//! Line-by-line fixture parsing.
//!
//! Statements accumulate into a working test case until a blank line (or end of input) closes
//! it. Action-scoped statements open an action case; the next statement for a different action
//! closes it. Statements marked `global` accumulate into a file-wide buffer that is merged into
//! every test case as it is finalized.

use tracing::debug;

use crate::directive::{Directive, DirectiveMatch, DirectiveRegistry, Grammar};
use crate::error::{DirectiveError, Error, FixtureSyntaxError};
use crate::types::{ActionCase, ActionPath, TestCase, TestFixture};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// Nothing but blank lines so far.
    BeforeFixture,
    Accumulating,
    /// A line failed to parse; every further call reports the same error.
    Error,
}

/// Turns fixture text into a [`TestFixture`] using the grammar of a registry.
pub struct FixtureParser<'r> {
    registry: &'r DirectiveRegistry,
    grammar: Grammar,
}

impl<'r> FixtureParser<'r> {
    pub fn new(registry: &'r DirectiveRegistry) -> Result<Self, DirectiveError> {
        Ok(Self {
            registry,
            grammar: registry.grammar()?,
        })
    }

    /// Parse a complete file.
    pub fn parse(&self, fixture_name: &str, file_name: &str, text: &str) -> Result<TestFixture, FixtureSyntaxError> {
        let mut session = self.session(fixture_name, file_name);
        for line in text.lines() {
            session.feed_line(line)?;
        }
        session.finish()
    }

    /// Start an incremental parse.
    pub fn session<'p>(&'p self, fixture_name: &str, file_name: &str) -> ParseSession<'p, 'r> {
        ParseSession {
            parser: self,
            state: ParserState::BeforeFixture,
            fixture: TestFixture {
                name: fixture_name.to_string(),
                file: file_name.to_string(),
                cases: Vec::new(),
            },
            working: TestCase::default(),
            globals: TestCase::default(),
            open: None,
            line_number: 0,
            last_statement: (0, String::new()),
            failure: None,
        }
    }
}

struct OpenAction {
    path: ActionPath,
    global: bool,
    case: ActionCase,
}

pub struct ParseSession<'p, 'r> {
    parser: &'p FixtureParser<'r>,
    state: ParserState,
    fixture: TestFixture,
    working: TestCase,
    globals: TestCase,
    open: Option<OpenAction>,
    line_number: usize,
    last_statement: (usize, String),
    failure: Option<FixtureSyntaxError>,
}

impl ParseSession<'_, '_> {
    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn feed_line(&mut self, raw: &str) -> Result<(), FixtureSyntaxError> {
        if let Some(e) = &self.failure {
            return Err(e.clone());
        }
        self.line_number += 1;
        let result = self.process(raw);
        if let Err(e) = &result {
            self.state = ParserState::Error;
            self.failure = Some(e.clone());
        }
        result
    }

    /// Close whatever is still open and return the parsed fixture.
    pub fn finish(mut self) -> Result<TestFixture, FixtureSyntaxError> {
        if let Some(e) = self.failure.take() {
            return Err(e);
        }
        self.finish_test_case()?;
        debug!(
            fixture = %self.fixture.name,
            cases = self.fixture.cases.len(),
            "parsed fixture"
        );
        Ok(self.fixture)
    }

    fn process(&mut self, raw: &str) -> Result<(), FixtureSyntaxError> {
        let line = raw.trim_end_matches(['\r', '\n']);
        let statement = line.trim();
        if statement.is_empty() {
            return self.finish_test_case();
        }
        let indent = line.len() - line.trim_start().len();
        let parser = self.parser;
        let Some((index, matched)) = parser.grammar.match_line(statement) else {
            return Err(self.error_at(indent + 1, line, "line does not match any known statement"));
        };
        let Some(directive) = parser.registry.get(index) else {
            return Err(self.error_at(indent + 1, line, "statement matched an unregistered directive"));
        };
        self.state = ParserState::Accumulating;
        self.last_statement = (self.line_number, line.to_string());

        let was_empty = self.working.is_empty();
        self.ingest(directive, &matched).map_err(|e| {
            let column = match &e {
                Error::DataType(_) => matched.column("value"),
                _ => 1,
            };
            self.wrap(e, indent + column, line)
        })?;
        if was_empty && !self.working.is_empty() && self.working.line_number == 0 {
            self.working.line_number = self.line_number;
        }
        Ok(())
    }

    fn ingest(&mut self, directive: &dyn Directive, matched: &DirectiveMatch<'_>) -> Result<(), Error> {
        let file_name = self.fixture.file.clone();
        let line_number = self.line_number;
        let action_case = match &matched.action {
            Some(path) => {
                self.switch_action(path.clone(), matched.global)?;
                self.open.as_mut().map(|o| &mut o.case)
            }
            None => None,
        };
        let target = if matched.global { &mut self.globals } else { &mut self.working };
        directive.ingest(action_case, target, matched, &file_name, line_number)
    }

    /// Make `path` the open action case, closing a different one first.
    fn switch_action(&mut self, path: ActionPath, global: bool) -> Result<(), Error> {
        if let Some(open) = &self.open {
            if open.path == path && open.global == global {
                return Ok(());
            }
        }
        self.close_action()?;
        let target = if global { &mut self.globals } else { &mut self.working };
        let case = target.actions.shift_remove(&path).unwrap_or_default();
        if !global && !target.action_paths.contains(&path) {
            target.action_paths.push(path.clone());
        }
        self.open = Some(OpenAction { path, global, case });
        Ok(())
    }

    fn close_action(&mut self) -> Result<(), Error> {
        let Some(OpenAction { path, global, mut case }) = self.open.take() else {
            return Ok(());
        };
        let target = if global { &mut self.globals } else { &mut self.working };
        for directive in self.parser.registry.iter() {
            directive.post_parse_test_case_action(&path, &mut case, target)?;
        }
        target.actions.insert(path, case);
        Ok(())
    }

    fn finish_test_case(&mut self) -> Result<(), FixtureSyntaxError> {
        let (line, text) = self.last_statement.clone();
        self.close_action().map_err(|e| self.wrap_at(e, line, 1, &text))?;
        if self.working.is_empty() {
            return Ok(());
        }
        let case = std::mem::take(&mut self.working);
        if case.name.is_none() {
            return Err(self.syntax_at(line, 1, &text, "test case has no name"));
        }
        if case.description.is_none() {
            return Err(self.syntax_at(line, 1, &text, "test case has no description"));
        }
        if case.action_paths.is_empty() && self.globals.is_empty() {
            return Err(self.syntax_at(line, 1, &text, "test case has no actions"));
        }
        if self.fixture.cases.iter().any(|c| c.name == case.name) {
            let message = format!("duplicate test name {:?} in this file", case.name());
            return Err(self.syntax_at(line, 1, &text, message));
        }

        let mut case = TestCase::merged_with_globals(&self.globals, case);
        case.fixture_name = self.fixture.name.clone();
        case.fixture_file = self.fixture.file.clone();
        for directive in self.parser.registry.iter() {
            directive
                .post_parse_test_case(&mut case)
                .map_err(|e| self.wrap_at(e, line, 1, &text))?;
        }
        debug!(name = case.name(), line = case.line_number, "test case finished");
        self.fixture.cases.push(case);
        Ok(())
    }

    fn error_at(&self, column: usize, source_line: &str, message: &str) -> FixtureSyntaxError {
        self.syntax_at(self.line_number, column, source_line, message)
    }

    fn syntax_at(&self, line: usize, column: usize, source_line: &str, message: impl Into<String>) -> FixtureSyntaxError {
        FixtureSyntaxError {
            file: self.fixture.file.clone(),
            line,
            column,
            source_line: source_line.to_string(),
            message: message.into(),
        }
    }

    fn wrap(&self, error: Error, column: usize, source_line: &str) -> FixtureSyntaxError {
        self.wrap_at(error, self.line_number, column, source_line)
    }

    /// Anything raised while ingesting becomes a syntax error at the offending line.
    fn wrap_at(&self, error: Error, line: usize, column: usize, source_line: &str) -> FixtureSyntaxError {
        match error {
            Error::Syntax(mut e) => {
                if e.source_line.is_empty() {
                    e.source_line = source_line.to_string();
                }
                if e.file.is_empty() {
                    e.file = self.fixture.file.clone();
                }
                e
            }
            other => self.syntax_at(line, column, source_line, other.to_string()),
        }
    }
}
