//! Runs parsed fixtures against the service.
//!
//! Lifecycle per fixture: fixture set-up before its first runnable case, then for each case
//! set-up, each action in order (set-up, call, assert, tear-down), case assertions and
//! tear-down, and fixture assertions and tear-down after its last runnable case. Tear-down
//! always runs, and its failures are reported next to the primary error instead of replacing
//! it.

use std::sync::Arc;

use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::caller::{ActionCaller, ActionRequest};
use crate::directive::{DirectiveRegistry, HookContext};
use crate::error::{Error, Result};
use crate::harness::{Harness, ScopedResource};
use crate::substitution;
use crate::types::{
    ActionCase, ActionPath, ActionResponse, CaseResult, Summary, TestCase, TestCaseResults, TestFixture,
    TestFixtureResults,
};
use crate::value::Value;

/// Everything a fixture run needs besides the fixture itself.
pub struct RunContext {
    pub service: String,
    pub registry: Arc<DirectiveRegistry>,
    pub caller: Arc<dyn ActionCaller>,
    pub harness: Harness,
    /// Consulted after earlier action responses when resolving `[[..]]` tokens.
    pub constants: Value,
}

/// One enumerated test case. `run` executes it, including fixture set-up or tear-down when
/// this case sits at that boundary.
pub struct TestCaseHandle {
    pub name: String,
    pub description: String,
    pub fixture_name: String,
    pub fixture_file: String,
    pub line_number: usize,
    pub skip_reason: Option<String>,
    runnable: Box<dyn FnOnce() -> CaseResult + Send>,
}

impl TestCaseHandle {
    pub fn run(self) -> CaseResult {
        (self.runnable)()
    }
}

/// The enumerated cases of one fixture, in declaration order.
pub struct FixtureCases {
    pub cases: Vec<TestCaseHandle>,
    run: Arc<FixtureRun>,
}

impl FixtureCases {
    /// Tear the fixture down if any case set it up and the last runnable case has not run.
    /// Returns tear-down failures. Dropping every handle without calling this tears down too,
    /// but then failures can only be logged.
    pub fn finish(self) -> Vec<String> {
        let FixtureCases { cases, run } = self;
        drop(cases);
        run.finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FixturePhase {
    NotStarted,
    SetUp,
    TornDown,
}

struct FixtureState {
    phase: FixturePhase,
    setup_error: Option<String>,
    resources: Vec<Box<dyn ScopedResource>>,
    results: TestFixtureResults,
}

struct FixtureRun {
    ctx: Arc<RunContext>,
    fixture: TestFixture,
    /// Position of the last case that is not skipped. Running it ends the fixture, whichever
    /// cases ran before.
    last_runnable: Option<usize>,
    state: Mutex<FixtureState>,
}

/// Enumerate the cases of `fixture` for a host runner.
pub fn fixture_test_cases(fixture: TestFixture, ctx: Arc<RunContext>) -> FixtureCases {
    let last_runnable = fixture.cases.iter().rposition(|c| c.skip.is_none());
    let run = Arc::new(FixtureRun {
        ctx,
        fixture,
        last_runnable,
        state: Mutex::new(FixtureState {
            phase: FixturePhase::NotStarted,
            setup_error: None,
            resources: Vec::new(),
            results: TestFixtureResults::default(),
        }),
    });
    let cases = run
        .fixture
        .cases
        .iter()
        .enumerate()
        .map(|(index, case)| {
            let run = Arc::clone(&run);
            TestCaseHandle {
                name: case.name().to_string(),
                description: case.description().to_string(),
                fixture_name: case.fixture_name.clone(),
                fixture_file: case.fixture_file.clone(),
                line_number: case.line_number,
                skip_reason: case.skip.clone(),
                runnable: Box::new(move || run.run_case(index)),
            }
        })
        .collect();
    FixtureCases { cases, run }
}

/// Run every case of one fixture in order.
pub fn run_fixture(fixture: TestFixture, ctx: Arc<RunContext>) -> Summary {
    info!(fixture = %fixture.name, cases = fixture.cases.len(), "running fixture");
    let FixtureCases { cases, run } = fixture_test_cases(fixture, ctx);
    let mut results: Vec<CaseResult> = cases.into_iter().map(TestCaseHandle::run).collect();
    let leftover = run.finish();
    if let Some(last) = results.last_mut() {
        attach_secondary(last, leftover);
    }
    Summary::from_cases(results)
}

/// Run fixtures in parallel, or one after another with `serial`. Each fixture gets its own
/// context from `context_for`, so fixtures never share mocks.
pub fn run_fixtures<F>(fixtures: Vec<TestFixture>, context_for: F, serial: bool) -> Summary
where
    F: Fn(&TestFixture) -> Arc<RunContext> + Sync,
{
    let summaries: Vec<Summary> = if serial {
        fixtures
            .into_iter()
            .map(|f| {
                let ctx = context_for(&f);
                run_fixture(f, ctx)
            })
            .collect()
    } else {
        fixtures
            .into_par_iter()
            .map(|f| {
                let ctx = context_for(&f);
                run_fixture(f, ctx)
            })
            .collect()
    };
    let mut total = Summary::default();
    for s in summaries {
        total.absorb(s);
    }
    total
}

fn attach_secondary(result: &mut CaseResult, errors: Vec<String>) {
    if errors.is_empty() {
        return;
    }
    result.secondary_errors.extend(errors);
    result.passed = false;
}

/// Start whatever the last hook handed over, keeping started resources in `started`.
fn start_pending(hc: &mut HookContext<'_>, started: &mut Vec<Box<dyn ScopedResource>>) -> Result<()> {
    for mut resource in hc.take_pending() {
        resource.start().map_err(Error::Resource)?;
        debug!(resource = %resource.describe(), "resource started");
        started.push(resource);
    }
    Ok(())
}

/// Stop resources in reverse acquisition order.
fn stop_all(resources: Vec<Box<dyn ScopedResource>>, errors: &mut Vec<String>) {
    for mut resource in resources.into_iter().rev() {
        if let Err(e) = resource.stop() {
            warn!(resource = %resource.describe(), "failed to stop: {e:#}");
            errors.push(format!("failed to stop {}: {e:#}", resource.describe()));
        }
    }
}

fn discard_pending(hc: &mut HookContext<'_>, phase: &str) {
    for resource in hc.take_pending() {
        warn!(resource = %resource.describe(), phase, "resource acquired outside set-up, ignored");
    }
}

impl FixtureRun {
    fn run_case(&self, index: usize) -> CaseResult {
        let case = &self.fixture.cases[index];
        let mut result = CaseResult {
            name: case.name().to_string(),
            description: case.description().to_string(),
            fixture_name: case.fixture_name.clone(),
            fixture_file: case.fixture_file.clone(),
            line_number: case.line_number,
            skipped: None,
            error: None,
            secondary_errors: Vec::new(),
            passed: false,
        };
        if let Some(reason) = &case.skip {
            info!(case = case.name(), reason = %reason, "skipped");
            result.skipped = Some(reason.clone());
            result.passed = true;
            return result;
        }

        match self.ensure_set_up() {
            Err(message) => result.error = Some(message),
            Ok(()) => {
                let (outcome, results, secondary) = self.execute(case);
                if let Err(e) = outcome {
                    result.error = Some(e.to_string());
                }
                result.secondary_errors = secondary;
                self.state.lock().results.cases.insert(case.name().to_string(), results);
            }
        }
        result.passed = result.error.is_none() && result.secondary_errors.is_empty();

        if self.last_runnable == Some(index) {
            let errors = self.finish();
            attach_secondary(&mut result, errors);
        }
        result
    }

    /// Fixture set-up, once. A failed set-up fails every case of the fixture.
    fn ensure_set_up(&self) -> std::result::Result<(), String> {
        let mut state = self.state.lock();
        if state.phase == FixturePhase::NotStarted {
            state.phase = FixturePhase::SetUp;
            let mut hc = HookContext::new(&self.ctx.harness);
            let mut started = Vec::new();
            let outcome = self.ctx.registry.iter().try_for_each(|d| {
                d.set_up_test_fixture(&self.fixture, &mut hc)?;
                start_pending(&mut hc, &mut started)
            });
            state.resources = started;
            if let Err(e) = outcome {
                warn!(fixture = %self.fixture.name, "fixture set-up failed: {e}");
                state.setup_error = Some(format!("fixture set-up failed: {e}"));
            }
        }
        match &state.setup_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn finish(&self) -> Vec<String> {
        let mut state = self.state.lock();
        if state.phase != FixturePhase::SetUp {
            return Vec::new();
        }
        state.phase = FixturePhase::TornDown;
        let mut errors = Vec::new();
        let mut hc = HookContext::new(&self.ctx.harness);
        if state.setup_error.is_none() {
            for d in self.ctx.registry.iter() {
                if let Err(e) = d.assert_test_fixture_results(&self.fixture, &state.results, &mut hc) {
                    errors.push(e.to_string());
                }
            }
        }
        for d in self.ctx.registry.iter() {
            if let Err(e) = d.tear_down_test_fixture(&self.fixture, &mut hc) {
                errors.push(format!("fixture tear-down failed: {e}"));
            }
        }
        discard_pending(&mut hc, "fixture tear-down");
        stop_all(std::mem::take(&mut state.resources), &mut errors);
        debug!(fixture = %self.fixture.name, errors = errors.len(), "fixture torn down");
        errors
    }

    /// Case set-up, actions, case assertions, case tear-down.
    fn execute(&self, case: &TestCase) -> (Result<()>, TestCaseResults, Vec<String>) {
        let registry = &self.ctx.registry;
        let mut results = TestCaseResults::default();
        let mut secondary = Vec::new();
        let mut hc = HookContext::new(&self.ctx.harness);
        let mut resources = Vec::new();
        debug!(case = case.name(), "test case set-up");

        let mut outcome = registry.iter().try_for_each(|d| {
            d.set_up_test_case(case, &mut hc)?;
            start_pending(&mut hc, &mut resources)
        });
        if outcome.is_ok() {
            outcome = case
                .action_paths
                .iter()
                .try_for_each(|path| self.run_action(case, path, &mut results, &mut secondary));
        }
        if outcome.is_ok() {
            outcome = registry
                .iter()
                .try_for_each(|d| d.assert_test_case_results(case, &results, &mut hc));
        }

        for d in registry.iter() {
            if let Err(e) = d.tear_down_test_case(case, &mut hc) {
                secondary.push(format!("test case tear-down failed: {e}"));
            }
        }
        discard_pending(&mut hc, "test case");
        stop_all(resources, &mut secondary);
        (outcome, results, secondary)
    }

    fn run_action(
        &self,
        case: &TestCase,
        path: &ActionPath,
        results: &mut TestCaseResults,
        secondary: &mut Vec<String>,
    ) -> Result<()> {
        let default_case = ActionCase::default();
        let action_case = case.action(path).unwrap_or(&default_case);
        let mut hc = HookContext::new(&self.ctx.harness);
        let mut resources = Vec::new();
        debug!(case = case.name(), action = %path, "action set-up");

        let outcome = self
            .ctx
            .registry
            .iter()
            .try_for_each(|d| {
                d.set_up_test_case_action(path, action_case, case, &mut hc)?;
                start_pending(&mut hc, &mut resources)
            })
            .and_then(|()| self.call_action(case, path, action_case, results, &mut hc));

        for d in self.ctx.registry.iter() {
            if let Err(e) = d.tear_down_test_case_action(path, action_case, case, &mut hc) {
                secondary.push(format!("{path}: tear-down failed: {e}"));
            }
        }
        discard_pending(&mut hc, "action");
        stop_all(resources, secondary);
        outcome
    }

    fn call_action(
        &self,
        case: &TestCase,
        path: &ActionPath,
        action_case: &ActionCase,
        results: &mut TestCaseResults,
        hc: &mut HookContext<'_>,
    ) -> Result<()> {
        let earlier = results.substitution_source();
        let sources = [&earlier, &self.ctx.constants];
        let field = |name: &str| -> Result<Value> {
            let mut value = action_case.get(name).cloned().unwrap_or_else(Value::map);
            substitution::resolve(&mut value, &sources)?;
            Ok(value)
        };
        let request = ActionRequest {
            action: path.action.clone(),
            body: field("inputs")?,
        };
        let context = field("job_context")?;
        let control = field("job_control")?;

        info!(case = case.name(), action = %path, "calling action");
        let job = self
            .ctx
            .caller
            .call(&self.ctx.service, std::slice::from_ref(&request), &context, &control)
            .map_err(Error::ActionCaller)?;
        let action_result = job.actions.into_iter().next().unwrap_or_default();
        results.actions.insert(
            path.clone(),
            ActionResponse {
                action: path.action.clone(),
                job_errors: job.errors,
                errors: action_result.errors,
                body: action_result.body,
            },
        );

        let results: &TestCaseResults = results;
        let Some(response) = results.actions.get(path) else {
            return Ok(());
        };
        self.ctx
            .registry
            .iter()
            .try_for_each(|d| d.assert_test_case_action_results(path, action_case, case, response, results, hc))
    }
}

impl Drop for FixtureRun {
    fn drop(&mut self) {
        for e in self.finish() {
            warn!(fixture = %self.fixture.name, "{e}");
        }
    }
}
