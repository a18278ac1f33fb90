use crate::directive::{Directive, DirectiveMatch, DirectiveShape, HookContext};
use crate::directives::scope_fields;
use crate::error::{DataTypeConversionError, DirectiveError, Result};
use crate::path::Path;
use crate::types::{ActionCase, ActionPath, TestCase};
use crate::value::{Value, parse_datetime};

/// `freeze time: <when>` for a test case, `action: freeze time: <when>` for one action.
pub struct FreezeTimeDirective {
    shape: DirectiveShape,
}

impl FreezeTimeDirective {
    pub fn new(shape: DirectiveShape) -> Self {
        Self { shape }
    }

    fn set_up(&self, frozen: Option<&Value>, ctx: &mut HookContext<'_>) -> Result<()> {
        let Some(Value::DateTime(at)) = frozen else {
            return Ok(());
        };
        let clock = ctx.harness.clock.clone().ok_or_else(|| DirectiveError::MissingCollaborator {
            name: self.name().to_string(),
            collaborator: "time-freezing",
        })?;
        ctx.acquire(clock.freeze(*at));
        Ok(())
    }
}

impl Directive for FreezeTimeDirective {
    fn name(&self) -> &'static str {
        match self.shape {
            DirectiveShape::Plain => "freeze_time",
            DirectiveShape::Action => "action_freeze_time",
        }
    }

    fn shape(&self) -> DirectiveShape {
        self.shape
    }

    fn grammar(&self) -> String {
        r"freeze time:\s*(?P<when>\S.*?)".to_string()
    }

    fn vocabulary(&self) -> &'static [(&'static str, &'static str)] {
        &[("freeze time: <now|utc_now|midnight|ISO-8601>", "Pin the clock seen by the service")]
    }

    fn ingest(
        &self,
        action_case: Option<&mut ActionCase>,
        test_case: &mut TestCase,
        matched: &DirectiveMatch<'_>,
        _file_name: &str,
        _line_number: usize,
    ) -> Result<()> {
        let when = matched.get("when").unwrap_or_default();
        let at = parse_datetime(when).ok_or_else(|| DataTypeConversionError {
            data_type: "datetime".to_string(),
            value: when.to_string(),
            reason: "expected now, utc_now, midnight or an ISO-8601 datetime".to_string(),
        })?;
        scope_fields(action_case, test_case).put_path(&Path::root().key("freeze_time"), Value::DateTime(at))?;
        Ok(())
    }

    fn set_up_test_case(&self, test_case: &TestCase, ctx: &mut HookContext<'_>) -> Result<()> {
        if self.shape != DirectiveShape::Plain {
            return Ok(());
        }
        self.set_up(test_case.field("freeze_time"), ctx)
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
        self.set_up(action_case.get("freeze_time"), ctx)
    }
}
