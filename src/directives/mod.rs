//! The built-in statement types.

mod errors;
mod input;
mod mock;
mod stub;
mod test_case;
mod time;
mod values;

pub use errors::{ExpectErrorsDirective, ExpectNoErrorsDirective, parse_error_fields};
pub use input::InputDirective;
pub use mock::MockDirective;
pub use stub::StubActionDirective;
pub use test_case::{CommentDirective, TestDescriptionDirective, TestNameDirective, TestSkipDirective};
pub use time::FreezeTimeDirective;
pub use values::{ExpectAnyDirective, ExpectNotPresentDirective, ExpectValueDirective};

use crate::directive::{DirectiveRegistry, DirectiveShape};
use crate::error::{DirectiveError, Error, FixtureSyntaxError, Result};
use crate::path::Path;
use crate::types::{ActionCase, TestCase};
use crate::value::Value;

/// Every built-in directive, in the order their fragments are tried.
pub fn default_registry() -> Result<DirectiveRegistry, DirectiveError> {
    let mut registry = DirectiveRegistry::new();
    registry
        .register(TestNameDirective)?
        .register(TestDescriptionDirective)?
        .register(CommentDirective)?
        .register(TestSkipDirective)?
        .register(FreezeTimeDirective::new(DirectiveShape::Plain))?
        .register(MockDirective::new(DirectiveShape::Plain))?
        .register(StubActionDirective::new(DirectiveShape::Plain))?
        .register(InputDirective)?
        .register(ExpectNoErrorsDirective)?
        .register(ExpectErrorsDirective)?
        .register(ExpectAnyDirective)?
        .register(ExpectNotPresentDirective)?
        .register(ExpectValueDirective)?
        .register(MockDirective::new(DirectiveShape::Action))?
        .register(StubActionDirective::new(DirectiveShape::Action))?
        .register(FreezeTimeDirective::new(DirectiveShape::Action))?;
    Ok(registry)
}

/// A syntax error raised from inside a directive. The parser fills in the source line.
pub(crate) fn syntax_error(file_name: &str, line_number: usize, column: usize, message: impl Into<String>) -> Error {
    Error::Syntax(FixtureSyntaxError {
        file: file_name.to_string(),
        line: line_number,
        column,
        source_line: String::new(),
        message: message.into(),
    })
}

/// `field` followed by the author-supplied path.
pub(crate) fn field_path(field: &str, user_path: &str) -> Result<Path> {
    Ok(Path::root().key(field).join(&Path::parse(user_path)?))
}

/// Append to the list stored at `path`, creating it on first use.
pub(crate) fn push_item(fields: &mut Value, path: &Path, item: Value) -> Result<()> {
    let len = match fields.get_path(path) {
        Ok(Value::Sequence(items)) => items.len(),
        _ => 0,
    };
    fields.put_path(&path.index(len), item)?;
    Ok(())
}

/// The `fields` of whichever scope a statement writes to.
pub(crate) fn scope_fields<'a>(
    action_case: Option<&'a mut ActionCase>,
    test_case: &'a mut TestCase,
) -> &'a mut Value {
    match action_case {
        Some(ac) => ac.fields_mut(),
        None => &mut test_case.fields,
    }
}

/// Parse `raw` as JSON when it is JSON, otherwise keep it as text.
pub(crate) fn json_or_text(raw: &str) -> Value {
    serde_json::from_str::<serde_json::Value>(raw)
        .map(Value::from)
        .unwrap_or_else(|_| Value::text(raw))
}

/// The list stored under `field`, or nothing.
pub(crate) fn items<'v>(fields: &'v Value, field: &str) -> &'v [Value] {
    fields
        .get_path(&Path::root().key(field))
        .ok()
        .and_then(Value::as_sequence)
        .unwrap_or_default()
}
