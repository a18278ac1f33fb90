use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::path::{Path, PathError};
use crate::value::Value;

/// `action_name.index` identifying one invocation within a test case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionPath {
    pub action: String,
    pub index: usize,
}

impl ActionPath {
    pub fn new(action: impl Into<String>, index: usize) -> Self {
        Self {
            action: action.into(),
            index,
        }
    }
}

impl fmt::Display for ActionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.action, self.index)
    }
}

impl FromStr for ActionPath {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once('.') {
            Some((action, index)) if index.bytes().all(|b| b.is_ascii_digit()) => {
                let index = index.parse().map_err(|_| format!("bad action index in {s:?}"))?;
                Ok(ActionPath::new(action, index))
            }
            _ if !s.is_empty() && !s.contains('.') => Ok(ActionPath::new(s, 0)),
            _ => Err(format!("invalid action path {s:?}")),
        }
    }
}

/// Directive-populated data for one action invocation. Field names are chosen by directives.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionCase {
    fields: Value,
}

impl Default for ActionCase {
    fn default() -> Self {
        Self { fields: Value::map() }
    }
}

impl ActionCase {
    pub fn fields(&self) -> &Value {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut Value {
        &mut self.fields
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.lookup(field)
    }

    pub fn get_path(&self, path: &Path) -> Option<&Value> {
        self.fields.get_path(path).ok()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    pub fn put(&mut self, path: &Path, value: Value) -> Result<(), PathError> {
        self.fields.put_path(path, value)
    }

    pub fn merge(&mut self, other: ActionCase) {
        self.fields.deep_merge(other.fields);
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_blank()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestCase {
    pub name: Option<String>,
    pub description: Option<String>,
    pub skip: Option<String>,
    pub action_paths: Vec<ActionPath>,
    pub actions: IndexMap<ActionPath, ActionCase>,
    /// Test-case scoped directive data (mocks, stubs, frozen time).
    pub fields: Value,
    pub fixture_name: String,
    pub fixture_file: String,
    pub line_number: usize,
}

impl Default for TestCase {
    fn default() -> Self {
        Self {
            name: None,
            description: None,
            skip: None,
            action_paths: Vec::new(),
            actions: IndexMap::new(),
            fields: Value::map(),
            fixture_name: String::new(),
            fixture_file: String::new(),
            line_number: 0,
        }
    }
}

impl TestCase {
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    pub fn description(&self) -> &str {
        self.description.as_deref().unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.skip.is_none()
            && self.action_paths.is_empty()
            && self.actions.is_empty()
            && self.fields.is_blank()
    }

    pub fn action(&self, path: &ActionPath) -> Option<&ActionCase> {
        self.actions.get(path)
    }

    pub fn field(&self, field: &str) -> Option<&Value> {
        self.fields.lookup(field)
    }

    /// Build the effective test case from file-wide globals and the case's own directives.
    /// The case wins wherever both set something. A case naming no actions of its own runs
    /// the global ones in declaration order.
    pub fn merged_with_globals(globals: &TestCase, case: TestCase) -> TestCase {
        let action_paths = if case.action_paths.is_empty() {
            globals.actions.keys().cloned().collect()
        } else {
            case.action_paths
        };
        let mut fields = globals.fields.clone();
        fields.deep_merge(case.fields);
        let mut actions = globals.actions.clone();
        for (path, action_case) in case.actions {
            match actions.get_mut(&path) {
                Some(existing) => existing.merge(action_case),
                None => {
                    actions.insert(path, action_case);
                }
            }
        }
        TestCase {
            name: case.name.or_else(|| globals.name.clone()),
            description: case.description.or_else(|| globals.description.clone()),
            skip: case.skip.or_else(|| globals.skip.clone()),
            action_paths,
            actions,
            fields,
            fixture_name: case.fixture_name,
            fixture_file: case.fixture_file,
            line_number: case.line_number,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestFixture {
    pub name: String,
    pub file: String,
    pub cases: Vec<TestCase>,
}

/// One error as reported by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ErrorInfo {
    pub fn to_value(&self) -> Value {
        let mut map = IndexMap::new();
        map.insert("code".to_string(), Value::text(&self.code));
        map.insert(
            "field".to_string(),
            self.field.clone().map_or(Value::Null, Value::Text),
        );
        map.insert("message".to_string(), Value::text(&self.message));
        Value::Map(map)
    }
}

/// What one executed action produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionResponse {
    pub action: String,
    pub job_errors: Vec<ErrorInfo>,
    pub errors: Vec<ErrorInfo>,
    pub body: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestCaseResults {
    pub actions: IndexMap<ActionPath, ActionResponse>,
}

impl TestCaseResults {
    /// Response bodies keyed by action path, the shape substitution references address.
    pub fn substitution_source(&self) -> Value {
        Value::Map(
            self.actions
                .iter()
                .map(|(path, response)| (path.to_string(), response.body.clone()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestFixtureResults {
    pub cases: IndexMap<String, TestCaseResults>,
}

#[derive(Debug, Clone)]
pub struct CaseResult {
    pub name: String,
    pub description: String,
    pub fixture_name: String,
    pub fixture_file: String,
    pub line_number: usize,
    pub skipped: Option<String>,
    pub error: Option<String>,
    pub secondary_errors: Vec<String>,
    pub passed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Summary {
    pub total: usize,   // Total number of test cases
    pub passed: usize,  // Number of passed test cases
    pub failed: usize,  // Number of failed test cases
    pub skipped: usize, // Number of skipped test cases
    pub cases: Vec<CaseResult>,
}

impl Summary {
    pub fn from_cases(cases: Vec<CaseResult>) -> Self {
        let skipped = cases.iter().filter(|c| c.skipped.is_some()).count();
        let passed = cases.iter().filter(|c| c.passed && c.skipped.is_none()).count();
        Summary {
            total: cases.len(),
            passed,
            failed: cases.len() - passed - skipped,
            skipped,
            cases,
        }
    }

    pub fn absorb(&mut self, other: Summary) {
        self.total += other.total;
        self.passed += other.passed;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.cases.extend(other.cases);
    }
}
