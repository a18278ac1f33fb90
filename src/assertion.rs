//! Structural comparison of expected and actual values.

use indexmap::IndexMap;

use crate::error::AssertionFailure;
use crate::path::{Path, all_paths};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Actual may carry extra keys. With `subset_lists`, an expected list item may sit at any
    /// index of the actual list.
    Subset { subset_lists: bool },
    /// No extras anywhere, lists compared index by index.
    Exact,
    /// Every expected path must be absent or hold a different value.
    NotExpected,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mismatch {
    pub expected: Value,
    pub actual: Value,
}

/// The outcome of [`diff`]. Paths use the same syntax as [`Path`] parsing, so they can be fed
/// back into lookups.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diff {
    pub missing: Vec<Path>,
    pub mismatched: Vec<Path>,
    pub extra: Vec<Path>,
    pub details: IndexMap<Path, Mismatch>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.mismatched.is_empty() && self.extra.is_empty()
    }

    fn mismatch(&mut self, path: Path, expected: &Value, actual: &Value) {
        self.details.insert(
            path.clone(),
            Mismatch {
                expected: expected.clone(),
                actual: actual.clone(),
            },
        );
        self.mismatched.push(path);
    }

    /// One human-readable line per reported path.
    pub fn describe(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for p in &self.missing {
            lines.push(format!("missing: {}", display_path(p)));
        }
        for p in &self.mismatched {
            if let Some(m) = self.details.get(p) {
                lines.push(format!(
                    "mismatch at {}: expected {}, got {}",
                    display_path(p),
                    render(&m.expected),
                    render(&m.actual)
                ));
            }
        }
        for p in &self.extra {
            lines.push(format!("extra: {}", display_path(p)));
        }
        lines
    }

    pub fn into_result(self, message: &str) -> Result<(), AssertionFailure> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(AssertionFailure::with_details(message, self.describe()))
        }
    }
}

fn display_path(p: &Path) -> String {
    if p.is_root() { "<root>".to_string() } else { p.to_string() }
}

/// Text is quoted so that `"12"` and `12` read differently in reports.
pub fn render(v: &Value) -> String {
    match v {
        Value::Text(t) => format!("{t:?}"),
        other => other.to_string(),
    }
}

/// Leaf paths of `value` below `prefix`, or `prefix` itself for scalars and empty containers.
fn leaves_under(prefix: &Path, value: &Value) -> Vec<Path> {
    let leaves: Vec<Path> = all_paths(value, true).map(|p| prefix.join(&p)).collect();
    if leaves.is_empty() {
        vec![prefix.clone()]
    } else {
        leaves
    }
}

/// Compare `expected` against `actual` under `policy`.
pub fn diff(expected: &Value, actual: &Value, policy: Policy) -> Diff {
    let mut out = Diff::default();
    let walk_policy = match policy {
        Policy::NotExpected => Policy::Subset {
            subset_lists: false,
        },
        p => p,
    };
    compare(&Path::root(), expected, actual, walk_policy, &mut out);
    if policy == Policy::NotExpected {
        // a differing value satisfies the expectation just like an absent one
        let mismatched = std::mem::take(&mut out.mismatched);
        out.missing.extend(mismatched);
        out.details.clear();
        out.extra.clear();
    }
    out
}

fn compare(path: &Path, expected: &Value, actual: &Value, policy: Policy, out: &mut Diff) {
    match (expected, actual) {
        (Value::Map(e), Value::Map(a)) => {
            if e.is_empty() && !a.is_empty() {
                blank_against_populated(path, expected, actual, out);
                return;
            }
            for (k, ev) in e {
                let p = path.key(k.clone());
                match a.get(k) {
                    Some(av) => compare(&p, ev, av, policy, out),
                    None => out.missing.push(p),
                }
            }
            if policy == Policy::Exact {
                for (k, av) in a {
                    if !e.contains_key(k) {
                        out.extra.extend(leaves_under(&path.key(k.clone()), av));
                    }
                }
            }
        }
        (Value::Sequence(e), Value::Sequence(a)) => {
            if e.is_empty() && !a.is_empty() {
                blank_against_populated(path, expected, actual, out);
                return;
            }
            if let Policy::Subset { subset_lists: true } = policy {
                for (i, ev) in e.iter().enumerate() {
                    if !a.iter().any(|av| diff(ev, av, policy).is_empty()) {
                        out.missing.push(path.index(i));
                    }
                }
                return;
            }
            for (i, ev) in e.iter().enumerate() {
                match a.get(i) {
                    Some(av) => compare(&path.index(i), ev, av, policy, out),
                    None => out.missing.push(path.index(i)),
                }
            }
            if policy == Policy::Exact {
                for (i, av) in a.iter().enumerate().skip(e.len()) {
                    out.extra.extend(leaves_under(&path.index(i), av));
                }
            }
        }
        (Value::Map(_) | Value::Sequence(_), _) => out.mismatch(path.clone(), expected, actual),
        (e, a) => {
            if e != a {
                out.mismatch(path.clone(), e, a);
            }
        }
    }
}

fn blank_against_populated(path: &Path, expected: &Value, actual: &Value, out: &mut Diff) {
    out.mismatch(path.clone(), expected, actual);
    out.extra
        .extend(all_paths(actual, true).map(|p| path.join(&p)));
}

/// Every expected path must be present in `actual` with an equal value.
pub fn assert_subset(expected: &Value, actual: &Value, subset_lists: bool) -> Result<(), AssertionFailure> {
    diff(expected, actual, Policy::Subset { subset_lists })
        .into_result("expected values not found in response")
}

/// `actual` must equal `expected` with nothing extra.
pub fn assert_exact(expected: &Value, actual: &Value) -> Result<(), AssertionFailure> {
    diff(expected, actual, Policy::Exact).into_result("response does not exactly match")
}

/// Each expected leaf must be absent from `actual` or hold another value.
pub fn assert_not_expected(expected: &Value, actual: &Value) -> Result<(), AssertionFailure> {
    let d = diff(expected, actual, Policy::NotExpected);
    let leaves: Vec<Path> = all_paths(expected, true).collect();
    if d.missing.len() >= leaves.len() {
        return Ok(());
    }
    let offending = leaves
        .iter()
        .filter(|p| !d.missing.contains(p))
        .map(|p| match actual.get_path(p) {
            Ok(v) => format!("unexpected value at {}: {}", display_path(p), render(v)),
            Err(_) => format!("unexpected value at {}", display_path(p)),
        })
        .collect();
    Err(AssertionFailure::with_details(
        "response contains values that were expected not to be present",
        offending,
    ))
}

/// None of `paths` may resolve in `actual`.
pub fn assert_not_present(paths: &[Path], actual: &Value) -> Result<(), AssertionFailure> {
    let present: Vec<String> = paths
        .iter()
        .filter_map(|p| {
            actual
                .get_path(p)
                .ok()
                .map(|v| format!("present: {} = {}", display_path(p), render(v)))
        })
        .collect();
    if present.is_empty() {
        Ok(())
    } else {
        Err(AssertionFailure::with_details(
            "response contains paths expected not to be present",
            present,
        ))
    }
}

/// Order-insensitive list comparison. Each expected item consumes one equal actual item.
/// Without `subset`, both lists must also have the same length.
pub fn lists_match_any_order(
    expected: &[Value],
    actual: &[Value],
    subset: bool,
) -> Result<(), AssertionFailure> {
    let mut used = vec![false; actual.len()];
    let mut unmatched = Vec::new();
    for ev in expected {
        let found = actual
            .iter()
            .enumerate()
            .position(|(i, av)| !used[i] && ev == av);
        match found {
            Some(i) => used[i] = true,
            None => unmatched.push(format!("not found: {}", render(ev))),
        }
    }
    if !subset {
        for (i, av) in actual.iter().enumerate() {
            if !used[i] {
                unmatched.push(format!("unexpected: {}", render(av)));
            }
        }
    }
    if unmatched.is_empty() && (subset || expected.len() == actual.len()) {
        Ok(())
    } else {
        Err(AssertionFailure::with_details(
            format!(
                "lists differ (expected {} item(s), got {})",
                expected.len(),
                actual.len()
            ),
            unmatched,
        ))
    }
}
