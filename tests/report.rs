use action_test::directives::default_registry;
use action_test::report::{OutputKind, ReportOptions, render_human, render_vocabulary};
use action_test::types::{CaseResult, Summary};

fn case(name: &str, error: Option<&str>, skipped: Option<&str>) -> CaseResult {
    CaseResult {
        name: name.to_string(),
        description: format!("{name} description"),
        fixture_name: "users".to_string(),
        fixture_file: "tests/users.fixture".to_string(),
        line_number: 4,
        skipped: skipped.map(str::to_string),
        error: error.map(str::to_string),
        secondary_errors: Vec::new(),
        passed: error.is_none(),
    }
}

fn summary() -> Summary {
    let mut broken = case("broken", Some("create_user.0: expected values not found in response\n  missing: user.id"), None);
    broken.secondary_errors.push("fixture tear-down failed: mailer still patched".to_string());
    Summary::from_cases(vec![
        case("create", None, None),
        broken,
        case("later", None, Some("not ready")),
    ])
}

fn render(kind: OutputKind) -> String {
    colored::control::set_override(false);
    render_human(
        &summary(),
        &ReportOptions {
            kind,
            ..ReportOptions::default()
        },
    )
}

#[test]
fn summary_counts() {
    let s = summary();
    assert_eq!((s.total, s.passed, s.failed, s.skipped), (3, 1, 1, 1));
}

#[test]
fn normal_report_lists_every_case() {
    let out = render(OutputKind::Normal);
    assert!(out.contains("[OK] users: create"), "{out}");
    assert!(out.contains("[FAIL] users: broken"), "{out}");
    assert!(out.contains("[SKIP] users: later (not ready)"), "{out}");
    assert!(out.contains("tests/users.fixture:4"), "{out}");
    assert!(out.contains("missing: user.id"), "{out}");
    assert!(out.contains("mailer still patched"), "{out}");
}

#[test]
fn passes_and_fails_can_be_hidden() {
    colored::control::set_override(false);
    let s = summary();
    let only_fails = render_human(
        &s,
        &ReportOptions {
            hide_passes: true,
            ..ReportOptions::default()
        },
    );
    assert!(!only_fails.contains("[OK]"));
    assert!(only_fails.contains("[FAIL]"));

    let only_passes = render_human(
        &s,
        &ReportOptions {
            hide_fails: true,
            ..ReportOptions::default()
        },
    );
    assert!(only_passes.contains("[OK]"));
    assert!(!only_passes.contains("[FAIL]"));
}

#[test]
fn terse_and_compact_formats() {
    let terse = render(OutputKind::Terse);
    assert!(terse.starts_with(".Fs\n"), "{terse}");

    let compact = render(OutputKind::Compact);
    assert!(compact.starts_with("[FAIL] users 1/3: broken"), "{compact}");

    let last = render(OutputKind::Final);
    assert_eq!(last.lines().count(), 1, "{last}");
}

#[test]
fn vocabulary_lists_statement_forms() {
    colored::control::set_override(false);
    let out = render_vocabulary(&default_registry().unwrap());
    assert!(out.contains("input [type]: <path>: <value>"), "{out}");
    assert!(out.contains("freeze time:"), "{out}");
}
