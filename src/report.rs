use crate::directive::DirectiveRegistry;
use crate::types::{CaseResult, Summary};
use crate::{t, t_args};
use colored::Colorize;
use indexmap::IndexMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputKind {
    /// One line per case, details for failures.
    Normal,
    /// One line per fixture, failing case names listed.
    Compact,
    /// One character per case.
    Terse,
    /// Only the totals.
    Final,
}

#[derive(Clone, Copy, Debug)]
pub struct ReportOptions {
    pub kind: OutputKind,
    pub verbose: bool,
    pub hide_fails: bool,
    pub hide_passes: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            kind: OutputKind::Normal,
            verbose: false,
            hide_fails: false,
            hide_passes: false,
        }
    }
}

fn header(summary: &Summary) -> String {
    t_args!("report-summary",
        "total" => summary.total,
        "passed" => summary.passed.to_string().green(),
        "failed" => if summary.failed > 0 {
            summary.failed.to_string().red().bold().to_string()
        } else {
            summary.failed.to_string().green().to_string()
        },
        "skipped" => summary.skipped.to_string().yellow()
    )
}

fn title(c: &CaseResult) -> String {
    format!("{}: {}", c.fixture_name, c.name)
}

fn render_case(out: &mut String, c: &CaseResult, opts: &ReportOptions) {
    if let Some(reason) = &c.skipped {
        if !opts.hide_passes {
            out.push_str(&format!("{} {} ({})\n", "[SKIP]".yellow().bold(), title(c).yellow(), reason));
        }
        return;
    }
    if c.passed {
        if !opts.hide_passes {
            out.push_str(&format!("{} {}\n", "[OK]".green().bold(), title(c).green()));
            if opts.verbose && !c.description.is_empty() {
                out.push_str(&format!("  {}\n", c.description));
            }
        }
        return;
    }
    if opts.hide_fails {
        return;
    }
    out.push_str(&format!("{} {}\n", "[FAIL]".red().bold(), title(c).red().bold()));
    if !c.description.is_empty() {
        out.push_str(&format!("  {} {}\n", t!("report-description").bold(), c.description));
    }
    out.push_str(&format!(
        "  {} {}:{}\n",
        t!("report-location").bold(),
        c.fixture_file,
        c.line_number
    ));
    if let Some(err) = &c.error {
        let mut lines = err.lines();
        if let Some(first) = lines.next() {
            out.push_str(&format!("  {} {}\n", t!("report-error").bold(), first.red()));
        }
        for line in lines {
            out.push_str(&format!("    {line}\n"));
        }
    }
    for e in &c.secondary_errors {
        out.push_str(&format!("  {} {}\n", t!("report-also").bold(), e.red()));
    }
}

fn render_compact(out: &mut String, summary: &Summary, opts: &ReportOptions) {
    let mut by_fixture: IndexMap<&str, Vec<&CaseResult>> = IndexMap::new();
    for c in &summary.cases {
        by_fixture.entry(c.fixture_name.as_str()).or_default().push(c);
    }
    for (fixture, cases) in by_fixture {
        let failed: Vec<&&CaseResult> = cases
            .iter()
            .filter(|c| !c.passed && c.skipped.is_none())
            .collect();
        let passed = cases.iter().filter(|c| c.passed && c.skipped.is_none()).count();
        if failed.is_empty() {
            if !opts.hide_passes {
                out.push_str(&format!(
                    "{} {} {}/{}\n",
                    "[OK]".green().bold(),
                    fixture.green(),
                    passed,
                    cases.len()
                ));
            }
        } else if !opts.hide_fails {
            let names: Vec<&str> = failed.iter().map(|c| c.name.as_str()).collect();
            out.push_str(&format!(
                "{} {} {}/{}: {}\n",
                "[FAIL]".red().bold(),
                fixture.red().bold(),
                passed,
                cases.len(),
                names.join(", ")
            ));
        }
    }
}

fn render_terse(out: &mut String, summary: &Summary) {
    for c in &summary.cases {
        let mark = if c.skipped.is_some() {
            "s".yellow()
        } else if c.passed {
            ".".green()
        } else {
            "F".red().bold()
        };
        out.push_str(&mark.to_string());
    }
    out.push('\n');
}

pub fn render_human(summary: &Summary, opts: &ReportOptions) -> String {
    let mut out = String::new();
    match opts.kind {
        OutputKind::Normal => {
            for c in &summary.cases {
                render_case(&mut out, c, opts);
            }
        }
        OutputKind::Compact => render_compact(&mut out, summary, opts),
        OutputKind::Terse => render_terse(&mut out, summary),
        OutputKind::Final => {}
    }
    out.push_str(&header(summary));
    out.push('\n');
    out
}

pub fn print_human(summary: &Summary, opts: &ReportOptions) {
    print!("{}", render_human(summary, opts));
}

/// Every statement form the registry understands, grouped by directive.
pub fn render_vocabulary(registry: &DirectiveRegistry) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n", t!("report-directives-heading").bold().underline()));
    for (name, terms) in registry.vocabulary() {
        if terms.is_empty() {
            continue;
        }
        out.push_str(&format!("{}\n", name.bold()));
        for (term, description) in terms {
            out.push_str(&format!("  {term}\n      {description}\n"));
        }
    }
    out
}
