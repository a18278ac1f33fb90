use action_test::caller::{ActionCaller, CommandCaller, DEFAULT_TIMEOUT};
use action_test::config::RunnerConfig;
use action_test::directives::default_registry;
use action_test::engine::{RunContext, run_fixtures};
use action_test::fixture::load_fixtures;
use action_test::harness::{FrozenClock, Harness, InMemoryMocks};
use action_test::i18n;
use action_test::report::{OutputKind, ReportOptions, print_human, render_vocabulary};
use action_test::types::TestFixture;
use action_test::{t, t_args};
use anyhow::Result;
use clap::{CommandFactory, Parser, ValueEnum, error::ErrorKind};
use colored::Colorize;
use colored::control::set_override as set_color_override;
use regex::Regex;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{error, info};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Compact,
    Terse,
    Final,
    Normal,
}
impl From<OutputFormat> for OutputKind {
    fn from(v: OutputFormat) -> Self {
        match v {
            OutputFormat::Normal => OutputKind::Normal,
            OutputFormat::Compact => OutputKind::Compact,
            OutputFormat::Terse => OutputKind::Terse,
            OutputFormat::Final => OutputKind::Final,
        }
    }
}
#[derive(Parser, Debug, Clone)]
#[command(
    version,
    author,
    about = t!("cli-about")
)]
struct Cli {
    // FIXTURE_PATHS: fixture files or directories; falls back to the config file
    #[arg(value_name = "FIXTURE_PATHS")]
    fixtures: Vec<PathBuf>,

    // Run configuration, default ./action-test.yaml when present
    #[arg(
        short = 'C',
        long,
        value_name = "FILE",
        help = t!("cli-config")
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        value_name = "NAME",
        help = t!("cli-service")
    )]
    service: Option<String>,

    // Override the action caller program
    #[arg(
        long,
        value_name = "CMD",
        help = t!("cli-caller")
    )]
    caller: Option<String>,

    #[arg(
        long,
        value_name = "SECONDS",
        help = t!("cli-timeout")
    )]
    timeout: Option<u64>,

    // Extra substitution constants merged over the configured ones
    #[arg(
        long,
        value_name = "FILE",
        help = t!("cli-constants")
    )]
    constants: Option<PathBuf>,

    // Silent mode
    #[arg(
        short = 'q',
        long = "silent",
        help = t!("cli-silent")
    )]
    silent: bool,

    // Color control
    #[arg(
        short = 'c',
        long = "color",
        alias = "colour",
        help = t!("cli-color")
    )]
    color: bool,

    #[arg(
        long = "no-color",
        help = t!("cli-no-color")
    )]
    no_color: bool,

    // Verbose
    #[arg(
        short = 'v',
        long = "verbose",
        help = t!("cli-verbose")
    )]
    verbose: bool,

    // Filtering of report lines
    #[arg(
        short = 'f',
        long = "hide-fails",
        conflicts_with = "hide_passes",
        help = t!("cli-hide-fails")
    )]
    hide_fails: bool,

    #[arg(
        short = 'p',
        long = "hide-passes",
        conflicts_with = "hide_fails",
        help = t!("cli-hide-passes")
    )]
    hide_passes: bool,

    // -t/--test: number (1..N), "fixture: name", a test name or a fixture name.
    // Special: 0 / null / list lists all tests and exits.
    #[arg(
        short = 't',
        long = "test",
        value_name = "TEST",
        help = t!("cli-test")
    )]
    test: Option<String>,

    #[arg(
        short = 'o',
        long = "output",
        value_enum,
        default_value = "normal",
        help = t!("cli-output")
    )]
    output: OutputFormat,

    // Serial execution (opt-out of default parallel processing)
    #[arg(
        long = "serial",
        help = t!("cli-serial")
    )]
    use_serial: bool,

    // Print the statement forms and exit
    #[arg(
        long = "directives",
        help = t!("cli-directives")
    )]
    directives: bool,
}

static FLAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^(\s*)(--?\w+(?:-\w+[^<\n]*)*)").unwrap());

/// Format CLI flags to be bold using regex matching
fn format_flags_bold(text: &str) -> String {
    FLAG.replace_all(text, |caps: &regex::Captures| {
        let indent = &caps[1];
        let flag = &caps[2];
        format!("{}{}", indent, flag.bold())
    })
    .to_string()
}

/// Format clap errors with localized messages
fn format_clap_error(error: clap::Error) -> String {
    let kind = error.kind();

    if kind == ErrorKind::DisplayHelp {
        return create_custom_help();
    }

    let mut msg = error.to_string();
    msg = msg.replace("Usage:", &format!("{}", t!("cli-error-usage").bold().underline()));
    msg = msg.replace("For more information, try '--help'.", &t!("cli-error-help-info"));
    msg = msg.replace("error:", &format!("{}", t!("cli-error-label").red().bold()));
    msg = msg.replace("tip:", &t!("cli-tip-label"));
    msg = msg.replace("unexpected argument", &t!("cli-unexpected-argument"));
    msg = msg.replace(env!("CARGO_PKG_NAME"), &format!("{}", env!("CARGO_PKG_NAME").bold()));
    msg = format_flags_bold(&msg);

    match kind {
        ErrorKind::InvalidValue => msg.replace("invalid value", &t!("cli-error-invalid-value")),
        _ => msg,
    }
}

/// Create custom localized help text
fn create_custom_help() -> String {
    let mut cmd = Cli::command();
    let mut help_text = cmd.render_long_help().to_string();

    help_text = help_text.replace("Usage:", &format!("{}", t!("cli-error-usage").bold().underline()));
    help_text = help_text.replace("Arguments:", &format!("{}", t!("cli-help-arguments").bold().underline()));
    help_text = help_text.replace("Options:", &format!("{}", t!("cli-help-options").bold().underline()));
    help_text = help_text.replace("[default:", &format!("[{}:", t!("cli-help-default")));
    help_text = help_text.replace("[aliases:", &format!("[{}:", t!("cli-help-aliases")));
    help_text = help_text.replace("[possible values:", &format!("[{}:", t!("cli-help-possible-values")));
    help_text = help_text.replace("Print help", &t!("cli-help-print-help"));
    help_text = help_text.replace("Print version", &t!("cli-help-print-version"));
    help_text = help_text.replace(env!("CARGO_PKG_NAME"), &format!("{}", env!("CARGO_PKG_NAME").bold()));
    help_text = format_flags_bold(&help_text);

    help_text.push_str(&format!("\n\n{}\n", t!("cli-help-fixtures").bold().underline()));
    for key in [
        "cli-help-fixture-files",
        "cli-help-fixture-config",
        "cli-help-fixture-selection",
        "cli-help-fixture-exit",
    ] {
        help_text.push_str(&format!("  {}\n", t!(key)));
    }

    // collapse runs of blank lines
    let mut cleaned_lines = Vec::new();
    let mut prev_was_empty = false;
    for line in help_text.lines() {
        let is_empty = line.trim().is_empty();
        if is_empty && prev_was_empty {
            continue;
        }
        cleaned_lines.push(line);
        prev_was_empty = is_empty;
    }
    cleaned_lines.join("\n")
}

/// (1-based number, fixture name, test name) across all fixtures, in load order.
fn numbered_cases(fixtures: &[TestFixture]) -> Vec<(usize, String, String)> {
    fixtures
        .iter()
        .flat_map(|f| f.cases.iter().map(move |c| (f.name.clone(), c.name().to_string())))
        .enumerate()
        .map(|(i, (fixture, name))| (i + 1, fixture, name))
        .collect()
}

fn print_case_list(fixtures: &[TestFixture], to_stderr: bool) {
    let header = t!("available-tests");
    let lines = numbered_cases(fixtures).into_iter().map(|(index, fixture, name)| {
        t_args!("test-list-item",
            "index" => index,
            "fixture" => &fixture,
            "name" => &name
        )
    });
    if to_stderr {
        eprintln!("{header}");
        lines.for_each(|l| eprintln!("{l}"));
    } else {
        println!("{header}");
        lines.for_each(|l| println!("{l}"));
    }
}

/// Keep only the selected cases. Returns false when nothing matched.
fn select_cases(fixtures: &mut Vec<TestFixture>, selector: &str) -> bool {
    let numbered = numbered_cases(fixtures);
    let wanted: Vec<(String, String)> = if let Ok(n) = selector.parse::<usize>() {
        numbered
            .into_iter()
            .filter(|(i, _, _)| *i == n)
            .map(|(_, f, c)| (f, c))
            .collect()
    } else {
        let full: Vec<(String, String)> = numbered
            .iter()
            .filter(|(_, f, c)| format!("{f}: {c}") == selector)
            .map(|(_, f, c)| (f.clone(), c.clone()))
            .collect();
        if !full.is_empty() {
            full
        } else {
            numbered
                .into_iter()
                .filter(|(_, f, c)| c == selector || f == selector)
                .map(|(_, f, c)| (f, c))
                .collect()
        }
    };
    for fixture in fixtures.iter_mut() {
        fixture
            .cases
            .retain(|c| wanted.iter().any(|(f, n)| *f == fixture.name && n == c.name()));
    }
    fixtures.retain(|f| !f.cases.is_empty());
    !wanted.is_empty()
}

fn main() -> Result<()> {
    // Initialize localization first
    i18n::init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            let kind = error.kind();
            if kind == ErrorKind::DisplayHelp {
                println!("{}", format_clap_error(error));
                std::process::exit(0);
            } else if kind == ErrorKind::DisplayVersion {
                println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            } else {
                eprintln!("{}", format_clap_error(error));
                std::process::exit(2);
            }
        }
    };

    // Initialize tracing based on verbose flag and environment
    let filter = if cli.verbose {
        // With -v, show INFO and above, but allow RUST_LOG to override for debug/trace
        std::env::var("RUST_LOG").unwrap_or_else(|_| "action_test=info".to_string())
    } else {
        // Without -v, only show warnings and errors
        std::env::var("RUST_LOG").unwrap_or_else(|_| "action_test=warn".to_string())
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Colors: default on, --no-color turns off
    set_color_override(cli.color || !cli.no_color);

    let registry = match default_registry() {
        Ok(r) => Arc::new(r),
        Err(e) => {
            error!("{e}");
            std::process::exit(2);
        }
    };
    if cli.directives {
        print!("{}", render_vocabulary(&registry));
        return Ok(());
    }

    let mut config = match RunnerConfig::discover(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!("{e:#}");
            std::process::exit(2);
        }
    };
    if let Some(file) = &cli.constants {
        if let Err(e) = config.merge_constants_file(file) {
            error!("{e:#}");
            std::process::exit(2);
        }
    }
    let service = cli.service.clone().or(config.service.clone()).unwrap_or_default();
    let fixture_paths = if cli.fixtures.is_empty() {
        config.fixtures.clone()
    } else {
        cli.fixtures.clone()
    };
    if fixture_paths.is_empty() {
        error!("{}", t!("error-no-fixtures"));
        std::process::exit(2);
    }

    let loaded = match load_fixtures(&fixture_paths, &registry) {
        Ok(l) => l,
        Err(e) => {
            error!("{}", t_args!("error-load-failed", "error" => e));
            std::process::exit(2);
        }
    };
    // a broken file only loses its own fixture
    for (file, e) in &loaded.failures {
        error!("{}", t_args!("error-fixture-failed", "file" => file.display(), "error" => e));
    }
    let load_failures = loaded.failures.len();
    let mut fixtures = loaded.fixtures;
    if fixtures.is_empty() {
        std::process::exit(2);
    }

    // -t/--test: special 0/null/list => list and exit
    if let Some(sel) = &cli.test {
        let trimmed = sel.trim();
        if trimmed == "0" || trimmed.eq_ignore_ascii_case("null") || trimmed.eq_ignore_ascii_case("list") {
            print_case_list(&fixtures, false);
            return Ok(());
        }
        let all = fixtures.clone();
        if !select_cases(&mut fixtures, trimmed) {
            match trimmed.parse::<usize>() {
                Ok(n) => error!(
                    "{}",
                    t_args!("error-invalid-test-number",
                        "number" => n,
                        "max" => numbered_cases(&all).len()
                    )
                ),
                Err(_) => error!("{}", t_args!("error-test-not-found", "test" => trimmed)),
            }
            print_case_list(&all, true);
            std::process::exit(2);
        }
    }

    let command = match cli.caller.clone().or(config.caller.command.clone()) {
        Some(c) => c,
        None => {
            error!("{}", t!("error-no-caller"));
            std::process::exit(2);
        }
    };
    let timeout = cli
        .timeout
        .or(config.caller.timeout_secs)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_TIMEOUT);
    let template = CommandCaller {
        args: config.caller.args.clone(),
        timeout: Some(timeout),
        quiet: cli.silent,
        ..CommandCaller::new(command)
    };
    // Validate the caller before running tests - fail fast on configuration errors
    if let Err(e) = template.validate() {
        error!("{}", t_args!("error-validation-failed", "error" => e));
        std::process::exit(2);
    }

    if cli.verbose && !cli.silent {
        info!(
            "{}",
            t_args!("info-version",
                "name" => env!("CARGO_PKG_NAME"),
                "version" => env!("CARGO_PKG_VERSION")
            )
        );
        info!("{}", t_args!("info-caller", "command" => &template.command));
        info!(
            "{}",
            t_args!("info-starting-tests",
                "count" => fixtures.iter().map(|f| f.cases.len()).sum::<usize>(),
                "fixtures" => fixtures.len()
            )
        );
    }

    let constants = config.constants.clone();
    let context_for = |fixture: &TestFixture| {
        info!("{}", t_args!("info-fixture", "name" => &fixture.name));
        // every fixture gets its own mocks and clock so parallel fixtures stay apart
        let mocks = InMemoryMocks::new();
        let clock = FrozenClock::new();
        let caller = CommandCaller {
            mocks: Some(mocks.clone()),
            clock: Some(clock.clone()),
            ..template.clone()
        };
        Arc::new(RunContext {
            service: service.clone(),
            registry: Arc::clone(&registry),
            caller: Arc::new(caller) as Arc<dyn ActionCaller>,
            harness: Harness::new(Arc::new(mocks), Arc::new(clock)),
            constants: constants.clone(),
        })
    };
    let summary = run_fixtures(fixtures, context_for, cli.use_serial);

    if cli.verbose && !cli.silent {
        info!(
            "{}",
            t_args!("info-all-finished",
                "total" => summary.total,
                "passed" => summary.passed,
                "failed" => summary.failed,
                "skipped" => summary.skipped
            )
        );
    }

    if !cli.silent {
        print_human(
            &summary,
            &ReportOptions {
                kind: cli.output.into(),
                verbose: cli.verbose,
                hide_fails: cli.hide_fails,
                hide_passes: cli.hide_passes,
            },
        );
    }

    if summary.failed > 0 || load_failures > 0 {
        std::process::exit(1);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use action_test::types::TestCase;

    fn fixture(name: &str, cases: &[&str]) -> TestFixture {
        TestFixture {
            name: name.to_string(),
            file: format!("{name}.fixture"),
            cases: cases
                .iter()
                .map(|c| TestCase {
                    name: Some(c.to_string()),
                    ..TestCase::default()
                })
                .collect(),
        }
    }

    #[test]
    fn help_describes_fixture_usage() {
        let help = create_custom_help();
        assert!(help.contains(&t!("cli-help-fixture-files")));
        assert!(help.contains(&t!("cli-help-fixture-selection")));
        assert!(help.contains("FIXTURE_PATHS"));
    }

    #[test]
    fn cases_are_selected_by_number_or_name() {
        let all = vec![fixture("users", &["create", "delete"]), fixture("orders", &["create"])];

        let mut by_number = all.clone();
        assert!(select_cases(&mut by_number, "2"));
        assert_eq!(by_number.len(), 1);
        assert_eq!(by_number[0].cases[0].name(), "delete");

        let mut qualified = all.clone();
        assert!(select_cases(&mut qualified, "orders: create"));
        assert_eq!(qualified[0].name, "orders");

        let mut by_name = all.clone();
        assert!(select_cases(&mut by_name, "create"));
        assert_eq!(by_name.iter().map(|f| f.cases.len()).sum::<usize>(), 2);

        let mut nothing = all;
        assert!(!select_cases(&mut nothing, "9"));
    }
}
