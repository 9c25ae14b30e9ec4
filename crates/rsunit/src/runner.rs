//! Console runner with colored, indented tree output.
//!
//! Used with `harness = false` test targets:
//!
//! ```text
//! Calculator
//!   ✓ adds two numbers
//!   Negatives
//!     ✓ handles negatives
//!     ✗ fails on overflow
//!       attempt to add with overflow
//! ```

use std::fs;
use std::io::{IsTerminal, Write as _};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use colored::Colorize;
use rand::Rng;

use crate::config::RunSettings;
use crate::error::{EngineError, Result};
use crate::execution::Executor;
use crate::filter::{AndFilter, CategoryFilter, EmptyFilter, FullNameFilter, NotFilter, TestFilter};
use crate::listener::TestListener;
use crate::result::{FailureSite, TestResult, TestStatus};
use crate::tree::{NodeIndex, TestRef, TestTree};

/// Exit code for a malformed command line.
pub const EXIT_INVALID_ARG: i32 = -1;
/// Exit code for a fault inside the engine itself.
pub const EXIT_UNEXPECTED_ERROR: i32 = -100;

// ============================================================================
// Color setup
// ============================================================================

fn use_color() -> bool {
    // Respect NO_COLOR env var (https://no-color.org/)
    if std::env::var("NO_COLOR").is_ok() {
        return false;
    }
    std::io::stdout().is_terminal()
}

// ============================================================================
// Configuration
// ============================================================================

/// How test names are echoed while the run is in progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LabelsMode {
    /// No live labels; captured output appears in the final report.
    #[default]
    Off,
    /// Label tests that produced output, followed by that output.
    On,
    /// Label every test as it starts.
    All,
}

/// Configuration parsed from command-line args and environment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunConfig {
    /// `--test:NAME`, full names to run (repeatable).
    pub tests: Vec<String>,
    /// Positional filter: run tests whose full name contains this.
    pub filter: Option<String>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub seed: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub workers: Option<usize>,
    pub labels: LabelsMode,
    pub stop_on_error: bool,
    /// `--result:FILE`, write the result tree as JSON.
    pub result_file: Option<PathBuf>,
    /// `--explore[:FILE]`, list the selected tests instead of running them.
    pub explore: Option<Option<PathBuf>>,
    /// libtest-compatible `--list`.
    pub list: bool,
}

impl RunConfig {
    /// Parse from the process args (compatible with `cargo test -- <args>`),
    /// falling back to `RSUNIT_*` environment variables.
    pub fn from_args() -> Result<Self> {
        Self::parse(std::env::args().skip(1), |key| std::env::var(key).ok())
    }

    /// Parse `args` (without the binary name), reading fallbacks through `env`.
    pub fn parse(
        args: impl IntoIterator<Item = String>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut config = RunConfig::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            let Some(option) = arg.strip_prefix("--") else {
                config.filter = Some(arg);
                continue;
            };
            let (name, inline) = match option.find([':', '=']) {
                Some(pos) => (&option[..pos], Some(option[pos + 1..].to_string())),
                None => (option, None),
            };
            match name {
                "list" => config.list = true,
                "stop-on-error" => config.stop_on_error = true,
                "explore" => config.explore = Some(inline.map(PathBuf::from)),
                "test" | "result" | "include" | "exclude" | "seed" | "timeout" | "workers"
                | "labels" => {
                    let value = match inline.or_else(|| args.next()) {
                        Some(value) => value,
                        None => {
                            return Err(EngineError::InvalidArgument(format!(
                                "--{name} requires a value"
                            )))
                        }
                    };
                    config.set(name, value)?;
                }
                // Other libtest flags (--nocapture, --quiet, ...) are accepted and ignored.
                _ => {}
            }
        }

        if config.workers.is_none() {
            config.workers = env("RSUNIT_WORKERS")
                .map(|v| parse_number("RSUNIT_WORKERS", &v))
                .transpose()?;
        }
        if config.seed.is_none() {
            config.seed = env("RSUNIT_SEED")
                .map(|v| parse_number("RSUNIT_SEED", &v))
                .transpose()?;
        }
        if config.timeout_ms.is_none() {
            config.timeout_ms = env("RSUNIT_TIMEOUT")
                .map(|v| parse_number("RSUNIT_TIMEOUT", &v))
                .transpose()?;
        }
        Ok(config)
    }

    fn set(&mut self, name: &str, value: String) -> Result<()> {
        match name {
            "test" => self.tests.push(value),
            "result" => self.result_file = Some(PathBuf::from(value)),
            "include" => self.include.extend(split_list(&value)),
            "exclude" => self.exclude.extend(split_list(&value)),
            "seed" => self.seed = Some(parse_number("--seed", &value)?),
            "timeout" => self.timeout_ms = Some(parse_number("--timeout", &value)?),
            "workers" => self.workers = Some(parse_number("--workers", &value)?),
            "labels" => {
                self.labels = match value.to_ascii_lowercase().as_str() {
                    "off" => LabelsMode::Off,
                    "on" => LabelsMode::On,
                    "all" => LabelsMode::All,
                    _ => {
                        return Err(EngineError::InvalidArgument(format!(
                            "--labels must be Off, On or All, got '{value}'"
                        )))
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Engine settings for this configuration. A missing seed is drawn at random.
    pub fn settings(&self) -> RunSettings {
        let mut settings = RunSettings::new()
            .with_workers(self.workers.unwrap_or(0))
            .with_seed(self.seed.unwrap_or_else(|| rand::thread_rng().gen()))
            .with_stop_on_error(self.stop_on_error);
        settings.default_timeout_ms = self.timeout_ms;
        settings
    }

    /// The selection described by `--test`, `--include`, `--exclude` and the
    /// positional filter, all of which must hold.
    pub fn test_filter(&self) -> Arc<dyn TestFilter> {
        let mut parts: Vec<Box<dyn TestFilter>> = Vec::new();
        if !self.tests.is_empty() {
            parts.push(Box::new(FullNameFilter::new(self.tests.iter().cloned())));
        }
        if let Some(text) = &self.filter {
            parts.push(Box::new(FullNameFilter::containing(text.clone())));
        }
        if !self.include.is_empty() {
            parts.push(Box::new(CategoryFilter::new(self.include.iter().cloned())));
        }
        if !self.exclude.is_empty() {
            parts.push(Box::new(NotFilter::new(CategoryFilter::new(
                self.exclude.iter().cloned(),
            ))));
        }
        if parts.is_empty() {
            Arc::new(EmptyFilter)
        } else {
            Arc::new(AndFilter::new(parts))
        }
    }
}

fn split_list(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_number<T: std::str::FromStr>(what: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| EngineError::InvalidArgument(format!("{what} expects a number, got '{value}'")))
}

/// Name for the root suite: the executable's file stem, without the hash
/// suffix cargo appends to test binaries.
pub fn assembly_name() -> String {
    let stem = std::env::current_exe()
        .ok()
        .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "tests".to_string());
    match stem.rsplit_once('-') {
        Some((name, hash)) if hash.len() == 16 && hash.chars().all(|c| c.is_ascii_hexdigit()) => {
            name.to_string()
        }
        _ => stem,
    }
}

// ============================================================================
// Live labels
// ============================================================================

struct LabelListener {
    mode: LabelsMode,
}

impl TestListener for LabelListener {
    fn test_started(&self, test: TestRef<'_>) {
        if self.mode == LabelsMode::All && !test.is_suite() {
            println!("{}", format!("=> {}", test.full_name()).dimmed());
        }
    }

    fn test_finished(&self, result: &TestResult) {
        if result.output.is_empty() {
            return;
        }
        if self.mode == LabelsMode::On {
            println!("{}", format!("=> {}", result.full_name).dimmed());
        }
        print!("{}", result.output);
        if !result.output.ends_with('\n') {
            println!();
        }
    }
}

// ============================================================================
// Runner
// ============================================================================

/// Run (or list) `root` according to `config` and print the report.
///
/// Returns the process exit code: 0 on success, the number of failed tests
/// otherwise, or one of the `EXIT_*` codes.
pub fn run_tree(tree: TestTree, root: NodeIndex, config: &RunConfig) -> i32 {
    colored::control::set_override(use_color());
    let tree = Arc::new(tree);
    let filter = config.test_filter();

    let Some(root_ref) = tree.test(root) else {
        eprintln!("rsunit: {}", EngineError::UnknownNode(root.index()));
        return EXIT_UNEXPECTED_ERROR;
    };

    if config.list {
        list_tests(root_ref, &*filter, &mut std::io::stdout().lock());
        return 0;
    }
    if let Some(target) = &config.explore {
        return match explore(root_ref, &*filter, target.as_ref()) {
            Ok(()) => 0,
            Err(err) => {
                eprintln!("rsunit: {err}");
                EXIT_UNEXPECTED_ERROR
            }
        };
    }

    let settings = config.settings();
    let seed = settings.random_seed;
    let mut executor = Executor::new(settings);
    if config.labels != LabelsMode::Off {
        executor = executor.with_listener(LabelListener {
            mode: config.labels,
        });
    }

    let start = Instant::now();
    let result = match executor.execute(&tree, root, filter) {
        Ok(result) => result,
        Err(err) => {
            eprintln!("rsunit: {err}");
            return EXIT_UNEXPECTED_ERROR;
        }
    };

    print_result(&result, 0, config.labels == LabelsMode::Off);
    print_summary(&result, seed, start.elapsed());

    if let Some(path) = &config.result_file {
        if let Err(err) = write_result(&result, path) {
            eprintln!("rsunit: {err}");
            return EXIT_UNEXPECTED_ERROR;
        }
    }
    exit_code(&result)
}

/// 0 when nothing failed, otherwise the number of failed tests.
pub fn exit_code(result: &TestResult) -> i32 {
    let failed = result.fail_count();
    if failed == 0 && result.status() == TestStatus::Failed {
        // A suite-level failure with no failed leaf still fails the run.
        return 1;
    }
    i32::try_from(failed).unwrap_or(i32::MAX)
}

/// Serialize `result` as pretty JSON to `path`.
pub fn write_result(result: &TestResult, path: &std::path::Path) -> Result<()> {
    let json = serde_json::to_string_pretty(result)?;
    fs::write(path, json).map_err(|source| EngineError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn list_tests(test: TestRef<'_>, filter: &dyn TestFilter, out: &mut impl std::io::Write) {
    if !test.is_suite() {
        let _ = writeln!(out, "{}: test", test.full_name());
        return;
    }
    for child in test.children().filter(|c| filter.pass(*c)) {
        list_tests(child, filter, out);
    }
}

fn explore(test: TestRef<'_>, filter: &dyn TestFilter, target: Option<&PathBuf>) -> Result<()> {
    let mut listing = Vec::new();
    list_tests(test, filter, &mut listing);
    let count = Executor::default().count_test_cases(test, filter);
    let _ = writeln!(listing, "{count} tests");
    match target {
        Some(path) => fs::write(path, &listing).map_err(|source| EngineError::Io {
            path: path.clone(),
            source,
        }),
        None => {
            let _ = std::io::stdout().write_all(&listing);
            Ok(())
        }
    }
}

fn print_result(result: &TestResult, depth: usize, show_output: bool) {
    let indent = "  ".repeat(depth);
    if result.is_suite() {
        if depth == 0 {
            println!("{}", result.name.bold());
        } else {
            println!("{indent}{}", result.name);
        }
        if matches!(result.site(), FailureSite::SetUp | FailureSite::TearDown) {
            print_message(result, &indent);
        }
        for child in &result.children {
            print_result(child, depth + 1, show_output);
        }
        return;
    }

    let ms = (result.duration * 1000.0) as u128;
    let time_str = if ms > 100 {
        format!(" {}", format!("({ms}ms)").dimmed())
    } else {
        String::new()
    };
    match result.status() {
        TestStatus::Passed => println!("{indent}{} {}{time_str}", "✓".green(), result.name),
        TestStatus::Failed => {
            println!("{indent}{} {}{time_str}", "✗".red(), result.name.red());
            print_message(result, &indent);
        }
        TestStatus::Skipped => {
            let reason = result.message.as_deref().unwrap_or_default();
            println!("{indent}{} {} {}", "-".yellow(), result.name.dimmed(), reason.dimmed());
        }
        TestStatus::Inconclusive => {
            let reason = result.message.as_deref().unwrap_or_default();
            println!("{indent}{} {} {}", "?".yellow(), result.name, reason.dimmed());
        }
    }
    if show_output && !result.output.is_empty() {
        for line in result.output.lines() {
            println!("{indent}    {}", line.dimmed());
        }
    }
}

fn print_message(result: &TestResult, indent: &str) {
    if let Some(message) = &result.message {
        for line in message.lines() {
            println!("{indent}    {}", line.red());
        }
    }
}

fn print_summary(result: &TestResult, seed: u64, elapsed: std::time::Duration) {
    let elapsed_str = format!("{:.3}s", elapsed.as_secs_f64());

    let parts: Vec<String> = [
        (result.pass_count() > 0).then(|| format!("{} passed", result.pass_count()).green().to_string()),
        (result.fail_count() > 0).then(|| format!("{} failed", result.fail_count()).red().to_string()),
        (result.skip_count() > 0).then(|| format!("{} skipped", result.skip_count()).yellow().to_string()),
        (result.inconclusive_count() > 0)
            .then(|| format!("{} inconclusive", result.inconclusive_count()).dimmed().to_string()),
    ]
    .into_iter()
    .flatten()
    .collect();

    let summary = format!(
        "{} ({}, seed {seed})",
        parts.join(", "),
        elapsed_str.dimmed()
    );

    println!();
    if result.status() == TestStatus::Failed {
        println!("{}", "FAIL".red().bold());
        println!("{summary}");
        println!();
        println!("Failures:");
        for (i, failure) in failures(result).iter().enumerate() {
            let first_line = failure.message.as_deref().and_then(|m| m.lines().next()).unwrap_or("");
            println!("  {}. {}: {}", i + 1, failure.full_name, first_line);
        }
        println!();
    } else {
        println!("{}", "PASS".green().bold());
        println!("{summary}");
    }
}

/// Failed leaves, plus suites whose own setup or teardown failed.
fn failures(result: &TestResult) -> Vec<&TestResult> {
    let mut out = Vec::new();
    collect_failures(result, &mut out);
    out
}

fn collect_failures<'a>(result: &'a TestResult, out: &mut Vec<&'a TestResult>) {
    if result.status() != TestStatus::Failed {
        return;
    }
    if !result.is_suite() || matches!(result.site(), FailureSite::SetUp | FailureSite::TearDown) {
        out.push(result);
    }
    for child in &result.children {
        collect_failures(child, out);
    }
}
