//! Top-level commands: run all suites, run named tests, list tests.
//!
//! These wire the lifecycle, executor, capture and reporter together and
//! implement the process exit policy: success only when every executed
//! test succeeded and nothing fatal happened.

use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;

use tracing::error;

use sotest_harness::{Executor, Timing};

use crate::capture::StdoutCapture;
use crate::error::Result;
use crate::library::TestLibrary;
use crate::named;
use crate::registry::Registry;
use crate::report::{ReportOptions, Reporter};

/// Options shared by the run commands.
#[derive(Debug, Clone)]
pub struct Options {
    pub use_color: bool,
    pub use_cursor: bool,
    pub nice_stats: bool,
    /// Capture test output to files under `capture_dir`.
    pub capture: bool,
    pub capture_dir: PathBuf,
    pub timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            use_color: false,
            use_cursor: false,
            nice_stats: false,
            capture: false,
            capture_dir: PathBuf::from("./sotest_log"),
            timeout: Duration::from_secs(10),
        }
    }
}

impl Options {
    fn report_options(&self) -> ReportOptions {
        ReportOptions {
            use_color: self.use_color,
            use_cursor: self.use_cursor,
            nice_stats: self.nice_stats,
        }
    }
}

/// Runs every suite in `paths`, in order.
///
/// A setup error in one library fails the run but does not prevent the
/// remaining libraries from running; an error that is fatal to the whole
/// run (an unkillable timed-out child) stops everything.
pub fn run_all(paths: &[PathBuf], options: &Options) -> Result<bool> {
    let reporter = Reporter::new(options.report_options());
    let capture = StdoutCapture::begin(options.capture, &options.capture_dir)?;
    let timing = Timing {
        timeout: options.timeout,
    };
    let mut executor = Executor::new()?;
    let mut all_passed = true;

    for path in paths {
        let library_name = path.display().to_string();
        reporter.begin(&library_name);

        let library = match TestLibrary::open(path) {
            Ok(library) => library,
            Err(e) => {
                error!(library = %library_name, error = %e, "suite setup failed");
                reporter.suite_begin_fail();
                all_passed = false;
                continue;
            }
        };

        let run = library.run(
            &mut executor,
            &timing,
            &capture,
            |_, test| reporter.test_begin(test),
            |result, aggregated| reporter.test(result, aggregated, &capture),
        );

        match run {
            Ok(outcome) => {
                if outcome.suite_before_failed {
                    reporter.suite_begin_fail();
                }
                if outcome.suite_after_failed {
                    reporter.suite_end_fail();
                }
                reporter.end(&outcome.aggregated);
                all_passed &= outcome.passed();
            }
            Err(e) => {
                error!(library = %library_name, error = %e, "suite run failed");
                all_passed = false;
                if e.is_fatal_to_run() {
                    return Err(e);
                }
            }
        }
    }

    capture.end();
    Ok(all_passed)
}

/// Runs `library:test` lines from `input` (the `named` batch mode).
pub fn run_named(input: impl BufRead, options: &Options) -> Result<bool> {
    let reporter = Reporter::new(options.report_options());
    let capture = StdoutCapture::begin(options.capture, &options.capture_dir)?;
    let timing = Timing {
        timeout: options.timeout,
    };
    let mut executor = Executor::new()?;
    let mut registry = Registry::new();

    let aggregated = named::run_lines(
        input,
        &mut registry,
        &mut executor,
        &timing,
        &capture,
        |_, test| reporter.test_begin(test),
        |result, aggregated| reporter.test(result, aggregated, &capture),
    )?;

    reporter.end(&aggregated);
    capture.end();
    Ok(aggregated.all_succeeded())
}

/// Prints `path:test` for every test discovered in `paths`.
///
/// Discovery only; the libraries are never loaded into the process.
pub fn list(paths: &[PathBuf]) -> Result<()> {
    for path in paths {
        let suite = crate::library::discover(path)?;
        for test in &suite.tests {
            println!("{}:{}", path.display(), test);
        }
    }
    Ok(())
}
