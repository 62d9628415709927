//! Per-library lifecycle.
//!
//! A [`TestLibrary`] owns everything discovered in one shared library: the
//! classified suite and the binder that keeps the library loaded. Running
//! it walks the suite in order, dispatching each test to the isolated
//! executor and folding results into running statistics.
//!
//! The loop policy: an ordinary test failure never stops the run; an
//! infrastructure-level error (fixture error, test error signal, or an
//! unclassifiable execution) stops it immediately, without consuming the
//! remaining tests. Crashes and timeouts are contained per test and the
//! loop continues - that containment is the point of this crate. The
//! suite-level after fixture runs however the loop ended.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use sotest_harness::{
    Aggregated, Binder, BoundFixtures, Capture, Executor, Suite, SuiteBuilder, Symbols, TestResult,
    Timing,
};

use crate::error::{Error, Result};

/// Discovers the suite of `path` without loading the library.
///
/// Used by listing, which must not run library initializers just to print
/// test names.
pub fn discover(path: &Path) -> Result<Suite> {
    let symbols = Symbols::open(path)?;
    let mut builder = SuiteBuilder::with_capacity(symbols.count());
    for name in symbols.iter() {
        builder.eval(name?)?;
    }
    Ok(builder.build())
}

/// How a finished suite run ended.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOutcome {
    pub aggregated: Aggregated,
    /// The suite-level before fixture errored; no test ran.
    pub suite_before_failed: bool,
    /// The suite-level after fixture errored.
    pub suite_after_failed: bool,
    /// The loop stopped on an infrastructure-level error before exhausting
    /// the suite.
    pub stopped_early: bool,
}

impl RunOutcome {
    /// True when every executed test succeeded and no fixture failed.
    pub fn passed(&self) -> bool {
        !self.suite_before_failed && !self.suite_after_failed && self.aggregated.all_succeeded()
    }
}

/// One shared library's fixtures and tests, bound and ready to run.
#[derive(Debug)]
pub struct TestLibrary {
    path: PathBuf,
    binder: Binder,
    fixtures: BoundFixtures,
}

impl TestLibrary {
    /// Discovers, classifies and binds the suite in `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let suite = discover(path)?;
        debug!(
            path = %path.display(),
            tests = suite.tests.len(),
            "discovered suite"
        );
        let binder = Binder::open(path, suite)?;
        let fixtures = binder.fixtures()?;
        Ok(Self {
            path: path.to_path_buf(),
            binder,
            fixtures,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Test names in suite order.
    pub fn test_names(&self) -> impl Iterator<Item = &str> {
        self.binder.suite().tests.iter().map(String::as_str)
    }

    /// Runs the whole suite in order.
    pub fn run(
        &self,
        executor: &mut Executor,
        timing: &Timing,
        capture: &dyn Capture,
        progress: impl FnMut(&str, &str),
        on_result: impl FnMut(&TestResult, &Aggregated),
    ) -> Result<RunOutcome> {
        self.run_indices(0..self.binder.test_count(), executor, timing, capture, progress, on_result)
    }

    /// Runs the single test called `name` as a suite of one.
    pub fn run_named(
        &self,
        name: &str,
        executor: &mut Executor,
        timing: &Timing,
        capture: &dyn Capture,
        progress: impl FnMut(&str, &str),
        on_result: impl FnMut(&TestResult, &Aggregated),
    ) -> Result<RunOutcome> {
        let index = self
            .binder
            .suite()
            .tests
            .iter()
            .position(|test| test == name)
            .ok_or_else(|| Error::UnknownTest {
                library: self.path.display().to_string(),
                name: name.to_owned(),
            })?;
        self.run_indices(index..index + 1, executor, timing, capture, progress, on_result)
    }

    fn run_indices(
        &self,
        indices: std::ops::Range<usize>,
        executor: &mut Executor,
        timing: &Timing,
        capture: &dyn Capture,
        mut progress: impl FnMut(&str, &str),
        mut on_result: impl FnMut(&TestResult, &Aggregated),
    ) -> Result<RunOutcome> {
        let mut outcome = RunOutcome::default();

        if let Some(once_before) = self.fixtures.once_before {
            // SAFETY: bound from the library this instance keeps loaded.
            let ret = unsafe { once_before() };
            if ret < 0 {
                warn!(path = %self.path.display(), ret, "suite setup fixture failed");
                outcome.suite_before_failed = true;
                // Tests are not safe to run when initialization failed, and
                // teardown has nothing to tear down.
                return Ok(outcome);
            }
        }

        let library_name = self.path.display().to_string();
        let mut loop_error = None;

        for index in indices {
            let test = match self.binder.test(index) {
                Ok(test) => test,
                Err(e) => {
                    loop_error = Some(Error::from(e));
                    break;
                }
            };

            // Early feedback, before any fixture runs.
            progress(&library_name, &test.name);

            match executor.run(&test, &self.fixtures, timing, capture) {
                Ok(result) => {
                    outcome.aggregated.fold(&result);
                    on_result(&result, &outcome.aggregated);
                    if result.stops_suite() {
                        debug!(name = %result.name, "stopping suite on error");
                        outcome.stopped_early = true;
                        break;
                    }
                }
                Err(e) => {
                    loop_error = Some(Error::from(e));
                    break;
                }
            }
        }

        if let Some(once_after) = self.fixtures.once_after {
            // SAFETY: as above.
            let ret = unsafe { once_after() };
            if ret < 0 {
                warn!(path = %self.path.display(), ret, "suite teardown fixture failed");
                outcome.suite_after_failed = true;
            }
        }

        // A pending loop error takes precedence over a teardown failure.
        match loop_error {
            Some(e) => Err(e),
            None => Ok(outcome),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn discover_requires_an_object_file() {
        let err = discover(Path::new("/nonexistent/libtests.so")).unwrap_err();
        assert!(matches!(err, Error::Symbols(_)));
    }

    #[test]
    fn outcome_passed_requires_clean_fixtures_and_tests() {
        let clean = RunOutcome {
            aggregated: Aggregated {
                total: 2,
                succeeded: 2,
                failed: 0,
                errors: 0,
            },
            ..RunOutcome::default()
        };
        assert!(clean.passed());

        let failed = RunOutcome {
            aggregated: Aggregated {
                total: 2,
                succeeded: 1,
                failed: 1,
                errors: 0,
            },
            ..RunOutcome::default()
        };
        assert!(!failed.passed());

        let teardown_failed = RunOutcome {
            suite_after_failed: true,
            ..clean
        };
        assert!(!teardown_failed.passed());

        let setup_failed = RunOutcome {
            suite_before_failed: true,
            ..RunOutcome::default()
        };
        assert!(!setup_failed.passed());
    }

    #[test]
    fn empty_run_passes() {
        // A library with no tests executes nothing and passes.
        assert!(RunOutcome::default().passed());
    }
}
