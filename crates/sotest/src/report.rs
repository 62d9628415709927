//! Console reporting.
//!
//! Formats per-test lines and running statistics, with optional ANSI color
//! and a cursor-rewrite interactive mode that keeps the console down to the
//! failed tests and a live stats line.
//!
//! Interactive layout:
//!
//! While running the first test:
//!     Running...
//! While running another test:
//!     Stats
//!     Running...
//! Completed with two failures:
//!     Failed test 1
//!     Failed test 2
//!     Stats

use sotest_harness::{Aggregated, Execution, FixtureOutcome, TestOutcome, TestResult};

use crate::capture::StdoutCapture;

const COLOR_HEADLINE: &str = "\x1b[1m\x1b[34m";
const COLOR_SUCCESS: &str = "\x1b[32m";
const COLOR_FAIL: &str = "\x1b[31;1m";
const COLOR_RESET: &str = "\x1b[0m";

const CURSOR_UP: &str = "\x1b[A";
const CLEAR_TO_END: &str = "\x1b[K";

const CAPTURE_BEFORE: &str = ">>> Capture start\n";
const CAPTURE_AFTER: &str = "<<< Capture end\n";

/// Rendering options for one suite run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportOptions {
    pub use_color: bool,
    pub use_cursor: bool,
    pub nice_stats: bool,
}

/// Formats and prints a suite run.
pub struct Reporter {
    options: ReportOptions,
    headline: &'static str,
    success: &'static str,
    fail: &'static str,
    reset: &'static str,
}

impl Reporter {
    pub fn new(options: ReportOptions) -> Self {
        let (headline, success, fail, reset) = if options.use_color {
            (COLOR_HEADLINE, COLOR_SUCCESS, COLOR_FAIL, COLOR_RESET)
        } else {
            ("", "", "", "")
        };
        Self {
            options,
            headline,
            success,
            fail,
            reset,
        }
    }

    pub fn begin(&self, library: &str) {
        println!("{}Running suite {}{}", self.headline, library, self.reset);
    }

    /// Early feedback shown while a test runs; rewritten by the next
    /// [`Reporter::test`] call in cursor mode.
    pub fn test_begin(&self, name: &str) {
        if self.options.use_cursor {
            println!("Running test {name}");
        }
    }

    pub fn suite_begin_fail(&self) {
        println!("{}Error in suite setup{}", self.fail, self.reset);
    }

    pub fn suite_end_fail(&self) {
        println!("{}Error in suite teardown{}", self.fail, self.reset);
    }

    /// Reports one completed test and, in cursor mode, the running stats.
    pub fn test(&self, result: &TestResult, aggregated: &Aggregated, capture: &StdoutCapture) {
        if self.options.use_cursor {
            // Remove the text shown while the test was running, and the
            // previous stats line once there is one.
            print!("{CURSOR_UP}{CLEAR_TO_END}");
            if aggregated.total > 1 {
                print!("{CURSOR_UP}{CLEAR_TO_END}");
            }
        }

        let (line, play_capture) = self.result_line(result);
        println!("{line}");
        if play_capture {
            capture.read_back(&result.identity.to_string(), CAPTURE_BEFORE, CAPTURE_AFTER);
        }

        if self.options.use_cursor {
            println!("{}", self.stats_line(aggregated));
        }
    }

    pub fn end(&self, aggregated: &Aggregated) {
        if !self.options.use_cursor {
            println!("{}", self.stats_line(aggregated));
        }
    }

    /// One line for a completed result, plus whether captured output should
    /// be played back (everything except a clean success).
    fn result_line(&self, result: &TestResult) -> (String, bool) {
        let name = &result.name;
        let fail = self.fail;
        let reset = self.reset;

        let line = match result.execution {
            Execution::NotStarted => format!("{fail}{name}: Not started{reset}"),
            Execution::UnknownError => format!("{fail}{name}: Unknown error{reset}"),
            Execution::Crashed => format!("{fail}{name}: Crashed{reset}"),
            Execution::TimedOut => format!("{fail}{name}: Timed out{reset}"),
            Execution::Done => {
                if result.before == FixtureOutcome::Error {
                    format!("{fail}{name}: Test fixture setup error{reset}")
                } else if result.after == FixtureOutcome::Error {
                    format!("{fail}{name}: Test fixture teardown error{reset}")
                } else {
                    match result.test {
                        TestOutcome::Uncertain => format!("{fail}{name}: Uncertain result{reset}"),
                        TestOutcome::Error => format!("{fail}{name}: Error{reset}"),
                        TestOutcome::Failure => format!("{fail}{name}: Failed{reset}"),
                        TestOutcome::Success => {
                            return (format!("{}{name}: Success{reset}", self.success), false)
                        }
                    }
                }
            }
        };
        (line, true)
    }

    fn stats_line(&self, aggregated: &Aggregated) -> String {
        if self.options.nice_stats {
            return self.nice_stats_line(aggregated);
        }

        let color = if aggregated.errors > 0 || aggregated.failed > 0 {
            self.fail
        } else {
            self.success
        };
        format!(
            "{}Executed: {}, Succeeded: {}, Failed: {}, Errors: {}{}",
            color,
            aggregated.total,
            aggregated.succeeded,
            aggregated.failed,
            aggregated.errors,
            self.reset
        )
    }

    fn nice_stats_line(&self, aggregated: &Aggregated) -> String {
        let Aggregated {
            total,
            succeeded,
            failed,
            errors,
        } = *aggregated;
        let success = self.success;
        let fail = self.fail;
        let reset = self.reset;

        if total == 0 {
            format!("{fail}No tests executed{reset}")
        } else if total == succeeded {
            format!("{success}Executed {total} tests, all succeeded{reset}")
        } else if total == failed {
            format!("{fail}Executed {total} tests, all failed{reset}")
        } else if total == errors {
            format!("{fail}Executed {total} tests, all with errors{reset}")
        } else if errors == 0 {
            format!("{fail}Executed {total} tests, {failed} failed{reset}")
        } else {
            format!(
                "{fail}Executed {total} tests, {failed} failed, {succeeded} succeeded, {errors} errors{reset}"
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain() -> Reporter {
        Reporter::new(ReportOptions::default())
    }

    fn result(execution: Execution, test: TestOutcome) -> TestResult {
        TestResult {
            name: "test_example".into(),
            identity: 1,
            execution,
            before: FixtureOutcome::NotNeeded,
            test,
            after: FixtureOutcome::NotNeeded,
        }
    }

    #[test]
    fn success_line_skips_capture_playback() {
        let (line, play) = plain().result_line(&result(Execution::Done, TestOutcome::Success));
        assert_eq!(line, "test_example: Success");
        assert!(!play);
    }

    #[test]
    fn failure_and_error_lines_play_capture() {
        let reporter = plain();

        let (line, play) = reporter.result_line(&result(Execution::Done, TestOutcome::Failure));
        assert_eq!(line, "test_example: Failed");
        assert!(play);

        let (line, play) = reporter.result_line(&result(Execution::Done, TestOutcome::Error));
        assert_eq!(line, "test_example: Error");
        assert!(play);
    }

    #[test]
    fn execution_axis_takes_precedence() {
        let reporter = plain();

        let (line, _) = reporter.result_line(&result(Execution::Crashed, TestOutcome::Uncertain));
        assert_eq!(line, "test_example: Crashed");

        let (line, _) = reporter.result_line(&result(Execution::TimedOut, TestOutcome::Uncertain));
        assert_eq!(line, "test_example: Timed out");

        let (line, _) =
            reporter.result_line(&result(Execution::UnknownError, TestOutcome::Uncertain));
        assert_eq!(line, "test_example: Unknown error");
    }

    #[test]
    fn fixture_errors_shadow_test_outcome() {
        let reporter = plain();

        let mut r = result(Execution::Done, TestOutcome::Uncertain);
        r.before = FixtureOutcome::Error;
        let (line, _) = reporter.result_line(&r);
        assert_eq!(line, "test_example: Test fixture setup error");

        let mut r = result(Execution::Done, TestOutcome::Success);
        r.after = FixtureOutcome::Error;
        let (line, _) = reporter.result_line(&r);
        assert_eq!(line, "test_example: Test fixture teardown error");
    }

    #[test]
    fn color_codes_wrap_lines_when_enabled() {
        let reporter = Reporter::new(ReportOptions {
            use_color: true,
            ..ReportOptions::default()
        });
        let (line, _) = reporter.result_line(&result(Execution::Done, TestOutcome::Success));
        assert!(line.starts_with(COLOR_SUCCESS));
        assert!(line.ends_with(COLOR_RESET));
    }

    #[test]
    fn plain_stats_line() {
        let stats = plain().stats_line(&Aggregated {
            total: 4,
            succeeded: 2,
            failed: 1,
            errors: 1,
        });
        assert_eq!(stats, "Executed: 4, Succeeded: 2, Failed: 1, Errors: 1");
    }

    #[test]
    fn nice_stats_cover_the_shapes() {
        let reporter = Reporter::new(ReportOptions {
            nice_stats: true,
            ..ReportOptions::default()
        });

        let line = |total, succeeded, failed, errors| {
            reporter.stats_line(&Aggregated {
                total,
                succeeded,
                failed,
                errors,
            })
        };

        assert_eq!(line(0, 0, 0, 0), "No tests executed");
        assert_eq!(line(3, 3, 0, 0), "Executed 3 tests, all succeeded");
        assert_eq!(line(2, 0, 2, 0), "Executed 2 tests, all failed");
        assert_eq!(line(2, 0, 0, 2), "Executed 2 tests, all with errors");
        assert_eq!(line(5, 3, 2, 0), "Executed 5 tests, 2 failed");
        assert_eq!(
            line(6, 3, 2, 1),
            "Executed 6 tests, 2 failed, 3 succeeded, 1 errors"
        );
    }
}
