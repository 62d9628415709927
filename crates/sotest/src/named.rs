//! Named-test batch mode.
//!
//! Reads `library:test` lines, resolves each library through a registry so
//! repeated libraries load once, and runs each named test in isolation.
//! Blank lines are skipped; whitespace around both sides of the separator
//! is ignored.

use std::io::BufRead;

use sotest_harness::{Aggregated, Executor, TestResult, Timing};

use crate::capture::StdoutCapture;
use crate::error::{Error, Result};
use crate::registry::Registry;

/// Splits one input line into `(library_path, test_name)`.
pub fn parse_line(line: &str) -> Result<(&str, &str)> {
    let bad = || Error::BadTestLine {
        line: line.to_owned(),
    };

    let (library, test) = line.split_once(':').ok_or_else(bad)?;
    let library = library.trim();
    let test = test.trim();
    if library.is_empty() || test.is_empty() {
        return Err(bad());
    }
    Ok((library, test))
}

/// Runs every named test from `input`, in input order.
///
/// Returns the statistics aggregated across all lines. Per-library setup
/// errors and unknown test names surface immediately as errors, like any
/// other setup problem.
pub fn run_lines(
    input: impl BufRead,
    registry: &mut Registry,
    executor: &mut Executor,
    timing: &Timing,
    capture: &StdoutCapture,
    mut progress: impl FnMut(&str, &str),
    mut on_result: impl FnMut(&TestResult, &Aggregated),
) -> Result<Aggregated> {
    let mut aggregated = Aggregated::default();

    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let (library_path, test_name) = parse_line(&line)?;

        let library = registry.find_or_open(library_path.as_ref())?;
        let outcome = library.run_named(
            test_name,
            executor,
            timing,
            capture,
            &mut progress,
            |result, _| {
                // Fold into the batch-wide statistics rather than the
                // single-test aggregate the library run maintains.
                aggregated.fold(result);
                on_result(result, &aggregated);
            },
        )?;

        if outcome.suite_before_failed || outcome.suite_after_failed {
            // Suite fixtures failing for a named test is as fatal as it is
            // for a full run; count it so the exit status reflects it.
            aggregated.errors += 1;
        }
    }

    Ok(aggregated)
}
