//! Per-test results and running aggregation.
//!
//! A [`TestResult`] records four independent axes: how far the isolated
//! execution got, and the outcomes of the before fixture, the test itself
//! and the after fixture. The axes are independent because a crash can
//! happen at any stage; "ran and failed" is always distinguishable from
//! "did not finish running".
//!
//! The fixture and test outcomes cross the process boundary as a fixed
//! three-byte record written by the child; decoding is checked so a corrupt
//! record never produces a bogus classification.

use libc::c_int;

/// How far the isolated execution of a test got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    NotStarted,
    /// The bounded wait failed for a reason other than timeout or child
    /// death; nothing can be said about the test.
    UnknownError,
    /// The child died before delivering a complete outcome record.
    Crashed,
    /// The child was still alive when the timing policy expired.
    TimedOut,
    /// A complete outcome record arrived; the three sub-outcomes are valid.
    Done,
}

/// Outcome of a per-test fixture invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixtureOutcome {
    /// Never reached; nothing can be said.
    Uncertain,
    /// No such fixture in the suite. A valid, common state distinct from
    /// "present but failed".
    NotNeeded,
    Error,
    Success,
}

/// Outcome of the test function itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestOutcome {
    Uncertain,
    /// Ran and returned the error signal (negative).
    Error,
    /// Ran and returned the failure signal (zero).
    Failure,
    /// Ran and returned the success signal (positive).
    Success,
}

impl FixtureOutcome {
    /// Classifies a fixture's return signal: negative is an error,
    /// everything else succeeds.
    pub(crate) fn classify(ret: c_int) -> Self {
        if ret < 0 {
            Self::Error
        } else {
            Self::Success
        }
    }

    fn to_wire(self) -> u8 {
        match self {
            Self::Uncertain => 0,
            Self::NotNeeded => 1,
            Self::Error => 2,
            Self::Success => 3,
        }
    }

    fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Uncertain),
            1 => Some(Self::NotNeeded),
            2 => Some(Self::Error),
            3 => Some(Self::Success),
            _ => None,
        }
    }
}

impl TestOutcome {
    /// Classifies a test's return signal: negative is an error, zero a
    /// failure, positive a success.
    pub(crate) fn classify(ret: c_int) -> Self {
        if ret < 0 {
            Self::Error
        } else if ret == 0 {
            Self::Failure
        } else {
            Self::Success
        }
    }

    fn to_wire(self) -> u8 {
        match self {
            Self::Uncertain => 0,
            Self::Error => 1,
            Self::Failure => 2,
            Self::Success => 3,
        }
    }

    fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Uncertain),
            1 => Some(Self::Error),
            2 => Some(Self::Failure),
            3 => Some(Self::Success),
            _ => None,
        }
    }
}

/// Size of the outcome record shipped over the result channel.
pub(crate) const RECORD_LEN: usize = 3;

pub(crate) fn encode_record(
    before: FixtureOutcome,
    test: TestOutcome,
    after: FixtureOutcome,
) -> [u8; RECORD_LEN] {
    [before.to_wire(), test.to_wire(), after.to_wire()]
}

pub(crate) fn decode_record(
    buf: &[u8; RECORD_LEN],
) -> Option<(FixtureOutcome, TestOutcome, FixtureOutcome)> {
    Some((
        FixtureOutcome::from_wire(buf[0])?,
        TestOutcome::from_wire(buf[1])?,
        FixtureOutcome::from_wire(buf[2])?,
    ))
}

/// Classified outcome of one isolated test execution.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Symbol name of the test.
    pub name: String,
    /// Run-unique, strictly increasing identity assigned at execution time.
    /// Keys isolation artifacts such as captured-output files.
    pub identity: u64,
    pub execution: Execution,
    pub before: FixtureOutcome,
    pub test: TestOutcome,
    pub after: FixtureOutcome,
}

impl TestResult {
    /// True when this result counts as an infrastructure-level error rather
    /// than an ordinary failure.
    pub fn is_error(&self) -> bool {
        matches!(
            self.execution,
            Execution::UnknownError | Execution::Crashed | Execution::TimedOut
        ) || self.before == FixtureOutcome::Error
            || self.after == FixtureOutcome::Error
            || self.test == TestOutcome::Error
    }

    /// True when the suite must stop instead of consuming further tests.
    ///
    /// Crashes and timeouts deliberately do not stop the suite; one bad test
    /// must not prevent the rest from running.
    pub fn stops_suite(&self) -> bool {
        self.execution == Execution::UnknownError
            || self.before == FixtureOutcome::Error
            || self.after == FixtureOutcome::Error
            || self.test == TestOutcome::Error
    }
}

/// Running counters over completed results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Aggregated {
    pub total: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub errors: u32,
}

impl Aggregated {
    /// Folds one completed result into the counters.
    ///
    /// Errors and failures are mutually exclusive: a test that ran and
    /// returned the failure signal is never double-counted as an error.
    pub fn fold(&mut self, result: &TestResult) {
        if result.execution == Execution::NotStarted {
            return;
        }
        self.total += 1;

        if result.is_error() {
            self.errors += 1;
        } else if result.test == TestOutcome::Failure {
            self.failed += 1;
        } else if result.test == TestOutcome::Success {
            self.succeeded += 1;
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.errors == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn done(before: FixtureOutcome, test: TestOutcome, after: FixtureOutcome) -> TestResult {
        TestResult {
            name: "test_example".into(),
            identity: 1,
            execution: Execution::Done,
            before,
            test,
            after,
        }
    }

    #[test]
    fn classify_signals() {
        assert_eq!(TestOutcome::classify(-1), TestOutcome::Error);
        assert_eq!(TestOutcome::classify(0), TestOutcome::Failure);
        assert_eq!(TestOutcome::classify(1), TestOutcome::Success);
        assert_eq!(FixtureOutcome::classify(-7), FixtureOutcome::Error);
        assert_eq!(FixtureOutcome::classify(0), FixtureOutcome::Success);
    }

    #[test]
    fn record_encoding_round() {
        let record = encode_record(
            FixtureOutcome::NotNeeded,
            TestOutcome::Success,
            FixtureOutcome::Error,
        );
        let (before, test, after) = decode_record(&record).unwrap();
        assert_eq!(before, FixtureOutcome::NotNeeded);
        assert_eq!(test, TestOutcome::Success);
        assert_eq!(after, FixtureOutcome::Error);
    }

    #[test]
    fn corrupt_record_is_rejected() {
        assert!(decode_record(&[0, 9, 0]).is_none());
        assert!(decode_record(&[255, 0, 0]).is_none());
    }

    #[test]
    fn clean_success_counts_once() {
        let mut agg = Aggregated::default();
        agg.fold(&done(
            FixtureOutcome::NotNeeded,
            TestOutcome::Success,
            FixtureOutcome::NotNeeded,
        ));
        assert_eq!(
            agg,
            Aggregated {
                total: 1,
                succeeded: 1,
                failed: 0,
                errors: 0
            }
        );
    }

    #[test]
    fn failure_is_not_an_error() {
        let mut agg = Aggregated::default();
        let result = done(
            FixtureOutcome::Success,
            TestOutcome::Failure,
            FixtureOutcome::Success,
        );
        agg.fold(&result);

        assert!(!result.is_error());
        assert!(!result.stops_suite());
        assert_eq!(agg.failed, 1);
        assert_eq!(agg.errors, 0);
    }

    #[test]
    fn before_fixture_error_counts_as_error() {
        let mut agg = Aggregated::default();
        let result = done(
            FixtureOutcome::Error,
            TestOutcome::Uncertain,
            FixtureOutcome::Uncertain,
        );
        agg.fold(&result);

        assert!(result.is_error());
        assert!(result.stops_suite());
        assert_eq!(
            agg,
            Aggregated {
                total: 1,
                succeeded: 0,
                failed: 0,
                errors: 1
            }
        );
    }

    #[test]
    fn crash_is_error_but_does_not_stop_suite() {
        let result = TestResult {
            name: "test_crash".into(),
            identity: 2,
            execution: Execution::Crashed,
            before: FixtureOutcome::Uncertain,
            test: TestOutcome::Uncertain,
            after: FixtureOutcome::Uncertain,
        };
        assert!(result.is_error());
        assert!(!result.stops_suite());

        let timed_out = TestResult {
            execution: Execution::TimedOut,
            ..result
        };
        assert!(timed_out.is_error());
        assert!(!timed_out.stops_suite());
    }

    #[test]
    fn not_started_is_not_counted() {
        let mut agg = Aggregated::default();
        agg.fold(&TestResult {
            name: "test_never".into(),
            identity: 3,
            execution: Execution::NotStarted,
            before: FixtureOutcome::Uncertain,
            test: TestOutcome::Uncertain,
            after: FixtureOutcome::Uncertain,
        });
        assert_eq!(agg, Aggregated::default());
    }
}
