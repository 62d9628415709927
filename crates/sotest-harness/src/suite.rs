//! Suite classification.
//!
//! Turns the raw symbol-name stream from [`crate::symbols`] into a typed
//! suite description: up to four fixture slots plus an ordered test list.
//! Symbol-table order is preserved so the run order of a given library is
//! deterministic.

use thiserror::Error;
use tracing::debug;

/// Reserved name of the fixture run once before the whole suite.
pub const ONCE_BEFORE: &str = "once_before";
/// Reserved name of the fixture run once after the whole suite.
pub const ONCE_AFTER: &str = "once_after";
/// Reserved name of the fixture run before each test, inside isolation.
pub const EACH_BEFORE: &str = "each_before";
/// Reserved name of the fixture run after each test, inside isolation.
pub const EACH_AFTER: &str = "each_after";

/// Prefix marking an exported symbol as a test.
pub const TEST_PREFIX: &str = "test_";

#[derive(Debug, Error)]
pub enum SuiteError {
    /// The pre-declared capacity was exceeded. The capacity is derived from
    /// the symbol count, so hitting this means an internal miscount rather
    /// than bad input.
    #[error("test list full: capacity {capacity} exceeded")]
    TooManyTests { capacity: usize },
}

/// How a single symbol was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Matched a reserved fixture name; recorded in its slot.
    Fixture,
    /// Matched the test prefix; appended to the test list.
    Test,
    /// Neither. Most exported symbols land here; not an error.
    Unclassified,
}

/// Immutable description of the fixtures and tests found in one library.
#[derive(Debug, Default)]
pub struct Suite {
    pub once_before: Option<String>,
    pub once_after: Option<String>,
    pub each_before: Option<String>,
    pub each_after: Option<String>,
    pub tests: Vec<String>,
}

/// Builds a [`Suite`] from a stream of symbol names.
#[derive(Debug)]
pub struct SuiteBuilder {
    suite: Suite,
    capacity: usize,
}

impl SuiteBuilder {
    /// Allocates a builder whose test list holds at most `capacity` entries.
    ///
    /// `capacity` is an upper bound (every symbol in the table), not the
    /// expected test count.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            suite: Suite {
                tests: Vec::with_capacity(capacity),
                ..Suite::default()
            },
            capacity,
        }
    }

    /// Classifies one symbol name.
    ///
    /// Fixture names take precedence over the test prefix rule; a symbol is
    /// never both.
    pub fn eval(&mut self, symbol: &str) -> Result<Classification, SuiteError> {
        let slot = match symbol {
            ONCE_BEFORE => Some(&mut self.suite.once_before),
            ONCE_AFTER => Some(&mut self.suite.once_after),
            EACH_BEFORE => Some(&mut self.suite.each_before),
            EACH_AFTER => Some(&mut self.suite.each_after),
            _ => None,
        };
        if let Some(slot) = slot {
            debug!(symbol, "found fixture");
            *slot = Some(symbol.to_owned());
            return Ok(Classification::Fixture);
        }

        if symbol.starts_with(TEST_PREFIX) {
            if self.suite.tests.len() >= self.capacity {
                return Err(SuiteError::TooManyTests {
                    capacity: self.capacity,
                });
            }
            debug!(symbol, "found test");
            self.suite.tests.push(symbol.to_owned());
            return Ok(Classification::Test);
        }

        Ok(Classification::Unclassified)
    }

    pub fn build(self) -> Suite {
        self.suite
    }
}
