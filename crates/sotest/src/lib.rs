//! sotest: run tests straight out of a compiled shared library.
//!
//! Tests are discovered from the library's exported dynamic symbol table -
//! no source parsing, no build-system integration. Every exported symbol
//! starting with `test_` is a test; the reserved names `once_before`,
//! `once_after`, `each_before` and `each_after` are suite and per-test
//! fixtures. Each test runs in a forked child with a timeout, so a test
//! that crashes or hangs is reported and contained while the rest of the
//! suite keeps running.
//!
//! ## Quick Start
//!
//! ```ignore
//! use sotest::{run_all, Options};
//!
//! let passed = run_all(&["./libsuite.so".into()], &Options::default())?;
//! std::process::exit(if passed { 0 } else { 1 });
//! ```
//!
//! ## Test contract
//!
//! Fixtures and tests are `extern "C"` functions taking no arguments and
//! returning an `int`: negative reports an error, zero a failure, positive
//! a success.

pub mod capture;
pub mod command;
pub mod error;
pub mod library;
pub mod named;
pub mod registry;
pub mod report;

pub use capture::{CaptureError, StdoutCapture};
pub use command::{list, run_all, run_named, Options};
pub use error::{Error, Result};
pub use library::{discover, RunOutcome, TestLibrary};
pub use registry::Registry;
pub use report::{ReportOptions, Reporter};

// The harness types flow through the public API; re-export them so callers
// need a single crate.
pub use sotest_harness::{
    Aggregated, Execution, Executor, FixtureOutcome, TestOutcome, TestResult, Timing,
};
