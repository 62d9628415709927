//! sotest-harness: test discovery and crash-isolated execution
//!
//! This crate implements the execution pipeline behind sotest: given a
//! compiled shared library, it discovers test and fixture functions from the
//! library's exported dynamic symbol table and runs each test in a forked
//! child so a crashing or hanging test cannot take down the caller.
//!
//! The pipeline has four stages:
//!
//! - **[`symbols`]** - Parses the dynamic symbol table straight out of the
//!   on-disk ELF image (no source code, no build integration)
//! - **[`suite`]** - Classifies symbol names into fixtures and an ordered
//!   test list
//! - **[`bind`]** - Loads the library and resolves suite entries to callable
//!   function pointers
//! - **[`exec`]** - Runs one bound test per forked child with a timeout,
//!   crash detection and a structured per-test result
//!
//! ## Quick Start
//!
//! ```ignore
//! use sotest_harness::{Binder, Executor, NoCapture, SuiteBuilder, Symbols, Timing};
//!
//! let symbols = Symbols::open("libtests.so".as_ref())?;
//! let mut builder = SuiteBuilder::with_capacity(symbols.count());
//! for name in symbols.iter() {
//!     builder.eval(name?)?;
//! }
//! let binder = Binder::open("libtests.so".as_ref(), builder.build())?;
//! let fixtures = binder.fixtures()?;
//!
//! let mut executor = Executor::new()?;
//! let result = executor.run(&binder.test(0)?, &fixtures, &Timing::default(), &NoCapture)?;
//! ```
//!
//! ## Requirements
//!
//! - Linux (fork, pselect, SIGCHLD semantics)
//! - Little-endian target objects; big-endian images are rejected

pub mod bind;
pub mod capture;
pub mod exec;
pub mod result;
pub mod suite;
pub mod symbols;

mod pipe;

pub use bind::{BindError, Binder, BoundFixtures, BoundTest, TestFn};
pub use capture::{Capture, NoCapture};
pub use exec::{ExecError, Executor, Timing};
pub use result::{Aggregated, Execution, FixtureOutcome, TestOutcome, TestResult};
pub use suite::{Classification, Suite, SuiteBuilder, SuiteError};
pub use symbols::{Symbols, SymbolsError};
