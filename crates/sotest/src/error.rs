//! Error types for sotest.

use thiserror::Error;

use sotest_harness::{BindError, ExecError, SuiteError, SymbolsError};

use crate::capture::CaptureError;

/// Main error type for sotest operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("symbols: {0}")]
    Symbols(#[from] SymbolsError),

    #[error("suite: {0}")]
    Suite(#[from] SuiteError),

    #[error("bind: {0}")]
    Bind(#[from] BindError),

    #[error("exec: {0}")]
    Exec(#[from] ExecError),

    #[error("capture: {0}")]
    Capture(#[from] CaptureError),

    #[error("no test named `{name}` in {library}")]
    UnknownTest { library: String, name: String },

    #[error("bad test line `{line}`: expected `library:test`")]
    BadTestLine { line: String },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True when the whole run must stop, not just the affected library.
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(self, Self::Exec(ExecError::KillFailed { .. }))
    }
}

/// Result type for sotest operations.
pub type Result<T> = std::result::Result<T, Error>;
