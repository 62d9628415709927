//! Output-capture seam.
//!
//! The isolated executor redirects a test's standard output inside the
//! forked child, keyed by the test's run identity. The concrete capture
//! implementation lives with the reporting layer; the executor only needs
//! the start/stop pair.
//!
//! Implementations run between `fork()` and `_exit()` in a child of a
//! single-threaded orchestrator, so they must restrict themselves to plain
//! fd operations (`open`, `dup`, `dup2`, `close`, `write`) and small
//! allocations.

/// Redirects the current process's standard output to a per-test target.
pub trait Capture {
    /// Starts capturing, keyed by the test's identity.
    fn start(&self, key: &str);

    /// Stops capturing and restores standard output.
    fn stop(&self);
}

/// Capture implementation that does nothing.
pub struct NoCapture;

impl Capture for NoCapture {
    fn start(&self, _key: &str) {}

    fn stop(&self) {}
}
