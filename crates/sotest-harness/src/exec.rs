//! Crash-isolated test execution.
//!
//! Runs exactly one test function in a forked copy of the current process,
//! so the orchestrator survives whatever the test does: writing through a
//! bad pointer, looping forever, or killing its own process image. The
//! fork carries the already-loaded library and every bound reference, which
//! is what lets the child call a resolved function pointer without
//! re-resolving anything.
//!
//! ## Protocol
//!
//! - A private pipe is the per-test result channel; it is torn down after
//!   each test, never reused.
//! - In the child: redirect stdout (keyed by the test identity), run
//!   `each_before`, then the test and `each_after` unless the before
//!   fixture errored, restore stdout, write a fixed three-byte outcome
//!   record, `_exit` without returning to any caller code.
//! - In the parent: wait on the channel with `pselect`, bounded by the
//!   timing policy. SIGCHLD is blocked from just before the fork and only
//!   atomically unblocked inside the wait, so a child that dies instantly
//!   cannot deliver its notification before the wait begins and cause a
//!   false timeout.
//!
//! ## Classification
//!
//! | Wait outcome | `execution` |
//! |---|---|
//! | complete record before deadline | `Done` |
//! | deadline expired | `TimedOut` (child killed and reaped) |
//! | interrupted by child death / EOF, no record | `Crashed` |
//! | anything else | `UnknownError` |
//!
//! A timed-out child that cannot be killed is fatal: continuing would leak
//! one process per subsequent test.

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::ptr;
use std::time::{Duration, Instant};

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use thiserror::Error;
use tracing::{debug, warn};

use crate::bind::{BoundFixtures, BoundTest};
use crate::capture::Capture;
use crate::pipe::{set_nonblocking, Pipe};
use crate::result::{
    decode_record, encode_record, Execution, FixtureOutcome, TestOutcome, TestResult, RECORD_LEN,
};

/// Bounds one test's total isolated-execution wall time.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub timeout: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to create result channel: {0}")]
    Channel(#[source] io::Error),

    #[error("failed to install child-exit handler: {0}")]
    Signals(#[source] io::Error),

    #[error("failed to duplicate process: {0}")]
    Fork(#[source] io::Error),

    /// The timed-out child could not be force-terminated. The run must stop;
    /// every further test would leak another process.
    #[error("timed out test `{name}` could not be killed: {source}")]
    KillFailed {
        name: String,
        #[source]
        source: io::Error,
    },
}

extern "C" fn sigchld_noop(_signal: libc::c_int) {}

/// Runs bound tests in isolation, one child at a time.
pub struct Executor {
    next_identity: u64,
}

impl Executor {
    /// Prepares signal handling for isolated runs.
    ///
    /// A no-op SIGCHLD handler is installed once: without a handler the
    /// signal cannot interrupt the bounded wait, and a crashing child would
    /// be indistinguishable from a timeout.
    pub fn new() -> Result<Self, ExecError> {
        let action = SigAction::new(
            SigHandler::Handler(sigchld_noop),
            SaFlags::empty(),
            SigSet::empty(),
        );
        // SAFETY: the handler does nothing, which is trivially async-signal-safe.
        unsafe { signal::sigaction(Signal::SIGCHLD, &action) }
            .map_err(|e| ExecError::Signals(io::Error::from(e)))?;

        Ok(Self { next_identity: 0 })
    }

    /// Runs one bound test plus its per-test fixtures in a forked child and
    /// classifies the outcome.
    pub fn run(
        &mut self,
        test: &BoundTest,
        fixtures: &BoundFixtures,
        timing: &Timing,
        capture: &dyn Capture,
    ) -> Result<TestResult, ExecError> {
        self.next_identity += 1;
        let identity = self.next_identity;
        // Formatted before the fork so the child has nothing to allocate.
        let capture_key = identity.to_string();

        let mut result = TestResult {
            name: test.name.clone(),
            identity,
            execution: Execution::NotStarted,
            before: FixtureOutcome::Uncertain,
            test: TestOutcome::Uncertain,
            after: FixtureOutcome::Uncertain,
        };

        let channel = Pipe::new().map_err(ExecError::Channel)?;

        // Block SIGCHLD before duplicating: a child that dies instantly must
        // not deliver its notification before the bounded wait begins.
        let mask = SigChldBlock::enter().map_err(ExecError::Signals)?;

        debug!(name = %test.name, identity, "starting isolated test");

        // SAFETY: the orchestrator is single-threaded; the child calls only
        // fd operations, the bound test functions and `_exit`.
        let pid = unsafe { libc::fork() };
        if pid < 0 {
            return Err(ExecError::Fork(io::Error::last_os_error()));
        }
        if pid == 0 {
            run_child(&channel, test, fixtures, capture, &capture_key);
        }

        let Pipe { read, write } = channel;
        drop(write);
        if let Err(e) = set_nonblocking(read.as_raw_fd()) {
            // The wait loop depends on non-blocking reads; give up cleanly.
            kill_and_reap(pid);
            drop(mask);
            result.execution = Execution::UnknownError;
            warn!(name = %result.name, error = %e, "result channel setup failed");
            return Ok(result);
        }

        let outcome = wait_for_record(&read, pid, timing.timeout, mask.unblocked());
        drop(mask);

        match outcome {
            WaitOutcome::Record(record) => {
                // The child is known to have exited right after writing, so
                // a synchronous reap cannot hang.
                reap(pid);
                match decode_record(&record) {
                    Some((before, test, after)) => {
                        result.execution = Execution::Done;
                        result.before = before;
                        result.test = test;
                        result.after = after;
                    }
                    None => {
                        warn!(name = %result.name, "corrupt outcome record");
                        result.execution = Execution::UnknownError;
                    }
                }
            }
            WaitOutcome::ChildDied { reaped } => {
                result.execution = Execution::Crashed;
                if !reaped {
                    reap(pid);
                }
            }
            WaitOutcome::TimedOut => {
                result.execution = Execution::TimedOut;
                if let Err(source) = signal::kill(Pid::from_raw(pid), Signal::SIGKILL) {
                    return Err(ExecError::KillFailed {
                        name: result.name,
                        source: io::Error::from(source),
                    });
                }
                reap(pid);
            }
            WaitOutcome::Failed(e) => {
                warn!(name = %result.name, error = %e, "bounded wait failed");
                result.execution = Execution::UnknownError;
                kill_and_reap(pid);
            }
        }

        debug!(
            name = %result.name,
            identity,
            execution = ?result.execution,
            before = ?result.before,
            test = ?result.test,
            after = ?result.after,
            "isolated test finished"
        );

        Ok(result)
    }
}

/// Child side of the protocol. Never returns.
fn run_child(
    channel: &Pipe,
    test: &BoundTest,
    fixtures: &BoundFixtures,
    capture: &dyn Capture,
    capture_key: &str,
) -> ! {
    // Close the parent's end. The fd is also owned by the (never dropped)
    // Pipe, but this process only ever exits through `_exit`.
    unsafe { libc::close(channel.read.as_raw_fd()) };

    capture.start(capture_key);

    let before = match fixtures.each_before {
        // SAFETY: bound from the loaded library, which stays mapped in this
        // duplicated image until `_exit`.
        Some(f) => FixtureOutcome::classify(unsafe { f() }),
        None => FixtureOutcome::NotNeeded,
    };
    let mut test_outcome = TestOutcome::Uncertain;
    let mut after = FixtureOutcome::Uncertain;

    // A failed before fixture means the test's preconditions never held;
    // neither the test nor the after fixture runs.
    if before != FixtureOutcome::Error {
        // SAFETY: as above.
        test_outcome = TestOutcome::classify(unsafe { (test.func)() });
        after = match fixtures.each_after {
            // SAFETY: as above.
            Some(f) => FixtureOutcome::classify(unsafe { f() }),
            None => FixtureOutcome::NotNeeded,
        };
    }

    capture.stop();

    let record = encode_record(before, test_outcome, after);
    let mut written = 0;
    while written < RECORD_LEN {
        let ret = unsafe {
            libc::write(
                channel.write.as_raw_fd(),
                record[written..].as_ptr().cast::<libc::c_void>(),
                RECORD_LEN - written,
            )
        };
        if ret <= 0 {
            // Nobody is listening; nothing left to report.
            break;
        }
        written += ret as usize;
    }

    unsafe { libc::_exit(0) }
}

enum WaitOutcome {
    Record([u8; RECORD_LEN]),
    ChildDied { reaped: bool },
    TimedOut,
    Failed(io::Error),
}

/// Waits for a complete outcome record, bounded by `timeout`.
///
/// `wait_mask` is the signal mask applied atomically for the duration of
/// each `pselect`: the caller's mask with SIGCHLD unblocked.
fn wait_for_record(
    read: &OwnedFd,
    child: libc::pid_t,
    timeout: Duration,
    wait_mask: &libc::sigset_t,
) -> WaitOutcome {
    let fd = read.as_raw_fd();
    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; RECORD_LEN];
    let mut filled = 0;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return expired(fd, &mut buf, &mut filled);
        }

        let ts = libc::timespec {
            tv_sec: remaining.as_secs() as libc::time_t,
            tv_nsec: remaining.subsec_nanos() as libc::c_long,
        };
        // SAFETY: fd is open and fits fd_set; the timespec and sigset
        // pointers are valid for the duration of the call.
        let ready = unsafe {
            let mut readfds: libc::fd_set = mem::zeroed();
            libc::FD_SET(fd, &mut readfds);
            libc::pselect(
                fd + 1,
                &mut readfds,
                ptr::null_mut(),
                ptr::null_mut(),
                &ts,
                wait_mask,
            )
        };

        if ready > 0 {
            match drain(fd, &mut buf, &mut filled) {
                Drain::Complete => return WaitOutcome::Record(buf),
                Drain::Eof => return WaitOutcome::ChildDied { reaped: false },
                Drain::Pending => continue,
                Drain::Failed(e) => return WaitOutcome::Failed(e),
            }
        } else if ready == 0 {
            return expired(fd, &mut buf, &mut filled);
        } else {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINTR) {
                return WaitOutcome::Failed(err);
            }
            // Interrupted, almost certainly by SIGCHLD. The record may have
            // landed just before the child died, so drain the channel first;
            // only a reaped-or-dead child with no record is a crash.
            match drain(fd, &mut buf, &mut filled) {
                Drain::Complete => return WaitOutcome::Record(buf),
                Drain::Eof => return WaitOutcome::ChildDied { reaped: false },
                Drain::Failed(e) => return WaitOutcome::Failed(e),
                Drain::Pending => match waitpid(Pid::from_raw(child), Some(WaitPidFlag::WNOHANG)) {
                    Ok(WaitStatus::StillAlive) => continue,
                    Ok(status) => {
                        debug!(?status, "child state changed during wait");
                        return WaitOutcome::ChildDied { reaped: true };
                    }
                    Err(e) => return WaitOutcome::Failed(io::Error::from(e)),
                },
            }
        }
    }
}

/// Deadline expired. A record (or EOF) that landed right at the deadline
/// still counts; only a silent, still-open channel classifies as a timeout.
fn expired(fd: RawFd, buf: &mut [u8; RECORD_LEN], filled: &mut usize) -> WaitOutcome {
    match drain(fd, buf, filled) {
        Drain::Complete => WaitOutcome::Record(*buf),
        Drain::Eof => WaitOutcome::ChildDied { reaped: false },
        Drain::Pending => WaitOutcome::TimedOut,
        Drain::Failed(e) => WaitOutcome::Failed(e),
    }
}

enum Drain {
    Complete,
    Pending,
    Eof,
    Failed(io::Error),
}

/// Non-blocking read of whatever part of the record is available.
fn drain(fd: RawFd, buf: &mut [u8; RECORD_LEN], filled: &mut usize) -> Drain {
    while *filled < RECORD_LEN {
        let ret = unsafe {
            libc::read(
                fd,
                buf[*filled..].as_mut_ptr().cast::<libc::c_void>(),
                RECORD_LEN - *filled,
            )
        };
        if ret > 0 {
            *filled += ret as usize;
        } else if ret == 0 {
            return Drain::Eof;
        } else {
            let err = io::Error::last_os_error();
            return match err.kind() {
                io::ErrorKind::WouldBlock => Drain::Pending,
                io::ErrorKind::Interrupted => continue,
                _ => Drain::Failed(err),
            };
        }
    }
    Drain::Complete
}

/// Reaps a child that is known to be dead or dying.
fn reap(pid: libc::pid_t) {
    if let Err(e) = waitpid(Pid::from_raw(pid), None) {
        warn!(pid, error = %e, "failed to reap child");
    }
}

fn kill_and_reap(pid: libc::pid_t) {
    let _ = signal::kill(Pid::from_raw(pid), Signal::SIGKILL);
    reap(pid);
}

/// Blocks SIGCHLD for its lifetime, remembering the previous mask so the
/// bounded wait can atomically revert to it.
struct SigChldBlock {
    prev: libc::sigset_t,
}

impl SigChldBlock {
    fn enter() -> io::Result<Self> {
        // SAFETY: plain sigset arithmetic on locals.
        unsafe {
            let mut sigchld: libc::sigset_t = mem::zeroed();
            libc::sigemptyset(&mut sigchld);
            libc::sigaddset(&mut sigchld, libc::SIGCHLD);

            let mut prev: libc::sigset_t = mem::zeroed();
            if libc::sigprocmask(libc::SIG_BLOCK, &sigchld, &mut prev) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(Self { prev })
        }
    }

    /// The mask in effect before SIGCHLD was blocked.
    fn unblocked(&self) -> &libc::sigset_t {
        &self.prev
    }
}

impl Drop for SigChldBlock {
    fn drop(&mut self) {
        // SAFETY: restoring a mask previously returned by sigprocmask.
        unsafe { libc::sigprocmask(libc::SIG_SETMASK, &self.prev, ptr::null_mut()) };
    }
}
