//! Standard-output capture to per-test files.
//!
//! While a test runs, its standard output is redirected to a file named by
//! the test's run identity inside a configured capture directory. The
//! redirect happens at the fd level (`dup`/`dup2` of fd 1), because the
//! start/stop pair runs inside the forked isolation context where only fd
//! operations are safe. After the child is gone, the orchestrator plays a
//! captured session back between marker strings.
//!
//! Disabled capture is a no-op on every call.

use std::cell::Cell;
use std::ffi::CString;
use std::fs::{self, File};
use std::io::{self, Write};
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStringExt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use sotest_harness::Capture;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to create capture directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Captures standard output into per-identity files under one directory.
pub struct StdoutCapture {
    enabled: bool,
    dir: PathBuf,
    saved: Cell<Option<RawFd>>,
}

impl StdoutCapture {
    /// Initializes capture. When `enabled`, the directory is created if it
    /// does not exist.
    pub fn begin(enabled: bool, dir: impl Into<PathBuf>) -> Result<Self, CaptureError> {
        let dir = dir.into();
        if enabled {
            fs::create_dir_all(&dir).map_err(|source| CaptureError::Directory {
                path: dir.clone(),
                source,
            })?;
            debug!(dir = %dir.display(), "capturing test output");
        }
        Ok(Self {
            enabled,
            dir,
            saved: Cell::new(None),
        })
    }

    /// Capture that ignores every call.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::new(),
            saved: Cell::new(None),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Plays a captured session back to standard output between `before`
    /// and `after`. Nothing is printed when capture is disabled.
    pub fn read_back(&self, key: &str, before: &str, after: &str) {
        if !self.enabled {
            return;
        }
        let path = self.file_path(key);
        let mut out = io::stdout().lock();
        let _ = out.write_all(before.as_bytes());
        match File::open(&path) {
            Ok(mut file) => {
                let _ = io::copy(&mut file, &mut out);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "no captured output"),
        }
        let _ = out.write_all(after.as_bytes());
        let _ = out.flush();
    }

    /// Releases the capture session. Capture files are left on disk for
    /// inspection.
    pub fn end(self) {}

    fn file_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

impl Capture for StdoutCapture {
    fn start(&self, key: &str) {
        if !self.enabled {
            return;
        }
        let path = self.file_path(key);
        let Ok(cpath) = CString::new(path.into_os_string().into_vec()) else {
            return;
        };

        // Flush Rust-side buffering before switching the fd underneath it.
        let _ = io::stdout().flush();

        // SAFETY: plain fd shuffling; on any failure stdout is left as-is.
        unsafe {
            let file = libc::creat(cpath.as_ptr(), libc::S_IRUSR | libc::S_IWUSR);
            if file < 0 {
                return;
            }
            let copy = libc::dup(1);
            if copy < 0 {
                libc::close(file);
                return;
            }
            if libc::dup2(file, 1) < 0 {
                libc::close(file);
                libc::close(copy);
                return;
            }
            libc::close(file);
            self.saved.set(Some(copy));
        }
    }

    fn stop(&self) {
        let Some(copy) = self.saved.take() else {
            return;
        };
        let _ = io::stdout().flush();
        // SAFETY: restoring the fd saved by `start`.
        unsafe {
            libc::dup2(copy, 1);
            libc::close(copy);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_creates_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("captures");

        let capture = StdoutCapture::begin(true, &dir).unwrap();

        assert!(dir.is_dir());
        assert!(capture.enabled());
    }

    #[test]
    fn disabled_capture_is_inert() {
        let capture = StdoutCapture::disabled();
        assert!(!capture.enabled());

        // None of these should touch the filesystem or fd 1.
        capture.start("1");
        capture.stop();
        capture.read_back("1", ">>>\n", "<<<\n");
    }

    #[test]
    fn start_stop_writes_capture_file() {
        let root = tempfile::tempdir().unwrap();
        let capture = StdoutCapture::begin(true, root.path()).unwrap();

        capture.start("7");
        // Write through the raw fd: the test harness may have replaced the
        // `print!` machinery, but fd 1 is what capture redirects.
        let payload = b"captured line\n";
        unsafe {
            libc::write(1, payload.as_ptr().cast::<libc::c_void>(), payload.len());
        }
        capture.stop();

        // The whole process's fd 1 was redirected for the duration, so the
        // harness may have interleaved its own output; only our payload is
        // guaranteed to be present.
        let content = fs::read(root.path().join("7")).unwrap();
        assert!(content
            .windows(payload.len())
            .any(|window| window == payload));
    }

    #[test]
    fn stop_without_start_is_harmless() {
        let capture = StdoutCapture::begin(true, tempfile::tempdir().unwrap().path()).unwrap();
        capture.stop();
    }
}
