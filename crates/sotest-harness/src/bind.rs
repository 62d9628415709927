//! Dynamic binding of suite entries to callable references.
//!
//! The binder loads the library into the running process (exactly once per
//! suite instance) and resolves symbol names to function pointers. Fixture
//! slots are resolved eagerly at creation; tests are resolved on demand by
//! index, since a suite may be large and early termination can leave tests
//! unexecuted.
//!
//! Every pointer handed out is only valid while the binder is alive:
//! dropping it unloads the library and invalidates all of them. Callers
//! invoke the pointers through `unsafe` and carry that invariant.

use std::path::{Path, PathBuf};

use libloading::Library;
use thiserror::Error;
use tracing::debug;

use crate::suite::Suite;

/// Calling convention shared by fixtures and tests: no arguments, a
/// `c_int` signal back (negative = error, zero = failure, positive =
/// success).
pub type TestFn = unsafe extern "C" fn() -> libc::c_int;

#[derive(Debug, Error)]
pub enum BindError {
    #[error("failed to load library {path}: {source}")]
    LoadFailed {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("failed to bind symbol `{name}`: {source}")]
    SymbolBindFailed {
        name: String,
        #[source]
        source: libloading::Error,
    },

    #[error("no test at index {index}")]
    NoSuchTest { index: usize },
}

/// The four fixture slots resolved to callable references.
///
/// Any slot may be absent; that is the common state, distinct from a
/// present-but-unresolvable name (which fails binding).
#[derive(Debug, Clone, Copy, Default)]
pub struct BoundFixtures {
    pub once_before: Option<TestFn>,
    pub once_after: Option<TestFn>,
    pub each_before: Option<TestFn>,
    pub each_after: Option<TestFn>,
}

/// A test resolved to a callable reference.
#[derive(Debug, Clone)]
pub struct BoundTest {
    pub name: String,
    pub func: TestFn,
}

/// Owns the loaded library and the suite whose entries it resolves.
#[derive(Debug)]
pub struct Binder {
    lib: Library,
    suite: Suite,
}

impl Binder {
    /// Loads `path` and takes ownership of its suite description.
    pub fn open(path: &Path, suite: Suite) -> Result<Self, BindError> {
        debug!(path = %path.display(), "loading library");
        // SAFETY: the library is expected to be a plain test suite; its
        // initializers run here, which is the point of loading it.
        let lib = unsafe { Library::new(path) }.map_err(|source| BindError::LoadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self { lib, suite })
    }

    pub fn suite(&self) -> &Suite {
        &self.suite
    }

    pub fn test_count(&self) -> usize {
        self.suite.tests.len()
    }

    /// Resolves the four fixture slots. Empty slots bind to absent without
    /// error; a named slot that does not resolve fails naming the symbol.
    pub fn fixtures(&self) -> Result<BoundFixtures, BindError> {
        Ok(BoundFixtures {
            once_before: self.bind_optional(self.suite.once_before.as_deref())?,
            once_after: self.bind_optional(self.suite.once_after.as_deref())?,
            each_before: self.bind_optional(self.suite.each_before.as_deref())?,
            each_after: self.bind_optional(self.suite.each_after.as_deref())?,
        })
    }

    /// Resolves the test at `index` in the suite's test list.
    pub fn test(&self, index: usize) -> Result<BoundTest, BindError> {
        let name = self
            .suite
            .tests
            .get(index)
            .ok_or(BindError::NoSuchTest { index })?;
        Ok(BoundTest {
            name: name.clone(),
            func: self.bind_symbol(name)?,
        })
    }

    fn bind_optional(&self, name: Option<&str>) -> Result<Option<TestFn>, BindError> {
        name.map(|name| self.bind_symbol(name)).transpose()
    }

    fn bind_symbol(&self, name: &str) -> Result<TestFn, BindError> {
        // SAFETY: the symbol is declared with the suite calling convention;
        // a mismatch is the library author's contract violation and only
        // bites when the pointer is invoked.
        let symbol = unsafe { self.lib.get::<TestFn>(name.as_bytes()) }.map_err(|source| {
            BindError::SymbolBindFailed {
                name: name.to_owned(),
                source,
            }
        })?;
        debug!(name, "bound symbol");
        Ok(*symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suite::SuiteBuilder;

    #[test]
    fn missing_library_fails_to_load() {
        let suite = SuiteBuilder::with_capacity(0).build();
        let err = Binder::open(Path::new("/nonexistent/libtests.so"), suite).unwrap_err();
        assert!(matches!(err, BindError::LoadFailed { .. }));
    }

    #[test]
    fn absent_fixtures_bind_to_absent() {
        // libc is guaranteed loadable and exports none of the fixture names.
        let suite = SuiteBuilder::with_capacity(0).build();
        let binder = Binder::open(Path::new("libc.so.6"), suite).unwrap();

        let fixtures = binder.fixtures().unwrap();
        assert!(fixtures.once_before.is_none());
        assert!(fixtures.once_after.is_none());
        assert!(fixtures.each_before.is_none());
        assert!(fixtures.each_after.is_none());
    }

    #[test]
    fn unresolvable_fixture_names_the_symbol() {
        let mut builder = SuiteBuilder::with_capacity(0);
        builder.eval("each_before").unwrap();
        let binder = Binder::open(Path::new("libc.so.6"), builder.build()).unwrap();

        let err = binder.fixtures().unwrap_err();
        match err {
            BindError::SymbolBindFailed { name, .. } => assert_eq!(name, "each_before"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unresolvable_test_names_the_symbol() {
        let mut builder = SuiteBuilder::with_capacity(1);
        builder.eval("test_does_not_exist").unwrap();
        let binder = Binder::open(Path::new("libc.so.6"), builder.build()).unwrap();

        let err = binder.test(0).unwrap_err();
        assert!(matches!(err, BindError::SymbolBindFailed { name, .. } if name == "test_does_not_exist"));
    }

    #[test]
    fn out_of_range_test_index() {
        let suite = SuiteBuilder::with_capacity(0).build();
        let binder = Binder::open(Path::new("libc.so.6"), suite).unwrap();

        let err = binder.test(0).unwrap_err();
        assert!(matches!(err, BindError::NoSuchTest { index: 0 }));
    }
}
