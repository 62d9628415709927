//! Library registry for batch modes.
//!
//! Keeps opened [`TestLibrary`] instances keyed by their path so a batch of
//! named tests touching the same library loads it exactly once. Entries
//! live until the registry drops, which unloads every library together.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;
use crate::library::TestLibrary;

#[derive(Default)]
pub struct Registry {
    libraries: HashMap<PathBuf, TestLibrary>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the library at `path`, opening it on first use.
    pub fn find_or_open(&mut self, path: &Path) -> Result<&TestLibrary> {
        if !self.libraries.contains_key(path) {
            debug!(path = %path.display(), "opening library for registry");
            let library = TestLibrary::open(path)?;
            self.libraries.insert(path.to_path_buf(), library);
        }
        Ok(&self.libraries[path])
    }

    pub fn len(&self) -> usize {
        self.libraries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.libraries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn starts_empty() {
        let registry = Registry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn open_failure_does_not_poison_registry() {
        let mut registry = Registry::new();

        let err = registry
            .find_or_open(Path::new("/nonexistent/libtests.so"))
            .unwrap_err();
        assert!(matches!(err, Error::Symbols(_)));
        assert!(registry.is_empty());
    }
}
