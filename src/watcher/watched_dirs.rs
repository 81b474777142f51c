//! Index of directories currently subscribed with the backend.
//!
//! Maps each absolute directory path to its recursive flag. Prefix queries
//! are flat scans over the map; watch counts are expected to stay small
//! enough that a prefix tree would not pay for itself.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Directory index: absolute path -> recursive flag.
#[derive(Debug, Default, Clone)]
pub(crate) struct WatchedDirs {
    dirs: HashMap<PathBuf, bool>,
}

impl WatchedDirs {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite an entry, returning the previous flag.
    pub fn insert(&mut self, path: PathBuf, recursive: bool) -> Option<bool> {
        self.dirs.insert(path, recursive)
    }

    /// Remove an entry, returning its flag if it was present.
    pub fn remove(&mut self, path: &Path) -> Option<bool> {
        self.dirs.remove(path)
    }

    /// Recursive flag for a path, if indexed.
    #[cfg(test)]
    pub(crate) fn get(&self, path: &Path) -> Option<bool> {
        self.dirs.get(path).copied()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.dirs.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    /// Count recursive entries that are `path` itself or one of its ancestors.
    ///
    /// Prefixes are compared component-wise, so `/a/bc` does not lie beneath
    /// `/a/b`.
    pub fn recursive_ancestors(&self, path: &Path) -> usize {
        self.dirs
            .iter()
            .filter(|(dir, recursive)| **recursive && path.starts_with(dir))
            .count()
    }

    /// Recursive entries strictly beneath `path`.
    pub fn recursive_descendants(&self, path: &Path) -> Vec<PathBuf> {
        self.dirs
            .iter()
            .filter(|(dir, recursive)| **recursive && dir.as_path() != path && dir.starts_with(path))
            .map(|(dir, _)| dir.clone())
            .collect()
    }

    /// Sorted copy of all entries.
    pub fn snapshot(&self) -> Vec<(PathBuf, bool)> {
        let mut entries: Vec<_> = self
            .dirs
            .iter()
            .map(|(path, flag)| (path.clone(), *flag))
            .collect();
        entries.sort();
        entries
    }

    /// Drop every entry, returning the paths that were indexed.
    pub fn drain(&mut self) -> Vec<PathBuf> {
        self.dirs.drain().map(|(path, _)| path).collect()
    }
}
