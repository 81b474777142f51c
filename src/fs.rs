//! Path and stat helpers used by the watcher.
//!
//! All functions use `Path` component APIs rather than string manipulation,
//! so separators and prefixes behave the same on every platform.

use std::io;
use std::path::{Component, Path, PathBuf};

/// Resolve `path` to an absolute, lexically cleaned form.
///
/// Relative paths are joined onto the current directory. `.` components are
/// dropped and `..` pops the previous component; symlinks are not followed
/// and the path does not need to exist.
///
/// Fails for an empty path or when the current directory is unavailable.
pub fn resolve_absolute(path: impl AsRef<Path>) -> io::Result<PathBuf> {
    let absolute = std::path::absolute(path.as_ref())?;
    Ok(clean(&absolute))
}

/// Lexically normalize `.` and `..` components.
pub fn clean(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match cleaned.components().next_back() {
                Some(Component::Normal(_)) => {
                    cleaned.pop();
                }
                // `..` at the root stays at the root
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => cleaned.push(".."),
            },
            other => cleaned.push(other.as_os_str()),
        }
    }

    cleaned
}

/// True if `path` is a directory. Any stat failure, including a missing
/// path, yields false.
pub fn is_dir(path: impl AsRef<Path>) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}

/// True if something exists at `path`.
pub fn exists(path: impl AsRef<Path>) -> bool {
    std::fs::symlink_metadata(path).is_ok()
}
