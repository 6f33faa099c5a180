//! Filesystem root confinement
//!
//! Both the shell session manager and the file editor only ever touch paths
//! below one configured root directory. [`WorkspaceRoot`] is the single place
//! that decision is made; every path a tool receives goes through it before
//! any filesystem or process side effect happens.

use std::io;
use std::path::{Component, Path, PathBuf};

/// Error type for path validation
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("Root path {0} does not exist or is not a directory")]
    InvalidRoot(PathBuf),
    #[error("Path {0} must be absolute. Did you mean {1}?")]
    NotAbsolute(PathBuf, PathBuf),
    #[error("Path {path} is outside the root directory {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },
    #[error("Directory {0} does not exist")]
    MissingDirectory(PathBuf),
    #[error("Path {0} is not a directory")]
    NotADirectory(PathBuf),
    #[error("Error validating path {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// A canonicalized root directory that confines tool paths
#[derive(Debug, Clone)]
pub struct WorkspaceRoot {
    root: PathBuf,
}

impl WorkspaceRoot {
    /// Create a root from an existing directory
    pub fn new(root: impl AsRef<Path>) -> Result<Self, PathError> {
        let root = root.as_ref();
        let canonical = root
            .canonicalize()
            .map_err(|_| PathError::InvalidRoot(root.to_path_buf()))?;
        if !canonical.is_dir() {
            return Err(PathError::InvalidRoot(root.to_path_buf()));
        }
        Ok(Self { root: canonical })
    }

    /// The canonical root path
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Resolve `path` to an absolute path and reject it if it escapes the root
    ///
    /// The path does not need to exist. Existing prefixes are canonicalized so
    /// symlinks pointing outside the root are caught; the non-existing tail is
    /// normalized lexically.
    pub fn resolve(&self, path: impl AsRef<Path>) -> Result<PathBuf, PathError> {
        let path = path.as_ref();
        if !path.is_absolute() {
            return Err(PathError::NotAbsolute(
                path.to_path_buf(),
                self.root.join(path),
            ));
        }

        let resolved = canonicalize_lenient(path).map_err(|source| PathError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        if !resolved.starts_with(&self.root) {
            return Err(PathError::OutsideRoot {
                path: path.to_path_buf(),
                root: self.root.clone(),
            });
        }
        Ok(resolved)
    }

    /// Resolve a path that must be an existing directory inside the root
    pub fn resolve_dir(&self, path: impl AsRef<Path>) -> Result<PathBuf, PathError> {
        let resolved = self.resolve(path.as_ref())?;
        if !resolved.exists() {
            return Err(PathError::MissingDirectory(path.as_ref().to_path_buf()));
        }
        if !resolved.is_dir() {
            return Err(PathError::NotADirectory(path.as_ref().to_path_buf()));
        }
        Ok(resolved)
    }

    /// Join a relative path onto the root (absolute paths pass through)
    pub fn normalize(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root.join(p)
        }
    }
}

/// Canonicalize the longest existing prefix of `path` and append the rest
fn canonicalize_lenient(path: &Path) -> io::Result<PathBuf> {
    let normalized = normalize_lexically(path);
    let mut existing = normalized.clone();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();

    while !existing.exists() {
        match existing.file_name() {
            Some(name) => {
                tail.push(name.to_os_string());
                existing.pop();
            }
            None => break,
        }
    }

    let mut resolved = existing.canonicalize()?;
    for part in tail.into_iter().rev() {
        resolved.push(part);
    }
    Ok(resolved)
}

/// Remove `.` and `..` components without touching the filesystem
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = WorkspaceRoot::new(dir.path()).unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let resolved = root.resolve_dir(dir.path().join("sub")).unwrap();
        assert!(resolved.starts_with(root.path()));
    }

    #[test]
    fn test_parent_escape_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let root = WorkspaceRoot::new(dir.path()).unwrap();

        let escape = dir.path().join("..").join("..");
        let err = root.resolve(&escape).unwrap_err();
        assert!(matches!(err, PathError::OutsideRoot { .. }));
    }

    #[test]
    fn test_sibling_with_common_prefix_rejected() {
        let parent = tempfile::tempdir().unwrap();
        let root_dir = parent.path().join("work");
        let sibling = parent.path().join("workshop");
        std::fs::create_dir(&root_dir).unwrap();
        std::fs::create_dir(&sibling).unwrap();

        let root = WorkspaceRoot::new(&root_dir).unwrap();
        assert!(matches!(
            root.resolve_dir(&sibling),
            Err(PathError::OutsideRoot { .. })
        ));
    }

    #[test]
    fn test_relative_path_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let root = WorkspaceRoot::new(dir.path()).unwrap();
        assert!(matches!(
            root.resolve("relative/path"),
            Err(PathError::NotAbsolute(..))
        ));
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = WorkspaceRoot::new(dir.path()).unwrap();
        assert!(matches!(
            root.resolve_dir(dir.path().join("nope")),
            Err(PathError::MissingDirectory(_))
        ));
    }

    #[test]
    fn test_file_is_not_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = WorkspaceRoot::new(dir.path()).unwrap();
        let file = dir.path().join("f.txt");
        std::fs::write(&file, "x").unwrap();
        assert!(matches!(
            root.resolve_dir(&file),
            Err(PathError::NotADirectory(_))
        ));
    }
}
