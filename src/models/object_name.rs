//! Mapping from local paths under the watch root to remote object names.
//!
//! The naming convention is `<namespace>/<posix relative path>`; an empty
//! namespace emits no leading segment. Objects already published under this
//! convention must keep resolving, so the format is fixed.

use std::{
    fmt, io,
    path::{Component, Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NamingError {
    #[error("`{}` is not located under the watch root `{}`", path.display(), root.display())]
    OutsideWatchRoot { path: PathBuf, root: PathBuf },
    #[error("`{}` contains a segment that is not valid UTF-8", .0.display())]
    NonUtf8Path(PathBuf),
}

/// Remote object name, always `/`-separated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectName(String);

impl ObjectName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical absolute path of the watched directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRoot(PathBuf);

impl WatchRoot {
    /// Canonicalize `path` and require it to be an existing directory.
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let canonical = std::fs::canonicalize(path.as_ref())?;
        if !canonical.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("`{}` is not a directory", canonical.display()),
            ));
        }
        Ok(Self(canonical))
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Lexical path of `path` below the root.
    ///
    /// Only plain segments are accepted, so `root/../x` is outside. The root
    /// itself has no object name and is rejected as well.
    pub fn relative<'a>(&self, path: &'a Path) -> Result<&'a Path, NamingError> {
        let outside = || NamingError::OutsideWatchRoot {
            path: path.to_path_buf(),
            root: self.0.clone(),
        };
        let relative = path.strip_prefix(&self.0).map_err(|_| outside())?;
        if relative.as_os_str().is_empty()
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(outside());
        }
        Ok(relative)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.relative(path).is_ok()
    }
}

/// Optional prefix shared by every object name of one watch root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Namespace(String);

impl Namespace {
    /// Surrounding slashes are dropped so `"/site/"` and `"site"` agree.
    pub fn new(raw: &str) -> Self {
        Self(raw.trim_matches('/').to_string())
    }

    /// Prefix an already `/`-separated key.
    pub fn apply(&self, key: &str) -> ObjectName {
        let key = key.trim_start_matches('/');
        if self.0.is_empty() {
            ObjectName::new(key)
        } else {
            ObjectName::new(format!("{}/{}", self.0, key))
        }
    }

    /// Object name for a path relative to the watch root.
    pub fn object_name(&self, relative: &Path) -> Result<ObjectName, NamingError> {
        let mut segments = Vec::new();
        for component in relative.components() {
            if let Component::Normal(segment) = component {
                let segment = segment
                    .to_str()
                    .ok_or_else(|| NamingError::NonUtf8Path(relative.to_path_buf()))?;
                segments.push(segment);
            }
        }
        Ok(self.apply(&segments.join("/")))
    }
}
