//! Source directory handles.

use serde::Serialize;
use std::path::{Component, Path, PathBuf};

use crate::{Error, Result};

/// A readable directory on the host.
///
/// Handles are always canonical, and sub-directories obtained through
/// [`SourceDir::directory`] never escape the directory they came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceDir {
    path: PathBuf,
}

impl SourceDir {
    /// Open a directory, failing if it does not exist or cannot be listed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let unavailable = |source| Error::SourceUnavailable {
            path: path.to_path_buf(),
            source,
        };

        let canonical = path.canonicalize().map_err(unavailable)?;
        if !canonical.is_dir() {
            return Err(unavailable(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                "not a directory",
            )));
        }
        std::fs::read_dir(&canonical).map_err(unavailable)?;

        Ok(Self { path: canonical })
    }

    /// A sub-directory of this tree.
    pub fn directory(&self, relative: impl AsRef<Path>) -> Result<Self> {
        let relative = relative.as_ref();
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(Error::InvalidInput(format!(
                "'{}' is not a sub-directory of {}",
                relative.display(),
                self.path.display()
            )));
        }

        let child = Self::open(self.path.join(relative))?;
        // Symlinks can still point outside the tree.
        if !child.path.starts_with(&self.path) {
            return Err(Error::InvalidInput(format!(
                "'{}' resolves outside of {}",
                relative.display(),
                self.path.display()
            )));
        }
        Ok(child)
    }

    /// Whether a file or directory exists at `relative`.
    pub fn contains(&self, relative: impl AsRef<Path>) -> bool {
        self.path.join(relative).exists()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
