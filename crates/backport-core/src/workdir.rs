//! Disposable, exclusively-owned working directories.
//!
//! Layout: `<root>/repo` holds the clone; patch files go in `<root>` so they
//! never dirty the tree. The root is removed when the [`WorkDir`] is dropped
//! or closed, on every exit path.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

/// A working directory owned by exactly one job.
#[derive(Debug)]
pub struct WorkDir {
    root: TempDir,
    repo: PathBuf,
}

impl WorkDir {
    /// Create a fresh directory under `parent` (system temp dir when `None`).
    pub fn create(parent: Option<&Path>, label: &str) -> io::Result<Self> {
        let prefix = format!("backport-{label}-");
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);

        let root = match parent {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };
        let repo = root.path().join("repo");
        debug!(root = %root.path().display(), "working directory created");

        Ok(Self { root, repo })
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Where the clone lives.
    pub fn repo_path(&self) -> &Path {
        &self.repo
    }

    /// Scratch location for the patch at `index`, outside the clone.
    pub fn patch_path(&self, index: usize) -> PathBuf {
        self.root.path().join(format!("{index:04}.patch"))
    }

    /// Remove the directory now, reporting failures.
    pub fn close(self) -> io::Result<()> {
        let path = self.root.path().to_path_buf();
        match self.root.close() {
            Ok(()) => {
                debug!(root = %path.display(), "working directory removed");
                Ok(())
            }
            Err(e) => {
                warn!(root = %path.display(), error = %e, "failed to remove working directory");
                Err(e)
            }
        }
    }
}
