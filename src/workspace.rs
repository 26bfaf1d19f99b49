//! Per-execution workspace directories

use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::{HarnessError, HarnessResult};

/// Exclusively-owned temporary directory for one source unit execution.
///
/// Every file written while compiling or running lives under it. The directory
/// is removed by `release`, or by `Drop` on any other exit path (early return,
/// error, panic unwinding).
#[derive(Debug)]
pub struct WorkspaceHandle {
    dir: TempDir,
}

impl WorkspaceHandle {
    /// Create a fresh directory under `root` (or the system temp directory)
    pub fn acquire(root: Option<&Path>, identifier: &str) -> HarnessResult<Self> {
        let prefix = format!("run-{}-", sanitize(identifier));
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);

        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root).map_err(|e| {
                    HarnessError::filesystem(format!("creating {}", root.display()), e)
                })?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
        .map_err(|e| HarnessError::filesystem("creating workspace", e))?;

        debug!("Acquired workspace {:?}", dir.path());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write a file into the workspace and return its absolute path
    pub fn write_file(&self, file_name: &str, content: &str) -> HarnessResult<PathBuf> {
        let path = self.dir.path().join(file_name);
        std::fs::write(&path, content)
            .map_err(|e| HarnessError::filesystem(format!("writing {}", path.display()), e))?;
        Ok(path)
    }

    /// Remove the directory now, logging instead of failing if removal goes wrong
    pub fn release(self) {
        let path = self.dir.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => debug!("Released workspace {:?}", path),
            Err(e) => warn!("Failed to remove workspace {:?}: {}", path, e),
        }
    }
}

/// Keep identifiers from model output out of path syntax
fn sanitize(identifier: &str) -> String {
    let cleaned: String = identifier
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(32)
        .collect();
    if cleaned.is_empty() {
        "unit".to_string()
    } else {
        cleaned
    }
}
