//! Per-invocation scratch directories.
//!
//! Every simulator run gets its own directory for inputs and outputs. The
//! guard removes it on drop unless the run is archived, in which case the
//! directory is published to its final location with an atomic rename.

use std::path::{Path, PathBuf};

use crate::error::{Result, SimError};

/// RAII guard over a run's scratch directory. Deleted on drop on every exit
/// path (including panics) unless [`persist`](ScratchDir::persist) or
/// [`keep`](ScratchDir::keep) was called.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
    released: bool,
}

impl ScratchDir {
    /// Create `<root>/<run_id>.tmp`, replacing any half-written leftover
    /// from a previous crash (idempotent by run id).
    pub fn create(root: &Path, run_id: &str) -> Result<Self> {
        let path = root.join(format!("{run_id}.tmp"));
        if path.exists() {
            std::fs::remove_dir_all(&path)?;
        }
        std::fs::create_dir_all(&path)?;
        Ok(Self {
            path,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Publish the scratch directory to `dest` with rename-after-write.
    /// An existing destination is swapped out and removed afterwards, so
    /// readers never observe a partially written archive.
    pub fn persist(mut self, dest: &Path) -> Result<PathBuf> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let displaced = dest.with_extension("old");
        if displaced.exists() {
            std::fs::remove_dir_all(&displaced)?;
        }
        if dest.exists() {
            std::fs::rename(dest, &displaced)?;
        }
        std::fs::rename(&self.path, dest)?;
        if displaced.exists() {
            std::fs::remove_dir_all(&displaced)?;
        }
        self.released = true;
        Ok(dest.to_path_buf())
    }

    /// Publish to `dest` only if no archive exists there yet.
    pub fn persist_strict(self, dest: &Path) -> Result<PathBuf> {
        if dest.exists() {
            return Err(SimError::Input(format!(
                "run archive already exists: {}",
                dest.display()
            )));
        }
        self.persist(dest)
    }

    /// Leave the directory in place without publishing it.
    pub fn keep(mut self) -> PathBuf {
        self.released = true;
        self.path.clone()
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if !self.released {
            if let Err(err) = std::fs::remove_dir_all(&self.path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(
                        path = %self.path.display(),
                        "Failed to remove scratch directory: {err}"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let path = {
            let scratch = ScratchDir::create(root.path(), "window-1").unwrap();
            std::fs::write(scratch.path().join("x"), b"y").unwrap();
            scratch.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn persist_moves_atomically() {
        let root = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::create(root.path(), "window-2").unwrap();
        std::fs::write(scratch.path().join("out.txt"), b"data").unwrap();

        let dest = root.path().join("window-2");
        let published = scratch.persist(&dest).unwrap();
        assert_eq!(published, dest);
        assert_eq!(std::fs::read(dest.join("out.txt")).unwrap(), b"data");
        assert!(!root.path().join("window-2.tmp").exists());
    }

    #[test]
    fn persist_overwrites_previous_archive() {
        let root = tempfile::tempdir().unwrap();
        let dest = root.path().join("window-3");
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(dest.join("stale.txt"), b"old").unwrap();

        let scratch = ScratchDir::create(root.path(), "window-3").unwrap();
        std::fs::write(scratch.path().join("fresh.txt"), b"new").unwrap();
        scratch.persist(&dest).unwrap();

        assert!(dest.join("fresh.txt").exists());
        assert!(!dest.join("stale.txt").exists());
    }

    #[test]
    fn persist_strict_rejects_existing() {
        let root = tempfile::tempdir().unwrap();
        let dest = root.path().join("window-4");
        std::fs::create_dir_all(&dest).unwrap();

        let scratch = ScratchDir::create(root.path(), "window-4").unwrap();
        assert!(scratch.persist_strict(&dest).is_err());
    }

    #[test]
    fn create_replaces_leftover_scratch() {
        let root = tempfile::tempdir().unwrap();
        let leftover = root.path().join("window-5.tmp");
        std::fs::create_dir_all(&leftover).unwrap();
        std::fs::write(leftover.join("partial"), b"x").unwrap();

        let scratch = ScratchDir::create(root.path(), "window-5").unwrap();
        assert!(!scratch.path().join("partial").exists());
    }
}
