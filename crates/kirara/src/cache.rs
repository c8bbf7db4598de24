use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::KiraraResult;

/// Temporary directory holding the segments of one playlist download.
///
/// The directory is removed by [WorkDir::close] or, on any other exit path, when the
/// value is dropped.
pub struct WorkDir {
    dir: TempDir,
}

impl WorkDir {
    /// Create a fresh `kirara_*` directory under `root`.
    pub fn create_in<P>(root: P) -> KiraraResult<Self>
    where
        P: AsRef<Path>,
    {
        let root = root.as_ref();
        if !root.exists() {
            std::fs::create_dir_all(root)?;
        }

        let dir = tempfile::Builder::new().prefix("kirara_").tempdir_in(root)?;
        log::debug!("Created working directory {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn init_segment_path(&self) -> PathBuf {
        self.dir.path().join("init.mp4")
    }

    /// Zero-padded so that a lexicographic listing is playback order.
    pub fn segment_path(&self, index: usize) -> PathBuf {
        self.dir.path().join(format!("segment_{index:05}"))
    }

    /// Remove the directory and everything in it. Failures are logged and ignored.
    pub fn close(self) {
        let path = self.dir.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => log::debug!("Removed working directory {}", path.display()),
            Err(e) => log::warn!(
                "Failed to remove working directory {}: {e}",
                path.display()
            ),
        }
    }
}
