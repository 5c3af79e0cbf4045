//! Namespace directory reconstruction for imported keys.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use crate::fsx;

const DIR_MODE: u32 = 0o777;

/// Creates the directories imported objects live in.
///
/// Known directories are cached for the lifetime of one import run, so each
/// distinct directory costs one `mkdir -p`. The cache only grows. Concurrent
/// calls for the same or overlapping paths all succeed.
#[derive(Debug)]
pub struct DirectoryReconciler {
    root: PathBuf,
    known: Mutex<HashSet<PathBuf>>,
}

impl DirectoryReconciler {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), known: Mutex::new(HashSet::new()) }
    }

    /// Ensure `dir`, relative to the namespace root, exists.
    pub fn ensure(&self, dir: &Path) -> io::Result<()> {
        if dir.as_os_str().is_empty() || dir == Path::new(".") {
            return Ok(());
        }
        if self.is_known(dir) {
            return Ok(());
        }

        fsx::create_dir_all_mode(&self.root.join(dir), DIR_MODE)?;
        debug!(dir = %dir.display(), "directory ensured");

        let mut known = self.known.lock().unwrap_or_else(|p| p.into_inner());
        for ancestor in dir.ancestors().filter(|a| !a.as_os_str().is_empty()) {
            if !known.insert(ancestor.to_path_buf()) {
                break;
            }
        }
        Ok(())
    }

    pub fn is_known(&self, dir: &Path) -> bool {
        self.known.lock().unwrap_or_else(|p| p.into_inner()).contains(dir)
    }

    pub fn known_count(&self) -> usize {
        self.known.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}
