//! Thin filesystem helpers for the attribute plumbing the importer and the
//! mover need on top of `std::fs`: permission bits, ownership, timestamps and
//! mode-aware recursive directory creation.
//!
//! The HSM side of this crate only makes sense on a POSIX filesystem, so the
//! ownership helpers are Unix-only.

use std::fs::{self, File, FileTimes};
use std::io;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::Path;
use std::time::SystemTime;

/// Set POSIX permission bits.
pub fn set_unix_permissions(path: &Path, mode: u32) -> io::Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

/// Change owner and group. Usually requires privileges.
pub fn set_owner(path: &Path, uid: u32, gid: u32) -> io::Result<()> {
    std::os::unix::fs::chown(path, Some(uid), Some(gid))
}

/// Set access and modification times on an open file.
pub fn set_times(file: &File, atime: SystemTime, mtime: SystemTime) -> io::Result<()> {
    file.set_times(FileTimes::new().set_accessed(atime).set_modified(mtime))
}

/// `mkdir -p` with an explicit mode (subject to the process umask).
///
/// Succeeds if the directory already exists, including when another thread
/// or process created it between our check and our `mkdir`.
pub fn create_dir_all_mode(path: &Path, mode: u32) -> io::Result<()> {
    match fs::DirBuilder::new().recursive(true).mode(mode).create(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        Err(e) => Err(e),
    }
}
