//! Local HSM collaborators: the import primitive that registers a file as
//! archived, and the store that records each file's identity.

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use serde::Serialize;
use tracing::debug;

use crate::common::ImportAttributes;
use crate::fid::Fid;
use crate::fsx;

/// Archive backend number the bulk importer registers files under.
pub const DEFAULT_ARCHIVE_ID: u32 = 1;

/// Extended attribute the HSM agent reads a file's identity from.
pub const DEFAULT_IDENTITY_XATTR: &str = "trusted.lhsm_uuid";

/// Data layout for an imported file. Zero fields mean "filesystem default".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataLayout {
    pub stripe_count: u32,
    pub stripe_size: u64,
    pub pool: Option<String>,
}

/// The attribute record handed to the import primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportFileInfo {
    pub name: String,
    pub mode: u32,
    pub size: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub uid: u32,
    pub gid: u32,
}

impl ImportFileInfo {
    pub fn new(name: impl Into<String>, attrs: &ImportAttributes) -> Self {
        ImportFileInfo {
            name: name.into(),
            mode: attrs.mode,
            size: attrs.size,
            atime: attrs.atime,
            mtime: attrs.mtime,
            uid: attrs.uid,
            gid: attrs.gid,
        }
    }
}

/// Registers a file whose content lives only in the archive.
pub trait HsmImporter: Send + Sync {
    fn import(&self, path: &Path, archive_id: u32, info: &ImportFileInfo, layout: &DataLayout) -> io::Result<Fid>;
}

/// Persists the identity locator of an imported file.
pub trait IdentityStore: Send + Sync {
    fn set(&self, path: &Path, locator: &[u8]) -> io::Result<()>;
}

/// Creates a sized, empty placeholder carrying the imported attributes.
///
/// This is the staging-area stand-in for a real HSM import: the file has the
/// right length, mode, times and (when running privileged) ownership, but no
/// data. The returned FID encodes the device and inode numbers.
#[derive(Debug, Clone, Default)]
pub struct PlaceholderImporter {
    /// Apply `uid`/`gid`; requires privileges, so off by default.
    pub chown: bool,
}

impl HsmImporter for PlaceholderImporter {
    fn import(&self, path: &Path, archive_id: u32, info: &ImportFileInfo, _layout: &DataLayout) -> io::Result<Fid> {
        let file = OpenOptions::new().write(true).create_new(true).open(path)?;
        file.set_len(info.size)?;
        fsx::set_times(&file, info.atime, info.mtime)?;
        fsx::set_unix_permissions(path, info.mode)?;
        if self.chown {
            fsx::set_owner(path, info.uid, info.gid)?;
        }

        let meta = file.metadata()?;
        let fid = Fid { seq: meta.dev(), oid: meta.ino() as u32, ver: (meta.ino() >> 32) as u32 };
        debug!(path = %path.display(), archive_id, size = info.size, %fid, "placeholder imported");
        Ok(fid)
    }
}

/// Writes the identity into an extended attribute of the file.
#[derive(Debug, Clone)]
pub struct XattrIdentityStore {
    name: CString,
}

impl XattrIdentityStore {
    pub fn new(attribute: &str) -> io::Result<Self> {
        let name = CString::new(attribute).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        Ok(Self { name })
    }
}

impl Default for XattrIdentityStore {
    fn default() -> Self {
        Self { name: CString::new(DEFAULT_IDENTITY_XATTR).unwrap_or_default() }
    }
}

impl IdentityStore for XattrIdentityStore {
    #[cfg(target_os = "linux")]
    fn set(&self, path: &Path, locator: &[u8]) -> io::Result<()> {
        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        // SAFETY: both strings are NUL-terminated and outlive the call; the
        // value pointer and length describe `locator`.
        let rc = unsafe {
            libc::setxattr(
                c_path.as_ptr(),
                self.name.as_ptr(),
                locator.as_ptr() as *const libc::c_void,
                locator.len(),
                0,
            )
        };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn set(&self, _path: &Path, _locator: &[u8]) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "extended attributes require Linux"))
    }
}

#[derive(Serialize)]
struct JournalEntry<'a> {
    path: &'a Path,
    locator: &'a str,
}

/// Appends one JSON object per identity to a journal file.
#[derive(Debug)]
pub struct JournalIdentityStore {
    path: PathBuf,
    file: Mutex<File>,
}

impl JournalIdentityStore {
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file: Mutex::new(file) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IdentityStore for JournalIdentityStore {
    fn set(&self, path: &Path, locator: &[u8]) -> io::Result<()> {
        let locator = String::from_utf8_lossy(locator);
        let mut line = serde_json::to_vec(&JournalEntry { path, locator: &locator })?;
        line.push(b'\n');
        let mut file = self.file.lock().unwrap_or_else(|p| p.into_inner());
        file.write_all(&line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::time::{Duration, UNIX_EPOCH};
    use tempfile::tempdir;

    fn info(name: &str) -> ImportFileInfo {
        let t = UNIX_EPOCH + Duration::from_secs(1_400_000_000);
        ImportFileInfo { name: name.into(), mode: 0o640, size: 4096, atime: t, mtime: t, uid: 1000, gid: 1000 }
    }

    #[test]
    fn test_placeholder_carries_attributes() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("f.dat");
        PlaceholderImporter::default().import(&path, 1, &info("f.dat"), &DataLayout::default())?;

        let meta = std::fs::metadata(&path)?;
        assert_eq!(meta.len(), 4096);
        assert_eq!(meta.permissions().mode() & 0o7777, 0o640);
        assert_eq!(meta.modified()?, UNIX_EPOCH + Duration::from_secs(1_400_000_000));
        Ok(())
    }

    #[test]
    fn test_placeholder_refuses_existing_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("f.dat");
        std::fs::write(&path, b"existing")?;
        let err = PlaceholderImporter::default().import(&path, 1, &info("f.dat"), &DataLayout::default()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(std::fs::read(&path)?, b"existing");
        Ok(())
    }

    #[test]
    fn test_journal_appends_lines() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let journal = JournalIdentityStore::open(dir.path().join("ids.jsonl"))?;
        journal.set(Path::new("a/b.txt"), b"az://box/a/b.txt")?;
        journal.set(Path::new("c.txt"), b"az://box/c.txt")?;

        let text = std::fs::read_to_string(journal.path())?;
        let lines = text
            .lines()
            .map(serde_json::from_str::<serde_json::Value>)
            .collect::<Result<Vec<_>, _>>()?;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["path"], "a/b.txt");
        assert_eq!(lines[1]["locator"], "az://box/c.txt");
        Ok(())
    }

    #[test]
    fn test_xattr_name_with_nul_is_rejected() {
        assert!(XattrIdentityStore::new("bad\0name").is_err());
    }
}
