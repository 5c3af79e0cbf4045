//! Common types shared by the importer and the mover.

use std::collections::BTreeMap;
use std::time::SystemTime;

use chrono::{DateTime, FixedOffset, Local};
use serde::{Deserialize, Serialize};

/// User-defined object metadata as carried by the remote store.
pub type Metadata = BTreeMap<String, String>;

/// Textual timestamp format used for object metadata, e.g. `2018-03-01 14:02:11 +0000`.
pub const MODTIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

/// Metadata keys read by the bulk importer.
pub mod import_keys {
    pub const UID: &str = "uid";
    pub const GID: &str = "gid";
    pub const PERM: &str = "perm";
    pub const MODTIME: &str = "modtime";
}

/// Metadata keys written by Archive. These differ from [`import_keys`] on
/// purpose; objects archived by the mover are not re-imported with their
/// archived attributes.
pub mod archive_keys {
    pub const PERMISSIONS: &str = "Permissions";
    pub const MOD_TIME: &str = "ModTime";
    pub const OWNER: &str = "Owner";
    pub const GROUP: &str = "Group";
}

pub const DEFAULT_UID: u32 = 1000;
pub const DEFAULT_GID: u32 = 1000;
pub const DEFAULT_MODE: u32 = 0o644;

/// An object as returned by a container listing.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub key: String,
    pub size: u64,
    #[serde(default)]
    pub metadata: Metadata,
}

/// File attributes synthesized for an imported object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportAttributes {
    pub uid: u32,
    pub gid: u32,
    /// Permission bits only.
    pub mode: u32,
    pub size: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
}

impl ImportAttributes {
    /// Derive attributes from listing metadata.
    ///
    /// Each field falls back to its default independently when it is absent or
    /// does not parse; a bad field never rejects the object.
    pub fn from_remote(object: &RemoteObject) -> Self {
        Self::from_metadata(&object.metadata, object.size, SystemTime::now())
    }

    /// Same as [`from_remote`](Self::from_remote) with an explicit fallback time.
    pub fn from_metadata(metadata: &Metadata, size: u64, now: SystemTime) -> Self {
        let uid = metadata
            .get(import_keys::UID)
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(DEFAULT_UID);
        let gid = metadata
            .get(import_keys::GID)
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(DEFAULT_GID);
        let mode = metadata
            .get(import_keys::PERM)
            .and_then(|v| parse_octal_mode(v))
            .unwrap_or(DEFAULT_MODE);
        let mtime = metadata
            .get(import_keys::MODTIME)
            .and_then(|v| parse_modtime(v))
            .map(SystemTime::from)
            .unwrap_or(now);

        ImportAttributes { uid, gid, mode, size, atime: mtime, mtime }
    }
}

/// Parse an octal permission string such as `755` or `0644`.
pub fn parse_octal_mode(value: &str) -> Option<u32> {
    u32::from_str_radix(value.trim(), 8).ok()
}

/// Parse a `MODTIME_FORMAT` timestamp.
pub fn parse_modtime(value: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_str(value.trim(), MODTIME_FORMAT).ok()
}

/// Format a timestamp the way Archive records it, in local time.
pub fn format_modtime(time: SystemTime) -> String {
    DateTime::<Local>::from(time).format(MODTIME_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    fn meta(pairs: &[(&str, &str)]) -> Metadata {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_defaults_when_metadata_absent() {
        let now = UNIX_EPOCH + Duration::from_secs(1_000);
        let attrs = ImportAttributes::from_metadata(&Metadata::new(), 42, now);
        assert_eq!(attrs.uid, 1000);
        assert_eq!(attrs.gid, 1000);
        assert_eq!(attrs.mode, 0o644);
        assert_eq!(attrs.size, 42);
        assert_eq!(attrs.mtime, now);
        assert_eq!(attrs.atime, now);
    }

    #[test]
    fn test_valid_fields_parse_exactly() {
        let m = meta(&[
            ("uid", "2000"),
            ("gid", "3000"),
            ("perm", "755"),
            ("modtime", "2018-03-01 14:02:11 +0000"),
        ]);
        let attrs = ImportAttributes::from_metadata(&m, 0, UNIX_EPOCH);
        assert_eq!(attrs.uid, 2000);
        assert_eq!(attrs.gid, 3000);
        assert_eq!(attrs.mode, 0o755);
        assert_eq!(attrs.mtime, UNIX_EPOCH + Duration::from_secs(1_519_912_931));
    }

    #[test]
    fn test_bad_field_falls_back_alone() {
        let now = UNIX_EPOCH + Duration::from_secs(7);
        let m = meta(&[
            ("uid", "not-a-number"),
            ("gid", "55"),
            ("perm", "999"),
            ("modtime", "yesterday"),
        ]);
        let attrs = ImportAttributes::from_metadata(&m, 1, now);
        assert_eq!(attrs.uid, 1000);
        assert_eq!(attrs.gid, 55);
        assert_eq!(attrs.mode, 0o644);
        assert_eq!(attrs.mtime, now);
    }

    #[test]
    fn test_timezone_offset_is_honoured() {
        let parsed = parse_modtime("2018-03-01 16:02:11 +0200").unwrap();
        assert_eq!(parsed.timestamp(), 1_519_912_931);
    }

    #[test]
    fn test_modtime_format_round_trips() {
        let t = UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        let text = format_modtime(t);
        let back = parse_modtime(&text).unwrap();
        assert_eq!(SystemTime::from(back), t);
    }
}
