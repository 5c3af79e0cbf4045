//! File identifiers and FID → pathname resolution.
//!
//! The coordinator addresses files by FID through the `.lustre/fid/` virtual
//! directory. Turning a FID back into a namespace path is done by the
//! filesystem itself, so it sits behind [`FidResolver`].

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

/// Directory under the mount root through which files are opened by FID.
pub const FID_NAMESPACE: &str = ".lustre/fid/";

#[derive(Error, Debug, PartialEq, Eq)]
#[error("invalid FID '{input}': {reason}")]
pub struct FidError {
    pub input: String,
    pub reason: &'static str,
}

/// A filesystem object identifier: sequence, object id and version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fid {
    pub seq: u64,
    pub oid: u32,
    pub ver: u32,
}

impl Fid {
    /// Parse `[0x200000400:0x1:0x0]`; the brackets and `0x` prefixes are optional.
    pub fn parse(input: &str) -> Result<Self, FidError> {
        let err = |reason| FidError { input: input.to_string(), reason };

        let s = input.trim();
        let s = s.strip_prefix('[').unwrap_or(s);
        let s = s.strip_suffix(']').unwrap_or(s);

        let mut parts = s.split(':');
        let (Some(seq), Some(oid), Some(ver), None) = (parts.next(), parts.next(), parts.next(), parts.next()) else {
            return Err(err("expected three ':'-separated fields"));
        };

        let seq = u64::from_str_radix(hex_digits(seq), 16).map_err(|_| err("bad sequence"))?;
        let oid = u32::from_str_radix(hex_digits(oid), 16).map_err(|_| err("bad object id"))?;
        let ver = u32::from_str_radix(hex_digits(ver), 16).map_err(|_| err("bad version"))?;
        Ok(Fid { seq, oid, ver })
    }

    /// Parse the FID out of a primary path such as `.lustre/fid/[0x1:0x2:0x0]`.
    pub fn from_primary_path(path: &Path) -> Result<Self, FidError> {
        let text = path.to_string_lossy();
        let text = text.trim_start_matches('/');
        let raw = text.strip_prefix(FID_NAMESPACE).unwrap_or(text);
        Fid::parse(raw)
    }

    /// The primary path under which the coordinator exposes this FID.
    pub fn primary_path(&self) -> PathBuf {
        PathBuf::from(format!("{FID_NAMESPACE}{self}"))
    }
}

fn hex_digits(field: &str) -> &str {
    let field = field.trim();
    field.strip_prefix("0x").or_else(|| field.strip_prefix("0X")).unwrap_or(field)
}

impl fmt::Display for Fid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}:{:#x}:{:#x}]", self.seq, self.oid, self.ver)
    }
}

impl FromStr for Fid {
    type Err = FidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Fid::parse(s)
    }
}

/// Maps a FID to every pathname that links to it, relative to `mount_root`.
pub trait FidResolver: Send + Sync {
    fn pathnames(&self, mount_root: &Path, fid: &Fid) -> io::Result<Vec<PathBuf>>;
}

/// A resolver backed by an explicit table, for tooling and tests.
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    paths: HashMap<Fid, Vec<PathBuf>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, fid: Fid, path: impl Into<PathBuf>) -> &mut Self {
        self.paths.entry(fid).or_default().push(path.into());
        self
    }
}

impl FidResolver for StaticResolver {
    fn pathnames(&self, _mount_root: &Path, fid: &Fid) -> io::Result<Vec<PathBuf>> {
        Ok(self.paths.get(fid).cloned().unwrap_or_default())
    }
}
