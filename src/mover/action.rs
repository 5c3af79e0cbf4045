use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The data movement an action requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Archive,
    Restore,
    Remove,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ActionKind::Archive => "archive",
            ActionKind::Restore => "restore",
            ActionKind::Remove => "remove",
        })
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "archive" => Ok(ActionKind::Archive),
            "restore" => Ok(ActionKind::Restore),
            "remove" => Ok(ActionKind::Remove),
            other => Err(format!("unknown action kind '{other}'")),
        }
    }
}

/// What the mover reads from and writes back to a coordinator action.
///
/// The mover only touches the result setters, and only once the operation has
/// succeeded.
pub trait Action {
    fn id(&self) -> u64;
    /// Path the coordinator exposes the file under, usually `.lustre/fid/<fid>`.
    fn primary_path(&self) -> &Path;
    /// Identity recorded by an earlier archive; empty if none.
    fn identity(&self) -> &str;
    /// Where Restore writes the data.
    fn write_path(&self) -> &Path;

    fn set_identity(&mut self, identity: String);
    fn set_url(&mut self, url: String);
    fn set_actual_length(&mut self, length: u64);
}

/// A self-contained action, for tools and tests driving the mover directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoverAction {
    pub id: u64,
    pub kind: ActionKind,
    pub primary_path: PathBuf,
    #[serde(default)]
    pub identity: String,
    #[serde(default)]
    pub write_path: PathBuf,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub actual_length: Option<u64>,
}

impl MoverAction {
    pub fn new(id: u64, kind: ActionKind, primary_path: impl Into<PathBuf>) -> Self {
        MoverAction {
            id,
            kind,
            primary_path: primary_path.into(),
            identity: String::new(),
            write_path: PathBuf::new(),
            url: None,
            actual_length: None,
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    pub fn with_write_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.write_path = path.into();
        self
    }
}

impl Action for MoverAction {
    fn id(&self) -> u64 {
        self.id
    }

    fn primary_path(&self) -> &Path {
        &self.primary_path
    }

    fn identity(&self) -> &str {
        &self.identity
    }

    fn write_path(&self) -> &Path {
        &self.write_path
    }

    fn set_identity(&mut self, identity: String) {
        self.identity = identity;
    }

    fn set_url(&mut self, url: String) {
        self.url = Some(url);
    }

    fn set_actual_length(&mut self, length: u64) {
        self.actual_length = Some(length);
    }
}
