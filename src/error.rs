//! Error types shared across the importer, the mover and the object stores.

use std::path::PathBuf;

use thiserror::Error;

use crate::importer::ImportReport;

/// Failures reported by an [`ObjectStore`](crate::store::ObjectStore).
#[derive(Error, Debug)]
pub enum StoreError {
    /// The addressed object (or container) does not exist.
    #[error("remote object not found: {location}")]
    NotFound { location: String },

    /// A block or range failed its integrity check.
    #[error("integrity check failed for {location}: {reason}")]
    Integrity { location: String, reason: String },

    /// The stored object could not be authenticated with the account key.
    #[error("authentication failed for {location}")]
    Auth { location: String },

    /// An I/O error on the local side of a transfer or in a directory-backed store.
    #[error("I/O error on '{location}': {source}")]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },

    /// A serialization error while reading or writing store metadata.
    #[error("metadata error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// Anything that does not fit the variants above.
    #[error("{0}")]
    Other(String),
}

impl StoreError {
    pub(crate) fn io(location: impl Into<String>, source: std::io::Error) -> Self {
        StoreError::Io { location: location.into(), source }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Errors produced while handling a single HSM action.
///
/// Every variant carries the action id plus enough of the local path or remote
/// location to diagnose the failure from a log line alone.
#[derive(Error, Debug)]
pub enum MoverError {
    /// Missing or malformed identity or primary path.
    #[error("action {action}: {reason}")]
    Validation { action: u64, reason: String },

    /// The file identifier could not be turned into a pathname.
    #[error("action {action}: cannot resolve '{path}': {reason}")]
    Resolution { action: u64, path: String, reason: String },

    /// Upload, download or delete failed.
    #[error("action {action}: {operation} of {location} failed: {source}")]
    Transfer {
        action: u64,
        operation: &'static str,
        location: String,
        #[source]
        source: StoreError,
    },

    /// The remote object to restore does not exist.
    #[error("action {action}: remote object {location} not found")]
    NotFound { action: u64, location: String },
}

/// Errors produced by the bulk importer, either for a single object or for the run.
#[derive(Error, Debug)]
pub enum ImportError {
    /// Enumerating the remote container failed; the run stops. `partial`
    /// holds what the objects queued before the failure produced.
    #[error(
        "listing container '{container}' failed after {} objects ({} imported, {} failed): {source}",
        partial.listed,
        partial.imported,
        partial.failures.len()
    )]
    Listing {
        container: String,
        #[source]
        source: StoreError,
        partial: Box<ImportReport>,
    },

    /// The key would place the file outside the namespace root.
    #[error("refusing to import unsafe key '{key}'")]
    UnsafeKey { key: String },

    /// The parent directory of an object could not be created.
    #[error("creating directory '{}' failed: {source}", path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The HSM import primitive rejected the file.
    #[error("HSM import of '{}' failed: {source}", path.display())]
    Register {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The identity mapping could not be persisted.
    #[error("storing identity for '{}' failed: {source}", path.display())]
    Identity {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}
