//! Runtime configuration.
//!
//! Settings come from three layers, later ones winning: the JSON file given
//! with `--config` (every field optional), the `STORAGE_ACCOUNT` and
//! `STORAGE_KEY` environment variables, and command-line flags.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::hsm::DEFAULT_ARCHIVE_ID;
use crate::importer::{ImportOptions, DEFAULT_CAPACITY};
use crate::store::{SharedKeyCredential, DEFAULT_PAGE_SIZE};
use crate::transfer::{TransferOptions, DEFAULT_BLOCK_SIZE};

pub const ENV_ACCOUNT: &str = "STORAGE_ACCOUNT";
pub const ENV_KEY: &str = "STORAGE_KEY";
pub const DEFAULT_MOUNT_ROOT: &str = "/mnt/lhsmd/agent";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Directory backing the object store.
    pub store_root: PathBuf,
    pub mover: MoverConfig,
    pub import: ImportConfig,
}

/// Settings for one mover instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MoverConfig {
    /// Display name; empty means `az-<archive_id>`.
    pub name: String,
    pub archive_id: u32,
    pub container: String,
    /// Key prefix for objects archived under a bare identity.
    pub prefix: String,
    pub credential: SharedKeyCredential,
    pub upload_block_size: u64,
    pub transfer_parallelism: usize,
    pub mount_root: PathBuf,
    /// Reapply archived permissions, mtime and ownership after a restore.
    pub restore_attributes: bool,
}

impl Default for MoverConfig {
    fn default() -> Self {
        MoverConfig {
            name: String::new(),
            archive_id: DEFAULT_ARCHIVE_ID,
            container: String::new(),
            prefix: String::new(),
            credential: SharedKeyCredential::default(),
            upload_block_size: DEFAULT_BLOCK_SIZE,
            transfer_parallelism: num_cpus::get(),
            mount_root: PathBuf::from(DEFAULT_MOUNT_ROOT),
            restore_attributes: false,
        }
    }
}

impl MoverConfig {
    pub fn transfer_options(&self) -> TransferOptions {
        TransferOptions { block_size: self.upload_block_size, parallelism: self.transfer_parallelism }
    }

    /// The container may be left empty when every identity is qualified.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.container.is_empty() {
            check_container(&self.container)?;
        }
        if self.upload_block_size == 0 {
            return Err(ConfigError::Invalid("upload_block_size must be positive".into()));
        }
        if self.transfer_parallelism == 0 {
            return Err(ConfigError::Invalid("transfer_parallelism must be positive".into()));
        }
        Ok(())
    }
}

/// Settings for a bulk import run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ImportConfig {
    pub container: String,
    /// Local namespace root objects are imported under.
    pub root: PathBuf,
    pub archive_id: u32,
    pub capacity: usize,
    pub page_size: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        ImportConfig {
            container: String::new(),
            root: PathBuf::from("."),
            archive_id: DEFAULT_ARCHIVE_ID,
            capacity: DEFAULT_CAPACITY,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ImportConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.container.is_empty() {
            return Err(ConfigError::Invalid("import container is not set".into()));
        }
        check_container(&self.container)?;
        if self.capacity == 0 {
            return Err(ConfigError::Invalid("capacity must be positive".into()));
        }
        if self.page_size == 0 {
            return Err(ConfigError::Invalid("page_size must be positive".into()));
        }
        Ok(())
    }

    pub fn options(&self) -> ImportOptions {
        ImportOptions {
            root: self.root.clone(),
            archive_id: self.archive_id,
            capacity: self.capacity,
            page_size: self.page_size,
        }
    }
}

impl Config {
    /// Read `path` if given, otherwise start from defaults, then apply the
    /// process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Config::default(),
        };
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let config = serde_json::from_str(&text).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Override the credential from `STORAGE_ACCOUNT` / `STORAGE_KEY`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(account) = lookup(ENV_ACCOUNT).filter(|v| !v.is_empty()) {
            self.mover.credential.account = account;
        }
        if let Some(key) = lookup(ENV_KEY).filter(|v| !v.is_empty()) {
            self.mover.credential.key = key;
        }
    }

    pub fn credential(&self) -> &SharedKeyCredential {
        &self.mover.credential
    }

    /// Checks shared by every command that opens the store.
    pub fn validate_store(&self) -> Result<(), ConfigError> {
        if self.store_root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("store root is not set".into()));
        }
        let credential = self.credential();
        if credential.account.is_empty() {
            return Err(ConfigError::Invalid(format!("storage account is not set (use {ENV_ACCOUNT})")));
        }
        if credential.key.is_empty() {
            return Err(ConfigError::Invalid(format!("storage key is not set (use {ENV_KEY})")));
        }
        Ok(())
    }
}

fn check_container(name: &str) -> Result<(), ConfigError> {
    if name.starts_with('.') || name.contains('/') {
        return Err(ConfigError::Invalid(format!("invalid container name '{name}'")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert_eq!(c.mover.upload_block_size, 4 * 1024 * 1024);
        assert_eq!(c.mover.transfer_parallelism, num_cpus::get());
        assert_eq!(c.mover.mount_root, PathBuf::from("/mnt/lhsmd/agent"));
        assert_eq!(c.mover.archive_id, 1);
        assert!(!c.mover.restore_attributes);
        assert_eq!(c.import.capacity, 256);
        assert_eq!(c.import.page_size, 5000);
    }

    #[test]
    fn test_partial_file_keeps_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("blobtier.json");
        fs::write(&path, r#"{"store_root": "/srv/store", "mover": {"container": "arch", "prefix": "fs1"}}"#)?;

        let c = Config::from_file(&path)?;
        assert_eq!(c.store_root, PathBuf::from("/srv/store"));
        assert_eq!(c.mover.container, "arch");
        assert_eq!(c.mover.prefix, "fs1");
        assert_eq!(c.mover.upload_block_size, DEFAULT_BLOCK_SIZE);
        assert_eq!(c.import, ImportConfig::default());
        Ok(())
    }

    #[test]
    fn test_bad_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.json");
        fs::write(&path, "{not json")?;
        assert!(matches!(Config::from_file(&path), Err(ConfigError::Parse { .. })));
        assert!(matches!(Config::from_file(&dir.path().join("missing.json")), Err(ConfigError::Read { .. })));
        Ok(())
    }

    #[test]
    fn test_env_overrides_credential() {
        let env: HashMap<&str, &str> = [(ENV_ACCOUNT, "acct"), (ENV_KEY, "secret")].into_iter().collect();
        let mut c = Config::default();
        c.mover.credential = SharedKeyCredential::new("file-acct", "file-key");
        c.apply_env(|name| env.get(name).map(|v| v.to_string()));
        assert_eq!(c.credential(), &SharedKeyCredential::new("acct", "secret"));

        let mut c = Config::default();
        c.mover.credential = SharedKeyCredential::new("file-acct", "file-key");
        c.apply_env(|_| Some(String::new()));
        assert_eq!(c.credential().account, "file-acct");
    }

    #[test]
    fn test_validation() {
        let mut m = MoverConfig::default();
        assert!(m.validate().is_ok());
        m.container = ".meta".into();
        assert!(m.validate().is_err());
        m.container = "arch".into();
        assert!(m.validate().is_ok());
        m.upload_block_size = 0;
        assert!(m.validate().is_err());

        let mut i = ImportConfig { container: "../up".into(), ..ImportConfig::default() };
        assert!(i.validate().is_err());
        i.container = "data".into();
        assert!(i.validate().is_ok());
        i.capacity = 0;
        assert!(i.validate().is_err());
    }
}
