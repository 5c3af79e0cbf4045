//! # Blob Mover
//!
//! Executes the three HSM data-movement primitives against the object store:
//!
//! - **Archive** copies a file out, keyed by its namespace path (or by the
//!   identity it already carries), and records identity, URL and length.
//! - **Restore** copies an archived object back into the action's write path.
//! - **Remove** deletes the archived copy.
//!
//! Each call handles exactly one action and blocks until the transfer is
//! done. Nothing is retried here; the coordinator owns retry policy.

mod action;

pub use action::{Action, ActionKind, MoverAction};

use std::fs::{File, Metadata as FsMetadata, Permissions};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use tracing::{debug, info, warn};

use crate::common::{archive_keys, format_modtime, parse_modtime, parse_octal_mode, Metadata};
use crate::config::MoverConfig;
use crate::error::{MoverError, StoreError};
use crate::fid::{Fid, FidResolver};
use crate::fsx;
use crate::identity::{join_key, Identity, ObjectLocation};
use crate::store::ObjectStore;
use crate::transfer;

pub struct BlobMover {
    name: String,
    config: MoverConfig,
    store: Arc<dyn ObjectStore>,
    resolver: Arc<dyn FidResolver>,
}

impl BlobMover {
    pub fn new(config: MoverConfig, store: Arc<dyn ObjectStore>, resolver: Arc<dyn FidResolver>) -> Self {
        let name = if config.name.is_empty() { format!("az-{}", config.archive_id) } else { config.name.clone() };
        debug!(mover = %name, container = %config.container, prefix = %config.prefix, "mover ready");
        BlobMover { name, config, store, resolver }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &MoverConfig {
        &self.config
    }

    /// Run the operation `kind` names.
    pub fn handle(&self, kind: ActionKind, action: &mut dyn Action) -> Result<(), MoverError> {
        match kind {
            ActionKind::Archive => self.archive(action),
            ActionKind::Restore => self.restore(action),
            ActionKind::Remove => self.remove(action),
        }
    }

    /// Copy the file behind `action.primary_path()` to the object store.
    ///
    /// On success sets the action's identity, URL and actual length; on
    /// failure leaves all three untouched.
    pub fn archive(&self, action: &mut dyn Action) -> Result<(), MoverError> {
        let id = action.id();
        let start = Instant::now();
        debug!(mover = %self.name, id, primary = %action.primary_path().display(), identity = action.identity(), "archive");

        let fid = Fid::from_primary_path(action.primary_path())
            .map_err(|e| MoverError::Validation { action: id, reason: e.to_string() })?;

        let resolved = self.resolve_path(id, &fid)?;
        let (identity, location) = if action.identity().is_empty() {
            self.require_container(id)?;
            let key = join_key(&self.config.prefix, &resolved);
            (resolved, ObjectLocation::new(self.config.container.clone(), key))
        } else {
            let identity = action.identity().to_string();
            let location = self.locate(id, &identity)?;
            (identity, location)
        };

        let source = self.local_path(action.primary_path());
        let file = File::open(&source).map_err(|e| local_error(id, "open", &source, e))?;
        let stat = file.metadata().map_err(|e| local_error(id, "stat", &source, e))?;
        let metadata = archive_metadata(&stat).map_err(|e| local_error(id, "stat", &source, e))?;

        let sent = transfer::upload_file(
            self.store.as_ref(),
            &location,
            &file,
            stat.len(),
            &metadata,
            self.config.transfer_options(),
        )
        .map_err(|source| MoverError::Transfer { action: id, operation: "upload", location: location.to_string(), source })?;

        info!(
            mover = %self.name,
            id,
            bytes = sent,
            elapsed = ?start.elapsed(),
            from = %source.display(),
            to = %location,
            "archived"
        );

        action.set_identity(identity);
        action.set_url(location.url());
        action.set_actual_length(sent);
        Ok(())
    }

    /// Copy the object named by the action's identity into its write path.
    ///
    /// The object is downloaded into a temporary file beside the write path
    /// and renamed over it once complete. A failed restore leaves the write
    /// path as it was.
    pub fn restore(&self, action: &mut dyn Action) -> Result<(), MoverError> {
        let id = action.id();
        let start = Instant::now();
        debug!(mover = %self.name, id, primary = %action.primary_path().display(), identity = action.identity(), "restore");

        let location = self.require_location(action)?;
        if action.write_path().as_os_str().is_empty() {
            return Err(MoverError::Validation { action: id, reason: "missing write path".into() });
        }

        let props = self.store.properties(&location).map_err(|source| {
            if source.is_not_found() {
                MoverError::NotFound { action: id, location: location.to_string() }
            } else {
                MoverError::Transfer { action: id, operation: "properties", location: location.to_string(), source }
            }
        })?;

        let dest = self.local_path(action.write_path());
        let dir = dest.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        let partial = tempfile::Builder::new()
            .prefix(".blobtier-restore")
            .permissions(Permissions::from_mode(0o666))
            .tempfile_in(dir)
            .map_err(|e| local_error(id, "create", &dest, e))?;
        transfer::download_to_file(
            self.store.as_ref(),
            &location,
            props.size,
            partial.as_file(),
            self.config.transfer_options(),
        )
        .map_err(|source| MoverError::Transfer { action: id, operation: "download", location: location.to_string(), source })?;
        let file = partial.persist(&dest).map_err(|e| local_error(id, "rename", &dest, e.error))?;

        if self.config.restore_attributes {
            apply_archived_attributes(&dest, &file, &props.metadata);
        }

        info!(
            mover = %self.name,
            id,
            bytes = props.size,
            elapsed = ?start.elapsed(),
            from = %location,
            to = %dest.display(),
            "restored"
        );
        action.set_actual_length(props.size);
        Ok(())
    }

    /// Delete the object named by the action's identity.
    ///
    /// An object that is already gone counts as removed.
    pub fn remove(&self, action: &mut dyn Action) -> Result<(), MoverError> {
        let id = action.id();
        debug!(mover = %self.name, id, primary = %action.primary_path().display(), identity = action.identity(), "remove");

        let location = self.require_location(action)?;
        match self.store.delete(&location) {
            Ok(()) => {
                info!(mover = %self.name, id, object = %location, "removed");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(mover = %self.name, id, object = %location, "already absent");
                Ok(())
            }
            Err(source) => Err(MoverError::Transfer { action: id, operation: "delete", location: location.to_string(), source }),
        }
    }

    fn resolve_path(&self, id: u64, fid: &Fid) -> Result<String, MoverError> {
        let resolution = |reason: String| MoverError::Resolution { action: id, path: fid.to_string(), reason };

        let paths = self
            .resolver
            .pathnames(&self.config.mount_root, fid)
            .map_err(|e| resolution(e.to_string()))?;
        let first = paths.first().ok_or_else(|| resolution("no pathnames found".into()))?;
        if paths.len() > 1 {
            let all: Vec<_> = paths.iter().map(|p| p.display().to_string()).collect();
            warn!(mover = %self.name, id, %fid, paths = %all.join(", "), "multiple paths returned, using first");
        }

        let resolved = first.to_string_lossy().trim_start_matches('/').to_string();
        if resolved.is_empty() {
            return Err(resolution("resolved to the filesystem root".into()));
        }
        Ok(resolved)
    }

    fn require_location(&self, action: &dyn Action) -> Result<ObjectLocation, MoverError> {
        if action.identity().is_empty() {
            return Err(MoverError::Validation { action: action.id(), reason: "missing file identity".into() });
        }
        self.locate(action.id(), action.identity())
    }

    fn locate(&self, id: u64, identity: &str) -> Result<ObjectLocation, MoverError> {
        let parsed = Identity::parse(identity).map_err(|e| MoverError::Validation { action: id, reason: e.to_string() })?;
        if matches!(parsed, Identity::BareKey(_)) {
            self.require_container(id)?;
        }
        let location = parsed.locate(&self.config.container, &self.config.prefix);
        debug!(identity, object = %location, "parsed identity");
        Ok(location)
    }

    fn require_container(&self, id: u64) -> Result<(), MoverError> {
        if self.config.container.is_empty() {
            return Err(MoverError::Validation { action: id, reason: "no default container configured".into() });
        }
        Ok(())
    }

    /// Relative action paths are relative to the agent's mount root.
    fn local_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config.mount_root.join(path)
        }
    }
}

fn local_error(action: u64, operation: &'static str, path: &Path, e: std::io::Error) -> MoverError {
    let location = path.display().to_string();
    MoverError::Transfer { action, operation, location: location.clone(), source: StoreError::io(location, e) }
}

/// Object metadata recorded on archive, read from the file as it is now.
fn archive_metadata(stat: &FsMetadata) -> std::io::Result<Metadata> {
    let mut meta = Metadata::new();
    meta.insert(archive_keys::PERMISSIONS.into(), format!("{:o}", stat.mode() & 0o7777));
    meta.insert(archive_keys::MOD_TIME.into(), format_modtime(stat.modified()?));
    meta.insert(archive_keys::OWNER.into(), stat.uid().to_string());
    meta.insert(archive_keys::GROUP.into(), stat.gid().to_string());
    Ok(meta)
}

/// Reapply the attributes Archive recorded. Best effort: each attribute that
/// cannot be parsed or applied is skipped with a warning.
fn apply_archived_attributes(path: &Path, file: &File, metadata: &Metadata) {
    if let Some(mode) = metadata.get(archive_keys::PERMISSIONS).and_then(|v| parse_octal_mode(v)) {
        if let Err(error) = fsx::set_unix_permissions(path, mode) {
            warn!(path = %path.display(), %error, "could not restore permissions");
        }
    }
    if let Some(mtime) = metadata.get(archive_keys::MOD_TIME).and_then(|v| parse_modtime(v)) {
        let mtime = SystemTime::from(mtime);
        if let Err(error) = fsx::set_times(file, mtime, mtime) {
            warn!(path = %path.display(), %error, "could not restore modification time");
        }
    }
    let owner = metadata.get(archive_keys::OWNER).and_then(|v| v.parse::<u32>().ok());
    let group = metadata.get(archive_keys::GROUP).and_then(|v| v.parse::<u32>().ok());
    if let (Some(uid), Some(gid)) = (owner, group) {
        if let Err(error) = fsx::set_owner(path, uid, gid) {
            warn!(path = %path.display(), uid, gid, %error, "could not restore ownership");
        }
    }
}
