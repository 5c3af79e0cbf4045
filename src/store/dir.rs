//! Directory-backed object store.
//!
//! Layout under the store root, per account:
//!
//! ```text
//! <root>/<account>/<container>/<key>                 object data
//! <root>/<account>/.meta/<container>/<key>.json      signed metadata sidecar
//! <root>/<account>/.blocks/<container>/<key>/<id>    staged, uncommitted blocks
//! <root>/<account>/.blocks/.assembly/                 commits being assembled
//! ```
//!
//! Commits assemble the staged blocks into a temporary file under the
//! account's `.blocks` area and rename it into place, so readers never see a
//! partial object and a crashed commit leaves nothing inside the container.
//! Files placed in a container directory by other means are served as objects
//! with no metadata.
//!
//! A listing walks the container once, when it starts. Continuation markers
//! page through that sorted snapshot; objects deleted since are skipped and
//! objects added since show up in the next listing.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;
use walkdir::WalkDir;

use crate::common::{Metadata, RemoteObject};
use crate::error::StoreError;
use crate::identity::ObjectLocation;

use super::{Block, ListSegment, Marker, ObjectProperties, ObjectStore, SharedKeyCredential, DEFAULT_PAGE_SIZE};

const META_DIR: &str = ".meta";
const BLOCKS_DIR: &str = ".blocks";
const ASSEMBLY_DIR: &str = ".assembly";
const SIDECAR_SUFFIX: &str = ".json";

#[derive(Serialize, Deserialize, Debug)]
struct Sidecar {
    size: u64,
    metadata: Metadata,
    signature: String,
}

/// Sorted `(key, data path)` pairs of one container.
type Snapshot = Arc<Vec<(String, PathBuf)>>;

#[derive(Debug)]
pub struct DirStore {
    account_root: PathBuf,
    credential: SharedKeyCredential,
    page_size: usize,
    /// Per container, the snapshot taken by the listing in progress.
    listings: Mutex<HashMap<String, Snapshot>>,
}

impl DirStore {
    pub fn new(root: impl AsRef<Path>, credential: SharedKeyCredential) -> Self {
        let account_root = root.as_ref().join(&credential.account);
        DirStore { account_root, credential, page_size: DEFAULT_PAGE_SIZE, listings: Mutex::new(HashMap::new()) }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn create_container(&self, container: &str) -> Result<(), StoreError> {
        let dir = self.container_dir(container)?;
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(dir.display().to_string(), e))
    }

    fn container_dir(&self, container: &str) -> Result<PathBuf, StoreError> {
        if container.is_empty() || container.starts_with('.') || container.contains('/') {
            return Err(StoreError::Other(format!("invalid container name '{container}'")));
        }
        Ok(self.account_root.join(container))
    }

    fn object_path(&self, location: &ObjectLocation) -> Result<PathBuf, StoreError> {
        Ok(self.container_dir(&location.container)?.join(checked_key(location)?))
    }

    fn sidecar_path(&self, location: &ObjectLocation) -> Result<PathBuf, StoreError> {
        let key = checked_key(location)?;
        let mut path = self.account_root.join(META_DIR).join(&location.container).join(key);
        let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(SIDECAR_SUFFIX);
        path.set_file_name(name);
        Ok(path)
    }

    fn staging_dir(&self, location: &ObjectLocation) -> Result<PathBuf, StoreError> {
        let key = checked_key(location)?;
        Ok(self.account_root.join(BLOCKS_DIR).join(&location.container).join(key))
    }

    fn assembly_dir(&self) -> PathBuf {
        self.account_root.join(BLOCKS_DIR).join(ASSEMBLY_DIR)
    }

    fn listings(&self) -> MutexGuard<'_, HashMap<String, Snapshot>> {
        self.listings.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The snapshot for a listing at `marker`: a fresh walk when the listing
    /// starts, the cached one when it continues.
    fn snapshot(&self, container: &str, dir: &Path, marker: &Marker) -> Result<Snapshot, StoreError> {
        if marker.position().is_some() {
            if let Some(keys) = self.listings().get(container) {
                return Ok(Arc::clone(keys));
            }
        }
        let keys = Arc::new(scan_container(dir)?);
        self.listings().insert(container.to_string(), Arc::clone(&keys));
        Ok(keys)
    }

    fn signing_message(location: &ObjectLocation, size: u64, metadata: &Metadata) -> Result<Vec<u8>, StoreError> {
        let meta = serde_json::to_string(metadata)?;
        Ok(format!("{}\n{}\n{}\n{}", location.container, location.key, size, meta).into_bytes())
    }

    /// Properties of an existing object; `data_len` is the on-disk data size.
    fn load_properties(&self, location: &ObjectLocation, data_len: u64) -> Result<ObjectProperties, StoreError> {
        let sidecar_path = self.sidecar_path(location)?;
        let raw = match fs::read(&sidecar_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(ObjectProperties { size: data_len, metadata: Metadata::new() });
            }
            Err(e) => return Err(StoreError::io(sidecar_path.display().to_string(), e)),
        };
        let sidecar: Sidecar = serde_json::from_slice(&raw)?;
        let message = Self::signing_message(location, sidecar.size, &sidecar.metadata)?;
        if !self.credential.verify(&message, &sidecar.signature) {
            return Err(StoreError::Auth { location: location.to_string() });
        }
        if sidecar.size != data_len {
            return Err(StoreError::Integrity {
                location: location.to_string(),
                reason: format!("sidecar size {} != data size {}", sidecar.size, data_len),
            });
        }
        Ok(ObjectProperties { size: sidecar.size, metadata: sidecar.metadata })
    }

    fn persist(tmp: NamedTempFile, target: &Path) -> Result<(), StoreError> {
        tmp.persist(target)
            .map(|_| ())
            .map_err(|e| StoreError::io(target.display().to_string(), e.error))
    }
}

/// Every file under `dir` as a `/`-joined key, in byte order.
fn scan_container(dir: &Path) -> Result<Vec<(String, PathBuf)>, StoreError> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1) {
        let entry = entry.map_err(|e| StoreError::Other(format!("walking '{}': {e}", dir.display())))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(dir) else { continue };
        let key = rel.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/");
        entries.push((key, entry.path().to_path_buf()));
    }
    // Keys must come back in byte order, which a directory walk does not give.
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries)
}

/// Reject keys that would address anything outside the container directory.
fn checked_key(location: &ObjectLocation) -> Result<&Path, StoreError> {
    let key = Path::new(&location.key);
    let ok = !location.key.is_empty()
        && !location.key.ends_with('/')
        && key.components().all(|c| matches!(c, Component::Normal(_)));
    if ok {
        Ok(key)
    } else {
        Err(StoreError::Other(format!("invalid object key '{}'", location.key)))
    }
}

fn map_io(location: &ObjectLocation, e: io::Error) -> StoreError {
    if e.kind() == io::ErrorKind::NotFound {
        StoreError::NotFound { location: location.to_string() }
    } else {
        StoreError::io(location.to_string(), e)
    }
}

fn ensure_parent(path: &Path) -> Result<&Path, StoreError> {
    let parent = path
        .parent()
        .ok_or_else(|| StoreError::Other(format!("'{}' has no parent directory", path.display())))?;
    fs::create_dir_all(parent).map_err(|e| StoreError::io(parent.display().to_string(), e))?;
    Ok(parent)
}

impl ObjectStore for DirStore {
    fn list_segment(&self, container: &str, marker: &Marker, max_results: usize) -> Result<ListSegment, StoreError> {
        if marker.is_done() {
            return Ok(ListSegment { objects: Vec::new(), next_marker: Marker::exhausted() });
        }
        let dir = self.container_dir(container)?;
        if !dir.is_dir() {
            return Err(StoreError::NotFound { location: format!("container '{container}'") });
        }

        let keys = self.snapshot(container, &dir, marker)?;
        let mut next = marker.position().map_or(0, |after| keys.partition_point(|(key, _)| key.as_str() <= after));
        let limit = max_results.clamp(1, self.page_size);

        let mut objects = Vec::with_capacity(limit);
        while objects.len() < limit && next < keys.len() {
            let (key, path) = &keys[next];
            next += 1;
            let location = ObjectLocation::new(container, key.clone());
            let data_len = match fs::metadata(path) {
                Ok(meta) => meta.len(),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(location = %location, "object removed during listing");
                    continue;
                }
                Err(e) => return Err(map_io(&location, e)),
            };
            let props = self.load_properties(&location, data_len)?;
            objects.push(RemoteObject { key: location.key, size: props.size, metadata: props.metadata });
        }

        let next_marker = match objects.last() {
            Some(last) if next < keys.len() => Marker::after(last.key.clone()),
            _ => {
                self.listings().remove(container);
                Marker::exhausted()
            }
        };
        debug!(container, returned = objects.len(), done = next_marker.is_done(), "listed segment");
        Ok(ListSegment { objects, next_marker })
    }

    fn stage_block(&self, location: &ObjectLocation, block: &Block) -> Result<(), StoreError> {
        block.verify(location)?;
        let staging = self.staging_dir(location)?;
        fs::create_dir_all(&staging).map_err(|e| StoreError::io(staging.display().to_string(), e))?;
        let path = staging.join(&block.id);
        fs::write(&path, &block.data).map_err(|e| StoreError::io(path.display().to_string(), e))
    }

    fn commit_blocks(&self, location: &ObjectLocation, block_ids: &[String], metadata: &Metadata) -> Result<(), StoreError> {
        let target = self.object_path(location)?;
        if !self.container_dir(&location.container)?.is_dir() {
            return Err(StoreError::NotFound { location: format!("container '{}'", location.container) });
        }
        let staging = self.staging_dir(location)?;
        ensure_parent(&target)?;

        let assembly = self.assembly_dir();
        fs::create_dir_all(&assembly).map_err(|e| StoreError::io(assembly.display().to_string(), e))?;
        let mut tmp = NamedTempFile::new_in(&assembly).map_err(|e| StoreError::io(assembly.display().to_string(), e))?;
        let mut size = 0u64;
        for id in block_ids {
            let block_path = staging.join(id);
            let mut block = File::open(&block_path).map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => StoreError::Integrity {
                    location: location.to_string(),
                    reason: format!("block {id} was never staged"),
                },
                _ => StoreError::io(block_path.display().to_string(), e),
            })?;
            size += io::copy(&mut block, tmp.as_file_mut()).map_err(|e| StoreError::io(location.to_string(), e))?;
        }
        tmp.as_file_mut().flush().map_err(|e| StoreError::io(location.to_string(), e))?;

        let sidecar = Sidecar {
            size,
            metadata: metadata.clone(),
            signature: self.credential.sign(&Self::signing_message(location, size, metadata)?),
        };
        let sidecar_path = self.sidecar_path(location)?;
        let sidecar_parent = ensure_parent(&sidecar_path)?;
        let mut sidecar_tmp =
            NamedTempFile::new_in(sidecar_parent).map_err(|e| StoreError::io(sidecar_parent.display().to_string(), e))?;
        serde_json::to_writer(sidecar_tmp.as_file_mut(), &sidecar)?;

        Self::persist(tmp, &target)?;
        Self::persist(sidecar_tmp, &sidecar_path)?;

        if let Err(e) = self.discard_staged(location) {
            debug!(location = %location, error = %e, "could not clean staging directory");
        }
        Ok(())
    }

    fn discard_staged(&self, location: &ObjectLocation) -> Result<(), StoreError> {
        let staging = self.staging_dir(location)?;
        match fs::remove_dir_all(&staging) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(StoreError::io(staging.display().to_string(), e)),
            _ => Ok(()),
        }
    }

    fn properties(&self, location: &ObjectLocation) -> Result<ObjectProperties, StoreError> {
        let path = self.object_path(location)?;
        let meta = fs::metadata(&path).map_err(|e| map_io(location, e))?;
        if !meta.is_file() {
            return Err(StoreError::NotFound { location: location.to_string() });
        }
        self.load_properties(location, meta.len())
    }

    fn read_range(&self, location: &ObjectLocation, offset: u64, len: u64) -> Result<Vec<u8>, StoreError> {
        let path = self.object_path(location)?;
        let mut file = File::open(&path).map_err(|e| map_io(location, e))?;
        file.seek(SeekFrom::Start(offset)).map_err(|e| StoreError::io(location.to_string(), e))?;
        let mut buf = Vec::with_capacity(len.min(64 << 20) as usize);
        file.take(len).read_to_end(&mut buf).map_err(|e| StoreError::io(location.to_string(), e))?;
        Ok(buf)
    }

    fn delete(&self, location: &ObjectLocation) -> Result<(), StoreError> {
        let path = self.object_path(location)?;
        fs::remove_file(&path).map_err(|e| map_io(location, e))?;
        let sidecar = self.sidecar_path(location)?;
        match fs::remove_file(&sidecar) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(StoreError::io(sidecar.display().to_string(), e)),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store(root: &Path) -> DirStore {
        let s = DirStore::new(root, SharedKeyCredential::new("acct", "key"));
        s.create_container("box").unwrap();
        s
    }

    fn commit(store: &DirStore, key: &str, parts: &[&[u8]], metadata: Metadata) {
        let loc = ObjectLocation::new("box", key);
        let mut ids = Vec::new();
        for (i, part) in parts.iter().enumerate() {
            let block = Block::new(i as u64, part.to_vec());
            store.stage_block(&loc, &block).unwrap();
            ids.push(block.id);
        }
        store.commit_blocks(&loc, &ids, &metadata).unwrap();
    }

    #[test]
    fn test_commit_read_and_properties() {
        let dir = tempdir().unwrap();
        let s = store(dir.path());
        let mut meta = Metadata::new();
        meta.insert("Owner".into(), "42".into());
        commit(&s, "x/y.bin", &[b"abc", b"def"], meta.clone());

        let loc = ObjectLocation::new("box", "x/y.bin");
        let props = s.properties(&loc).unwrap();
        assert_eq!(props.size, 6);
        assert_eq!(props.metadata, meta);
        assert_eq!(s.read_range(&loc, 2, 3).unwrap(), b"cde");
        assert!(!dir.path().join("acct/.blocks/box/x/y.bin").exists());
    }

    #[test]
    fn test_listing_is_sorted_and_paged() {
        let dir = tempdir().unwrap();
        let s = store(dir.path()).with_page_size(2);
        for key in ["a/b", "a.txt", "c"] {
            commit(&s, key, &[b"1"], Metadata::new());
        }

        let first = s.list_segment("box", &Marker::start(), 10).unwrap();
        let keys: Vec<_> = first.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, ["a.txt", "a/b"]);
        let second = s.list_segment("box", &first.next_marker, 10).unwrap();
        assert_eq!(second.objects.len(), 1);
        assert_eq!(second.objects[0].key, "c");
        assert!(second.next_marker.is_done());
    }

    #[test]
    fn test_listing_pages_through_one_snapshot() {
        let dir = tempdir().unwrap();
        let s = store(dir.path()).with_page_size(2);
        for key in ["a", "b", "c", "d"] {
            commit(&s, key, &[b"1"], Metadata::new());
        }

        let first = s.list_segment("box", &Marker::start(), 10).unwrap();
        assert_eq!(first.objects.len(), 2);
        s.delete(&ObjectLocation::new("box", "c")).unwrap();
        commit(&s, "e", &[b"1"], Metadata::new());

        let second = s.list_segment("box", &first.next_marker, 10).unwrap();
        let keys: Vec<_> = second.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, ["d"]);
        assert!(second.next_marker.is_done());
        assert!(s.listings().is_empty());

        let fresh = s.list_segment("box", &Marker::start(), 10).unwrap();
        let fresh_rest = s.list_segment("box", &fresh.next_marker, 10).unwrap();
        let keys: Vec<_> = fresh.objects.iter().chain(&fresh_rest.objects).map(|o| o.key.as_str()).collect();
        assert_eq!(keys, ["a", "b", "d", "e"]);
    }

    #[test]
    fn test_listing_never_sees_commits_in_progress() {
        let dir = tempdir().unwrap();
        let s = store(dir.path());
        let payload = vec![7u8; 1 << 20];
        let keys: Vec<String> = (0..20).map(|i| format!("big/{i:02}")).collect();

        std::thread::scope(|scope| {
            let writer = scope.spawn(|| {
                for key in &keys {
                    commit(&s, key, &[payload.as_slice(), payload.as_slice()], Metadata::new());
                }
            });
            while !writer.is_finished() {
                let seg = s.list_segment("box", &Marker::start(), 5000).unwrap();
                for object in &seg.objects {
                    assert!(keys.contains(&object.key), "unexpected object '{}'", object.key);
                    assert_eq!(object.size, 2 << 20);
                }
            }
        });

        let names: Vec<_> = fs::read_dir(dir.path().join("acct/box")).unwrap().map(|e| e.unwrap().file_name()).collect();
        assert_eq!(names, ["big"]);
        assert_eq!(fs::read_dir(dir.path().join("acct/.blocks/.assembly")).unwrap().count(), 0);
        assert_eq!(s.list_segment("box", &Marker::start(), 5000).unwrap().objects.len(), 20);
    }

    #[test]
    fn test_discard_staged_blocks() {
        let dir = tempdir().unwrap();
        let s = store(dir.path());
        let loc = ObjectLocation::new("box", "half/done");
        s.stage_block(&loc, &Block::new(0, b"part".to_vec())).unwrap();
        let staging = dir.path().join("acct/.blocks/box/half/done");
        assert!(staging.is_dir());

        s.discard_staged(&loc).unwrap();
        assert!(!staging.exists());
        s.discard_staged(&loc).unwrap();
        let err = s.commit_blocks(&loc, &[crate::store::block_id(0)], &Metadata::new()).unwrap_err();
        assert!(matches!(err, StoreError::Integrity { .. }));
        assert!(s.properties(&loc).unwrap_err().is_not_found());
    }

    #[test]
    fn test_unmanaged_files_are_listed_without_metadata() {
        let dir = tempdir().unwrap();
        let s = store(dir.path());
        fs::create_dir_all(dir.path().join("acct/box/d")).unwrap();
        fs::write(dir.path().join("acct/box/d/e.txt"), b"hello").unwrap();

        let seg = s.list_segment("box", &Marker::start(), 10).unwrap();
        assert_eq!(seg.objects, vec![RemoteObject { key: "d/e.txt".into(), size: 5, metadata: Metadata::new() }]);
    }

    #[test]
    fn test_tampered_sidecar_fails_auth() {
        let dir = tempdir().unwrap();
        let s = store(dir.path());
        let mut meta = Metadata::new();
        meta.insert("uid".into(), "1".into());
        commit(&s, "k", &[b"data"], meta);

        let sidecar = dir.path().join("acct/.meta/box/k.json");
        let text = fs::read_to_string(&sidecar).unwrap().replace("\"1\"", "\"0\"");
        fs::write(&sidecar, text).unwrap();

        let err = s.properties(&ObjectLocation::new("box", "k")).unwrap_err();
        assert!(matches!(err, StoreError::Auth { .. }));
    }

    #[test]
    fn test_other_account_key_cannot_read_metadata() {
        let dir = tempdir().unwrap();
        commit(&store(dir.path()), "k", &[b"data"], Metadata::new());
        let intruder = DirStore::new(dir.path(), SharedKeyCredential::new("acct", "wrong"));
        assert!(matches!(intruder.properties(&ObjectLocation::new("box", "k")), Err(StoreError::Auth { .. })));
    }

    #[test]
    fn test_delete_and_missing() {
        let dir = tempdir().unwrap();
        let s = store(dir.path());
        commit(&s, "gone", &[b"x"], Metadata::new());
        let loc = ObjectLocation::new("box", "gone");
        s.delete(&loc).unwrap();
        assert!(s.delete(&loc).unwrap_err().is_not_found());
        assert!(s.properties(&loc).unwrap_err().is_not_found());
        assert!(s.read_range(&loc, 0, 1).unwrap_err().is_not_found());
    }

    #[test]
    fn test_rejects_escaping_keys() {
        let dir = tempdir().unwrap();
        let s = store(dir.path());
        for key in ["../x", "/etc/passwd", "a/../../b", ""] {
            let loc = ObjectLocation::new("box", key);
            assert!(matches!(s.properties(&loc), Err(StoreError::Other(_))), "{key}");
        }
        assert!(s.list_segment(".meta", &Marker::start(), 1).is_err());
    }

    #[test]
    fn test_empty_object() {
        let dir = tempdir().unwrap();
        let s = store(dir.path());
        commit(&s, "empty", &[], Metadata::new());
        let loc = ObjectLocation::new("box", "empty");
        assert_eq!(s.properties(&loc).unwrap().size, 0);
        assert!(s.read_range(&loc, 0, 10).unwrap().is_empty());
    }
}
