use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard};

use crate::common::{Metadata, RemoteObject};
use crate::error::StoreError;
use crate::identity::ObjectLocation;

use super::{Block, ListSegment, Marker, ObjectProperties, ObjectStore, DEFAULT_PAGE_SIZE};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    metadata: Metadata,
}

/// An object store held entirely in memory.
///
/// Objects are kept per container in key order so listings page through them
/// deterministically.
#[derive(Debug)]
pub struct MemoryStore {
    containers: Mutex<HashMap<String, BTreeMap<String, StoredObject>>>,
    staged: Mutex<HashMap<ObjectLocation, HashMap<String, Vec<u8>>>>,
    page_size: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Cap listing pages at `page_size` objects regardless of the caller's request.
    pub fn with_page_size(page_size: usize) -> Self {
        MemoryStore {
            containers: Mutex::new(HashMap::new()),
            staged: Mutex::new(HashMap::new()),
            page_size: page_size.max(1),
        }
    }

    pub fn create_container(&self, container: &str) {
        lock(&self.containers).entry(container.to_string()).or_default();
    }

    /// Store an object directly, bypassing block staging.
    pub fn put_object(&self, location: &ObjectLocation, data: impl Into<Vec<u8>>, metadata: Metadata) {
        lock(&self.containers)
            .entry(location.container.clone())
            .or_default()
            .insert(location.key.clone(), StoredObject { data: data.into(), metadata });
    }

    pub fn object_data(&self, location: &ObjectLocation) -> Option<Vec<u8>> {
        lock(&self.containers)
            .get(&location.container)
            .and_then(|c| c.get(&location.key))
            .map(|o| o.data.clone())
    }

    pub fn object_count(&self, container: &str) -> usize {
        lock(&self.containers).get(container).map_or(0, BTreeMap::len)
    }

    /// Number of blocks staged for `location` and not yet committed.
    pub fn staged_block_count(&self, location: &ObjectLocation) -> usize {
        lock(&self.staged).get(location).map_or(0, HashMap::len)
    }

    fn not_found(location: &ObjectLocation) -> StoreError {
        StoreError::NotFound { location: location.to_string() }
    }
}

impl ObjectStore for MemoryStore {
    fn list_segment(&self, container: &str, marker: &Marker, max_results: usize) -> Result<ListSegment, StoreError> {
        if marker.is_done() {
            return Ok(ListSegment { objects: Vec::new(), next_marker: Marker::exhausted() });
        }
        let containers = lock(&self.containers);
        let objects = containers
            .get(container)
            .ok_or_else(|| StoreError::NotFound { location: format!("container '{container}'") })?;

        let limit = max_results.clamp(1, self.page_size);
        let lower = match marker.position() {
            Some(after) => Bound::Excluded(after.to_string()),
            None => Bound::Unbounded,
        };
        let mut range = objects.range::<String, _>((lower, Bound::Unbounded));
        let page: Vec<RemoteObject> = range
            .by_ref()
            .take(limit)
            .map(|(key, obj)| RemoteObject {
                key: key.clone(),
                size: obj.data.len() as u64,
                metadata: obj.metadata.clone(),
            })
            .collect();

        let next_marker = match (range.next(), page.last()) {
            (Some(_), Some(last)) => Marker::after(last.key.clone()),
            _ => Marker::exhausted(),
        };
        Ok(ListSegment { objects: page, next_marker })
    }

    fn stage_block(&self, location: &ObjectLocation, block: &Block) -> Result<(), StoreError> {
        block.verify(location)?;
        lock(&self.staged)
            .entry(location.clone())
            .or_default()
            .insert(block.id.clone(), block.data.clone());
        Ok(())
    }

    fn commit_blocks(&self, location: &ObjectLocation, block_ids: &[String], metadata: &Metadata) -> Result<(), StoreError> {
        let staged = lock(&self.staged).remove(location).unwrap_or_default();
        let mut data = Vec::new();
        for id in block_ids {
            let block = staged.get(id).ok_or_else(|| StoreError::Integrity {
                location: location.to_string(),
                reason: format!("block {id} was never staged"),
            })?;
            data.extend_from_slice(block);
        }
        self.put_object(location, data, metadata.clone());
        Ok(())
    }

    fn discard_staged(&self, location: &ObjectLocation) -> Result<(), StoreError> {
        lock(&self.staged).remove(location);
        Ok(())
    }

    fn properties(&self, location: &ObjectLocation) -> Result<ObjectProperties, StoreError> {
        let containers = lock(&self.containers);
        let obj = containers
            .get(&location.container)
            .and_then(|c| c.get(&location.key))
            .ok_or_else(|| Self::not_found(location))?;
        Ok(ObjectProperties { size: obj.data.len() as u64, metadata: obj.metadata.clone() })
    }

    fn read_range(&self, location: &ObjectLocation, offset: u64, len: u64) -> Result<Vec<u8>, StoreError> {
        let containers = lock(&self.containers);
        let obj = containers
            .get(&location.container)
            .and_then(|c| c.get(&location.key))
            .ok_or_else(|| Self::not_found(location))?;
        let size = obj.data.len() as u64;
        let start = offset.min(size) as usize;
        let end = offset.saturating_add(len).min(size) as usize;
        Ok(obj.data[start..end].to_vec())
    }

    fn delete(&self, location: &ObjectLocation) -> Result<(), StoreError> {
        lock(&self.containers)
            .get_mut(&location.container)
            .and_then(|c| c.remove(&location.key))
            .map(|_| ())
            .ok_or_else(|| Self::not_found(location))
    }
}
