//! # Remote Object Store
//!
//! The importer and the mover talk to the remote container through the
//! [`ObjectStore`] trait. The operations mirror what a block-blob service
//! offers: a paginated flat listing, staged block upload followed by a commit
//! of the ordered block list, ranged reads, properties and delete.
//!
//! Two implementations ship with the crate:
//!
//! - [`MemoryStore`]: everything in process memory.
//! - [`DirStore`]: containers as directories on a local or shared
//!   filesystem, with signed metadata sidecars.

mod credential;
mod dir;
mod memory;

pub use credential::SharedKeyCredential;
pub use dir::DirStore;
pub use memory::MemoryStore;

use crate::common::{Metadata, RemoteObject};
use crate::error::StoreError;
use crate::identity::ObjectLocation;

/// Default number of objects returned per listing page.
pub const DEFAULT_PAGE_SIZE: usize = 5000;

/// Continuation marker for paginated listings.
///
/// A fresh marker starts at the beginning of the container. The marker
/// returned with the last page is the exhaustion sentinel, for which
/// [`is_done`](Marker::is_done) returns true.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Marker(Option<String>);

impl Marker {
    pub fn start() -> Self {
        Marker(None)
    }

    pub fn after(key: impl Into<String>) -> Self {
        Marker(Some(key.into()))
    }

    pub fn exhausted() -> Self {
        Marker(Some(String::new()))
    }

    pub fn is_done(&self) -> bool {
        matches!(&self.0, Some(v) if v.is_empty())
    }

    /// The last key already returned, if any.
    pub fn position(&self) -> Option<&str> {
        self.0.as_deref().filter(|v| !v.is_empty())
    }
}

/// One page of a container listing.
#[derive(Debug, Clone, Default)]
pub struct ListSegment {
    pub objects: Vec<RemoteObject>,
    pub next_marker: Marker,
}

/// Existence and size of a stored object, plus its user metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectProperties {
    pub size: u64,
    pub metadata: Metadata,
}

/// A staged block of an object being uploaded.
#[derive(Debug, Clone)]
pub struct Block {
    pub id: String,
    pub data: Vec<u8>,
    /// CRC32 of `data`; the store rejects the block when it does not match.
    pub crc32: u32,
}

impl Block {
    pub fn new(index: u64, data: Vec<u8>) -> Self {
        let crc32 = crc32fast::hash(&data);
        Block { id: block_id(index), data, crc32 }
    }

    pub(crate) fn verify(&self, location: &ObjectLocation) -> Result<(), StoreError> {
        let actual = crc32fast::hash(&self.data);
        if actual != self.crc32 {
            return Err(StoreError::Integrity {
                location: location.to_string(),
                reason: format!("block {} crc32 {:08x} != {:08x}", self.id, actual, self.crc32),
            });
        }
        Ok(())
    }
}

/// Block ids must all have the same length within one object.
pub fn block_id(index: u64) -> String {
    format!("{index:010}")
}

pub trait ObjectStore: Send + Sync {
    /// Return the page of objects that follows `marker`, at most `max_results`.
    fn list_segment(&self, container: &str, marker: &Marker, max_results: usize) -> Result<ListSegment, StoreError>;

    /// Stage one block of an object. Staged blocks are invisible until committed.
    fn stage_block(&self, location: &ObjectLocation, block: &Block) -> Result<(), StoreError>;

    /// Assemble the object from the staged blocks in `block_ids` order,
    /// replacing any previous object at `location`.
    fn commit_blocks(&self, location: &ObjectLocation, block_ids: &[String], metadata: &Metadata) -> Result<(), StoreError>;

    /// Drop every block staged for `location` without committing. Succeeds
    /// when nothing is staged.
    fn discard_staged(&self, location: &ObjectLocation) -> Result<(), StoreError>;

    fn properties(&self, location: &ObjectLocation) -> Result<ObjectProperties, StoreError>;

    /// Read `len` bytes starting at `offset`. Reads past the end are truncated.
    fn read_range(&self, location: &ObjectLocation, offset: u64, len: u64) -> Result<Vec<u8>, StoreError>;

    /// Delete the object. Missing objects yield [`StoreError::NotFound`].
    fn delete(&self, location: &ObjectLocation) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_states() {
        assert!(!Marker::start().is_done());
        assert_eq!(Marker::start().position(), None);
        assert_eq!(Marker::after("a/b").position(), Some("a/b"));
        assert!(Marker::exhausted().is_done());
        assert_eq!(Marker::exhausted().position(), None);
    }

    #[test]
    fn test_block_crc_is_checked() {
        let loc = ObjectLocation::new("c", "k");
        let mut block = Block::new(3, b"hello".to_vec());
        assert_eq!(block.id, "0000000003");
        assert!(block.verify(&loc).is_ok());
        block.data[0] = b'j';
        assert!(matches!(block.verify(&loc), Err(StoreError::Integrity { .. })));
    }
}
