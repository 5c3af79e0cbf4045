//! # Bulk Import
//!
//! Populates the local HSM namespace from the objects already present in a
//! remote container. Every object becomes an archived file whose content stays
//! remote until it is restored.
//!
//! ## Strategy
//!
//! 1. The container is enumerated page by page on the calling thread.
//! 2. For each object the parent directory is reconciled and the file
//!    attributes are synthesized from the object metadata.
//! 3. The object is queued on a [`BoundedImportPool`]; its workers register
//!    the file with the HSM and record its identity.
//! 4. The call returns once every queued object has finished, with a report of
//!    every failure. A bad object never stops the others.

mod pool;
mod reconcile;

pub use pool::{BoundedImportPool, ImportItem, ItemOutcome, PoolOutput, Submitter, DEFAULT_CAPACITY};
pub use reconcile::DirectoryReconciler;

use std::path::{Component, Path, PathBuf};
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::common::{ImportAttributes, RemoteObject};
use crate::error::{ImportError, StoreError};
use crate::hsm::{DataLayout, HsmImporter, IdentityStore, ImportFileInfo, DEFAULT_ARCHIVE_ID};
use crate::identity::ObjectLocation;
use crate::store::{Marker, ObjectStore, DEFAULT_PAGE_SIZE};

/// Settings for one bulk import run.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Local namespace root the keys are created under.
    pub root: PathBuf,
    pub archive_id: u32,
    /// Maximum number of concurrently executing import tasks.
    pub capacity: usize,
    pub page_size: usize,
}

impl Default for ImportOptions {
    fn default() -> Self {
        ImportOptions {
            root: PathBuf::from("."),
            archive_id: DEFAULT_ARCHIVE_ID,
            capacity: DEFAULT_CAPACITY,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// A failed object and why.
#[derive(Debug)]
pub struct ItemFailure {
    pub key: String,
    pub error: ImportError,
}

/// Result of a bulk import run.
#[derive(Debug, Default)]
pub struct ImportReport {
    /// Objects successfully registered.
    pub imported: usize,
    /// Objects seen in the listing, including rejected ones.
    pub listed: usize,
    pub failures: Vec<ItemFailure>,
    pub peak_in_flight: usize,
}

impl ImportReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// What the feeder saw while walking the listing.
#[derive(Debug, Default)]
struct Enumeration {
    listed: usize,
    /// Objects that failed before they could be queued.
    rejected: Vec<ItemFailure>,
    listing_error: Option<StoreError>,
}

pub struct BulkImporter<'a> {
    store: &'a dyn ObjectStore,
    hsm: &'a dyn HsmImporter,
    identities: &'a dyn IdentityStore,
    options: ImportOptions,
}

impl<'a> BulkImporter<'a> {
    pub fn new(
        store: &'a dyn ObjectStore,
        hsm: &'a dyn HsmImporter,
        identities: &'a dyn IdentityStore,
        options: ImportOptions,
    ) -> Self {
        Self { store, hsm, identities, options }
    }

    /// Import every object in `container`.
    ///
    /// Per-object failures are collected in the report. Only a listing failure
    /// fails the whole call, and even then only after the objects already
    /// queued have finished; their results travel in
    /// [`ImportError::Listing`]'s `partial` report.
    pub fn import(&self, container: &str) -> Result<ImportReport, ImportError> {
        let start = Instant::now();
        let reconciler = DirectoryReconciler::new(&self.options.root);
        let pool = BoundedImportPool::new(self.options.capacity);
        info!(container, capacity = pool.capacity(), root = %self.options.root.display(), "import started");

        let output = pool.run(
            |item| self.import_one(container, item),
            |submitter| self.enumerate(container, &reconciler, submitter),
        );

        let Enumeration { listed, rejected: mut failures, listing_error } = output.feed;
        let mut imported = 0;
        for outcome in output.outcomes {
            match outcome.result {
                Ok(()) => imported += 1,
                Err(error) => {
                    warn!(key = %outcome.key, %error, "import failed");
                    failures.push(ItemFailure { key: outcome.key, error });
                }
            }
        }

        info!(
            container,
            imported,
            listed,
            failed = failures.len(),
            directories = reconciler.known_count(),
            peak_in_flight = output.peak_in_flight,
            elapsed = ?start.elapsed(),
            "import finished"
        );
        let report = ImportReport { imported, listed, failures, peak_in_flight: output.peak_in_flight };
        match listing_error {
            None => Ok(report),
            Some(source) => {
                error!(container, %source, "listing failed, import incomplete");
                Err(ImportError::Listing { container: container.to_string(), source, partial: Box::new(report) })
            }
        }
    }

    /// Walk the listing and queue objects until the listing is exhausted or fails.
    fn enumerate(&self, container: &str, reconciler: &DirectoryReconciler, submitter: &Submitter) -> Enumeration {
        let mut run = Enumeration::default();
        let mut marker = Marker::start();

        while !marker.is_done() {
            let segment = match self.store.list_segment(container, &marker, self.options.page_size) {
                Ok(segment) => segment,
                Err(source) => {
                    run.listing_error = Some(source);
                    break;
                }
            };
            marker = segment.next_marker;
            debug!(container, objects = segment.objects.len(), "listing page");

            for object in segment.objects {
                run.listed += 1;
                let error = match self.prepare(&object, reconciler) {
                    Ok(item) => {
                        if submitter.submit(item) {
                            continue;
                        }
                        ImportError::Register {
                            path: self.options.root.join(&object.key),
                            source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "import workers exited"),
                        }
                    }
                    Err(error) => error,
                };
                warn!(key = %object.key, %error, "object rejected");
                run.rejected.push(ItemFailure { key: object.key, error });
            }
        }
        run
    }

    fn prepare(&self, object: &RemoteObject, reconciler: &DirectoryReconciler) -> Result<ImportItem, ImportError> {
        let rel = safe_relative_path(&object.key).ok_or_else(|| ImportError::UnsafeKey { key: object.key.clone() })?;
        if let Some(parent) = rel.parent() {
            reconciler
                .ensure(parent)
                .map_err(|source| ImportError::Directory { path: self.options.root.join(parent), source })?;
        }
        Ok(ImportItem { key: object.key.clone(), size: object.size, attrs: ImportAttributes::from_remote(object) })
    }

    fn import_one(&self, container: &str, item: &ImportItem) -> Result<(), ImportError> {
        let path = self.options.root.join(&item.key);
        let info = ImportFileInfo::new(item.key.clone(), &item.attrs);

        let fid = self
            .hsm
            .import(&path, self.options.archive_id, &info, &DataLayout::default())
            .map_err(|source| ImportError::Register { path: path.clone(), source })?;

        let locator = ObjectLocation::new(container, item.key.clone()).url();
        self.identities
            .set(&path, locator.as_bytes())
            .map_err(|source| ImportError::Identity { path: path.clone(), source })?;

        debug!(key = %item.key, %fid, size = item.size, "imported");
        Ok(())
    }
}

/// The key as a relative path that stays below the namespace root.
fn safe_relative_path(key: &str) -> Option<&Path> {
    let path = Path::new(key);
    let normal = path.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    let has_name = path.components().any(|c| matches!(c, Component::Normal(_)));
    (normal && has_name && !key.ends_with('/')).then_some(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_relative_path() {
        assert!(safe_relative_path("a/b.txt").is_some());
        assert!(safe_relative_path("top.txt").is_some());
        assert!(safe_relative_path("./x").is_some());
        assert!(safe_relative_path("../x").is_none());
        assert!(safe_relative_path("a/../../x").is_none());
        assert!(safe_relative_path("/etc/passwd").is_none());
        assert!(safe_relative_path("dir/").is_none());
        assert!(safe_relative_path("").is_none());
    }
}
