//! Chunked, parallel transfers between local files and an [`ObjectStore`].
//!
//! Uploads cut the file into fixed-size blocks, read each block with a
//! positional read and stage the blocks concurrently before committing the
//! ordered block list. Downloads pre-size the destination and fill it with
//! concurrent ranged reads and positional writes. Either way the caller sees
//! one blocking call; the parallelism lives in a dedicated rayon pool sized to
//! the configured transfer parallelism.

use std::fs::File;
use std::os::unix::fs::FileExt;

use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::debug;

use crate::common::Metadata;
use crate::error::StoreError;
use crate::identity::ObjectLocation;
use crate::store::{Block, ObjectStore};

pub const DEFAULT_BLOCK_SIZE: u64 = 4 * 1024 * 1024; // 4 MiB

/// Block size and number of concurrent block transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOptions {
    pub block_size: u64,
    pub parallelism: usize,
}

impl Default for TransferOptions {
    fn default() -> Self {
        TransferOptions { block_size: DEFAULT_BLOCK_SIZE, parallelism: num_cpus::get() }
    }
}

impl TransferOptions {
    fn block_count(&self, size: u64) -> u64 {
        size.div_ceil(self.block_size.max(1))
    }

    /// `(offset, len)` of block `index` in an object of `size` bytes.
    fn block_range(&self, index: u64, size: u64) -> (u64, u64) {
        let block_size = self.block_size.max(1);
        let offset = index * block_size;
        (offset, block_size.min(size - offset))
    }

    fn pool(&self) -> Result<ThreadPool, StoreError> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.parallelism.max(1))
            .thread_name(|i| format!("transfer-{i}"))
            .build()
            .map_err(|e| StoreError::Other(format!("cannot start transfer threads: {e}")))
    }
}

/// Upload the first `size` bytes of `file` to `location`, replacing any existing object.
///
/// Returns the number of bytes transferred. On failure the blocks staged so
/// far are discarded and any previous object is left as it was.
pub fn upload_file(
    store: &dyn ObjectStore,
    location: &ObjectLocation,
    file: &File,
    size: u64,
    metadata: &Metadata,
    options: TransferOptions,
) -> Result<u64, StoreError> {
    let count = options.block_count(size) as usize;
    let pool = options.pool()?;
    let staged = pool.install(|| {
        (0..count)
            .into_par_iter()
            .map(|index| {
                let index = index as u64;
                let (offset, len) = options.block_range(index, size);
                let mut data = vec![0u8; len as usize];
                file.read_exact_at(&mut data, offset)
                    .map_err(|e| StoreError::io(format!("{location} block {index}"), e))?;
                let block = Block::new(index, data);
                store.stage_block(location, &block)?;
                Ok(block.id)
            })
            .collect::<Result<Vec<String>, StoreError>>()
    });

    let result = staged.and_then(|block_ids| store.commit_blocks(location, &block_ids, metadata));
    if let Err(error) = result {
        if let Err(cleanup) = store.discard_staged(location) {
            debug!(%location, %cleanup, "could not discard staged blocks");
        }
        return Err(error);
    }
    Ok(size)
}

/// Download the `size`-byte object at `location` into `file`, truncating or
/// extending the file to exactly `size` bytes.
pub fn download_to_file(
    store: &dyn ObjectStore,
    location: &ObjectLocation,
    size: u64,
    file: &File,
    options: TransferOptions,
) -> Result<u64, StoreError> {
    file.set_len(size).map_err(|e| StoreError::io(location.to_string(), e))?;
    let count = options.block_count(size) as usize;
    options.pool()?.install(|| {
        (0..count).into_par_iter().try_for_each(|index| {
            let index = index as u64;
            let (offset, len) = options.block_range(index, size);
            let data = store.read_range(location, offset, len)?;
            if data.len() as u64 != len {
                return Err(StoreError::Integrity {
                    location: location.to_string(),
                    reason: format!("short read at offset {offset}: {} of {len} bytes", data.len()),
                });
            }
            file.write_all_at(&data, offset)
                .map_err(|e| StoreError::io(format!("{location} block {index}"), e))
        })
    })?;
    Ok(size)
}
