//! # blobtier Core Library
//!
//! This crate provides the data-movement backend that tiers an HSM-managed
//! filesystem to a remote object store.
//!
//! It is designed to be used by the `blobtier` command-line application, but its public API
//! can also be embedded in a copytool agent that receives actions from a coordinator.
//!
//! ## Key Modules
//!
//! - [`importer`]: Bulk import of an existing container into the local namespace.
//! - [`mover`]: Archive, Restore and Remove of single files.
//! - [`store`]: The object-store seam plus in-memory and directory-backed stores.
//! - [`transfer`]: Chunked, parallel uploads and downloads.
//! - [`identity`]: Parsing of the identity locators recorded on archived files.
//! - [`hsm`]: The HSM import primitive and identity persistence.
//!
//! ## Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use blobtier::config::MoverConfig;
//! use blobtier::fid::StaticResolver;
//! use blobtier::mover::{ActionKind, BlobMover, MoverAction};
//! use blobtier::store::MemoryStore;
//!
//! let config = MoverConfig { container: "archive".into(), ..MoverConfig::default() };
//! let mover = BlobMover::new(config, Arc::new(MemoryStore::new()), Arc::new(StaticResolver::new()));
//! let mut action = MoverAction::new(7, ActionKind::Remove, "").with_identity("az://archive/old.dat");
//! mover.handle(action.kind, &mut action)?;
//! # Ok::<(), blobtier::error::MoverError>(())
//! ```

pub mod cli;
pub mod cli_runner;
pub mod common;
pub mod config;
pub mod error;
pub use error::{ImportError, MoverError, StoreError};

pub mod fid;
pub mod hsm;
pub mod identity;

pub mod importer;
pub mod mover;

pub mod store;
pub mod transfer;

// Unix filesystem helpers
pub mod fsx;
