//! Command dispatch for the `blobtier` binary.
//!
//! Every command works against a [`DirStore`]. Import registers placeholders
//! through [`PlaceholderImporter`]; the mover commands drive [`BlobMover`]
//! with a single self-contained action and print the finished action as JSON.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::cli::{self, Args, Commands, MoverArgs};
use crate::config::Config;
use crate::fid::{Fid, StaticResolver};
use crate::hsm::{IdentityStore, JournalIdentityStore, PlaceholderImporter, XattrIdentityStore};
use crate::error::ImportError;
use crate::importer::{BulkImporter, ImportReport};
use crate::mover::{ActionKind, BlobMover, MoverAction};
use crate::store::DirStore;

/// How a command ended when it did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Clean,
    /// Finished, but some items failed.
    Partial,
}

/// Public entry for running CLI logic.
pub fn run_cli_app() -> Result<Completion, Box<dyn std::error::Error>> {
    let args = cli::run()?;
    run_with(args)
}

pub fn run_with(args: Args) -> Result<Completion, Box<dyn std::error::Error>> {
    let mut config = cli::load_config(&args)?;

    match args.command {
        Commands::Import { container, root, capacity, archive_id, page_size, identity_file, identity_xattr, chown } => {
            let import = &mut config.import;
            import.container = container;
            if let Some(root) = root {
                import.root = root;
            }
            if let Some(capacity) = capacity {
                import.capacity = capacity;
            }
            if let Some(archive_id) = archive_id {
                import.archive_id = archive_id;
            }
            if let Some(page_size) = page_size {
                import.page_size = page_size;
            }
            config.import.validate()?;
            config.validate_store()?;

            let identities: Box<dyn IdentityStore> = match (identity_file, identity_xattr) {
                (Some(path), _) => Box::new(JournalIdentityStore::open(path)?),
                (None, Some(attr)) => Box::new(XattrIdentityStore::new(&attr)?),
                (None, None) => Box::new(XattrIdentityStore::default()),
            };
            run_import(&config, identities.as_ref(), chown)
        }
        Commands::Archive { fid, paths, identity, create_container, mover } => {
            let fid = Fid::parse(&fid)?;
            let mut resolver = StaticResolver::new();
            for path in paths {
                resolver.insert(fid, path);
            }
            let (store, blob_mover) = open_mover(&mut config, &mover, resolver)?;
            if create_container {
                store.create_container(&config.mover.container)?;
            }

            let mut action = MoverAction::new(mover.id, ActionKind::Archive, fid.primary_path());
            if let Some(identity) = identity {
                action = action.with_identity(identity);
            }
            finish(&blob_mover, action)
        }
        Commands::Restore { identity, write_path, restore_attributes, mover } => {
            config.mover.restore_attributes |= restore_attributes;
            let (_, blob_mover) = open_mover(&mut config, &mover, StaticResolver::new())?;
            let action = MoverAction::new(mover.id, ActionKind::Restore, write_path.clone())
                .with_identity(identity)
                .with_write_path(write_path);
            finish(&blob_mover, action)
        }
        Commands::Remove { identity, mover } => {
            let (_, blob_mover) = open_mover(&mut config, &mover, StaticResolver::new())?;
            let action = MoverAction::new(mover.id, ActionKind::Remove, PathBuf::new()).with_identity(identity);
            finish(&blob_mover, action)
        }
    }
}

fn run_import(config: &Config, identities: &dyn IdentityStore, chown: bool) -> Result<Completion, Box<dyn std::error::Error>> {
    let store = DirStore::new(&config.store_root, config.credential().clone()).with_page_size(config.import.page_size);
    let hsm = PlaceholderImporter { chown };
    let importer = BulkImporter::new(&store, &hsm, identities, config.import.options());
    let report = match importer.import(&config.import.container) {
        Ok(report) => report,
        Err(ImportError::Listing { container, source, partial }) => {
            print_failures(&partial);
            return Err(ImportError::Listing { container, source, partial }.into());
        }
        Err(e) => return Err(e.into()),
    };

    println!("imported {} of {} objects from '{}'", report.imported, report.listed, config.import.container);
    print_failures(&report);
    Ok(if report.is_clean() { Completion::Clean } else { Completion::Partial })
}

fn print_failures(report: &ImportReport) {
    for failure in &report.failures {
        eprintln!("  {}: {}", failure.key, failure.error);
    }
}

fn open_mover(
    config: &mut Config,
    args: &MoverArgs,
    resolver: StaticResolver,
) -> Result<(Arc<DirStore>, BlobMover), Box<dyn std::error::Error>> {
    args.apply(config);
    config.mover.validate()?;
    config.validate_store()?;

    let store = Arc::new(DirStore::new(&config.store_root, config.credential().clone()));
    let mover = BlobMover::new(config.mover.clone(), store.clone(), Arc::new(resolver));
    Ok((store, mover))
}

fn finish(mover: &BlobMover, mut action: MoverAction) -> Result<Completion, Box<dyn std::error::Error>> {
    mover.handle(action.kind, &mut action)?;
    info!(mover = mover.name(), id = action.id, kind = %action.kind, "action complete");
    println!("{}", serde_json::to_string(&action)?);
    Ok(Completion::Clean)
}
