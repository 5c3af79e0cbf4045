use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// JSON configuration file. Flags override its values.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory backing the object store.
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    /// Storage account name. Overrides STORAGE_ACCOUNT.
    #[arg(long, global = true)]
    pub account: Option<String>,

    /// Storage account key. Overrides STORAGE_KEY.
    #[arg(long, global = true)]
    pub key: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Create an archived placeholder for every object in a container.
    #[command(alias = "i")]
    Import {
        /// The container to import.
        #[arg(required = true)]
        container: String,

        /// Namespace root the objects are created under.
        #[arg(long)]
        root: Option<PathBuf>,

        /// Maximum number of concurrent import tasks.
        #[arg(long)]
        capacity: Option<usize>,

        /// HSM archive number recorded on imported files.
        #[arg(long)]
        archive_id: Option<u32>,

        /// Objects requested per listing page.
        #[arg(long)]
        page_size: Option<usize>,

        /// Append identities to this JSON-lines journal instead of extended attributes.
        #[arg(long, conflicts_with = "identity_xattr")]
        identity_file: Option<PathBuf>,

        /// Extended attribute that receives each file's identity.
        #[arg(long)]
        identity_xattr: Option<String>,

        /// Apply the archived uid/gid to created files (needs privileges).
        #[arg(long)]
        chown: bool,
    },

    /// Archive a file, addressed by FID, to the object store.
    #[command(alias = "a")]
    Archive {
        /// File identifier, e.g. [0x200000400:0x1:0x0].
        #[arg(long, required = true)]
        fid: String,

        /// Namespace path the FID resolves to. Repeat for hard links.
        #[arg(long = "path", required = true)]
        paths: Vec<PathBuf>,

        /// Identity recorded by an earlier archive, reused verbatim.
        #[arg(long)]
        identity: Option<String>,

        /// Create the mover's container if it does not exist.
        #[arg(long)]
        create_container: bool,

        #[command(flatten)]
        mover: MoverArgs,
    },

    /// Restore an archived object into a local file.
    #[command(alias = "r")]
    Restore {
        #[arg(long, required = true)]
        identity: String,

        /// File that receives the data.
        #[arg(long, required = true)]
        write_path: PathBuf,

        /// Reapply the archived permissions, modification time and ownership.
        #[arg(long)]
        restore_attributes: bool,

        #[command(flatten)]
        mover: MoverArgs,
    },

    /// Delete an archived object.
    #[command(alias = "rm")]
    Remove {
        #[arg(long, required = true)]
        identity: String,

        #[command(flatten)]
        mover: MoverArgs,
    },
}

/// Settings shared by the mover subcommands.
#[derive(ClapArgs, Clone, Debug, Default)]
pub struct MoverArgs {
    /// Action id reported in logs and output.
    #[arg(long, default_value_t = 1)]
    pub id: u64,

    /// Container bare identities resolve against.
    #[arg(long)]
    pub container: Option<String>,

    /// Key prefix for bare identities.
    #[arg(long)]
    pub prefix: Option<String>,

    /// Root the agent's relative paths are resolved against.
    #[arg(long)]
    pub mount_root: Option<PathBuf>,

    /// Block size in bytes for chunked transfers.
    #[arg(long)]
    pub block_size: Option<u64>,

    /// Concurrent block transfers. [0 = auto-detect based on CPU cores]
    #[arg(long)]
    pub parallelism: Option<usize>,
}

impl MoverArgs {
    pub fn apply(&self, config: &mut Config) {
        let mover = &mut config.mover;
        if let Some(container) = &self.container {
            mover.container = container.clone();
        }
        if let Some(prefix) = &self.prefix {
            mover.prefix = prefix.clone();
        }
        if let Some(root) = &self.mount_root {
            mover.mount_root = root.clone();
        }
        if let Some(block_size) = self.block_size {
            mover.upload_block_size = block_size;
        }
        match self.parallelism {
            Some(0) => mover.transfer_parallelism = num_cpus::get(),
            Some(n) => mover.transfer_parallelism = n,
            None => {}
        }
    }
}

/// Builds the effective configuration.
///
/// Priority, highest first:
/// 1. `--store`, `--account` and `--key` command-line arguments.
/// 2. `STORAGE_ACCOUNT` / `STORAGE_KEY` environment variables.
/// 3. The `--config` file, then built-in defaults.
pub fn load_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(store) = &args.store {
        config.store_root = store.clone();
    }
    if let Some(account) = args.account.clone().filter(|a| !a.is_empty()) {
        config.mover.credential.account = account;
    }
    if let Some(key) = args.key.clone().filter(|k| !k.is_empty()) {
        config.mover.credential.key = key;
    }
    Ok(config)
}

/// Parses command-line arguments using `clap`.
///
/// This is the main entry point for the CLI logic.
pub fn run() -> Result<Args, Box<dyn std::error::Error>> {
    Ok(Args::parse())
}
