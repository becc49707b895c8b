//! Command-line interface for the `crates-mirror` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;

/// Lazy caching mirror for a crates registry
#[derive(Debug, Parser)]
#[command(name = "crates-mirror")]
#[command(version)]
#[command(
    after_help = "Service:\n  serve      Run the mirror\n\nMaintenance:\n  sync       Run one index sync pass\n  reconcile  Mark cached blobs as downloaded\n  status     Show record counts"
)]
pub struct Cli {
    /// JSON configuration file
    #[arg(long, short = 'c', global = true, env = "CRATES_MIRROR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Serve artifacts, fetching misses from the origin
    Serve {
        /// Host to bind the server to
        #[arg(long)]
        host: Option<String>,
        /// Port to run the server on
        #[arg(short, long)]
        port: Option<u16>,
        /// Directory holding cached artifacts
        #[arg(long)]
        cache_dir: Option<PathBuf>,
        /// Metadata database file
        #[arg(long)]
        db: Option<PathBuf>,
        /// Local clone of the registry index
        #[arg(long)]
        index_dir: Option<PathBuf>,
        /// Download URL template with {crate} and {version} placeholders
        #[arg(long)]
        origin: Option<String>,
        /// Don't run the background index sync
        #[arg(long)]
        no_sync: bool,
    },
    /// Run one index sync pass
    Sync {
        /// Download every pending artifact afterwards
        #[arg(long)]
        prefetch: bool,
        /// Parallel downloads while prefetching
        #[arg(long, default_value_t = 8)]
        concurrency: usize,
    },
    /// Mark every blob in the cache root as downloaded
    Reconcile,
    /// Print record counts and the last applied commit
    Status,
}

impl Cli {
    /// Layer command-line flags over a loaded configuration.
    pub fn apply_to(&self, config: &mut Config) {
        if self.verbose {
            config.logging.verbose = true;
        }
        if let Some(path) = &self.log_file {
            config.logging.log_file = Some(path.clone());
        }

        if let Commands::Serve {
            host,
            port,
            cache_dir,
            db,
            index_dir,
            origin,
            no_sync,
        } = &self.command
        {
            if let Some(host) = host {
                config.server.host = host.clone();
            }
            if let Some(port) = port {
                config.server.port = *port;
            }
            if let Some(dir) = cache_dir {
                config.storage.cache_root = dir.clone();
            }
            if let Some(db) = db {
                config.storage.db_path = db.clone();
            }
            if let Some(dir) = index_dir {
                config.storage.index_dir = dir.clone();
            }
            if let Some(origin) = origin {
                config.upstream.download_url = origin.clone();
            }
            if *no_sync {
                config.sync.enabled = false;
            }
        }
    }
}
