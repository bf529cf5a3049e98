pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ireader-sources")]
#[command(about = "Browse, install and run book sources from the command line", long_about = None)]
pub struct Cli {
    /// Config file to use instead of the default location
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List loaded catalogs and user sources
    Sources,
    /// Sync the repository index and list installable catalogs
    Remote {
        /// Ignore the sync cooldown
        #[arg(short, long)]
        force: bool,
    },
    /// Install a catalog from the repository
    Install {
        /// Package name, e.g. ireader.booktoki.ko
        pkg: String,
    },
    /// Uninstall a catalog
    Uninstall {
        pkg: String,
    },
    /// Search a source
    Search {
        source_id: i64,
        query: String,
        #[arg(short, long, default_value_t = 1)]
        page: u32,
    },
    /// List popular books of a source
    Popular {
        source_id: i64,
        #[arg(short, long, default_value_t = 1)]
        page: u32,
        /// Follow pagination until the source runs out
        #[arg(long)]
        all: bool,
    },
    /// List latest updates of a source
    Latest {
        source_id: i64,
        #[arg(short, long, default_value_t = 1)]
        page: u32,
    },
    /// Show book details
    Details {
        source_id: i64,
        /// Book URL as returned by a listing
        url: String,
    },
    /// List the chapters of a book
    Chapters {
        source_id: i64,
        url: String,
    },
    /// Print the content of a chapter
    Read {
        source_id: i64,
        /// Chapter URL as returned by `chapters`
        url: String,
    },
    /// Download every chapter of a book into the local store
    Download {
        source_id: i64,
        book_url: String,
    },
    /// Import user sources from a JSON file
    Import {
        file: PathBuf,
    },
    /// Export a user source as JSON
    Export {
        source_id: i64,
        /// Output file (default: stdout)
        file: Option<PathBuf>,
    },
    /// List built-in user source templates
    Templates,
    /// Create a user source from a template
    NewSource {
        template: String,
        name: String,
        base_url: String,
        #[arg(short, long)]
        lang: Option<String>,
    },
    /// Run the background index sync
    Daemon {
        /// Sync interval (e.g., "1h", "30m", "6h", "1d")
        #[arg(short, long, default_value = "1h")]
        interval: String,

        /// Skip the sync on start
        #[arg(long)]
        no_initial_sync: bool,
    },
}
