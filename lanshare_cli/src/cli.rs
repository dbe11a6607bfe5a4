use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "lanshare", version, about = "Share and fetch files on the local network")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Share files and folders, and announce this peer on the LAN
    Serve {
        /// Files or folders to share
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// HTTP port (defaults to the configured server port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Require a bearer token; one is issued and printed at start-up
        #[arg(long)]
        require_token: bool,

        /// Serve without broadcasting or scanning
        #[arg(long)]
        no_discovery: bool,
    },

    /// Print a peer's catalog
    List {
        /// Peer URL, e.g. http://192.168.1.20:8000
        server: String,

        #[arg(short, long)]
        token: Option<String>,

        /// Only show names containing this text
        #[arg(short, long)]
        search: Option<String>,
    },

    /// Download one catalog entry by id or exact name
    Fetch {
        server: String,

        file: String,

        /// Save directory (defaults to the platform download folder)
        #[arg(short, long)]
        out: Option<PathBuf>,

        #[arg(short, long)]
        token: Option<String>,

        /// Number of parallel range requests
        #[arg(short, long)]
        workers: Option<usize>,

        /// Start over instead of reusing partial data
        #[arg(long)]
        no_resume: bool,
    },

    /// Listen for peers for a while and print what was found
    Peers {
        #[arg(short, long, default_value_t = 10)]
        seconds: u64,
    },
}
