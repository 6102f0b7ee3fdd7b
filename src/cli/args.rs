//! CLI arguments module
//!
//! Defines command-line argument parsing using clap.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// CLI arguments for the BitTorrent client
#[derive(Debug, Parser)]
#[command(name = "bittorrent-client")]
#[command(about = "A BitTorrent client: bencode, trackers, peers, magnet links and piece downloads", long_about = None)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose logging on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet mode (only errors are logged)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Peer ID to announce, exactly 20 bytes
    #[arg(long, global = true, value_name = "ID", allow_hyphen_values = true)]
    pub peer_id: Option<String>,

    /// Use a freshly generated peer ID instead of the default
    #[arg(long, global = true, conflicts_with = "peer_id")]
    pub random_peer_id: bool,

    /// Port reported to the tracker
    #[arg(long, global = true, default_value_t = 6881)]
    pub port: u16,
}

/// Subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Decode a bencoded value and print it as JSON
    Decode {
        #[arg(allow_hyphen_values = true)]
        value: String,
    },

    /// Print tracker, length, info hash and piece hashes of a torrent file
    Info { torrent: PathBuf },

    /// List the peers the tracker returns for a torrent file
    Peers { torrent: PathBuf },

    /// Handshake with one peer and print its peer ID
    Handshake { torrent: PathBuf, peer: SocketAddr },

    /// Download and verify a single piece
    #[command(name = "download_piece", alias = "download-piece")]
    DownloadPiece {
        #[arg(short, long)]
        output: PathBuf,
        torrent: PathBuf,
        index: u32,
    },

    /// Download and verify the whole file
    Download {
        #[arg(short, long)]
        output: PathBuf,
        torrent: PathBuf,
    },

    /// Print the tracker and info hash of a magnet link
    #[command(name = "magnet_parse", alias = "magnet-parse")]
    MagnetParse { uri: String },

    /// Handshake with the first peer of a magnet link, including the extension handshake
    #[command(name = "magnet_handshake", alias = "magnet-handshake")]
    MagnetHandshake { uri: String },

    /// Fetch the metadata of a magnet link and print it like `info`
    #[command(name = "magnet_info", alias = "magnet-info")]
    MagnetInfo { uri: String },

    /// Download one piece of a magnet link
    #[command(name = "magnet_download_piece", alias = "magnet-download-piece")]
    MagnetDownloadPiece {
        #[arg(short, long)]
        output: PathBuf,
        uri: String,
        index: u32,
    },

    /// Download the whole file of a magnet link
    #[command(name = "magnet_download", alias = "magnet-download")]
    MagnetDownload {
        #[arg(short, long)]
        output: PathBuf,
        uri: String,
    },
}

impl CliArgs {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the log level based on verbosity settings
    pub fn log_level(&self) -> tracing::Level {
        if self.verbose {
            tracing::Level::DEBUG
        } else if self.quiet {
            tracing::Level::ERROR
        } else {
            tracing::Level::WARN
        }
    }
}
