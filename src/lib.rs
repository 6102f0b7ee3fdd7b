//! bittorrent-client
//!
//! A BitTorrent client: bencode codec, metainfo and magnet parsing, HTTP
//! tracker announces, the peer wire protocol with metadata exchange, and a
//! concurrent piece downloader.

pub mod bencode;
pub mod cli;
pub mod download;
pub mod error;
pub mod peer;
pub mod protocol;
pub mod torrent;
pub mod tracker;

pub use error::{Result, TorrentError};

pub use bencode::{BencodeDict, BencodeValue};
pub use cli::{CliArgs, ClientConfig, Command};
pub use download::{DownloadManager, PieceResult, PieceWork};
pub use peer::{ConnectionState, Peer, PeerConnection};
pub use protocol::{ExtensionHandshake, Handshake, Message, MessageId, MetadataMessage};
pub use torrent::{MagnetLink, MagnetParser, TorrentInfo, TorrentParser};
pub use tracker::{TrackerClient, TrackerResponse};
