//! Error types for the BitTorrent client
//!
//! One error enum covers every layer: the bencode codec, metainfo parsing,
//! the tracker client, the peer wire and the download engine.

use std::net::SocketAddr;

use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, TorrentError>;

/// Comprehensive error type for torrent operations
#[derive(Debug, Error)]
pub enum TorrentError {
    /// Integer body is not a valid signed 64-bit number
    #[error("malformed bencode integer: {0:?}")]
    MalformedInteger(String),

    /// A byte string declared more bytes than remain in the input
    #[error("truncated bencode string: expected {expected} bytes, {available} available")]
    TruncatedString { expected: usize, available: usize },

    /// Lead byte does not start any bencode type
    #[error("unknown bencode type byte: 0x{0:02x}")]
    UnknownType(u8),

    /// Dictionary key decoded as something other than a byte string
    #[error("bencode dictionary key must be a byte string")]
    InvalidKeyType,

    /// Input ended inside an integer, list or dictionary
    #[error("unexpected end of bencode input")]
    UnexpectedEnd,

    /// Lists and dictionaries nested past the decoder's limit
    #[error("bencode nesting deeper than {0} levels")]
    NestingTooDeep(usize),

    /// Bytes left over after a value that must span the whole input
    #[error("{0} trailing bytes after bencode value")]
    TrailingData(usize),

    /// Missing or mistyped field in a torrent file or info dictionary
    #[error("invalid metainfo: {0}")]
    InvalidMetainfo(String),

    /// Magnet URI does not follow the expected key/value schema
    #[error("invalid magnet link: {0}")]
    InvalidMagnet(String),

    /// Tracker answered with a `failure reason`
    #[error("tracker failure: {0}")]
    TrackerFailure(String),

    /// Tracker response is missing a field or has one of the wrong type
    #[error("invalid tracker response: {0}")]
    InvalidTrackerResponse(String),

    /// Compact peer list is not a multiple of 6 bytes
    #[error("malformed peer list: {0} bytes is not a multiple of 6")]
    MalformedPeerList(usize),

    /// Transport failure talking to the tracker
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Peer handshake did not match protocol or info hash
    #[error("handshake mismatch: {0}")]
    HandshakeMismatch(String),

    /// Frame that cannot be decoded as a peer-wire message
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Peer closed the connection mid-frame
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// Peer advertised a ut_metadata id we cannot use
    #[error("invalid extension id: {0}")]
    InvalidExtensionID(String),

    /// Peer did not set the extension-protocol reserved bit
    #[error("peer {0} does not support the extension protocol")]
    UnsupportedExtension(SocketAddr),

    /// Metadata bytes disagree with the size hint or the info hash
    #[error("metadata mismatch: {0}")]
    MetadataMismatch(String),

    /// Peer answered a metadata request with a reject
    #[error("peer rejected metadata piece {0}")]
    MetadataRejected(u32),

    /// Malformed `piece` frame for the piece in flight
    #[error("invalid piece message: {0}")]
    InvalidPieceMessage(String),

    /// Downloaded piece does not hash to the expected value
    #[error("piece {index} failed integrity check")]
    IntegrityCheckFailed { index: u32 },

    /// Peer hit the integrity failure limit and was dropped
    #[error("peer {peer} unreliable after {failures} integrity failures")]
    PeerUnreliable { peer: SocketAddr, failures: u32 },

    /// Requested piece is outside the torrent
    #[error("piece index {index} out of range (torrent has {count} pieces)")]
    InvalidPieceIndex { index: u32, count: usize },

    /// Every worker exited before all pieces arrived
    #[error("download failed: {0}")]
    DownloadFailed(String),

    /// Bounded wait elapsed
    #[error("operation timed out")]
    Timeout,

    /// Underlying I/O failure
    #[error("io error: {0}")]
    Io(std::io::Error),
}

impl TorrentError {
    /// True for errors local to one peer connection, which the engine isolates
    pub fn is_peer_local(&self) -> bool {
        matches!(
            self,
            TorrentError::HandshakeMismatch(_)
                | TorrentError::MalformedMessage(_)
                | TorrentError::ConnectionClosed
                | TorrentError::InvalidExtensionID(_)
                | TorrentError::UnsupportedExtension(_)
                | TorrentError::MetadataMismatch(_)
                | TorrentError::MetadataRejected(_)
                | TorrentError::InvalidPieceMessage(_)
                | TorrentError::IntegrityCheckFailed { .. }
                | TorrentError::PeerUnreliable { .. }
                | TorrentError::Timeout
                | TorrentError::Io(_)
        )
    }
}

impl From<std::io::Error> for TorrentError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe => TorrentError::ConnectionClosed,
            _ => TorrentError::Io(err),
        }
    }
}

impl From<tokio::time::error::Elapsed> for TorrentError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        TorrentError::Timeout
    }
}
