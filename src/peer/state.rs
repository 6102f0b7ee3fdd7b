//! Peer state module
//!
//! Defines the per-connection state machine and what we know about the
//! remote peer.

use std::fmt;
use std::net::SocketAddr;

use tracing::{debug, trace};

use crate::protocol::wire::MAX_FRAME_LEN;

/// Piece indices accepted when the torrent's piece count is unknown; a
/// bitfield frame cannot describe more
const DEFAULT_PIECE_LIMIT: usize = MAX_FRAME_LEN * 8;

/// Lifecycle of one peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// TCP connection established
    #[default]
    Connected,
    /// Our handshake is on the wire
    HandshakeSent,
    /// Peer's handshake checked against the info hash
    HandshakeVerified,
    /// Peer's bitfield (or its absence) has been processed
    BitfieldReceived,
    /// Extension handshakes exchanged
    ExtensionNegotiated,
    /// `unchoke` + `interested` sent; pieces can be requested
    Ready,
    /// Connection torn down
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Represents a peer with its state
#[derive(Debug, Clone)]
pub struct Peer {
    /// Peer address
    pub addr: SocketAddr,
    /// Peer identifier, known after the handshake
    pub peer_id: Option<[u8; 20]>,
    /// Current connection state
    pub state: ConnectionState,
    /// They're choking us
    pub peer_choking: bool,
    /// We told them we're interested
    pub am_interested: bool,
    /// Extension-protocol bit set in their handshake
    pub supports_extensions: bool,
    /// Their ut_metadata id, once negotiated
    pub ut_metadata: Option<u8>,
    /// Metadata size from their extension handshake
    pub metadata_size: Option<u64>,
    /// Pieces they have (bitfield, high bit first)
    pub bitfield: Vec<u8>,
    /// Number of pieces in the torrent, when known
    pub piece_count: Option<usize>,
    /// Pieces that failed the hash check when downloaded from this peer
    pub integrity_failures: u32,
    /// Verified pieces downloaded from this peer
    pub pieces_downloaded: u32,
}

impl Peer {
    /// Create a new peer
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            peer_id: None,
            state: ConnectionState::Connected,
            peer_choking: true,
            am_interested: false,
            supports_extensions: false,
            ut_metadata: None,
            metadata_size: None,
            bitfield: Vec::new(),
            piece_count: None,
            integrity_failures: 0,
            pieces_downloaded: 0,
        }
    }

    /// Set connection state
    pub fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!("Peer {}: {} -> {}", self.addr, self.state, state);
            self.state = state;
        }
    }

    fn piece_limit(&self) -> usize {
        self.piece_count.unwrap_or(DEFAULT_PIECE_LIMIT)
    }

    /// Replace the peer's bitfield, dropping bytes past the last piece
    pub fn update_bitfield(&mut self, mut bitfield: Vec<u8>) {
        bitfield.truncate(self.piece_limit().div_ceil(8));
        self.bitfield = bitfield;
    }

    /// Check if peer has specific piece
    pub fn has_piece(&self, piece_index: usize) -> bool {
        let byte_index = piece_index / 8;
        let bit_index = 7 - (piece_index % 8);
        self.bitfield
            .get(byte_index)
            .is_some_and(|byte| (byte >> bit_index) & 1 == 1)
    }

    /// Mark a piece as available, growing the bitfield as needed
    ///
    /// Indices past the torrent's last piece are ignored.
    pub fn set_piece(&mut self, piece_index: usize) {
        if piece_index >= self.piece_limit() {
            trace!("Peer {} announced out-of-range piece {}", self.addr, piece_index);
            return;
        }
        let byte_index = piece_index / 8;
        if byte_index >= self.bitfield.len() {
            self.bitfield.resize(byte_index + 1, 0);
        }
        self.bitfield[byte_index] |= 1 << (7 - (piece_index % 8));
    }

    /// Check if we can request from peer
    pub fn can_request(&self) -> bool {
        !self.peer_choking
    }

    /// Count one hash mismatch and return the running total
    pub fn record_integrity_failure(&mut self) -> u32 {
        self.integrity_failures = self.integrity_failures.saturating_add(1);
        self.integrity_failures
    }

    /// Increment pieces downloaded
    pub fn increment_downloaded(&mut self) {
        self.pieces_downloaded = self.pieces_downloaded.saturating_add(1);
    }

    /// Get the peer ID as a hex string
    pub fn peer_id_hex(&self) -> Option<String> {
        self.peer_id.map(hex::encode)
    }
}
