//! BitTorrent handshake protocol
//!
//! Handles the initial handshake between peers.

use bytes::{BufMut, BytesMut};
use tracing::{debug, trace, warn};

use crate::error::{Result, TorrentError};

/// BitTorrent protocol identifier string
pub const PROTOCOL_STRING: &[u8; 19] = b"BitTorrent protocol";

/// Length of the protocol string
pub const PROTOCOL_LENGTH: u8 = 19;

/// Size of a serialized handshake
pub const HANDSHAKE_LEN: usize = 68;

/// Reserved byte carrying the extension-protocol flag
const EXTENSION_BYTE: usize = 5;

/// Extension-protocol flag within `reserved[EXTENSION_BYTE]`
const EXTENSION_FLAG: u8 = 0x10;

/// BitTorrent handshake message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Protocol identifier (19 bytes)
    pub protocol_id: [u8; 19],
    /// Reserved bytes advertising optional capabilities
    pub reserved: [u8; 8],
    /// Torrent info hash
    pub info_hash: [u8; 20],
    /// Sender's peer ID
    pub peer_id: [u8; 20],
}

impl Handshake {
    /// Create a new handshake with info_hash and peer_id
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self {
            protocol_id: *PROTOCOL_STRING,
            reserved: [0u8; 8],
            info_hash,
            peer_id,
        }
    }

    /// Create a handshake advertising extension-protocol support
    pub fn with_extensions(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        let mut handshake = Self::new(info_hash, peer_id);
        handshake.reserved[EXTENSION_BYTE] |= EXTENSION_FLAG;
        handshake
    }

    /// Whether the sender set the extension-protocol reserved bit
    pub fn supports_extensions(&self) -> bool {
        self.reserved[EXTENSION_BYTE] & EXTENSION_FLAG != 0
    }

    /// Serialize the handshake to bytes
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(HANDSHAKE_LEN);
        buf.put_u8(PROTOCOL_LENGTH);
        buf.put_slice(&self.protocol_id);
        buf.put_slice(&self.reserved);
        buf.put_slice(&self.info_hash);
        buf.put_slice(&self.peer_id);
        trace!("Handshake serialized: {} bytes", buf.len());
        buf.to_vec()
    }

    /// Deserialize a handshake from bytes
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < HANDSHAKE_LEN {
            return Err(TorrentError::HandshakeMismatch(format!(
                "expected {} bytes, got {}",
                HANDSHAKE_LEN,
                data.len()
            )));
        }

        let protocol_length = data[0];
        if protocol_length != PROTOCOL_LENGTH {
            return Err(TorrentError::HandshakeMismatch(format!(
                "protocol length {} (expected {})",
                protocol_length, PROTOCOL_LENGTH
            )));
        }

        if &data[1..20] != PROTOCOL_STRING {
            return Err(TorrentError::HandshakeMismatch(format!(
                "unknown protocol {:?}",
                String::from_utf8_lossy(&data[1..20])
            )));
        }

        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&data[20..28]);
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&data[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&data[48..68]);

        debug!(
            "Handshake from peer {} (reserved {})",
            hex::encode(peer_id),
            hex::encode(reserved)
        );
        Ok(Self {
            protocol_id: *PROTOCOL_STRING,
            reserved,
            info_hash,
            peer_id,
        })
    }

    /// Check the info hash against the torrent we are talking about
    pub fn verify(&self, expected_info_hash: &[u8; 20]) -> Result<()> {
        if self.info_hash != *expected_info_hash {
            warn!(
                "Info hash mismatch: expected {}, got {}",
                hex::encode(expected_info_hash),
                hex::encode(self.info_hash)
            );
            return Err(TorrentError::HandshakeMismatch(format!(
                "info hash {} does not match {}",
                hex::encode(self.info_hash),
                hex::encode(expected_info_hash)
            )));
        }
        Ok(())
    }
}
