//! Extension protocol messages
//!
//! The BEP-10 extension handshake and the BEP-9 `ut_metadata` messages that
//! travel inside `extended` frames.

use tracing::debug;

use crate::bencode::{self, BencodeDict, BencodeValue};
use crate::error::{Result, TorrentError};

/// Extended message id reserved for the extension handshake
pub const EXTENSION_HANDSHAKE_ID: u8 = 0;

/// Name of the metadata exchange extension
pub const UT_METADATA: &str = "ut_metadata";

/// Metadata is exchanged in pieces of this size (the last may be shorter)
pub const METADATA_PIECE_SIZE: usize = 16 * 1024;

/// Largest info dictionary we will fetch from a peer
pub const MAX_METADATA_SIZE: u64 = 16 * 1024 * 1024;

/// Payload of the extension handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionHandshake {
    /// Id the sender wants `ut_metadata` messages addressed to
    pub ut_metadata: u8,
    /// Size of the info dictionary, when the sender has it
    pub metadata_size: Option<u64>,
}

impl ExtensionHandshake {
    pub fn new(ut_metadata: u8, metadata_size: Option<u64>) -> Self {
        Self {
            ut_metadata,
            metadata_size,
        }
    }

    /// Bencoded handshake dictionary
    pub fn encode(&self) -> Vec<u8> {
        let mut m = BencodeDict::new();
        m.insert(UT_METADATA.as_bytes().to_vec(), i64::from(self.ut_metadata).into());

        let mut dict = BencodeDict::new();
        dict.insert(b"m".to_vec(), BencodeValue::Dict(m));
        if let Some(size) = self.metadata_size {
            dict.insert(b"metadata_size".to_vec(), (size as i64).into());
        }
        bencode::encode(&BencodeValue::Dict(dict))
    }

    /// Parse a peer's handshake dictionary
    ///
    /// `m.ut_metadata` must be an integer in 1..=255.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let (value, _) = bencode::decode(payload)?;

        let id = value
            .get("m")
            .and_then(|m| m.get(UT_METADATA))
            .ok_or_else(|| TorrentError::InvalidExtensionID("peer does not advertise ut_metadata".to_string()))?;
        let ut_metadata = id
            .as_int()
            .and_then(|id| u8::try_from(id).ok())
            .filter(|&id| id != 0)
            .ok_or_else(|| TorrentError::InvalidExtensionID(format!("ut_metadata id {:?} is not in 1..=255", id)))?;

        let metadata_size = value
            .get("metadata_size")
            .and_then(BencodeValue::as_int)
            .and_then(|size| u64::try_from(size).ok());

        debug!(
            "Peer extension handshake: ut_metadata={}, metadata_size={:?}",
            ut_metadata, metadata_size
        );
        Ok(Self {
            ut_metadata,
            metadata_size,
        })
    }
}

/// `ut_metadata` message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataMessage {
    /// msg_type 0
    Request { piece: u32 },
    /// msg_type 1, followed by the raw piece bytes
    Data {
        piece: u32,
        total_size: Option<u64>,
        data: Vec<u8>,
    },
    /// msg_type 2
    Reject { piece: u32 },
}

impl MetadataMessage {
    fn msg_type(&self) -> i64 {
        match self {
            MetadataMessage::Request { .. } => 0,
            MetadataMessage::Data { .. } => 1,
            MetadataMessage::Reject { .. } => 2,
        }
    }

    pub fn piece(&self) -> u32 {
        match self {
            MetadataMessage::Request { piece }
            | MetadataMessage::Data { piece, .. }
            | MetadataMessage::Reject { piece } => *piece,
        }
    }

    /// Bencoded header, with the raw bytes appended for `Data`
    pub fn encode(&self) -> Vec<u8> {
        let mut dict = BencodeDict::new();
        dict.insert(b"msg_type".to_vec(), self.msg_type().into());
        dict.insert(b"piece".to_vec(), i64::from(self.piece()).into());
        if let MetadataMessage::Data {
            total_size: Some(size), ..
        } = self
        {
            dict.insert(b"total_size".to_vec(), (*size as i64).into());
        }

        let mut out = bencode::encode(&BencodeValue::Dict(dict));
        if let MetadataMessage::Data { data, .. } = self {
            out.extend_from_slice(data);
        }
        out
    }

    /// Parse a message; for `Data` everything after the dictionary is the piece
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let (header, consumed) = bencode::decode(payload)?;

        let msg_type = header
            .require_int("msg_type")
            .map_err(|_| TorrentError::MalformedMessage("ut_metadata message without msg_type".to_string()))?;
        let piece = header
            .require_int("piece")
            .ok()
            .and_then(|p| u32::try_from(p).ok())
            .ok_or_else(|| TorrentError::MalformedMessage("ut_metadata message without valid piece".to_string()))?;

        match msg_type {
            0 => Ok(MetadataMessage::Request { piece }),
            1 => Ok(MetadataMessage::Data {
                piece,
                total_size: header
                    .get("total_size")
                    .and_then(BencodeValue::as_int)
                    .and_then(|size| u64::try_from(size).ok()),
                data: payload[consumed..].to_vec(),
            }),
            2 => Ok(MetadataMessage::Reject { piece }),
            other => Err(TorrentError::MalformedMessage(format!("unknown ut_metadata msg_type {}", other))),
        }
    }
}

/// Number of metadata pieces for an info dictionary of `size` bytes
///
/// Sizes above `MAX_METADATA_SIZE` are refused.
pub fn metadata_piece_count(size: u64) -> Result<u32> {
    let too_large = || {
        TorrentError::MetadataMismatch(format!(
            "metadata size {} exceeds the {} byte limit",
            size, MAX_METADATA_SIZE
        ))
    };
    if size > MAX_METADATA_SIZE {
        return Err(too_large());
    }
    u32::try_from(size.div_ceil(METADATA_PIECE_SIZE as u64).max(1)).map_err(|_| too_large())
}
