//! Torrent file parser
//!
//! Handles parsing of .torrent files and extracting metadata.

use sha1::{Digest, Sha1};
use tracing::{debug, error, info, trace};

use crate::bencode::{self, BencodeValue};
use crate::error::{Result, TorrentError};
use crate::torrent::info::TorrentInfo;

/// Parser for .torrent files
pub struct TorrentParser;

impl TorrentParser {
    /// Parse a .torrent file from bytes
    pub fn parse_bytes(data: &[u8]) -> Result<TorrentInfo> {
        info!("Parsing torrent file from {} bytes", data.len());
        trace!("Torrent data (first 100 bytes): {:?}", &data[..data.len().min(100)]);

        let root = bencode::decode_exact(data)?;
        if root.as_dict().is_none() {
            return Err(TorrentError::InvalidMetainfo(format!(
                "torrent root must be a dictionary, got {}",
                root.type_name()
            )));
        }

        let announce = root.require_str("announce")?.to_string();
        let info = root.require_dict("info")?.clone();

        let torrent = TorrentInfo::from_info_dict(announce, info)?;
        info!("Successfully parsed torrent: {}", torrent.name);
        Ok(torrent)
    }

    /// Parse a .torrent file from a file path
    pub fn parse_file(path: &std::path::Path) -> Result<TorrentInfo> {
        info!("Loading torrent file from: {}", path.display());

        let data = std::fs::read(path).map_err(|e| {
            error!("Failed to read torrent file '{}': {}", path.display(), e);
            TorrentError::Io(e)
        })?;

        debug!("Read {} bytes from torrent file", data.len());
        Self::parse_bytes(&data)
    }

    /// SHA1 over the canonical re-encoding of an info dictionary
    ///
    /// The hash does not depend on how the original file laid out its bytes,
    /// only on the logical dictionary.
    pub fn info_hash(info: &BencodeValue) -> [u8; 20] {
        let mut hasher = Sha1::new();
        hasher.update(bencode::encode(info));
        hasher.finalize().into()
    }

    /// Split the concatenated `pieces` string into 20-byte hashes
    pub fn split_piece_hashes(pieces: &[u8]) -> Result<Vec<[u8; 20]>> {
        if pieces.len() % 20 != 0 {
            return Err(TorrentError::InvalidMetainfo(format!(
                "pieces field length must be a multiple of 20, got {}",
                pieces.len()
            )));
        }

        let hashes = pieces
            .chunks_exact(20)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        Ok(hashes)
    }
}
