//! Torrent information structures
//!
//! Provides the single-file torrent model shared by `.torrent` parsing and
//! metadata fetched from peers for magnet links.

use tracing::debug;

use crate::bencode::BencodeValue;
use crate::error::{Result, TorrentError};
use crate::torrent::parser::TorrentParser;

/// High-level torrent information
#[derive(Debug, Clone)]
pub struct TorrentInfo {
    /// Tracker announce URL
    pub announce: String,
    /// Suggested file name
    pub name: String,
    /// Total file size in bytes
    pub length: u64,
    /// Size of each piece in bytes (the last piece may be shorter)
    pub piece_length: u64,
    /// Piece hashes, indexed by piece number
    pub pieces: Vec<[u8; 20]>,
    /// SHA1 hash of the canonical bencoding of the info dictionary
    pub info_hash: [u8; 20],
    /// The info dictionary exactly as parsed
    pub info: BencodeValue,
}

impl TorrentInfo {
    /// Build torrent information from a parsed info dictionary
    ///
    /// Used both for `.torrent` files and for metadata received over the
    /// wire, in which case `announce` comes from the magnet link.
    pub fn from_info_dict(announce: String, info: BencodeValue) -> Result<Self> {
        if info.as_dict().is_none() {
            return Err(TorrentError::InvalidMetainfo(format!(
                "info must be a dictionary, got {}",
                info.type_name()
            )));
        }

        let name = info.require_str("name")?.to_string();
        let length = non_negative(info.require_int("length")?, "length")?;
        let piece_length = non_negative(info.require_int("piece length")?, "piece length")?;
        if piece_length == 0 {
            return Err(TorrentError::InvalidMetainfo("piece length must be positive".to_string()));
        }
        let pieces = TorrentParser::split_piece_hashes(info.require_bytes("pieces")?)?;

        let expected_pieces = length.div_ceil(piece_length) as usize;
        if pieces.len() != expected_pieces {
            return Err(TorrentError::InvalidMetainfo(format!(
                "{} piece hashes for {} bytes at piece length {} (expected {})",
                pieces.len(),
                length,
                piece_length,
                expected_pieces
            )));
        }

        let info_hash = TorrentParser::info_hash(&info);
        debug!(
            "Torrent '{}': {} bytes, {} pieces of {} bytes, info hash {}",
            name,
            length,
            pieces.len(),
            piece_length,
            hex::encode(info_hash)
        );

        Ok(Self {
            announce,
            name,
            length,
            piece_length,
            pieces,
            info_hash,
            info,
        })
    }

    /// Get number of pieces in torrent
    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// Get piece hash for a specific piece index
    pub fn piece_hash(&self, index: usize) -> Option<[u8; 20]> {
        self.pieces.get(index).copied()
    }

    /// Length of piece `index`; only the last piece can be shorter
    pub fn piece_length_of(&self, index: usize) -> Option<u64> {
        self.piece_bounds(index).map(|(start, end)| end - start)
    }

    /// Byte range `[start, end)` covered by piece `index`
    pub fn piece_bounds(&self, index: usize) -> Option<(u64, u64)> {
        if index >= self.pieces.len() {
            return None;
        }

        let start = (index as u64) * self.piece_length;
        let end = std::cmp::min(start + self.piece_length, self.length);
        Some((start, end))
    }

    /// Get info hash as a hex string
    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }

    /// Piece hashes as lowercase hex, in piece order
    pub fn piece_hashes_hex(&self) -> Vec<String> {
        self.pieces.iter().map(hex::encode).collect()
    }
}

fn non_negative(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| TorrentError::InvalidMetainfo(format!("{} must not be negative, got {}", field, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::BencodeDict;

    fn info_dict(length: i64, piece_length: i64, piece_count: usize) -> BencodeValue {
        let mut dict = BencodeDict::new();
        dict.insert(b"name".to_vec(), "sample.txt".into());
        dict.insert(b"length".to_vec(), length.into());
        dict.insert(b"piece length".to_vec(), piece_length.into());
        dict.insert(b"pieces".to_vec(), vec![0xabu8; 20 * piece_count].into());
        BencodeValue::Dict(dict)
    }

    #[test]
    fn test_from_info_dict() {
        let info = TorrentInfo::from_info_dict("http://tracker.example.com/announce".to_string(), info_dict(92063, 32768, 3))
            .unwrap();

        assert_eq!(info.name, "sample.txt");
        assert_eq!(info.length, 92063);
        assert_eq!(info.piece_count(), 3);
        assert_eq!(info.piece_hash(0), Some([0xab; 20]));
        assert_eq!(info.piece_hash(3), None);
        assert_eq!(info.info_hash_hex().len(), 40);
    }

    #[test]
    fn test_piece_geometry() {
        let info = TorrentInfo::from_info_dict(String::new(), info_dict(92063, 32768, 3)).unwrap();

        assert_eq!(info.piece_bounds(0), Some((0, 32768)));
        assert_eq!(info.piece_bounds(2), Some((65536, 92063)));
        assert_eq!(info.piece_length_of(1), Some(32768));
        assert_eq!(info.piece_length_of(2), Some(92063 - 65536));
        assert_eq!(info.piece_length_of(3), None);
    }

    #[test]
    fn test_exact_multiple_last_piece_is_full() {
        let info = TorrentInfo::from_info_dict(String::new(), info_dict(65536, 32768, 2)).unwrap();
        assert_eq!(info.piece_length_of(1), Some(32768));
    }

    #[test]
    fn test_rejects_inconsistent_piece_count() {
        let err = TorrentInfo::from_info_dict(String::new(), info_dict(92063, 32768, 2)).unwrap_err();
        assert!(matches!(err, TorrentError::InvalidMetainfo(_)));
    }

    #[test]
    fn test_rejects_bad_numbers() {
        assert!(TorrentInfo::from_info_dict(String::new(), info_dict(-1, 32768, 0)).is_err());
        assert!(TorrentInfo::from_info_dict(String::new(), info_dict(100, 0, 1)).is_err());
    }

    #[test]
    fn test_rejects_non_dict() {
        let err = TorrentInfo::from_info_dict(String::new(), BencodeValue::Integer(1)).unwrap_err();
        assert!(err.to_string().contains("dictionary"));
    }
}
