//! Piece work items
//!
//! A piece to fetch, the verified bytes of a fetched piece, and the
//! in-flight bookkeeping for one download attempt.

use sha1::{Digest, Sha1};

use crate::error::{Result, TorrentError};
use crate::torrent::TorrentInfo;

/// One piece to download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceWork {
    /// Piece index
    pub index: u32,
    /// Expected SHA1 hash
    pub hash: [u8; 20],
    /// Length in bytes
    pub length: u32,
}

impl PieceWork {
    /// Work item for piece `index` of `torrent`
    pub fn for_index(torrent: &TorrentInfo, index: u32) -> Result<Self> {
        let i = index as usize;
        let (hash, length) = torrent
            .piece_hash(i)
            .zip(torrent.piece_length_of(i))
            .ok_or(TorrentError::InvalidPieceIndex {
                index,
                count: torrent.piece_count(),
            })?;
        let length = u32::try_from(length)
            .map_err(|_| TorrentError::InvalidMetainfo(format!("piece length {} is too large", length)))?;

        Ok(Self { index, hash, length })
    }

    /// Work items for every piece, in index order
    pub fn all(torrent: &TorrentInfo) -> Result<Vec<Self>> {
        (0..torrent.piece_count() as u32)
            .map(|index| Self::for_index(torrent, index))
            .collect()
    }

    /// Check downloaded bytes against the expected hash
    pub fn verify(&self, data: &[u8]) -> bool {
        data.len() == self.length as usize && Sha1::digest(data).as_slice() == self.hash
    }
}

/// A verified piece
#[derive(Debug, Clone)]
pub struct PieceResult {
    pub index: u32,
    pub data: Vec<u8>,
}

/// State of one in-flight piece attempt
#[derive(Debug)]
pub struct PieceProgress {
    index: u32,
    buf: Vec<u8>,
    block_size: u32,
    /// Bytes received so far
    pub downloaded: u32,
    /// Bytes requested so far
    pub requested: u32,
    /// Requests sent but not yet answered
    pub backlog: usize,
}

impl PieceProgress {
    pub fn new(work: &PieceWork, block_size: u32) -> Self {
        Self {
            index: work.index,
            buf: vec![0; work.length as usize],
            block_size,
            downloaded: 0,
            requested: 0,
            backlog: 0,
        }
    }

    /// Next block to request as `(begin, length)`, never past the piece end
    pub fn next_request(&mut self) -> Option<(u32, u32)> {
        let length = self.buf.len() as u32;
        if self.requested >= length {
            return None;
        }

        let begin = self.requested;
        let size = self.block_size.min(length - begin);
        self.requested += size;
        self.backlog += 1;
        Some((begin, size))
    }

    /// Copy a received block into place
    ///
    /// Blocks may arrive in any order; each lands at its own offset.
    pub fn record_block(&mut self, index: u32, begin: u32, block: &[u8]) -> Result<()> {
        if index != self.index {
            return Err(TorrentError::InvalidPieceMessage(format!(
                "expected piece {}, got {}",
                self.index, index
            )));
        }

        let start = begin as usize;
        let end = start
            .checked_add(block.len())
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| {
                TorrentError::InvalidPieceMessage(format!(
                    "block at {} with {} bytes overruns piece {} of {} bytes",
                    begin,
                    block.len(),
                    index,
                    self.buf.len()
                ))
            })?;

        self.buf[start..end].copy_from_slice(block);
        self.downloaded = self.downloaded.saturating_add(block.len() as u32);
        self.backlog = self.backlog.saturating_sub(1);
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.downloaded as usize >= self.buf.len()
    }

    pub fn into_data(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::{BencodeDict, BencodeValue};

    fn torrent(length: i64, piece_length: i64) -> TorrentInfo {
        let count = (length + piece_length - 1) / piece_length;
        let mut info = BencodeDict::new();
        info.insert(b"name".to_vec(), "sample.txt".into());
        info.insert(b"length".to_vec(), length.into());
        info.insert(b"piece length".to_vec(), piece_length.into());
        info.insert(b"pieces".to_vec(), vec![7u8; 20 * count as usize].into());
        TorrentInfo::from_info_dict("http://tracker".to_string(), BencodeValue::Dict(info)).unwrap()
    }

    #[test]
    fn test_piece_work_lengths() {
        let torrent = torrent(92063, 32768);
        let work = PieceWork::all(&torrent).unwrap();

        assert_eq!(work.len(), 3);
        assert_eq!(work[0].length, 32768);
        assert_eq!(work[1].length, 32768);
        assert_eq!(work[2].length, 92063 - 2 * 32768);
        assert_eq!(work[2].index, 2);
    }

    #[test]
    fn test_piece_work_exact_multiple() {
        let torrent = torrent(65536, 32768);
        let work = PieceWork::all(&torrent).unwrap();
        assert_eq!(work[1].length, 32768);
    }

    #[test]
    fn test_piece_work_invalid_index() {
        let torrent = torrent(65536, 32768);
        assert!(matches!(
            PieceWork::for_index(&torrent, 2),
            Err(TorrentError::InvalidPieceIndex { index: 2, count: 2 })
        ));
    }

    #[test]
    fn test_verify() {
        let data = b"hello world".to_vec();
        let work = PieceWork {
            index: 0,
            hash: Sha1::digest(&data).into(),
            length: data.len() as u32,
        };

        assert!(work.verify(&data));
        assert!(!work.verify(b"hello worle"));
        assert!(!work.verify(b"hello"));
    }

    #[test]
    fn test_next_request_stops_at_piece_end() {
        let work = PieceWork { index: 0, hash: [0; 20], length: 40000 };
        let mut progress = PieceProgress::new(&work, 16384);

        assert_eq!(progress.next_request(), Some((0, 16384)));
        assert_eq!(progress.next_request(), Some((16384, 16384)));
        assert_eq!(progress.next_request(), Some((32768, 40000 - 32768)));
        assert_eq!(progress.next_request(), None);
        assert_eq!(progress.backlog, 3);
    }

    #[test]
    fn test_record_blocks_out_of_order() {
        let work = PieceWork { index: 4, hash: [0; 20], length: 6 };
        let mut progress = PieceProgress::new(&work, 4);
        progress.next_request();
        progress.next_request();

        progress.record_block(4, 4, b"ef").unwrap();
        assert!(!progress.is_complete());
        progress.record_block(4, 0, b"abcd").unwrap();

        assert!(progress.is_complete());
        assert_eq!(progress.backlog, 0);
        assert_eq!(progress.into_data(), b"abcdef");
    }

    #[test]
    fn test_record_block_rejects_bad_blocks() {
        let work = PieceWork { index: 1, hash: [0; 20], length: 8 };
        let mut progress = PieceProgress::new(&work, 4);

        assert!(matches!(
            progress.record_block(2, 0, b"abcd"),
            Err(TorrentError::InvalidPieceMessage(_))
        ));
        assert!(matches!(
            progress.record_block(1, 6, b"abcd"),
            Err(TorrentError::InvalidPieceMessage(_))
        ));
        assert!(matches!(
            progress.record_block(1, u32::MAX, b"a"),
            Err(TorrentError::InvalidPieceMessage(_))
        ));
        assert_eq!(progress.downloaded, 0);
    }
}
