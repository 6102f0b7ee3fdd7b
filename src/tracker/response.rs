//! Tracker response schema
//!
//! Trackers answer with a bencoded dictionary carrying either a
//! `failure reason` or a compact `peers` string of 6-byte records.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use tracing::debug;

use crate::bencode;
use crate::error::{Result, TorrentError};

/// Size of one compact IPv4 peer record
pub const COMPACT_PEER_LEN: usize = 6;

/// Decoded announce response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerResponse {
    /// Seconds the tracker asks us to wait before re-announcing
    pub interval: Option<u64>,
    /// Peers in the order the tracker listed them
    pub peers: Vec<SocketAddr>,
}

impl TrackerResponse {
    /// Parse a bencoded announce response body
    pub fn parse(body: &[u8]) -> Result<Self> {
        let (value, _) = bencode::decode(body)?;
        if value.as_dict().is_none() {
            return Err(TorrentError::InvalidTrackerResponse(format!(
                "response must be a dictionary, got {}",
                value.type_name()
            )));
        }

        if let Some(reason) = value.get("failure reason").and_then(|v| v.as_bytes()) {
            return Err(TorrentError::TrackerFailure(String::from_utf8_lossy(reason).into_owned()));
        }

        let interval = value
            .get("interval")
            .and_then(|v| v.as_int())
            .and_then(|i| u64::try_from(i).ok());

        let peers = value
            .get("peers")
            .and_then(|v| v.as_bytes())
            .ok_or_else(|| TorrentError::InvalidTrackerResponse("no compact peers string".to_string()))?;
        let peers = parse_compact_peers(peers)?;

        debug!("Tracker returned {} peers (interval {:?})", peers.len(), interval);
        Ok(Self { interval, peers })
    }
}

/// Decode a compact peer list
///
/// Format per peer: 4 bytes IPv4 address + 2 bytes port (big-endian).
pub fn parse_compact_peers(bytes: &[u8]) -> Result<Vec<SocketAddr>> {
    if bytes.len() % COMPACT_PEER_LEN != 0 {
        return Err(TorrentError::MalformedPeerList(bytes.len()));
    }

    Ok(bytes
        .chunks_exact(COMPACT_PEER_LEN)
        .map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            SocketAddr::V4(SocketAddrV4::new(ip, port))
        })
        .collect())
}
