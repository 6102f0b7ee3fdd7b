//! HTTP tracker client
//!
//! Announces to an HTTP tracker with a compact peer list request.

use std::net::SocketAddr;

use reqwest::Client;
use tracing::{debug, info, warn};

use super::response::TrackerResponse;
use crate::cli::ClientConfig;
use crate::error::{Result, TorrentError};
use crate::torrent::{MagnetLink, TorrentInfo};

/// `left` reported while the torrent length is still unknown (magnet bootstrap)
pub const UNKNOWN_LENGTH_LEFT: u64 = 999;

/// HTTP tracker client
pub struct TrackerClient {
    client: Client,
    peer_id: [u8; 20],
    port: u16,
}

impl TrackerClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.tracker_timeout).build()?;
        Ok(Self::with_http_client(client, config))
    }

    fn with_http_client(client: Client, config: &ClientConfig) -> Self {
        Self {
            client,
            peer_id: config.peer_id,
            port: config.port,
        }
    }

    /// Build the announce URL with all query parameters
    pub fn announce_url(&self, announce: &str, info_hash: &[u8; 20], left: u64) -> String {
        let separator = if announce.contains('?') { '&' } else { '?' };
        format!(
            "{}{}info_hash={}&peer_id={}&port={}&uploaded=0&downloaded=0&left={}&compact=1",
            announce,
            separator,
            urlencoding::encode_binary(info_hash),
            urlencoding::encode_binary(&self.peer_id),
            self.port,
            left
        )
    }

    /// Announce to `announce` and return the decoded response
    pub async fn request_peers(&self, announce: &str, info_hash: &[u8; 20], left: u64) -> Result<TrackerResponse> {
        let url = self.announce_url(announce, info_hash, left);
        debug!("Announcing to tracker: {}", url);

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            warn!("Tracker {} answered HTTP {}", announce, status);
        }

        let parsed = TrackerResponse::parse(&body)?;
        info!("Tracker {} returned {} peers", announce, parsed.peers.len());
        Ok(parsed)
    }

    /// Peers for a parsed torrent file
    pub async fn peers_for_torrent(&self, torrent: &TorrentInfo) -> Result<Vec<SocketAddr>> {
        let response = self
            .request_peers(&torrent.announce, &torrent.info_hash, torrent.length)
            .await?;
        Ok(response.peers)
    }

    /// Peers for a magnet link, announced to its first tracker
    pub async fn peers_for_magnet(&self, magnet: &MagnetLink) -> Result<Vec<SocketAddr>> {
        let tracker = magnet
            .tracker()
            .ok_or_else(|| TorrentError::InvalidMagnet("magnet link has no tracker".to_string()))?;
        let response = self
            .request_peers(tracker, &magnet.info_hash, UNKNOWN_LENGTH_LEFT)
            .await?;
        Ok(response.peers)
    }
}
