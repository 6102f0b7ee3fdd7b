//! Magnet link parser
//!
//! Handles parsing of `magnet:?` URIs into the info hash, display name and
//! tracker list needed to bootstrap a metadata exchange.

use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Result, TorrentError};

/// Parsed magnet link information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagnetLink {
    /// SHA1 info hash from the `xt` parameter
    pub info_hash: [u8; 20],
    /// Display name (dn parameter)
    pub display_name: Option<String>,
    /// Tracker URLs (tr parameters), in link order
    pub trackers: Vec<String>,
}

impl MagnetLink {
    /// First tracker, the one used for bootstrapping
    pub fn tracker(&self) -> Option<&str> {
        self.trackers.first().map(String::as_str)
    }

    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }
}

/// Parser for magnet links
pub struct MagnetParser;

impl MagnetParser {
    /// Parse a magnet link string
    ///
    /// # Example
    /// ```ignore
    /// let magnet = "magnet:?xt=urn:btih:ad42ce8109f54c99613ce38f9b4d87e70f24a165&dn=magnet1.gif";
    /// let link = MagnetParser::parse(magnet)?;
    /// ```
    pub fn parse(magnet_uri: &str) -> Result<MagnetLink> {
        debug!("Parsing magnet link: {}", magnet_uri);

        let url = Url::parse(magnet_uri.trim()).map_err(|e| {
            warn!("Invalid magnet URL format: {}", e);
            TorrentError::InvalidMagnet(format!("invalid URI: {}", e))
        })?;

        if url.scheme() != "magnet" {
            return Err(TorrentError::InvalidMagnet(format!(
                "expected magnet scheme, got '{}'",
                url.scheme()
            )));
        }

        let mut info_hash = None;
        let mut display_name = None;
        let mut trackers = Vec::new();

        // query_pairs percent-decodes values and turns '+' into spaces
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "xt" => info_hash = Some(Self::extract_info_hash(&value)?),
                "dn" => display_name = Some(value.into_owned()),
                "tr" => trackers.push(value.into_owned()),
                _ => debug!("Ignoring magnet parameter: {}", key),
            }
        }

        let info_hash = info_hash.ok_or_else(|| {
            TorrentError::InvalidMagnet("missing info hash (xt=urn:btih:<hash>)".to_string())
        })?;

        info!(
            "Parsed magnet link: info_hash={}, name={}, trackers={}",
            hex::encode(info_hash),
            display_name.as_deref().unwrap_or("(none)"),
            trackers.len()
        );

        Ok(MagnetLink {
            info_hash,
            display_name,
            trackers,
        })
    }

    /// Extract the info hash from an `xt` value of the form `urn:btih:<40 hex>`
    fn extract_info_hash(xt_value: &str) -> Result<[u8; 20]> {
        let hash_str = xt_value.strip_prefix("urn:btih:").ok_or_else(|| {
            TorrentError::InvalidMagnet(format!("xt is not a BitTorrent info hash: {}", xt_value))
        })?;

        if hash_str.len() != 40 {
            return Err(TorrentError::InvalidMagnet(format!(
                "info hash has length {} (expected 40 hex characters)",
                hash_str.len()
            )));
        }

        let mut hash = [0u8; 20];
        hex::decode_to_slice(hash_str, &mut hash)
            .map_err(|e| TorrentError::InvalidMagnet(format!("info hash is not hex: {}", e)))?;
        Ok(hash)
    }
}
