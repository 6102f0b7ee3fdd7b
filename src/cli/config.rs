//! CLI configuration module
//!
//! `ClientConfig` is the explicit context handed to the tracker client, peer
//! connections and the download engine.

use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::info;

use crate::cli::args::CliArgs;

/// Peer ID used unless one is supplied on the command line
pub const DEFAULT_PEER_ID: [u8; 20] = *b"00112233445566778899";

/// Prefix of generated peer IDs
pub const PEER_ID_PREFIX: &[u8; 8] = b"-RS0001-";

/// Largest block size peers are expected to honor
pub const MAX_BLOCK_SIZE: u32 = 128 * 1024;

/// Configuration for the BitTorrent client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Our peer ID
    pub peer_id: [u8; 20],
    /// Port reported to trackers
    pub port: u16,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Time allowed for the peer's handshake to arrive
    pub handshake_timeout: Duration,
    /// Time allowed for the peer's bitfield to arrive
    pub bitfield_timeout: Duration,
    /// Time allowed for the peer's extension handshake and metadata replies
    pub extension_timeout: Duration,
    /// I/O deadline for one piece attempt
    pub piece_timeout: Duration,
    /// HTTP timeout for tracker announces
    pub tracker_timeout: Duration,
    /// Bytes requested per `request` message
    pub block_size: u32,
    /// Requests kept in flight per connection
    pub max_backlog: usize,
    /// Hash mismatches tolerated from one peer before dropping it
    pub max_integrity_failures: u32,
    /// Local ut_metadata extension id
    pub metadata_extension_id: u8,
    /// Check received metadata length against the peer's `metadata_size`
    pub verify_metadata_size: bool,
    /// Pause before pulling again after requeueing an unavailable piece
    pub requeue_backoff: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            peer_id: DEFAULT_PEER_ID,
            port: 6881,
            connect_timeout: Duration::from_secs(3),
            handshake_timeout: Duration::from_secs(3),
            bitfield_timeout: Duration::from_secs(5),
            extension_timeout: Duration::from_secs(5),
            piece_timeout: Duration::from_secs(30),
            tracker_timeout: Duration::from_secs(15),
            block_size: 16 * 1024,
            max_backlog: 5,
            max_integrity_failures: 3,
            metadata_extension_id: 16,
            verify_metadata_size: true,
            requeue_backoff: Duration::from_millis(10),
        }
    }
}

impl ClientConfig {
    /// Create configuration from CLI arguments
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let peer_id = if args.random_peer_id {
            Self::generate_peer_id()
        } else if let Some(id) = &args.peer_id {
            Self::parse_peer_id(id)?
        } else {
            DEFAULT_PEER_ID
        };

        let config = Self {
            peer_id,
            port: args.port,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Generate a random peer ID with the client prefix
    pub fn generate_peer_id() -> [u8; 20] {
        let mut peer_id = [0u8; 20];
        peer_id[..8].copy_from_slice(PEER_ID_PREFIX);
        peer_id[8..].copy_from_slice(&rand::random::<[u8; 12]>());
        info!("Generated new peer ID: {}", hex::encode(peer_id));
        peer_id
    }

    fn parse_peer_id(id: &str) -> Result<[u8; 20]> {
        id.as_bytes()
            .try_into()
            .map_err(|_| anyhow!("peer id must be exactly 20 bytes, got {}", id.len()))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }

        if self.block_size == 0 || self.block_size > MAX_BLOCK_SIZE {
            return Err(anyhow!(
                "block_size must be between 1 and {}, got {}",
                MAX_BLOCK_SIZE,
                self.block_size
            ));
        }

        if self.max_backlog == 0 {
            return Err(anyhow!("max_backlog must be at least 1"));
        }

        if self.max_integrity_failures == 0 {
            return Err(anyhow!("max_integrity_failures must be at least 1"));
        }

        if self.metadata_extension_id == 0 {
            return Err(anyhow!("metadata_extension_id 0 is reserved for the extension handshake"));
        }

        Ok(())
    }
}
