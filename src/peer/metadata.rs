//! Metadata exchange
//!
//! Fetches the info dictionary of a magnet link from a single peer using the
//! `ut_metadata` extension.

use std::net::SocketAddr;

use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::bencode;
use crate::cli::ClientConfig;
use crate::error::{Result, TorrentError};
use crate::peer::PeerConnection;
use crate::protocol::extension::{metadata_piece_count, MAX_METADATA_SIZE};
use crate::protocol::{Message, MetadataMessage};
use crate::torrent::{MagnetLink, TorrentInfo};

/// Connect to `addr` and get it ready for a metadata exchange
///
/// Runs the extension-flagged handshake, the bitfield and the extension
/// handshake.
pub async fn connect_for_metadata(
    addr: SocketAddr,
    magnet: &MagnetLink,
    config: &ClientConfig,
) -> Result<PeerConnection<TcpStream>> {
    let mut conn = PeerConnection::connect(addr, config).await?;
    conn.handshake(magnet.info_hash, true).await?;
    conn.receive_bitfield().await?;
    conn.negotiate_extension(None).await?;
    Ok(conn)
}

/// Download and verify the info dictionary from an extension-ready peer
pub async fn fetch_metadata<S>(conn: &mut PeerConnection<S>, magnet: &MagnetLink) -> Result<TorrentInfo>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let peer_ext_id = conn
        .peer
        .ut_metadata
        .ok_or_else(|| TorrentError::InvalidExtensionID("extension handshake not completed".to_string()))?;
    let size_hint = conn.peer.metadata_size;
    let piece_count = match size_hint {
        Some(size) => metadata_piece_count(size)?,
        None => 1,
    };
    let deadline = conn.config().extension_timeout;
    let local_ext_id = conn.config().metadata_extension_id;
    let verify_size = conn.config().verify_metadata_size;

    info!(
        "Fetching metadata from {} ({} piece(s), size hint {:?})",
        conn.peer_addr(),
        piece_count,
        size_hint
    );

    let mut metadata = Vec::new();
    for piece in 0..piece_count {
        let request = MetadataMessage::Request { piece };
        conn.send_message(&Message::Extended {
            id: peer_ext_id,
            payload: request.encode(),
        })
        .await?;

        // One deadline for the reply, however many other frames come first
        let reply = timeout(deadline, async {
            loop {
                match conn.receive_message().await? {
                    // Replies are addressed with the id we advertised
                    Message::Extended { id, payload } if id == local_ext_id => {
                        return MetadataMessage::decode(&payload);
                    }
                    other => trace!("Skipping {:?} while waiting for metadata", other.message_id()),
                }
            }
        })
        .await??;

        match reply {
            MetadataMessage::Data { piece: got, data, .. } if got == piece => {
                debug!("Metadata piece {} ({} bytes)", piece, data.len());
                metadata.extend_from_slice(&data);
                if metadata.len() as u64 > MAX_METADATA_SIZE {
                    return Err(TorrentError::MetadataMismatch(format!(
                        "metadata exceeds the {} byte limit",
                        MAX_METADATA_SIZE
                    )));
                }
            }
            MetadataMessage::Data { piece: got, .. } => {
                return Err(TorrentError::MetadataMismatch(format!(
                    "requested metadata piece {}, got {}",
                    piece, got
                )));
            }
            MetadataMessage::Reject { piece } => {
                warn!("Peer {} rejected metadata piece {}", conn.peer_addr(), piece);
                return Err(TorrentError::MetadataRejected(piece));
            }
            MetadataMessage::Request { .. } => {
                return Err(TorrentError::MalformedMessage(
                    "peer sent a metadata request instead of data".to_string(),
                ));
            }
        }
    }

    if let Some(size) = size_hint.filter(|_| verify_size) {
        if metadata.len() as u64 != size {
            return Err(TorrentError::MetadataMismatch(format!(
                "received {} bytes of metadata, peer announced {}",
                metadata.len(),
                size
            )));
        }
    }

    let digest: [u8; 20] = Sha1::digest(&metadata).into();
    if digest != magnet.info_hash {
        return Err(TorrentError::MetadataMismatch(format!(
            "metadata hashes to {}, expected {}",
            hex::encode(digest),
            magnet.info_hash_hex()
        )));
    }

    let info = bencode::decode_exact(&metadata)?;
    let announce = magnet.tracker().unwrap_or_default().to_string();
    let mut torrent = TorrentInfo::from_info_dict(announce, info)?;
    // The verified hash is of the bytes as sent, which is what the swarm uses
    torrent.info_hash = magnet.info_hash;

    info!("Fetched metadata for '{}' ({} bytes)", torrent.name, metadata.len());
    Ok(torrent)
}
