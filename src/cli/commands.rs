//! Subcommand implementations
//!
//! Every command prints its result to stdout; logging goes to stderr so the
//! output stays machine-comparable.

use std::fmt::Write as _;
use std::net::SocketAddr;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tracing::{info, warn};

use crate::bencode;
use crate::cli::{ClientConfig, Command};
use crate::download::DownloadManager;
use crate::peer::{connect_for_metadata, fetch_metadata, PeerConnection};
use crate::torrent::{MagnetLink, MagnetParser, TorrentInfo, TorrentParser};
use crate::tracker::TrackerClient;

/// Run one subcommand
pub async fn run(command: &Command, config: &ClientConfig) -> Result<()> {
    match command {
        Command::Decode { value } => {
            println!("{}", decode_to_json(value)?);
        }
        Command::Info { torrent } => {
            print!("{}", format_info(&load_torrent(torrent)?));
        }
        Command::Peers { torrent } => {
            let torrent = load_torrent(torrent)?;
            let peers = TrackerClient::new(config)?
                .peers_for_torrent(&torrent)
                .await
                .context("tracker request failed")?;
            print!("{}", format_peers(&peers));
        }
        Command::Handshake { torrent, peer } => {
            let torrent = load_torrent(torrent)?;
            let mut conn = PeerConnection::connect(*peer, config)
                .await
                .with_context(|| format!("failed to connect to {}", peer))?;
            let theirs = conn.handshake(torrent.info_hash, false).await?;
            conn.close().await;
            println!("Peer ID: {}", hex::encode(theirs.peer_id));
        }
        Command::DownloadPiece { output, torrent, index } => {
            let torrent = load_torrent(torrent)?;
            let peers = torrent_peers(&torrent, config).await?;
            let piece = DownloadManager::new(torrent, peers, config.clone())
                .download_piece(*index)
                .await?;
            write_output(output, &piece).await?;
            println!("Piece {} downloaded to {}.", index, output.display());
        }
        Command::Download { output, torrent: path } => {
            let torrent = load_torrent(path)?;
            let peers = torrent_peers(&torrent, config).await?;
            let file = DownloadManager::new(torrent, peers, config.clone())
                .download_all()
                .await?;
            write_output(output, &file).await?;
            println!("Downloaded {} to {}.", path.display(), output.display());
        }
        Command::MagnetParse { uri } => {
            print!("{}", format_magnet(&MagnetParser::parse(uri)?));
        }
        Command::MagnetHandshake { uri } => {
            let magnet = MagnetParser::parse(uri)?;
            let peers = magnet_peers(&magnet, config).await?;
            let conn = first_metadata_peer(&magnet, &peers, config).await?;
            println!("Peer ID: {}", conn.peer.peer_id_hex().unwrap_or_default());
            println!(
                "Peer Metadata Extension ID: {}",
                conn.peer.ut_metadata.unwrap_or_default()
            );
        }
        Command::MagnetInfo { uri } => {
            let magnet = MagnetParser::parse(uri)?;
            let peers = magnet_peers(&magnet, config).await?;
            let torrent = magnet_metadata(&magnet, &peers, config).await?;
            print!("{}", format_info(&torrent));
        }
        Command::MagnetDownloadPiece { output, uri, index } => {
            let magnet = MagnetParser::parse(uri)?;
            let peers = magnet_peers(&magnet, config).await?;
            let torrent = magnet_metadata(&magnet, &peers, config).await?;
            let piece = DownloadManager::new(torrent, peers, config.clone())
                .download_piece(*index)
                .await?;
            write_output(output, &piece).await?;
            println!("Piece {} downloaded to {}.", index, output.display());
        }
        Command::MagnetDownload { output, uri } => {
            let magnet = MagnetParser::parse(uri)?;
            let peers = magnet_peers(&magnet, config).await?;
            let torrent = magnet_metadata(&magnet, &peers, config).await?;
            let file = DownloadManager::new(torrent, peers, config.clone())
                .download_all()
                .await?;
            write_output(output, &file).await?;
            println!("Downloaded to {}.", output.display());
        }
    }

    Ok(())
}

/// Decode a bencoded value and render it as JSON
pub fn decode_to_json(input: &str) -> Result<String> {
    let (value, _) = bencode::decode(input.as_bytes()).context("failed to decode bencoded value")?;
    Ok(serde_json::to_string(&value)?)
}

/// The `info` report
pub fn format_info(torrent: &TorrentInfo) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Tracker URL: {}", torrent.announce);
    let _ = writeln!(out, "Length: {}", torrent.length);
    let _ = writeln!(out, "Info Hash: {}", torrent.info_hash_hex());
    let _ = writeln!(out, "Piece Length: {}", torrent.piece_length);
    let _ = writeln!(out, "Piece Hashes:");
    for hash in torrent.piece_hashes_hex() {
        let _ = writeln!(out, "{}", hash);
    }
    out
}

/// The `magnet_parse` report
pub fn format_magnet(magnet: &MagnetLink) -> String {
    let mut out = String::new();
    for tracker in &magnet.trackers {
        let _ = writeln!(out, "Tracker URL: {}", tracker);
    }
    let _ = writeln!(out, "Info Hash: {}", magnet.info_hash_hex());
    out
}

/// One `ip:port` per line
pub fn format_peers(peers: &[SocketAddr]) -> String {
    peers.iter().map(|peer| format!("{}\n", peer)).collect()
}

fn load_torrent(path: &Path) -> Result<TorrentInfo> {
    TorrentParser::parse_file(path).with_context(|| format!("failed to load torrent file {}", path.display()))
}

async fn write_output(path: &Path, data: &[u8]) -> Result<()> {
    tokio::fs::write(path, data)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!("Wrote {} bytes to {}", data.len(), path.display());
    Ok(())
}

async fn torrent_peers(torrent: &TorrentInfo, config: &ClientConfig) -> Result<Vec<SocketAddr>> {
    TrackerClient::new(config)?
        .peers_for_torrent(torrent)
        .await
        .context("tracker request failed")
}

async fn magnet_peers(magnet: &MagnetLink, config: &ClientConfig) -> Result<Vec<SocketAddr>> {
    TrackerClient::new(config)?
        .peers_for_magnet(magnet)
        .await
        .context("tracker request failed")
}

/// Connect to the first peer that completes the extension handshake
async fn first_metadata_peer(
    magnet: &MagnetLink,
    peers: &[SocketAddr],
    config: &ClientConfig,
) -> Result<PeerConnection> {
    for &addr in peers {
        match connect_for_metadata(addr, magnet, config).await {
            Ok(conn) => return Ok(conn),
            Err(e) => warn!("Peer {} unusable for metadata: {}", addr, e),
        }
    }
    Err(anyhow!("no peer completed the extension handshake"))
}

/// Fetch the info dictionary from the first peer that delivers it intact
async fn magnet_metadata(magnet: &MagnetLink, peers: &[SocketAddr], config: &ClientConfig) -> Result<TorrentInfo> {
    for &addr in peers {
        let fetched = match connect_for_metadata(addr, magnet, config).await {
            Ok(mut conn) => {
                let fetched = fetch_metadata(&mut conn, magnet).await;
                conn.close().await;
                fetched
            }
            Err(e) => Err(e),
        };

        match fetched {
            Ok(torrent) => return Ok(torrent),
            Err(e) => warn!("Metadata from {} failed: {}", addr, e),
        }
    }
    Err(anyhow!("no peer delivered metadata for {}", magnet.info_hash_hex()))
}
