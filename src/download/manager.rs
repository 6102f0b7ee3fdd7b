//! Download manager module
//!
//! Fans pieces out to one worker per peer and collects verified pieces back
//! into the output buffer.

use std::collections::HashSet;
use std::net::SocketAddr;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cli::ClientConfig;
use crate::download::worker::run_worker;
use crate::download::{PieceResult, PieceWork, WorkQueue};
use crate::error::{Result, TorrentError};
use crate::torrent::TorrentInfo;

/// Download manager for one torrent and a fixed peer set
pub struct DownloadManager {
    torrent: TorrentInfo,
    peers: Vec<SocketAddr>,
    config: ClientConfig,
}

impl DownloadManager {
    /// Create a new download manager
    pub fn new(torrent: TorrentInfo, peers: Vec<SocketAddr>, config: ClientConfig) -> Self {
        info!(
            "Creating download manager for '{}' with {} peer(s)",
            torrent.name,
            peers.len()
        );
        Self { torrent, peers, config }
    }

    /// Download every piece and return the whole file
    pub async fn download_all(&self) -> Result<Vec<u8>> {
        let work = PieceWork::all(&self.torrent)?;
        let results = self.run(work).await?;

        let mut file = vec![0u8; self.torrent.length as usize];
        for piece in results {
            // Pieces complete in any order; place each by index
            let (start, end) = self
                .torrent
                .piece_bounds(piece.index as usize)
                .ok_or(TorrentError::InvalidPieceIndex {
                    index: piece.index,
                    count: self.torrent.piece_count(),
                })?;
            file[start as usize..end as usize].copy_from_slice(&piece.data);
        }

        info!("Downloaded '{}' ({} bytes)", self.torrent.name, file.len());
        Ok(file)
    }

    /// Download a single piece
    pub async fn download_piece(&self, index: u32) -> Result<Vec<u8>> {
        let work = PieceWork::for_index(&self.torrent, index)?;
        let mut results = self.run(vec![work]).await?;
        results
            .pop()
            .map(|piece| piece.data)
            .ok_or_else(|| TorrentError::DownloadFailed(format!("piece {} was not delivered", index)))
    }

    /// Run workers until every piece in `work` has been verified
    async fn run(&self, work: Vec<PieceWork>) -> Result<Vec<PieceResult>> {
        let total = work.len();
        if total == 0 {
            return Ok(Vec::new());
        }
        if self.peers.is_empty() {
            return Err(TorrentError::DownloadFailed("no peers to download from".to_string()));
        }

        let queue = WorkQueue::with_work(work);
        let (results_tx, mut results_rx) = mpsc::channel(total);
        let cancel = CancellationToken::new();
        let mut workers = JoinSet::new();

        for &addr in &self.peers {
            let queue = queue.clone();
            let results = results_tx.clone();
            let cancel = cancel.clone();
            let config = self.config.clone();
            let info_hash = self.torrent.info_hash;
            let piece_count = self.torrent.piece_count();
            workers.spawn(async move {
                let outcome = run_worker(addr, info_hash, piece_count, queue, results, cancel, config).await;
                (addr, outcome)
            });
        }
        drop(results_tx);
        debug!("Started {} worker(s) for {} piece(s)", self.peers.len(), total);

        let mut completed = HashSet::with_capacity(total);
        let mut pieces = Vec::with_capacity(total);

        while pieces.len() < total {
            tokio::select! {
                biased;

                Some(piece) = results_rx.recv() => {
                    self.accept(piece, &queue, &mut completed, &mut pieces, total);
                }
                joined = workers.join_next() => match joined {
                    Some(Ok((addr, Ok(count)))) => debug!("Worker for {} finished after {} piece(s)", addr, count),
                    Some(Ok((addr, Err(e)))) if e.is_peer_local() => warn!("Dropping peer {}: {}", addr, e),
                    Some(Ok((addr, Err(e)))) => error!("Worker for {} failed: {}", addr, e),
                    Some(Err(e)) => error!("Worker task failed: {}", e),
                    None => {
                        // Pieces sent just before the last worker exited
                        while let Ok(piece) = results_rx.try_recv() {
                            self.accept(piece, &queue, &mut completed, &mut pieces, total);
                        }
                        if pieces.len() < total {
                            return Err(TorrentError::DownloadFailed(format!(
                                "all peers gone with {} of {} piece(s) downloaded",
                                pieces.len(),
                                total
                            )));
                        }
                    }
                },
            }
        }

        cancel.cancel();
        workers.shutdown().await;
        Ok(pieces)
    }

    fn accept(
        &self,
        piece: PieceResult,
        queue: &WorkQueue,
        completed: &mut HashSet<u32>,
        pieces: &mut Vec<PieceResult>,
        total: usize,
    ) {
        if !completed.insert(piece.index) {
            debug!("Ignoring duplicate piece {}", piece.index);
            return;
        }
        queue.mark_done(piece.index);
        pieces.push(piece);
        info!(
            "Downloaded piece {} ({}/{})",
            pieces.last().map_or(0, |p| p.index),
            pieces.len(),
            total
        );
    }
}
