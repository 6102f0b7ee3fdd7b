//! Shared work queue
//!
//! Every worker pulls from the same bounded queue and puts back pieces it
//! could not finish. The queue also tracks which pieces are still
//! outstanding.

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::{mpsc, Mutex};
use tracing::trace;

use crate::download::PieceWork;
use crate::error::{Result, TorrentError};

/// Cloneable handle to the queue of pieces still to be fetched
#[derive(Clone)]
pub struct WorkQueue {
    tx: mpsc::Sender<PieceWork>,
    rx: Arc<Mutex<mpsc::Receiver<PieceWork>>>,
    outstanding: Arc<StdMutex<HashSet<u32>>>,
}

impl WorkQueue {
    /// Build a queue holding `work`, sized so every piece fits at once
    pub fn with_work(work: Vec<PieceWork>) -> Self {
        let (tx, rx) = mpsc::channel(work.len().max(1));
        let outstanding = Arc::new(StdMutex::new(work.iter().map(|w| w.index).collect()));
        for item in work {
            // Capacity equals the item count, so this cannot be full
            let _ = tx.try_send(item);
        }

        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            outstanding,
        }
    }

    /// Wait for the next piece
    pub async fn pop(&self) -> Option<PieceWork> {
        self.rx.lock().await.recv().await
    }

    /// Put a piece back for another attempt
    pub async fn push(&self, work: PieceWork) -> Result<()> {
        trace!("Requeueing piece {}", work.index);
        self.tx
            .send(work)
            .await
            .map_err(|e| TorrentError::DownloadFailed(format!("work queue closed, piece {} lost", e.0.index)))
    }

    fn outstanding(&self) -> std::sync::MutexGuard<'_, HashSet<u32>> {
        self.outstanding.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record that a piece has been verified and delivered
    pub fn mark_done(&self, index: u32) {
        self.outstanding().remove(&index);
    }

    /// Pieces not yet delivered, whether queued or in flight
    pub fn remaining(&self) -> usize {
        self.outstanding().len()
    }

    /// Whether every undelivered piece is in `pieces`
    pub fn only_outstanding_in(&self, pieces: &HashSet<u32>) -> bool {
        self.outstanding().is_subset(pieces)
    }
}
