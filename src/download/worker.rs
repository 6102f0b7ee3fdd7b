//! Per-peer download worker
//!
//! Each worker owns one peer connection. It pulls pieces from the shared
//! queue, pipelines block requests, verifies hashes and reports verified
//! pieces back to the manager.

use std::collections::HashSet;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::cli::ClientConfig;
use crate::download::{PieceProgress, PieceResult, PieceWork, WorkQueue};
use crate::error::{Result, TorrentError};
use crate::peer::PeerConnection;
use crate::protocol::Message;

/// Connect to `addr` and run a worker until the queue is drained or the
/// peer fails
///
/// `piece_count` bounds what the peer may announce with `have`/`bitfield`.
pub async fn run_worker(
    addr: SocketAddr,
    info_hash: [u8; 20],
    piece_count: usize,
    queue: WorkQueue,
    results: mpsc::Sender<PieceResult>,
    cancel: CancellationToken,
    config: ClientConfig,
) -> Result<u32> {
    let conn = PeerConnection::connect(addr, &config).await?.with_piece_count(piece_count);
    Worker::new(conn, queue, results, cancel).run(info_hash).await
}

/// Download loop bound to one peer connection
pub struct Worker<S> {
    conn: PeerConnection<S>,
    queue: WorkQueue,
    results: mpsc::Sender<PieceResult>,
    cancel: CancellationToken,
    /// Outstanding pieces this peer does not have
    unavailable: HashSet<u32>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Worker<S> {
    pub fn new(
        conn: PeerConnection<S>,
        queue: WorkQueue,
        results: mpsc::Sender<PieceResult>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            conn,
            queue,
            results,
            cancel,
            unavailable: HashSet::new(),
        }
    }

    /// Handshake, then download pieces until there is nothing left for this
    /// peer; returns the number of pieces delivered
    pub async fn run(mut self, info_hash: [u8; 20]) -> Result<u32> {
        let addr = self.conn.peer_addr();
        self.conn.handshake(info_hash, false).await?;
        self.conn.receive_bitfield().await?;
        self.conn.prepare_download().await?;
        info!("Worker for {} ready", addr);

        let result = self.download_loop().await;
        self.conn.close().await;
        result.map(|()| self.conn.peer.pieces_downloaded)
    }

    async fn download_loop(&mut self) -> Result<()> {
        let addr = self.conn.peer_addr();
        let max_failures = self.conn.config().max_integrity_failures;
        let backoff = self.conn.config().requeue_backoff;

        loop {
            let work = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                work = self.queue.pop() => work,
            };
            let Some(work) = work else { return Ok(()) };

            if !self.conn.peer.has_piece(work.index as usize) {
                trace!("Peer {} does not have piece {}", addr, work.index);
                self.unavailable.insert(work.index);
                self.queue.push(work).await?;

                // Every outstanding piece is one this peer lacks
                let peer = &self.conn.peer;
                self.unavailable.retain(|&index| !peer.has_piece(index as usize));
                if self.queue.only_outstanding_in(&self.unavailable) {
                    debug!("Peer {} has none of the remaining pieces", addr);
                    return Ok(());
                }

                tokio::select! {
                    _ = self.cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(backoff) => {}
                }
                continue;
            }

            let data = match self.attempt(&work).await {
                Ok(data) => data,
                Err(e) => {
                    warn!("Piece {} from {} failed: {}", work.index, addr, e);
                    self.queue.push(work).await?;
                    return Err(e);
                }
            };

            if !work.verify(&data) {
                let failures = self.conn.peer.record_integrity_failure();
                warn!(
                    "{} (peer {}, strike {}/{})",
                    TorrentError::IntegrityCheckFailed { index: work.index },
                    addr,
                    failures,
                    max_failures
                );
                self.queue.push(work).await?;
                if failures >= max_failures {
                    return Err(TorrentError::PeerUnreliable { peer: addr, failures });
                }
                continue;
            }

            let index = work.index;
            self.conn.peer.increment_downloaded();
            if self.results.send(PieceResult { index, data }).await.is_err() {
                // Manager is gone; nobody wants more pieces
                return Ok(());
            }
            self.conn.send_message(&Message::Have { piece_index: index }).await?;
            debug!("Piece {} verified from {}", index, addr);
        }
    }

    /// Fetch one piece under the per-piece deadline
    async fn attempt(&mut self, work: &PieceWork) -> Result<Vec<u8>> {
        let deadline = self.conn.config().piece_timeout;
        timeout(deadline, self.download_blocks(work)).await?
    }

    async fn download_blocks(&mut self, work: &PieceWork) -> Result<Vec<u8>> {
        let block_size = self.conn.config().block_size;
        let max_backlog = self.conn.config().max_backlog;
        let mut progress = PieceProgress::new(work, block_size);

        while !progress.is_complete() {
            if self.conn.peer.can_request() {
                while progress.backlog < max_backlog {
                    let Some((begin, length)) = progress.next_request() else { break };
                    self.conn
                        .send_message(&Message::Request {
                            index: work.index,
                            begin,
                            length,
                        })
                        .await?;
                }
            }

            // Choke, unchoke and have are tracked by the connection
            if let Message::Piece { index, begin, block } = self.conn.receive_message().await? {
                progress.record_block(index, begin, &block)?;
            }
        }

        Ok(progress.into_data())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{read_handshake, read_message, write_handshake, write_message, Handshake};
    use sha1::{Digest, Sha1};
    use tokio::io::DuplexStream;

    const INFO_HASH: [u8; 20] = [0x11; 20];

    type Harness = (Worker<DuplexStream>, DuplexStream, mpsc::Receiver<PieceResult>, WorkQueue);

    fn worker(work: Vec<PieceWork>) -> Harness {
        worker_with(work, ClientConfig::default())
    }

    fn worker_with(work: Vec<PieceWork>, config: ClientConfig) -> Harness {
        let (local, remote) = tokio::io::duplex(256 * 1024);
        let addr = "127.0.0.1:6881".parse().unwrap();
        let conn = PeerConnection::new(local, addr, &config);
        let queue = WorkQueue::with_work(work);
        let (tx, rx) = mpsc::channel(8);
        (Worker::new(conn, queue.clone(), tx, CancellationToken::new()), remote, rx, queue)
    }

    /// Serve `data` as piece 0, replying to requests in reverse order
    async fn serve_piece(remote: &mut DuplexStream, data: Vec<u8>) -> Vec<Message> {
        read_handshake(remote).await.unwrap();
        write_handshake(remote, &Handshake::new(INFO_HASH, [2; 20])).await.unwrap();
        write_message(remote, &Message::Bitfield { bitfield: vec![0x80] }).await.unwrap();

        let mut seen = Vec::new();
        let mut requests = Vec::new();
        loop {
            let message = read_message(remote).await.unwrap();
            seen.push(message.clone());
            match message {
                Message::Interested => write_message(remote, &Message::Unchoke).await.unwrap(),
                Message::Request { index, begin, length } => {
                    requests.push((index, begin, length));
                    let requested: u32 = requests.iter().map(|r| r.2).sum();
                    if requested as usize == data.len() {
                        for (index, begin, length) in requests.drain(..).rev() {
                            let block = data[begin as usize..(begin + length) as usize].to_vec();
                            write_message(remote, &Message::Piece { index, begin, block }).await.unwrap();
                        }
                    }
                }
                Message::Have { .. } => return seen,
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn test_worker_downloads_piece() {
        let data: Vec<u8> = (0..40000u32).map(|i| (i % 251) as u8).collect();
        let work = PieceWork {
            index: 0,
            hash: Sha1::digest(&data).into(),
            length: data.len() as u32,
        };
        let (worker, mut remote, mut results, _queue) = worker(vec![work]);

        let served = data.clone();
        let peer = tokio::spawn(async move { serve_piece(&mut remote, served).await });
        let handle = tokio::spawn(worker.run(INFO_HASH));

        let result = results.recv().await.unwrap();
        assert_eq!(result.index, 0);
        assert_eq!(result.data, data);

        let seen = peer.await.unwrap();
        assert_eq!(seen[0], Message::Unchoke);
        assert_eq!(seen[1], Message::Interested);
        let requests = seen.iter().filter(|m| matches!(m, Message::Request { .. })).count();
        assert_eq!(requests, 3);
        assert_eq!(seen.last(), Some(&Message::Have { piece_index: 0 }));

        handle.abort();
    }

    fn piece_work(index: u32, data: &[u8]) -> PieceWork {
        PieceWork {
            index,
            hash: Sha1::digest(data).into(),
            length: data.len() as u32,
        }
    }

    #[tokio::test]
    async fn test_worker_pauses_requests_while_choked() {
        let data: Vec<u8> = (0..40000u32).map(|i| (i % 241) as u8).collect();
        let config = ClientConfig {
            max_backlog: 1,
            ..ClientConfig::default()
        };
        let (worker, mut remote, mut results, _queue) = worker_with(vec![piece_work(0, &data)], config);
        let handle = tokio::spawn(worker.run(INFO_HASH));

        read_handshake(&mut remote).await.unwrap();
        write_handshake(&mut remote, &Handshake::new(INFO_HASH, [2; 20])).await.unwrap();
        write_message(&mut remote, &Message::Bitfield { bitfield: vec![0x80] }).await.unwrap();
        assert_eq!(read_message(&mut remote).await.unwrap(), Message::Unchoke);
        assert_eq!(read_message(&mut remote).await.unwrap(), Message::Interested);
        write_message(&mut remote, &Message::Unchoke).await.unwrap();

        let first = read_message(&mut remote).await.unwrap();
        assert_eq!(first, Message::Request { index: 0, begin: 0, length: 16384 });

        // Choke, then deliver the block already asked for
        write_message(&mut remote, &Message::Choke).await.unwrap();
        let block = data[..16384].to_vec();
        write_message(&mut remote, &Message::Piece { index: 0, begin: 0, block }).await.unwrap();

        let quiet = tokio::time::timeout(std::time::Duration::from_millis(150), read_message(&mut remote)).await;
        assert!(quiet.is_err(), "worker requested while choked: {:?}", quiet);

        write_message(&mut remote, &Message::Unchoke).await.unwrap();
        loop {
            match read_message(&mut remote).await.unwrap() {
                Message::Request { index, begin, length } => {
                    assert!(begin >= 16384);
                    let block = data[begin as usize..(begin + length) as usize].to_vec();
                    write_message(&mut remote, &Message::Piece { index, begin, block }).await.unwrap();
                }
                Message::Have { piece_index } => {
                    assert_eq!(piece_index, 0);
                    break;
                }
                other => panic!("unexpected message: {:?}", other),
            }
        }

        let result = results.recv().await.unwrap();
        assert_eq!(result.data, data);
        handle.abort();
    }

    #[tokio::test]
    async fn test_worker_takes_piece_announced_after_requeue() {
        let first = vec![1u8; 16];
        let second = vec![2u8; 16];
        // Piece 1 comes up first, before the peer has it
        let (worker, mut remote, mut results, _queue) =
            worker(vec![piece_work(1, &second), piece_work(0, &first)]);

        let served = [first.clone(), second.clone()];
        let peer = tokio::spawn(async move {
            read_handshake(&mut remote).await.unwrap();
            write_handshake(&mut remote, &Handshake::new(INFO_HASH, [2; 20])).await.unwrap();
            write_message(&mut remote, &Message::Bitfield { bitfield: vec![0x80] }).await.unwrap();

            let mut requested = Vec::new();
            loop {
                match read_message(&mut remote).await.unwrap() {
                    Message::Interested => write_message(&mut remote, &Message::Unchoke).await.unwrap(),
                    Message::Request { index, begin, length } => {
                        requested.push(index);
                        if index == 0 {
                            write_message(&mut remote, &Message::Have { piece_index: 1 }).await.unwrap();
                        }
                        let block = served[index as usize][begin as usize..(begin + length) as usize].to_vec();
                        write_message(&mut remote, &Message::Piece { index, begin, block }).await.unwrap();
                    }
                    Message::Have { piece_index: 1 } => return requested,
                    _ => {}
                }
            }
        });
        let handle = tokio::spawn(worker.run(INFO_HASH));

        let a = results.recv().await.unwrap();
        let b = results.recv().await.unwrap();
        assert_eq!((a.index, a.data), (0, first));
        assert_eq!((b.index, b.data), (1, second));
        assert_eq!(peer.await.unwrap(), vec![0, 1]);

        handle.abort();
    }

    #[tokio::test]
    async fn test_worker_leaves_when_peer_lacks_all_pieces() {
        let work = PieceWork { index: 3, hash: [0; 20], length: 16 };
        let (worker, mut remote, _results, queue) = worker(vec![work]);

        tokio::spawn(async move {
            read_handshake(&mut remote).await.unwrap();
            write_handshake(&mut remote, &Handshake::new(INFO_HASH, [2; 20])).await.unwrap();
            write_message(&mut remote, &Message::Bitfield { bitfield: vec![0x80] }).await.unwrap();
            while read_message(&mut remote).await.is_ok() {}
        });

        assert_eq!(worker.run(INFO_HASH).await.unwrap(), 0);
        // The piece went back on the queue
        assert_eq!(queue.pop().await.unwrap().index, 3);
    }

    #[tokio::test]
    async fn test_worker_rejects_wrong_info_hash() {
        let (worker, mut remote, _results, _queue) = worker(Vec::new());

        tokio::spawn(async move {
            read_handshake(&mut remote).await.unwrap();
            write_handshake(&mut remote, &Handshake::new([0x22; 20], [2; 20])).await.unwrap();
        });

        assert!(matches!(
            worker.run(INFO_HASH).await,
            Err(TorrentError::HandshakeMismatch(_))
        ));
    }
}
