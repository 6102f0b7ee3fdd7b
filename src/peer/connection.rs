//! Peer connection module
//!
//! Drives one peer connection through handshake, bitfield and extension
//! negotiation, over TCP or any other async byte stream.

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::cli::ClientConfig;
use crate::error::{Result, TorrentError};
use crate::peer::{ConnectionState, Peer};
use crate::protocol::extension::EXTENSION_HANDSHAKE_ID;
use crate::protocol::{self, ExtensionHandshake, Handshake, Message};

/// Represents a connected peer
pub struct PeerConnection<S = TcpStream> {
    /// Peer information
    pub peer: Peer,
    stream: S,
    /// Message read while waiting for something else
    pending: Option<Message>,
    config: ClientConfig,
}

impl PeerConnection<TcpStream> {
    /// Open a TCP connection to `addr`
    pub async fn connect(addr: SocketAddr, config: &ClientConfig) -> Result<Self> {
        debug!("Connecting to peer: {}", addr);

        let stream = timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                warn!("Connection timeout to {}", addr);
                TorrentError::Timeout
            })??;

        debug!("Connected to peer: {}", addr);
        Ok(Self::new(stream, addr, config))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> PeerConnection<S> {
    /// Wrap an already connected stream
    pub fn new(stream: S, addr: SocketAddr, config: &ClientConfig) -> Self {
        Self {
            peer: Peer::new(addr),
            stream,
            pending: None,
            config: config.clone(),
        }
    }

    /// Bound the peer's `have`/`bitfield` announcements to `count` pieces
    pub fn with_piece_count(mut self, count: usize) -> Self {
        self.peer.piece_count = Some(count);
        self
    }

    /// Exchange handshakes and verify the peer's info hash
    ///
    /// Any mismatch closes the connection.
    pub async fn handshake(&mut self, info_hash: [u8; 20], extensions: bool) -> Result<Handshake> {
        let result = self.exchange_handshake(info_hash, extensions).await;
        if result.is_err() {
            self.close().await;
        }
        result
    }

    async fn exchange_handshake(&mut self, info_hash: [u8; 20], extensions: bool) -> Result<Handshake> {
        let ours = if extensions {
            Handshake::with_extensions(info_hash, self.config.peer_id)
        } else {
            Handshake::new(info_hash, self.config.peer_id)
        };

        protocol::write_handshake(&mut self.stream, &ours).await?;
        self.peer.set_state(ConnectionState::HandshakeSent);

        let theirs = timeout(self.config.handshake_timeout, protocol::read_handshake(&mut self.stream)).await??;
        theirs.verify(&info_hash)?;

        self.peer.peer_id = Some(theirs.peer_id);
        self.peer.supports_extensions = theirs.supports_extensions();
        self.peer.set_state(ConnectionState::HandshakeVerified);

        info!(
            "Handshake with {} complete (peer id {}, extensions: {})",
            self.peer.addr,
            hex::encode(theirs.peer_id),
            self.peer.supports_extensions
        );
        Ok(theirs)
    }

    /// Wait for the peer's bitfield
    ///
    /// A peer with no pieces may skip the bitfield; whatever message arrives
    /// first instead is kept and returned by the next `receive_message`.
    pub async fn receive_bitfield(&mut self) -> Result<()> {
        let deadline = self.config.bitfield_timeout;
        let message = timeout(deadline, async {
            loop {
                match self.receive_message().await? {
                    Message::KeepAlive => continue,
                    message => return Ok::<_, TorrentError>(message),
                }
            }
        })
        .await??;

        match message {
            Message::Bitfield { bitfield } => {
                debug!("Bitfield from {} ({} bytes)", self.peer.addr, bitfield.len());
                self.peer.update_bitfield(bitfield);
            }
            other => {
                debug!("Peer {} sent {:?} instead of a bitfield", self.peer.addr, other.message_id());
                self.pending = Some(other);
            }
        }

        self.peer.set_state(ConnectionState::BitfieldReceived);
        Ok(())
    }

    /// Exchange extension handshakes and learn the peer's ut_metadata id
    pub async fn negotiate_extension(&mut self, metadata_size: Option<u64>) -> Result<ExtensionHandshake> {
        if !self.peer.supports_extensions {
            return Err(TorrentError::UnsupportedExtension(self.peer.addr));
        }

        let ours = ExtensionHandshake::new(self.config.metadata_extension_id, metadata_size);
        self.send_message(&Message::Extended {
            id: EXTENSION_HANDSHAKE_ID,
            payload: ours.encode(),
        })
        .await?;

        // The deadline covers the whole wait, not each skipped frame
        let deadline = self.config.extension_timeout;
        let theirs = timeout(deadline, async {
            loop {
                match self.receive_message().await? {
                    Message::Extended { id: EXTENSION_HANDSHAKE_ID, payload } => {
                        return ExtensionHandshake::decode(&payload);
                    }
                    other => trace!("Skipping {:?} while waiting for extension handshake", other.message_id()),
                }
            }
        })
        .await??;

        self.peer.ut_metadata = Some(theirs.ut_metadata);
        self.peer.metadata_size = theirs.metadata_size;
        self.peer.set_state(ConnectionState::ExtensionNegotiated);
        info!(
            "Peer {} uses ut_metadata id {} (metadata size {:?})",
            self.peer.addr, theirs.ut_metadata, theirs.metadata_size
        );
        Ok(theirs)
    }

    /// Send `unchoke` and `interested` so the peer will serve requests
    pub async fn prepare_download(&mut self) -> Result<()> {
        self.send_message(&Message::Unchoke).await?;
        self.send_message(&Message::Interested).await?;
        self.peer.am_interested = true;
        self.peer.set_state(ConnectionState::Ready);
        Ok(())
    }

    /// Send a message to the peer
    pub async fn send_message(&mut self, message: &Message) -> Result<()> {
        trace!("Sending {:?} to {}", message.message_id(), self.peer.addr);
        protocol::write_message(&mut self.stream, message).await
    }

    /// Receive the next message, updating choke state and availability
    pub async fn receive_message(&mut self) -> Result<Message> {
        let message = match self.pending.take() {
            Some(message) => message,
            None => protocol::read_message(&mut self.stream).await?,
        };
        self.track(&message);
        Ok(message)
    }

    fn track(&mut self, message: &Message) {
        match message {
            Message::Choke => {
                debug!("Peer {} choked us", self.peer.addr);
                self.peer.peer_choking = true;
            }
            Message::Unchoke => {
                debug!("Peer {} unchoked us", self.peer.addr);
                self.peer.peer_choking = false;
            }
            Message::Have { piece_index } => self.peer.set_piece(*piece_index as usize),
            Message::Bitfield { bitfield } => self.peer.update_bitfield(bitfield.clone()),
            _ => {}
        }
    }

    /// Close the connection
    pub async fn close(&mut self) {
        if self.peer.state != ConnectionState::Closed {
            let _ = self.stream.shutdown().await;
            self.peer.set_state(ConnectionState::Closed);
        }
    }

    /// Get the peer's address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer.addr
    }

    /// Get the peer's ID
    pub fn peer_id(&self) -> Option<[u8; 20]> {
        self.peer.peer_id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{read_handshake, read_message, write_handshake, write_message};
    use std::time::Duration;
    use tokio::io::DuplexStream;

    const INFO_HASH: [u8; 20] = [0x42; 20];
    const REMOTE_ID: [u8; 20] = *b"-RM0001-remotepeer00";

    fn pair() -> (PeerConnection<DuplexStream>, DuplexStream) {
        pair_with(ClientConfig::default())
    }

    fn pair_with(config: ClientConfig) -> (PeerConnection<DuplexStream>, DuplexStream) {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let addr = "127.0.0.1:6881".parse().unwrap();
        (PeerConnection::new(local, addr, &config), remote)
    }

    /// Writes keep-alives every 20 ms until the connection goes away
    fn spam_keep_alives(mut remote: DuplexStream) {
        tokio::spawn(async move {
            while write_message(&mut remote, &Message::KeepAlive).await.is_ok() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        });
    }

    async fn remote_handshake(remote: &mut DuplexStream, info_hash: [u8; 20], extensions: bool) -> Handshake {
        let ours = read_handshake(remote).await.unwrap();
        let reply = if extensions {
            Handshake::with_extensions(info_hash, REMOTE_ID)
        } else {
            Handshake::new(info_hash, REMOTE_ID)
        };
        write_handshake(remote, &reply).await.unwrap();
        ours
    }

    #[tokio::test]
    async fn test_handshake() {
        let (mut conn, mut remote) = pair();
        let peer = tokio::spawn(async move { remote_handshake(&mut remote, INFO_HASH, false).await });

        let theirs = conn.handshake(INFO_HASH, true).await.unwrap();
        let ours = peer.await.unwrap();

        assert_eq!(theirs.peer_id, REMOTE_ID);
        assert_eq!(conn.peer_id(), Some(REMOTE_ID));
        assert_eq!(&ours.peer_id, b"00112233445566778899");
        assert!(ours.supports_extensions());
        assert!(!conn.peer.supports_extensions);
        assert_eq!(conn.peer.state, ConnectionState::HandshakeVerified);
    }

    #[tokio::test]
    async fn test_handshake_info_hash_mismatch_closes() {
        let (mut conn, mut remote) = pair();
        tokio::spawn(async move { remote_handshake(&mut remote, [0x99; 20], false).await });

        let err = conn.handshake(INFO_HASH, false).await.unwrap_err();
        assert!(matches!(err, TorrentError::HandshakeMismatch(_)));
        assert_eq!(conn.peer.state, ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_handshake_peer_hangs_up() {
        let (mut conn, remote) = pair();
        drop(remote);

        assert!(conn.handshake(INFO_HASH, false).await.is_err());
        assert_eq!(conn.peer.state, ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_receive_bitfield_and_have() {
        let (mut conn, mut remote) = pair();
        write_message(&mut remote, &Message::KeepAlive).await.unwrap();
        write_message(&mut remote, &Message::Bitfield { bitfield: vec![0b1000_0000] }).await.unwrap();
        write_message(&mut remote, &Message::Have { piece_index: 9 }).await.unwrap();

        conn.receive_bitfield().await.unwrap();
        assert!(conn.peer.has_piece(0));
        assert!(!conn.peer.has_piece(9));

        assert_eq!(conn.receive_message().await.unwrap(), Message::Have { piece_index: 9 });
        assert!(conn.peer.has_piece(9));
        assert_eq!(conn.peer.state, ConnectionState::BitfieldReceived);
    }

    #[tokio::test]
    async fn test_missing_bitfield_keeps_message() {
        let (mut conn, mut remote) = pair();
        write_message(&mut remote, &Message::Unchoke).await.unwrap();

        conn.receive_bitfield().await.unwrap();
        assert!(conn.peer.bitfield.is_empty());
        // The pending message is delivered (and tracked) next
        assert_eq!(conn.receive_message().await.unwrap(), Message::Unchoke);
        assert!(conn.peer.can_request());
    }

    #[tokio::test]
    async fn test_negotiate_extension() {
        let (mut conn, mut remote) = pair();
        conn.peer.supports_extensions = true;

        let peer = tokio::spawn(async move {
            let ours = read_message(&mut remote).await.unwrap();
            write_message(&mut remote, &Message::Have { piece_index: 1 }).await.unwrap();
            let reply = ExtensionHandshake::new(7, Some(132)).encode();
            write_message(&mut remote, &Message::Extended { id: 0, payload: reply }).await.unwrap();
            ours
        });

        let theirs = conn.negotiate_extension(None).await.unwrap();
        assert_eq!(theirs.ut_metadata, 7);
        assert_eq!(conn.peer.ut_metadata, Some(7));
        assert_eq!(conn.peer.metadata_size, Some(132));
        assert!(conn.peer.has_piece(1));
        assert_eq!(conn.peer.state, ConnectionState::ExtensionNegotiated);

        match peer.await.unwrap() {
            Message::Extended { id, payload } => {
                assert_eq!(id, 0);
                assert_eq!(ExtensionHandshake::decode(&payload).unwrap().ut_metadata, 16);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_negotiate_extension_unsupported() {
        let (mut conn, _remote) = pair();
        assert!(matches!(
            conn.negotiate_extension(None).await,
            Err(TorrentError::UnsupportedExtension(_))
        ));
    }

    #[tokio::test]
    async fn test_prepare_download() {
        let (mut conn, mut remote) = pair();
        conn.prepare_download().await.unwrap();

        assert_eq!(read_message(&mut remote).await.unwrap(), Message::Unchoke);
        assert_eq!(read_message(&mut remote).await.unwrap(), Message::Interested);
        assert_eq!(conn.peer.state, ConnectionState::Ready);
    }

    #[tokio::test]
    async fn test_have_past_piece_count_is_ignored() {
        let (conn, mut remote) = pair();
        let mut conn = conn.with_piece_count(10);
        write_message(&mut remote, &Message::Bitfield { bitfield: vec![0xff; 1024] }).await.unwrap();
        write_message(&mut remote, &Message::Have { piece_index: u32::MAX }).await.unwrap();

        conn.receive_bitfield().await.unwrap();
        assert_eq!(conn.peer.bitfield.len(), 2);

        assert_eq!(conn.receive_message().await.unwrap(), Message::Have { piece_index: u32::MAX });
        assert_eq!(conn.peer.bitfield.len(), 2);
        assert!(!conn.peer.has_piece(u32::MAX as usize));
    }

    #[tokio::test]
    async fn test_bitfield_deadline_spans_keep_alives() {
        let config = ClientConfig {
            bitfield_timeout: Duration::from_millis(200),
            ..ClientConfig::default()
        };
        let (mut conn, remote) = pair_with(config);
        spam_keep_alives(remote);

        assert!(matches!(conn.receive_bitfield().await, Err(TorrentError::Timeout)));
    }

    #[tokio::test]
    async fn test_extension_deadline_spans_unrelated_frames() {
        let config = ClientConfig {
            extension_timeout: Duration::from_millis(200),
            ..ClientConfig::default()
        };
        let (mut conn, remote) = pair_with(config);
        conn.peer.supports_extensions = true;
        spam_keep_alives(remote);

        let started = std::time::Instant::now();
        assert!(matches!(conn.negotiate_extension(None).await, Err(TorrentError::Timeout)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(conn.peer.ut_metadata, None);
    }
}
