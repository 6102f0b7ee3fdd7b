//! Peer module
//!
//! Per-peer connection state, the connection driver and the metadata
//! exchange used for magnet links.

pub mod connection;
pub mod metadata;
pub mod state;

// Re-export main types
pub use connection::PeerConnection;
pub use metadata::{connect_for_metadata, fetch_metadata};
pub use state::{ConnectionState, Peer};
