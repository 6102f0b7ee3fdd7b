//! Download engine module
//!
//! Splits a torrent into piece work, runs one worker per peer against a
//! shared queue and assembles the verified pieces.

pub mod manager;
pub mod piece;
pub mod queue;
pub mod worker;

// Re-export main types
pub use manager::DownloadManager;
pub use piece::{PieceProgress, PieceResult, PieceWork};
pub use queue::WorkQueue;
pub use worker::{run_worker, Worker};
