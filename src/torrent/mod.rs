//! Torrent file handling module
//!
//! This module provides functionality for parsing and working with .torrent files and magnet links.

pub mod info;
pub mod magnet;
pub mod parser;

pub use info::TorrentInfo;
pub use magnet::{MagnetLink, MagnetParser};
pub use parser::TorrentParser;
