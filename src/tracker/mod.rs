//! Tracker module
//!
//! HTTP announce requests and compact peer list decoding.

pub mod client;
pub mod response;

pub use client::TrackerClient;
pub use response::{parse_compact_peers, TrackerResponse};
