//! Bencode codec
//!
//! The serialization format used by torrent files, tracker responses and
//! the extension protocol.

mod decode;
mod encode;
mod value;

pub use decode::{decode, decode_exact};
pub use encode::encode;
pub use value::{BencodeDict, BencodeValue};
