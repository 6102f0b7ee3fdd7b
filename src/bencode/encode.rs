//! Bencode encoder

use bytes::{BufMut, BytesMut};

use super::value::BencodeValue;

/// Encode a value to its canonical bencode form
///
/// Dictionary keys come out in ascending raw-byte order, so re-encoding an
/// info dictionary reproduces the bytes its hash was computed over.
pub fn encode(value: &BencodeValue) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_into(value, &mut buf);
    buf.to_vec()
}

fn encode_into(value: &BencodeValue, buf: &mut BytesMut) {
    match value {
        BencodeValue::Integer(i) => {
            buf.put_u8(b'i');
            buf.put_slice(i.to_string().as_bytes());
            buf.put_u8(b'e');
        }
        BencodeValue::Bytes(bytes) => encode_bytes(bytes, buf),
        BencodeValue::List(items) => {
            buf.put_u8(b'l');
            for item in items {
                encode_into(item, buf);
            }
            buf.put_u8(b'e');
        }
        BencodeValue::Dict(dict) => {
            buf.put_u8(b'd');
            // BTreeMap iterates in key order
            for (key, item) in dict {
                encode_bytes(key, buf);
                encode_into(item, buf);
            }
            buf.put_u8(b'e');
        }
    }
}

fn encode_bytes(bytes: &[u8], buf: &mut BytesMut) {
    buf.put_slice(bytes.len().to_string().as_bytes());
    buf.put_u8(b':');
    buf.put_slice(bytes);
}
