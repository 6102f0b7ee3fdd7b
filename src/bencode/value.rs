//! Bencode value representation
//!
//! A tagged union over the four bencode types with accessors that fail with
//! a typed error instead of runtime type assertions.

use std::collections::BTreeMap;

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use crate::error::{Result, TorrentError};

/// Dictionary type; `BTreeMap` keeps keys in raw byte order
pub type BencodeDict = BTreeMap<Vec<u8>, BencodeValue>;

/// A decoded bencode value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BencodeValue {
    Integer(i64),
    Bytes(Vec<u8>),
    List(Vec<BencodeValue>),
    Dict(BencodeDict),
}

impl BencodeValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            BencodeValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            BencodeValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Byte string that is valid UTF-8
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn as_list(&self) -> Option<&[BencodeValue]> {
        match self {
            BencodeValue::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BencodeDict> {
        match self {
            BencodeValue::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Look up `key` when this value is a dictionary
    pub fn get(&self, key: &str) -> Option<&BencodeValue> {
        self.as_dict().and_then(|d| d.get(key.as_bytes()))
    }

    /// Required integer field of a dictionary
    pub fn require_int(&self, key: &str) -> Result<i64> {
        self.get(key)
            .and_then(BencodeValue::as_int)
            .ok_or_else(|| missing_field(key, "integer"))
    }

    /// Required byte-string field of a dictionary
    pub fn require_bytes(&self, key: &str) -> Result<&[u8]> {
        self.get(key)
            .and_then(BencodeValue::as_bytes)
            .ok_or_else(|| missing_field(key, "byte string"))
    }

    /// Required UTF-8 string field of a dictionary
    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.get(key)
            .and_then(BencodeValue::as_str)
            .ok_or_else(|| missing_field(key, "string"))
    }

    /// Required dictionary field of a dictionary
    pub fn require_dict(&self, key: &str) -> Result<&BencodeValue> {
        match self.get(key) {
            Some(value @ BencodeValue::Dict(_)) => Ok(value),
            _ => Err(missing_field(key, "dictionary")),
        }
    }

    /// Short name of the variant, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            BencodeValue::Integer(_) => "integer",
            BencodeValue::Bytes(_) => "byte string",
            BencodeValue::List(_) => "list",
            BencodeValue::Dict(_) => "dictionary",
        }
    }
}

fn missing_field(key: &str, expected: &str) -> TorrentError {
    TorrentError::InvalidMetainfo(format!("missing or mistyped field '{}' (expected {})", key, expected))
}

impl From<i64> for BencodeValue {
    fn from(value: i64) -> Self {
        BencodeValue::Integer(value)
    }
}

impl From<&str> for BencodeValue {
    fn from(value: &str) -> Self {
        BencodeValue::Bytes(value.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for BencodeValue {
    fn from(value: Vec<u8>) -> Self {
        BencodeValue::Bytes(value)
    }
}

impl From<&[u8]> for BencodeValue {
    fn from(value: &[u8]) -> Self {
        BencodeValue::Bytes(value.to_vec())
    }
}

impl From<Vec<BencodeValue>> for BencodeValue {
    fn from(value: Vec<BencodeValue>) -> Self {
        BencodeValue::List(value)
    }
}

impl From<BencodeDict> for BencodeValue {
    fn from(value: BencodeDict) -> Self {
        BencodeValue::Dict(value)
    }
}

// Byte strings render as lossy UTF-8 so the value can be printed as JSON.
impl Serialize for BencodeValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            BencodeValue::Integer(i) => serializer.serialize_i64(*i),
            BencodeValue::Bytes(b) => serializer.serialize_str(&String::from_utf8_lossy(b)),
            BencodeValue::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            BencodeValue::Dict(dict) => {
                let mut map = serializer.serialize_map(Some(dict.len()))?;
                for (key, value) in dict {
                    map.serialize_entry(&String::from_utf8_lossy(key), value)?;
                }
                map.end()
            }
        }
    }
}
