//! Bencode decoder
//!
//! Decodes one value from the front of a byte slice and reports how many
//! bytes it consumed, so callers can find data appended after the value
//! (metadata `data` messages rely on this).

use tracing::trace;

use super::value::{BencodeDict, BencodeValue};
use crate::error::{Result, TorrentError};

/// Deepest list/dictionary nesting accepted from untrusted input
pub const MAX_DEPTH: usize = 512;

/// Decode the first bencode value in `data`
///
/// Returns the value and the number of bytes consumed.
pub fn decode(data: &[u8]) -> Result<(BencodeValue, usize)> {
    let mut decoder = Decoder { data, pos: 0, depth: 0 };
    let value = decoder.decode_value()?;
    trace!("Decoded bencode {} ({} bytes)", value.type_name(), decoder.pos);
    Ok((value, decoder.pos))
}

/// Decode a value that must span the whole input
pub fn decode_exact(data: &[u8]) -> Result<BencodeValue> {
    let (value, consumed) = decode(data)?;
    if consumed != data.len() {
        return Err(TorrentError::TrailingData(data.len() - consumed));
    }
    Ok(value)
}

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
    /// Lists and dictionaries currently open
    depth: usize,
}

impl<'a> Decoder<'a> {
    fn peek(&self) -> Result<u8> {
        self.data.get(self.pos).copied().ok_or(TorrentError::UnexpectedEnd)
    }

    fn decode_value(&mut self) -> Result<BencodeValue> {
        match self.peek()? {
            b'i' => self.decode_integer(),
            b'0'..=b'9' => self.decode_bytes().map(BencodeValue::Bytes),
            b'l' => self.nested(Self::decode_list),
            b'd' => self.nested(Self::decode_dict),
            other => Err(TorrentError::UnknownType(other)),
        }
    }

    fn nested(&mut self, decode: fn(&mut Self) -> Result<BencodeValue>) -> Result<BencodeValue> {
        if self.depth >= MAX_DEPTH {
            return Err(TorrentError::NestingTooDeep(MAX_DEPTH));
        }
        self.depth += 1;
        let value = decode(self);
        self.depth -= 1;
        value
    }

    /// Slice up to (not including) the next `terminator`, advancing past it
    fn take_until(&mut self, terminator: u8) -> Result<&'a [u8]> {
        let rest = &self.data[self.pos..];
        let end = rest
            .iter()
            .position(|&b| b == terminator)
            .ok_or(TorrentError::UnexpectedEnd)?;
        self.pos += end + 1;
        Ok(&rest[..end])
    }

    fn decode_integer(&mut self) -> Result<BencodeValue> {
        self.pos += 1; // 'i'
        let digits = self.take_until(b'e')?;
        parse_integer(digits).map(BencodeValue::Integer)
    }

    fn decode_bytes(&mut self) -> Result<Vec<u8>> {
        let len_digits = self.take_until(b':')?;
        let len = std::str::from_utf8(len_digits)
            .ok()
            .filter(|s| s.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| TorrentError::MalformedInteger(String::from_utf8_lossy(len_digits).into_owned()))?;

        let available = self.data.len() - self.pos;
        if len > available {
            return Err(TorrentError::TruncatedString { expected: len, available });
        }
        let bytes = self.data[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(bytes)
    }

    fn decode_list(&mut self) -> Result<BencodeValue> {
        self.pos += 1; // 'l'
        let mut items = Vec::new();
        while self.peek()? != b'e' {
            items.push(self.decode_value()?);
        }
        self.pos += 1;
        Ok(BencodeValue::List(items))
    }

    fn decode_dict(&mut self) -> Result<BencodeValue> {
        self.pos += 1; // 'd'
        let mut dict = BencodeDict::new();
        while self.peek()? != b'e' {
            if !self.peek()?.is_ascii_digit() {
                return Err(TorrentError::InvalidKeyType);
            }
            let key = self.decode_bytes()?;
            let value = self.decode_value()?;
            dict.insert(key, value);
        }
        self.pos += 1;
        Ok(BencodeValue::Dict(dict))
    }
}

fn parse_integer(digits: &[u8]) -> Result<i64> {
    let malformed = || TorrentError::MalformedInteger(String::from_utf8_lossy(digits).into_owned());
    let body = digits.strip_prefix(b"-").unwrap_or(digits);
    if body.is_empty() || !body.iter().all(u8::is_ascii_digit) {
        return Err(malformed());
    }
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(malformed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_one(input: &[u8]) -> BencodeValue {
        decode(input).unwrap().0
    }

    #[test]
    fn test_decode_integers() {
        assert_eq!(decode_one(b"i52e"), BencodeValue::Integer(52));
        assert_eq!(decode_one(b"i-52e"), BencodeValue::Integer(-52));
        assert_eq!(decode_one(b"i4294967300e"), BencodeValue::Integer(4_294_967_300));
        assert_eq!(decode_one(b"i0e"), BencodeValue::Integer(0));
    }

    #[test]
    fn test_decode_malformed_integers() {
        assert!(matches!(decode(b"i5x2e"), Err(TorrentError::MalformedInteger(_))));
        assert!(matches!(decode(b"ie"), Err(TorrentError::MalformedInteger(_))));
        assert!(matches!(decode(b"i-e"), Err(TorrentError::MalformedInteger(_))));
        assert!(matches!(decode(b"i+5e"), Err(TorrentError::MalformedInteger(_))));
        assert!(matches!(decode(b"i99999999999999999999e"), Err(TorrentError::MalformedInteger(_))));
        assert!(matches!(decode(b"i52"), Err(TorrentError::UnexpectedEnd)));
    }

    #[test]
    fn test_decode_strings() {
        assert_eq!(decode_one(b"5:hello"), BencodeValue::Bytes(b"hello".to_vec()));
        assert_eq!(decode_one(b"0:"), BencodeValue::Bytes(Vec::new()));
        assert_eq!(decode(b"5:helloworld").unwrap().1, 7);
    }

    #[test]
    fn test_decode_truncated_string() {
        match decode(b"10:short") {
            Err(TorrentError::TruncatedString { expected, available }) => {
                assert_eq!(expected, 10);
                assert_eq!(available, 5);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_decode_lists() {
        assert_eq!(decode_one(b"le"), BencodeValue::List(vec![]));
        assert_eq!(
            decode_one(b"l5:helloi52ee"),
            BencodeValue::List(vec!["hello".into(), 52i64.into()])
        );
        assert_eq!(
            decode_one(b"lli4e5:helloee"),
            BencodeValue::List(vec![BencodeValue::List(vec![4i64.into(), "hello".into()])])
        );
        assert!(matches!(decode(b"l5:hello"), Err(TorrentError::UnexpectedEnd)));
    }

    #[test]
    fn test_decode_dicts() {
        assert_eq!(decode_one(b"de"), BencodeValue::Dict(BencodeDict::new()));

        let value = decode_one(b"d3:foo3:bar5:helloi52ee");
        assert_eq!(value.require_str("foo").unwrap(), "bar");
        assert_eq!(value.require_int("hello").unwrap(), 52);

        let nested = decode_one(b"d10:inner_dictd4:key16:value14:key2i42eee");
        let inner = nested.require_dict("inner_dict").unwrap();
        assert_eq!(inner.require_str("key1").unwrap(), "value1");
        assert_eq!(inner.require_int("key2").unwrap(), 42);
    }

    #[test]
    fn test_decode_invalid_key() {
        assert!(matches!(decode(b"di1ei2ee"), Err(TorrentError::InvalidKeyType)));
        assert!(matches!(decode(b"dli1eei2ee"), Err(TorrentError::InvalidKeyType)));
    }

    #[test]
    fn test_decode_unknown_type() {
        assert!(matches!(decode(b"x"), Err(TorrentError::UnknownType(b'x'))));
        assert!(matches!(decode(b""), Err(TorrentError::UnexpectedEnd)));
    }

    #[test]
    fn test_decode_reports_consumed_bytes() {
        let input = b"d8:msg_typei1e5:piecei0eeRAWDATA";
        let (value, consumed) = decode(input).unwrap();
        assert_eq!(value.require_int("msg_type").unwrap(), 1);
        assert_eq!(&input[consumed..], b"RAWDATA");
    }

    #[test]
    fn test_decode_exact_rejects_trailing() {
        assert!(decode_exact(b"i1e").is_ok());
        assert!(matches!(decode_exact(b"i1ei2e"), Err(TorrentError::TrailingData(3))));
    }

    #[test]
    fn test_decode_nesting_limit() {
        let nested = |depth: usize| [vec![b'l'; depth], vec![b'e'; depth]].concat();

        let (value, consumed) = decode(&nested(MAX_DEPTH)).unwrap();
        assert_eq!(consumed, 2 * MAX_DEPTH);
        assert!(matches!(value, BencodeValue::List(_)));

        assert!(matches!(
            decode(&nested(MAX_DEPTH + 1)),
            Err(TorrentError::NestingTooDeep(MAX_DEPTH))
        ));
        // Far past the limit fails the same way instead of exhausting the stack
        assert!(matches!(
            decode(&nested(200_000)),
            Err(TorrentError::NestingTooDeep(_))
        ));

        let mut dicts = b"d1:a".repeat(MAX_DEPTH + 1);
        dicts.extend_from_slice(b"i0e");
        dicts.extend(std::iter::repeat(b'e').take(MAX_DEPTH + 1));
        assert!(matches!(decode(&dicts), Err(TorrentError::NestingTooDeep(_))));
    }
}
