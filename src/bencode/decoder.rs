//! Recursive-descent bencode decoder.
//!
//! The decoder works over a byte slice and tracks its own cursor position
//! rather than streaming through a `Read`, so that callers (the metainfo
//! parser, in particular) can recover the exact byte span any decoded value
//! occupied in the source — this is what lets the info-hash be computed
//! from the original bytes instead of a re-encoding.
use super::{BencodeError, BencodeResult, BencodeValue};
use std::collections::BTreeMap;
use tracing::instrument;

pub struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Decoder { data, pos: 0 }
    }

    /// Current cursor position, in bytes from the start of the input.
    pub fn pos(&self) -> usize {
        self.pos
    }

    fn peek(&self) -> BencodeResult<u8> {
        self.data.get(self.pos).copied().ok_or(BencodeError::UnexpectedEof)
    }

    fn take(&mut self) -> BencodeResult<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Ok(b)
    }

    fn expect(&mut self, b: u8) -> BencodeResult<()> {
        let got = self.take()?;
        if got != b {
            return Err(BencodeError::Malformed(format!(
                "expected '{}', got '{}'",
                b as char, got as char
            )));
        }
        Ok(())
    }

    /// Decode the value starting at the cursor, advancing the cursor past it.
    #[instrument(skip(self), level = "trace")]
    pub fn decode_value(&mut self) -> BencodeResult<BencodeValue> {
        match self.peek()? {
            b'i' => self.decode_integer().map(BencodeValue::Integer),
            b'0'..=b'9' => self.decode_string().map(BencodeValue::String),
            b'l' => self.decode_list().map(BencodeValue::List),
            b'd' => self.decode_dict().map(BencodeValue::Dict),
            other => Err(BencodeError::Malformed(format!(
                "unexpected byte '{}'",
                other as char
            ))),
        }
    }

    #[instrument(skip(self), level = "trace")]
    pub(crate) fn decode_integer(&mut self) -> BencodeResult<i64> {
        self.expect(b'i')?;
        let start = self.pos;
        while self.peek()? != b'e' {
            self.pos += 1;
        }
        let digits = std::str::from_utf8(&self.data[start..self.pos])
            .map_err(|_| BencodeError::InvalidInteger)?;
        self.expect(b'e')?;

        if digits.is_empty()
            || digits == "-0"
            || (digits.len() > 1 && digits.starts_with('0'))
            || (digits.len() > 2 && digits.starts_with("-0"))
        {
            return Err(BencodeError::InvalidInteger);
        }
        digits.parse::<i64>().map_err(|_| BencodeError::InvalidInteger)
    }

    #[instrument(skip(self), level = "trace")]
    pub(crate) fn decode_string(&mut self) -> BencodeResult<Vec<u8>> {
        let start = self.pos;
        while self.peek()? != b':' {
            if !self.peek()?.is_ascii_digit() {
                return Err(BencodeError::InvalidStringLength);
            }
            self.pos += 1;
        }
        let length: usize = std::str::from_utf8(&self.data[start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(BencodeError::InvalidStringLength)?;
        self.expect(b':')?;

        let end = self
            .pos
            .checked_add(length)
            .ok_or(BencodeError::InvalidStringLength)?;
        if end > self.data.len() {
            return Err(BencodeError::UnexpectedEof);
        }
        let bytes = self.data[self.pos..end].to_vec();
        self.pos = end;
        Ok(bytes)
    }

    #[instrument(skip(self), level = "trace")]
    fn decode_list(&mut self) -> BencodeResult<Vec<BencodeValue>> {
        self.expect(b'l')?;
        let mut items = Vec::new();
        while self.peek()? != b'e' {
            items.push(self.decode_value()?);
        }
        self.expect(b'e')?;
        Ok(items)
    }

    #[instrument(skip(self), level = "trace")]
    fn decode_dict(&mut self) -> BencodeResult<BTreeMap<Vec<u8>, BencodeValue>> {
        self.expect(b'd')?;
        let mut dict = BTreeMap::new();
        while self.peek()? != b'e' {
            let key = self.decode_string()?;
            let value = self.decode_value()?;
            dict.insert(key, value);
        }
        self.expect(b'e')?;
        Ok(dict)
    }

    /// Decode the top-level dictionary, also returning the byte span `key`
    /// occupied in the source (or `None` if `key` is absent). Used by the
    /// metainfo parser to hash `info` byte-exactly.
    pub(crate) fn decode_dict_recording_span(
        &mut self,
        key: &[u8],
    ) -> BencodeResult<(BTreeMap<Vec<u8>, BencodeValue>, Option<(usize, usize)>)> {
        self.expect(b'd')?;
        let mut dict = BTreeMap::new();
        let mut span = None;
        while self.peek()? != b'e' {
            let k = self.decode_string()?;
            let value_start = self.pos;
            let value = self.decode_value()?;
            let value_end = self.pos;
            if k == key {
                span = Some((value_start, value_end));
            }
            dict.insert(k, value);
        }
        self.expect(b'e')?;
        Ok((dict, span))
    }
}

/// Decode one value from `data`, returning it alongside the unconsumed
/// remainder of the slice.
#[instrument(skip(data), level = "debug")]
pub fn decode(data: &[u8]) -> BencodeResult<(BencodeValue, &[u8])> {
    let mut decoder = Decoder::new(data);
    let value = decoder.decode_value()?;
    Ok((value, &data[decoder.pos()..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_integers() {
        assert_eq!(decode(b"i42e").unwrap().0, BencodeValue::Integer(42));
        assert_eq!(decode(b"i-7e").unwrap().0, BencodeValue::Integer(-7));
        assert_eq!(decode(b"i0e").unwrap().0, BencodeValue::Integer(0));
    }

    #[test]
    fn rejects_malformed_integers() {
        assert!(decode(b"i01e").is_err());
        assert!(decode(b"i-0e").is_err());
        assert!(decode(b"ie").is_err());
    }

    #[test]
    fn decodes_strings() {
        assert_eq!(
            decode(b"5:hello").unwrap().0,
            BencodeValue::String(b"hello".to_vec())
        );
        assert_eq!(decode(b"0:").unwrap().0, BencodeValue::String(vec![]));
    }

    #[test]
    fn decodes_nested_structure() {
        let (value, rest) = decode(b"d3:cow3:moo4:spaml1:a1:bee").unwrap();
        assert!(rest.is_empty());
        let dict = value.as_dict().unwrap();
        assert_eq!(
            dict.get(b"cow".as_slice()).unwrap().as_bytes(),
            Some(b"moo".as_slice())
        );
        let spam = dict.get(b"spam".as_slice()).unwrap().as_list().unwrap();
        assert_eq!(spam[0].as_bytes(), Some(b"a".as_slice()));
        assert_eq!(spam[1].as_bytes(), Some(b"b".as_slice()));
    }

    #[test]
    fn leaves_remaining_bytes_untouched() {
        let (_, rest) = decode(b"i1eextra").unwrap();
        assert_eq!(rest, b"extra");
    }
}
