//! Canonical bencode encoder — the inverse of [`super::decoder::decode`].
use super::BencodeValue;
use tracing::instrument;

fn encode_string(out: &mut Vec<u8>, s: &[u8]) {
    out.extend_from_slice(s.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(s);
}

fn encode_integer(out: &mut Vec<u8>, i: i64) {
    out.push(b'i');
    out.extend_from_slice(i.to_string().as_bytes());
    out.push(b'e');
}

fn encode_list(out: &mut Vec<u8>, list: &[BencodeValue]) {
    out.push(b'l');
    for item in list {
        encode_value(out, item);
    }
    out.push(b'e');
}

fn encode_dict(out: &mut Vec<u8>, dict: &std::collections::BTreeMap<Vec<u8>, BencodeValue>) {
    out.push(b'd');
    // BTreeMap already iterates in ascending key order, so no sort step is
    // needed to satisfy the "keys in lexicographic order" invariant.
    for (key, value) in dict {
        encode_string(out, key);
        encode_value(out, value);
    }
    out.push(b'e');
}

fn encode_value(out: &mut Vec<u8>, value: &BencodeValue) {
    match value {
        BencodeValue::String(s) => encode_string(out, s),
        BencodeValue::Integer(i) => encode_integer(out, *i),
        BencodeValue::List(list) => encode_list(out, list),
        BencodeValue::Dict(dict) => encode_dict(out, dict),
    }
}

/// Encode `value` into its canonical bencode representation.
#[instrument(skip(value), level = "trace")]
pub fn encode(value: &BencodeValue) -> Vec<u8> {
    let mut out = Vec::new();
    encode_value(&mut out, value);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::decode;
    use std::collections::BTreeMap;

    #[test]
    fn encodes_integers() {
        assert_eq!(encode(&BencodeValue::Integer(0)), b"i0e");
        assert_eq!(encode(&BencodeValue::Integer(42)), b"i42e");
        assert_eq!(encode(&BencodeValue::Integer(-7)), b"i-7e");
    }

    #[test]
    fn encodes_strings() {
        assert_eq!(encode(&BencodeValue::String(vec![])), b"0:");
        assert_eq!(encode(&BencodeValue::String(b"hello".to_vec())), b"5:hello");
    }

    #[test]
    fn sorts_dict_keys_lexicographically() {
        let mut dict = BTreeMap::new();
        dict.insert(b"spam".to_vec(), BencodeValue::Integer(1));
        dict.insert(b"cow".to_vec(), BencodeValue::Integer(2));
        let encoded = encode(&BencodeValue::Dict(dict));
        assert_eq!(encoded, b"d3:cowi2e4:spami1ee");
    }

    #[test]
    fn round_trips_through_decode() {
        let original = b"d3:cow3:moo4:spaml1:a1:bee";
        let (value, _) = decode(original).unwrap();
        assert_eq!(encode(&value), original.to_vec());
    }

    #[test]
    fn decode_then_encode_preserves_arbitrary_values() {
        let samples: &[&[u8]] = &[b"i42e", b"i-7e", b"5:hello", b"0:", b"li1ei2ei3ee"];
        for sample in samples {
            let (value, _) = decode(sample).unwrap();
            assert_eq!(&encode(&value), sample);
        }
    }
}
