//! Bencode codec: the self-describing binary format used by metainfo files
//! and tracker responses.
//!
//! A [`BencodeValue`] is a tagged union over integers, byte-strings,
//! ordered lists, and byte-string-keyed maps. [`decode`] parses the format;
//! [`encode`] is its inverse and always produces the canonical form (map
//! keys in ascending order, no redundant leading zeros).
use std::collections::BTreeMap;
use thiserror::Error;

pub mod decoder;
pub mod encoder;

pub use decoder::{decode, Decoder};
pub use encoder::encode;

/// A decoded bencode value.
///
/// Dictionaries are `BTreeMap` rather than `HashMap` so that iteration order
/// is always ascending-by-key — this makes [`encode`] canonical by
/// construction instead of requiring a separate sort step.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum BencodeValue {
    String(Vec<u8>),
    Integer(i64),
    List(Vec<BencodeValue>),
    Dict(BTreeMap<Vec<u8>, BencodeValue>),
}

impl BencodeValue {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            BencodeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            BencodeValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[BencodeValue]> {
        match self {
            BencodeValue::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, BencodeValue>> {
        match self {
            BencodeValue::Dict(d) => Some(d),
            _ => None,
        }
    }
}

/// Decode failures. Bencode has exactly one failure mode per spec: a byte
/// stream that doesn't conform to the grammar.
#[derive(Debug, Error)]
pub enum BencodeError {
    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("malformed bencode: {0}")]
    Malformed(String),

    #[error("invalid integer literal")]
    InvalidInteger,

    #[error("invalid byte-string length")]
    InvalidStringLength,
}

pub type BencodeResult<T> = std::result::Result<T, BencodeError>;
