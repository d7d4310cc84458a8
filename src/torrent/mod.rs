//! Torrent metainfo parsing and error handling.
//!
//! This module decodes `.torrent` files into a [`metainfo::Torrent`]
//! descriptor: announce URL, info-hash, piece hashes, and file layout.
use thiserror::Error;

pub mod metainfo;

/// Structural violations of the torrent schema — spec's `InvalidMetainfo`
/// error kind.
#[derive(Debug, Error)]
pub enum TorrentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bencode decoding error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    #[error("invalid torrent file format: {0}")]
    InvalidFormat(String),

    #[error("missing or invalid field: {0}")]
    MissingField(String),

    #[error("invalid pieces hash length")]
    InvalidPiecesHashLength,

    #[error("piece length must be a positive multiple of {block_size}, got {actual}")]
    InvalidPieceLength { block_size: u32, actual: i64 },
}

/// Result type for torrent operations.
pub type TorrentResult<T> = std::result::Result<T, TorrentError>;
