//! The torrent descriptor: parses a metainfo file into announce URL,
//! info-hash, piece hashes, and file layout (single- or multi-file).
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use sha1::{Digest, Sha1};
use tracing::instrument;

use super::{TorrentError, TorrentResult};
use crate::bencode::{BencodeValue, Decoder};
use crate::block::BLOCK_SIZE;

/// A single entry in a multi-file torrent's `files` list.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct FileEntry {
    pub length: u64,
    pub path: Vec<String>,
}

/// Single- vs multi-file on-disk layout, per spec §9's "Polymorphism
/// between single-file and multi-file torrents collapses to a single
/// descriptor carrying a layout variant".
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Layout {
    Single { name: String, length: u64 },
    Multi { name: String, files: Vec<FileEntry> },
}

impl Layout {
    pub fn total_length(&self) -> u64 {
        match self {
            Layout::Single { length, .. } => *length,
            Layout::Multi { files, .. } => files.iter().map(|f| f.length).sum(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Layout::Single { name, .. } | Layout::Multi { name, .. } => name,
        }
    }
}

/// A parsed torrent descriptor, immutable after construction.
#[derive(Debug, Clone)]
pub struct Torrent {
    pub announce: String,
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    pub piece_length: u32,
    pub piece_hashes: Vec<[u8; 20]>,
    pub layout: Layout,

    // Informational fields the teacher project already parsed; no core
    // operation depends on them.
    pub announce_list: Vec<Vec<String>>,
    pub creation_date: Option<SystemTime>,
    pub comment: String,
    pub created_by: String,
    pub encoding: String,
    pub private: bool,
}

impl Torrent {
    pub fn total_length(&self) -> u64 {
        self.layout.total_length()
    }

    pub fn num_pieces(&self) -> usize {
        self.piece_hashes.len()
    }

    /// The byte length of `index`'s piece — `piece_length` for every piece
    /// but the last, whose length is whatever remains of `total_length`.
    pub fn piece_size(&self, index: usize) -> u64 {
        let last = self.num_pieces().saturating_sub(1);
        if index == last {
            self.total_length() - (last as u64) * self.piece_length as u64
        } else {
            self.piece_length as u64
        }
    }

    /// Output paths for this torrent, relative to the output directory:
    /// one path for a single-file torrent, one per declared file otherwise.
    pub fn output_paths(&self) -> Vec<PathBuf> {
        match &self.layout {
            Layout::Single { name, .. } => vec![PathBuf::from(name)],
            Layout::Multi { name, files } => files
                .iter()
                .map(|f| {
                    let mut p = PathBuf::from(name);
                    for component in &f.path {
                        p.push(component);
                    }
                    p
                })
                .collect(),
        }
    }

    /// Parse a metainfo file's raw bytes into a [`Torrent`].
    #[instrument(skip(data), level = "debug")]
    pub fn parse(data: &[u8]) -> TorrentResult<Torrent> {
        if data.first() != Some(&b'd') {
            return Err(TorrentError::InvalidFormat(
                "metainfo root is not a dictionary".into(),
            ));
        }

        let mut decoder = Decoder::new(data);
        let (top, info_span) = decoder.decode_dict_recording_span(b"info")?;

        let announce = top
            .get(b"announce".as_slice())
            .and_then(BencodeValue::as_bytes)
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .ok_or_else(|| TorrentError::MissingField("announce".into()))?;

        let (info_start, info_end) = info_span
            .ok_or_else(|| TorrentError::MissingField("info".into()))?;
        let info_hash: [u8; 20] = Sha1::digest(&data[info_start..info_end]).into();

        let info = top
            .get(b"info".as_slice())
            .and_then(BencodeValue::as_dict)
            .ok_or_else(|| TorrentError::MissingField("info".into()))?;

        let piece_length_raw = info
            .get(b"piece length".as_slice())
            .and_then(BencodeValue::as_integer)
            .ok_or_else(|| TorrentError::MissingField("piece length".into()))?;
        if piece_length_raw <= 0 || piece_length_raw % BLOCK_SIZE as i64 != 0 {
            return Err(TorrentError::InvalidPieceLength {
                block_size: BLOCK_SIZE,
                actual: piece_length_raw,
            });
        }
        let piece_length = piece_length_raw as u32;

        let pieces_bytes = info
            .get(b"pieces".as_slice())
            .and_then(BencodeValue::as_bytes)
            .ok_or_else(|| TorrentError::MissingField("pieces".into()))?;
        let piece_hashes = parse_piece_hashes(pieces_bytes)?;

        let name = info
            .get(b"name".as_slice())
            .and_then(BencodeValue::as_bytes)
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .ok_or_else(|| TorrentError::MissingField("name".into()))?;

        let layout = if let Some(files_value) = info.get(b"files".as_slice()) {
            Layout::Multi {
                name,
                files: parse_file_entries(files_value)?,
            }
        } else {
            let length = info
                .get(b"length".as_slice())
                .and_then(BencodeValue::as_integer)
                .ok_or_else(|| TorrentError::MissingField("length".into()))?;
            Layout::Single {
                name,
                length: length as u64,
            }
        };

        if piece_hashes.len() != ceil_div(layout.total_length(), piece_length as u64) {
            return Err(TorrentError::InvalidFormat(
                "piece hash count does not match total length".into(),
            ));
        }

        let announce_list = top
            .get(b"announce-list".as_slice())
            .map(parse_announce_list)
            .transpose()?
            .unwrap_or_default();

        let creation_date = top
            .get(b"creation date".as_slice())
            .and_then(BencodeValue::as_integer)
            .and_then(|secs| u64::try_from(secs).ok())
            .map(|secs| UNIX_EPOCH + std::time::Duration::from_secs(secs));

        let comment = optional_string(&top, b"comment");
        let created_by = optional_string(&top, b"created by");
        let encoding = optional_string(&top, b"encoding");
        let private = info
            .get(b"private".as_slice())
            .and_then(BencodeValue::as_integer)
            .map(|v| v == 1)
            .unwrap_or(false);

        Ok(Torrent {
            announce,
            info_hash,
            peer_id: generate_peer_id(),
            piece_length,
            piece_hashes,
            layout,
            announce_list,
            creation_date,
            comment,
            created_by,
            encoding,
            private,
        })
    }
}

fn optional_string(dict: &std::collections::BTreeMap<Vec<u8>, BencodeValue>, key: &[u8]) -> String {
    dict.get(key)
        .and_then(BencodeValue::as_bytes)
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .unwrap_or_default()
}

fn ceil_div(total: u64, chunk: u64) -> usize {
    if total == 0 {
        return 0;
    }
    ((total + chunk - 1) / chunk) as usize
}

fn parse_piece_hashes(pieces: &[u8]) -> TorrentResult<Vec<[u8; 20]>> {
    if pieces.len() % 20 != 0 {
        return Err(TorrentError::InvalidPiecesHashLength);
    }
    Ok(pieces
        .chunks_exact(20)
        .map(|chunk| {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(chunk);
            hash
        })
        .collect())
}

fn parse_file_entries(value: &BencodeValue) -> TorrentResult<Vec<FileEntry>> {
    let list = value
        .as_list()
        .ok_or_else(|| TorrentError::InvalidFormat("files is not a list".into()))?;
    list.iter()
        .map(|entry| {
            let dict = entry
                .as_dict()
                .ok_or_else(|| TorrentError::InvalidFormat("file entry is not a dict".into()))?;
            let length = dict
                .get(b"length".as_slice())
                .and_then(BencodeValue::as_integer)
                .ok_or_else(|| TorrentError::MissingField("file length".into()))?;
            let path = dict
                .get(b"path".as_slice())
                .and_then(BencodeValue::as_list)
                .ok_or_else(|| TorrentError::MissingField("file path".into()))?
                .iter()
                .map(|component| {
                    component
                        .as_bytes()
                        .map(|b| String::from_utf8_lossy(b).into_owned())
                        .ok_or_else(|| TorrentError::InvalidFormat("path component not a string".into()))
                })
                .collect::<TorrentResult<Vec<_>>>()?;
            Ok(FileEntry {
                length: length as u64,
                path,
            })
        })
        .collect()
}

fn parse_announce_list(value: &BencodeValue) -> TorrentResult<Vec<Vec<String>>> {
    let tiers = value
        .as_list()
        .ok_or_else(|| TorrentError::InvalidFormat("announce-list is not a list".into()))?;
    tiers
        .iter()
        .map(|tier| {
            tier.as_list()
                .ok_or_else(|| TorrentError::InvalidFormat("announce tier is not a list".into()))?
                .iter()
                .map(|url| {
                    url.as_bytes()
                        .map(|b| String::from_utf8_lossy(b).into_owned())
                        .ok_or_else(|| TorrentError::InvalidFormat("tracker url not a string".into()))
                })
                .collect()
        })
        .collect()
}

/// `-PC0001-` followed by 12 random decimal digits, per spec §3.
fn generate_peer_id() -> [u8; 20] {
    let mut id = [0u8; 20];
    id[..8].copy_from_slice(b"-PC0001-");
    let mut rng = rand::rng();
    for slot in &mut id[8..] {
        *slot = b'0' + rng.random_range(0..10);
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::encode;
    use std::collections::BTreeMap;

    fn sample_info(piece_length: i64, length: i64, piece_hashes: &[[u8; 20]]) -> BencodeValue {
        let mut info = BTreeMap::new();
        info.insert(b"piece length".to_vec(), BencodeValue::Integer(piece_length));
        let pieces: Vec<u8> = piece_hashes.iter().flatten().copied().collect();
        info.insert(b"pieces".to_vec(), BencodeValue::String(pieces));
        info.insert(b"name".to_vec(), BencodeValue::String(b"file.bin".to_vec()));
        info.insert(b"length".to_vec(), BencodeValue::Integer(length));
        BencodeValue::Dict(info)
    }

    fn wrap_metainfo(info: BencodeValue) -> Vec<u8> {
        let mut top = BTreeMap::new();
        top.insert(
            b"announce".to_vec(),
            BencodeValue::String(b"http://tracker.example/announce".to_vec()),
        );
        top.insert(b"info".to_vec(), info);
        encode(&BencodeValue::Dict(top))
    }

    #[test]
    fn parses_single_file_layout() {
        let info = sample_info(32768, 40000, &[[1u8; 20], [2u8; 20], [3u8; 20]]);
        let data = wrap_metainfo(info);
        let torrent = Torrent::parse(&data).unwrap();
        assert_eq!(torrent.total_length(), 40000);
        assert_eq!(torrent.num_pieces(), 3);
        assert_eq!(torrent.piece_size(0), 32768);
        assert_eq!(torrent.piece_size(2), 40000 - 2 * 32768);
        assert!(matches!(torrent.layout, Layout::Single { .. }));
    }

    #[test]
    fn rejects_piece_length_not_multiple_of_block_size() {
        let info = sample_info(30000, 30000, &[[0u8; 20]]);
        let data = wrap_metainfo(info);
        assert!(Torrent::parse(&data).is_err());
    }

    #[test]
    fn info_hash_is_independent_of_key_order_in_source() {
        // Hand-build a metainfo whose info dict keys appear in the source
        // bytes in reverse-of-canonical order, to prove the hash is taken
        // from the recorded byte span rather than a re-encoding of the
        // parsed (and therefore re-sorted) tree.
        let pieces: Vec<u8> = [[1u8; 20], [2u8; 20], [3u8; 20]].concat();
        let mut non_canonical_info = Vec::new();
        non_canonical_info.extend_from_slice(b"d");
        non_canonical_info.extend_from_slice(format!("6:pieces{}:", pieces.len()).as_bytes());
        non_canonical_info.extend_from_slice(&pieces);
        non_canonical_info.extend_from_slice(b"12:piece lengthi32768e");
        non_canonical_info.extend_from_slice(b"4:name8:file.bin");
        non_canonical_info.extend_from_slice(b"6:lengthi40000e");
        non_canonical_info.extend_from_slice(b"e");

        let mut data = b"d8:announce32:http://tracker.example/announce4:info".to_vec();
        data.extend_from_slice(&non_canonical_info);
        data.push(b'e');

        let torrent = Torrent::parse(&data).unwrap();
        let expected: [u8; 20] = Sha1::digest(non_canonical_info.as_slice()).into();
        assert_eq!(torrent.info_hash, expected);
    }

    #[test]
    fn peer_id_has_expected_prefix() {
        let id = generate_peer_id();
        assert_eq!(&id[..8], b"-PC0001-");
        assert!(id[8..].iter().all(|b| b.is_ascii_digit()));
    }
}
