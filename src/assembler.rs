//! Piece assembly and verification: collects downloaded blocks, checks each
//! completed piece's SHA-1 against the torrent's declared hash, and writes
//! the finished payload to disk.
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use sha1::{Digest, Sha1};
use thiserror::Error;
use tracing::instrument;

use crate::block::Block;
use crate::torrent::metainfo::Torrent;

#[derive(Debug, Error)]
pub enum AssemblerError {
    #[error("I/O error writing torrent output: {0}")]
    Io(#[from] io::Error),
}

pub type AssemblerResult<T> = std::result::Result<T, AssemblerError>;

/// Accumulates downloaded blocks keyed by `(index, begin)` and verifies
/// whole pieces once their bytes are all present.
///
/// A piece is judged once its accumulated bytes equal the expected length
/// for that specific index — `piece_length` for every piece but the last,
/// whose expected length is whatever remains of the torrent's total
/// length. This mirrors [`Torrent::piece_size`].
pub struct Assembler<'a> {
    torrent: &'a Torrent,
    downloaded: BTreeMap<(u32, u32), Vec<u8>>,
}

impl<'a> Assembler<'a> {
    pub fn new(torrent: &'a Torrent) -> Self {
        Assembler { torrent, downloaded: BTreeMap::new() }
    }

    /// Record a downloaded block. Overwrites any prior data for the same
    /// `(index, begin)` — the orchestrator never requests a block twice in
    /// flight, but a verification failure re-queues and re-downloads it.
    pub fn add(&mut self, block: Block, data: Vec<u8>) {
        self.downloaded.insert((block.index, block.begin), data);
    }

    fn bytes_for_piece(&self, index: u32) -> u64 {
        self.downloaded
            .range((index, 0)..(index + 1, 0))
            .map(|(_, data)| data.len() as u64)
            .sum()
    }

    fn piece_is_complete(&self, index: u32) -> bool {
        self.bytes_for_piece(index) == self.torrent.piece_size(index as usize)
    }

    fn piece_data(&self, index: u32) -> Vec<u8> {
        self.downloaded
            .range((index, 0)..(index + 1, 0))
            .flat_map(|(_, data)| data.iter().copied())
            .collect()
    }

    /// Check every piece whose blocks are all present against its declared
    /// hash. Pieces that fail verification are dropped from the downloaded
    /// pool and their blocks returned so the orchestrator can re-queue them.
    #[instrument(skip(self))]
    pub fn get_failed(&mut self) -> Vec<Block> {
        let mut failed_indices = Vec::new();
        for index in 0..self.torrent.num_pieces() as u32 {
            if !self.piece_is_complete(index) {
                continue;
            }
            let data = self.piece_data(index);
            let digest: [u8; 20] = Sha1::digest(&data).into();
            if digest != self.torrent.piece_hashes[index as usize] {
                failed_indices.push(index);
            }
        }

        let mut failed_blocks = Vec::new();
        for index in failed_indices {
            let keys: Vec<(u32, u32)> = self
                .downloaded
                .range((index, 0)..(index + 1, 0))
                .map(|(key, _)| *key)
                .collect();
            for key in keys {
                let data = self.downloaded.remove(&key).expect("key just listed from range");
                failed_blocks.push(Block { index: key.0, begin: key.1, length: data.len() as u32 });
            }
        }
        failed_blocks
    }

    /// True once every piece is present and has passed verification
    /// (assumes [`Assembler::get_failed`] has been drained this round).
    pub fn is_complete(&self) -> bool {
        (0..self.torrent.num_pieces() as u32).all(|index| self.piece_is_complete(index))
    }

    pub fn bytes_downloaded(&self) -> u64 {
        self.downloaded.values().map(|data| data.len() as u64).sum()
    }

    /// Write the assembled payload under `output_dir`, splitting bytes
    /// across files per the torrent's declared layout.
    #[instrument(skip(self))]
    pub fn save(&self, output_dir: &Path) -> AssemblerResult<()> {
        let mut data = Vec::with_capacity(self.torrent.total_length() as usize);
        for index in 0..self.torrent.num_pieces() as u32 {
            data.extend(self.piece_data(index));
        }

        let mut remaining = data.as_slice();
        for (path, length) in self.torrent.output_paths().into_iter().zip(file_lengths(self.torrent)) {
            let full_path = output_dir.join(path);
            if let Some(parent) = full_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let (chunk, rest) = remaining.split_at(length as usize);
            fs::write(&full_path, chunk)?;
            remaining = rest;
        }
        Ok(())
    }
}

fn file_lengths(torrent: &Torrent) -> Vec<u64> {
    use crate::torrent::metainfo::Layout;
    match &torrent.layout {
        Layout::Single { length, .. } => vec![*length],
        Layout::Multi { files, .. } => files.iter().map(|f| f.length).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::metainfo::Layout;
    use tempfile::tempdir;

    fn make_torrent(total_length: u64, piece_length: u32, piece_hashes: Vec<[u8; 20]>) -> Torrent {
        Torrent {
            announce: "http://tracker.example/announce".into(),
            info_hash: [0u8; 20],
            peer_id: [0u8; 20],
            piece_length,
            piece_hashes,
            layout: Layout::Single { name: "file.bin".into(), length: total_length },
            announce_list: Vec::new(),
            creation_date: None,
            comment: String::new(),
            created_by: String::new(),
            encoding: String::new(),
            private: false,
        }
    }

    #[test]
    fn verifies_and_drops_a_corrupt_piece() {
        let good_data = vec![7u8; 16384];
        let good_hash: [u8; 20] = Sha1::digest(&good_data).into();
        let torrent = make_torrent(16384, 16384, vec![good_hash]);
        let mut assembler = Assembler::new(&torrent);

        assembler.add(Block { index: 0, begin: 0, length: 16384 }, vec![0u8; 16384]);
        let failed = assembler.get_failed();
        assert_eq!(failed, vec![Block { index: 0, begin: 0, length: 16384 }]);
        assert!(!assembler.is_complete());

        assembler.add(Block { index: 0, begin: 0, length: 16384 }, good_data);
        assert!(assembler.get_failed().is_empty());
        assert!(assembler.is_complete());
    }

    #[test]
    fn only_checks_pieces_once_all_their_blocks_are_present() {
        let data = vec![1u8; 20000];
        let hash: [u8; 20] = Sha1::digest(&data).into();
        let torrent = make_torrent(20000, 32768, vec![hash]);
        let mut assembler = Assembler::new(&torrent);

        assembler.add(Block { index: 0, begin: 0, length: 16384 }, data[..16384].to_vec());
        assert!(assembler.get_failed().is_empty(), "partial piece must not be judged yet");

        assembler.add(Block { index: 0, begin: 16384, length: 3616 }, data[16384..].to_vec());
        assert!(assembler.get_failed().is_empty());
        assert!(assembler.is_complete());
    }

    #[test]
    fn saves_single_file_layout_to_disk() {
        let data = vec![9u8; 100];
        let hash: [u8; 20] = Sha1::digest(&data).into();
        let torrent = make_torrent(100, 16384, vec![hash]);
        let mut assembler = Assembler::new(&torrent);
        assembler.add(Block { index: 0, begin: 0, length: 100 }, data.clone());
        assert!(assembler.get_failed().is_empty());

        let dir = tempdir().unwrap();
        assembler.save(dir.path()).unwrap();
        let written = fs::read(dir.path().join("file.bin")).unwrap();
        assert_eq!(written, data);
    }
}
