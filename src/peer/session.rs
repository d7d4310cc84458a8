//! A single peer connection: handshake, framer, choke/interest state
//! machine, and the one-block-at-a-time download operation.
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use byteorder::{BigEndian, ByteOrder};
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::instrument;

use super::{Handshake, Message, PeerError, PeerResult};
use crate::block::Block;

/// Per-spec §5: the natural quantum of a round. A receive-round ends
/// (without error) once this much time passes with no new bytes.
const IDLE_TIMEOUT: Duration = Duration::from_secs(1);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const READ_CHUNK: usize = 1024;

/// The four orthogonal choke/interest flags plus the piece-availability set
/// a peer has advertised via BITFIELD/HAVE.
#[derive(Debug, Default)]
pub struct SessionState {
    pub remote_choking: bool,
    pub remote_interested: bool,
    pub we_choking: bool,
    pub we_interested: bool,
    pub handshake_complete: bool,
    pub available_pieces: HashSet<u32>,
}

impl SessionState {
    fn initial() -> Self {
        SessionState {
            remote_choking: true,
            remote_interested: false,
            we_choking: true,
            we_interested: false,
            handshake_complete: false,
            available_pieces: HashSet::new(),
        }
    }
}

/// A duplex connection to exactly one peer. Dropping the session closes the
/// socket deterministically.
pub struct PeerSession {
    pub addr: SocketAddr,
    stream: TcpStream,
    buffer: BytesMut,
    state: SessionState,
}

impl PeerSession {
    /// Connect to `addr` and perform the handshake. Discards the session
    /// (by returning `Err`) if the connection or handshake fails.
    #[instrument(skip(info_hash, peer_id), fields(addr = %addr))]
    pub async fn connect(addr: SocketAddr, info_hash: [u8; 20], peer_id: [u8; 20]) -> PeerResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        let mut session = PeerSession {
            addr,
            stream,
            buffer: BytesMut::new(),
            state: SessionState::initial(),
        };
        session.handshake(info_hash, peer_id).await?;
        Ok(session)
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn has_piece(&self, index: u32) -> bool {
        self.state.available_pieces.contains(&index)
    }

    /// Send our handshake, then wait for the peer's. A received prefix must
    /// start with `\x13BitTorrent protocol` and carry our info-hash; any
    /// mismatch discards the session. Bytes following the 68-byte prefix in
    /// the same receive are kept buffered and processed as ordinary
    /// messages on the next [`PeerSession::receive_next_batch`].
    #[instrument(skip(self, info_hash, peer_id))]
    async fn handshake(&mut self, info_hash: [u8; 20], peer_id: [u8; 20]) -> PeerResult<()> {
        let outbound = Handshake::new(info_hash, peer_id).serialize();
        self.stream.write_all(&outbound).await?;

        let mut read_buf = [0u8; READ_CHUNK];
        while self.buffer.len() < 68 {
            let n = timeout(HANDSHAKE_TIMEOUT, self.stream.read(&mut read_buf))
                .await
                .map_err(|_| PeerError::HandshakeTimeout)??;
            if n == 0 {
                return Err(PeerError::HandshakeTimeout);
            }
            self.buffer.extend_from_slice(&read_buf[..n]);
        }

        let mut prefix = [0u8; 68];
        prefix.copy_from_slice(&self.buffer[..68]);
        self.buffer.advance(68);

        let handshake = Handshake::parse(&prefix)?;
        handshake.validate(&info_hash)?;
        self.state.handshake_complete = true;
        Ok(())
    }

    async fn send(&mut self, msg: &Message) -> PeerResult<()> {
        self.stream.write_all(&msg.serialize()).await?;
        Ok(())
    }

    /// Length of the next complete frame buffered (length prefix included),
    /// or `None` if the buffer doesn't yet hold one.
    fn next_frame_len(&self) -> Option<usize> {
        if self.buffer.len() < 4 {
            return None;
        }
        let body_len = BigEndian::read_u32(&self.buffer[..4]) as usize;
        let total = 4 + body_len;
        (self.buffer.len() >= total).then_some(total)
    }

    fn drain_complete_frames(&mut self, out: &mut Vec<Message>) -> PeerResult<()> {
        while let Some(len) = self.next_frame_len() {
            let frame = self.buffer.split_to(len);
            let msg = Message::parse(&frame)?;
            self.apply(&msg);
            out.push(msg);
        }
        Ok(())
    }

    fn apply(&mut self, msg: &Message) {
        match msg {
            Message::Choke => self.state.remote_choking = true,
            Message::Unchoke => self.state.remote_choking = false,
            Message::Interested => self.state.remote_interested = true,
            Message::NotInterested => self.state.remote_interested = false,
            Message::Have { piece_index } => {
                self.state.available_pieces.insert(*piece_index);
            }
            Message::Bitfield { bits } => {
                self.state.available_pieces.extend(bitfield_piece_indices(bits));
            }
            _ => {}
        }
    }

    /// Collect every frame that arrives before a 1-second idle period,
    /// applying state transitions as they're parsed. An idle timeout with
    /// nothing buffered yields an empty batch — that's a normal round
    /// outcome, not an error.
    #[instrument(skip(self))]
    pub async fn receive_next_batch(&mut self) -> PeerResult<Vec<Message>> {
        let mut frames = Vec::new();
        let mut read_buf = [0u8; READ_CHUNK];
        loop {
            self.drain_complete_frames(&mut frames)?;
            match timeout(IDLE_TIMEOUT, self.stream.read(&mut read_buf)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => self.buffer.extend_from_slice(&read_buf[..n]),
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => break,
            }
        }
        self.drain_complete_frames(&mut frames)?;
        Ok(frames)
    }

    /// Attempt to download `block`, sending INTERESTED on first use. Any
    /// transport or decoding failure, a remote choke, or a round that never
    /// yields the matching PIECE all resolve to `None` — the caller
    /// re-queues the block.
    #[instrument(skip(self), fields(addr = %self.addr, index = block.index, begin = block.begin))]
    pub async fn request(&mut self, block: Block) -> Option<Vec<u8>> {
        self.try_request(block).await.unwrap_or(None)
    }

    async fn try_request(&mut self, block: Block) -> PeerResult<Option<Vec<u8>>> {
        if !self.state.we_interested {
            self.send(&Message::Interested).await?;
            self.state.we_interested = true;
        }

        // Refresh choke/interest/availability state on every call, not just
        // the first — otherwise a session that was choked once would never
        // learn of a later UNCHOKE and would be stuck returning `None` for
        // the rest of the download.
        self.receive_next_batch().await?;

        if self.state.remote_choking {
            return Ok(None);
        }

        self.send(&Message::Request {
            index: block.index,
            begin: block.begin,
            length: block.length,
        })
        .await?;

        loop {
            let batch = self.receive_next_batch().await?;
            if batch.is_empty() {
                return Ok(None);
            }
            for msg in &batch {
                if let Message::Piece { index, begin, block: data } = msg {
                    if *index == block.index && *begin == block.begin {
                        return Ok(Some(data.clone()));
                    }
                }
            }
        }
    }
}

fn bitfield_piece_indices(bits: &[u8]) -> impl Iterator<Item = u32> + '_ {
    bits.iter().enumerate().flat_map(|(byte_index, byte)| {
        (0..8u32).filter_map(move |bit| {
            let mask = 0x80u8 >> bit;
            (byte & mask != 0).then_some((byte_index as u32) * 8 + bit)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitfield_decodes_msb_first() {
        let pieces: Vec<u32> = bitfield_piece_indices(&[0b1000_0001, 0b0100_0000]).collect();
        assert_eq!(pieces, vec![0, 7, 9]);
    }

    #[test]
    fn initial_state_matches_spec() {
        let state = SessionState::initial();
        assert!(state.remote_choking);
        assert!(state.we_choking);
        assert!(!state.remote_interested);
        assert!(!state.we_interested);
        assert!(!state.handshake_complete);
    }
}
