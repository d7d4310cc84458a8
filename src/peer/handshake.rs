//! The BitTorrent handshake: the 68-byte fixed-format prologue exchanged
//! before any length-prefixed messages.
//!
//! The handshake is the first message exchanged between two peers. It
//! verifies that both peers are participating in the same torrent (via
//! `info_hash`) and establishes basic protocol compatibility.
use tracing::instrument;

use super::{PeerError, PeerResult};

const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";

/// A BitTorrent handshake: protocol identifier, reserved extension bytes,
/// info-hash, and peer-id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub reserved: [u8; 8],
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Handshake {
            reserved: [0u8; 8],
            info_hash,
            peer_id,
        }
    }

    /// Serialize into the 68-byte wire frame: `pstrlen`, `pstr`, reserved,
    /// info-hash, peer-id.
    #[instrument(level = "trace")]
    pub fn serialize(&self) -> [u8; 68] {
        let mut buf = [0u8; 68];
        buf[0] = 19;
        buf[1..20].copy_from_slice(PROTOCOL);
        buf[20..28].copy_from_slice(&self.reserved);
        buf[28..48].copy_from_slice(&self.info_hash);
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    /// Parse a 68-byte handshake frame, validating the protocol identifier.
    /// Does not itself validate `info_hash` — callers compare against their
    /// own expected value (see [`Handshake::validate`]).
    #[instrument(skip(buf), level = "trace")]
    pub fn parse(buf: &[u8; 68]) -> PeerResult<Self> {
        if buf[0] != 19 {
            return Err(PeerError::InvalidHandshake(format!(
                "expected pstrlen 19, got {}",
                buf[0]
            )));
        }
        if &buf[1..20] != PROTOCOL {
            return Err(PeerError::InvalidHandshake(
                "protocol identifier is not \"BitTorrent protocol\"".into(),
            ));
        }

        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&buf[20..28]);
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&buf[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&buf[48..68]);

        Ok(Handshake { reserved, info_hash, peer_id })
    }

    /// Confirm this handshake's info-hash matches ours.
    pub fn validate(&self, expected_info_hash: &[u8; 20]) -> PeerResult<()> {
        if &self.info_hash != expected_info_hash {
            return Err(PeerError::InfoHashMismatch);
        }
        Ok(())
    }
}
