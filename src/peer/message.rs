//! Typed peer-wire messages and their raw <-> structured conversions.
//!
//! Every variant but the handshake (§[`super::handshake`]) shares a
//! length-prefixed frame: a 4-byte big-endian length, followed by that many
//! bytes starting with a one-byte message ID.
use byteorder::{BigEndian, ByteOrder};

use super::{PeerError, PeerResult};

const ID_CHOKE: u8 = 0;
const ID_UNCHOKE: u8 = 1;
const ID_INTERESTED: u8 = 2;
const ID_NOT_INTERESTED: u8 = 3;
const ID_HAVE: u8 = 4;
const ID_BITFIELD: u8 = 5;
const ID_REQUEST: u8 = 6;
const ID_PIECE: u8 = 7;
const ID_CANCEL: u8 = 8;
const ID_PORT: u8 = 9;

/// A single peer-wire message, after the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece_index: u32 },
    Bitfield { bits: Vec<u8> },
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, block: Vec<u8> },
    Cancel { index: u32, begin: u32, length: u32 },
    Port { listen_port: u16 },
}

impl Message {
    /// Serialize to the exact wire frame in spec §4.4's table.
    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Message::KeepAlive => vec![0, 0, 0, 0],
            Message::Choke => frame(ID_CHOKE, &[]),
            Message::Unchoke => frame(ID_UNCHOKE, &[]),
            Message::Interested => frame(ID_INTERESTED, &[]),
            Message::NotInterested => frame(ID_NOT_INTERESTED, &[]),
            Message::Have { piece_index } => frame(ID_HAVE, &piece_index.to_be_bytes()),
            Message::Bitfield { bits } => frame(ID_BITFIELD, bits),
            Message::Request { index, begin, length } => {
                let mut body = Vec::with_capacity(12);
                body.extend_from_slice(&index.to_be_bytes());
                body.extend_from_slice(&begin.to_be_bytes());
                body.extend_from_slice(&length.to_be_bytes());
                frame(ID_REQUEST, &body)
            }
            Message::Piece { index, begin, block } => {
                let mut body = Vec::with_capacity(8 + block.len());
                body.extend_from_slice(&index.to_be_bytes());
                body.extend_from_slice(&begin.to_be_bytes());
                body.extend_from_slice(block);
                frame(ID_PIECE, &body)
            }
            Message::Cancel { index, begin, length } => {
                let mut body = Vec::with_capacity(12);
                body.extend_from_slice(&index.to_be_bytes());
                body.extend_from_slice(&begin.to_be_bytes());
                body.extend_from_slice(&length.to_be_bytes());
                frame(ID_CANCEL, &body)
            }
            Message::Port { listen_port } => frame(ID_PORT, &listen_port.to_be_bytes()),
        }
    }

    /// Parse one complete frame (length prefix included) into a `Message`.
    /// `MalformedFrame` if the length prefix, ID, or payload size disagree.
    pub fn parse(frame: &[u8]) -> PeerResult<Message> {
        if frame.len() < 4 {
            return Err(PeerError::MalformedFrame("frame shorter than length prefix".into()));
        }
        let declared_len = BigEndian::read_u32(&frame[..4]) as usize;
        if frame.len() != 4 + declared_len {
            return Err(PeerError::MalformedFrame(format!(
                "length prefix {} does not match frame size {}",
                declared_len,
                frame.len() - 4
            )));
        }
        if declared_len == 0 {
            return Ok(Message::KeepAlive);
        }

        let id = frame[4];
        let body = &frame[5..];
        match id {
            ID_CHOKE if body.is_empty() => Ok(Message::Choke),
            ID_UNCHOKE if body.is_empty() => Ok(Message::Unchoke),
            ID_INTERESTED if body.is_empty() => Ok(Message::Interested),
            ID_NOT_INTERESTED if body.is_empty() => Ok(Message::NotInterested),
            ID_HAVE if body.len() == 4 => Ok(Message::Have {
                piece_index: BigEndian::read_u32(body),
            }),
            ID_BITFIELD => Ok(Message::Bitfield { bits: body.to_vec() }),
            ID_REQUEST if body.len() == 12 => Ok(Message::Request {
                index: BigEndian::read_u32(&body[0..4]),
                begin: BigEndian::read_u32(&body[4..8]),
                length: BigEndian::read_u32(&body[8..12]),
            }),
            ID_PIECE if body.len() >= 8 => Ok(Message::Piece {
                index: BigEndian::read_u32(&body[0..4]),
                begin: BigEndian::read_u32(&body[4..8]),
                block: body[8..].to_vec(),
            }),
            ID_CANCEL if body.len() == 12 => Ok(Message::Cancel {
                index: BigEndian::read_u32(&body[0..4]),
                begin: BigEndian::read_u32(&body[4..8]),
                length: BigEndian::read_u32(&body[8..12]),
            }),
            ID_PORT if body.len() == 2 => Ok(Message::Port {
                listen_port: BigEndian::read_u16(body),
            }),
            other => Err(PeerError::MalformedFrame(format!(
                "id {other} with body of {} bytes",
                body.len()
            ))),
        }
    }
}

fn frame(id: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + body.len());
    out.extend_from_slice(&(1 + body.len() as u32).to_be_bytes());
    out.push(id);
    out.extend_from_slice(body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(msg: Message) {
        let raw = msg.serialize();
        assert_eq!(Message::parse(&raw).unwrap(), msg);
    }

    #[test]
    fn round_trips_every_variant() {
        round_trip(Message::KeepAlive);
        round_trip(Message::Choke);
        round_trip(Message::Unchoke);
        round_trip(Message::Interested);
        round_trip(Message::NotInterested);
        round_trip(Message::Have { piece_index: 7 });
        round_trip(Message::Bitfield { bits: vec![0b1010_0000, 0xFF] });
        round_trip(Message::Request { index: 1, begin: 16384, length: 16384 });
        round_trip(Message::Piece { index: 1, begin: 0, block: vec![1, 2, 3] });
        round_trip(Message::Cancel { index: 2, begin: 0, length: 16384 });
        round_trip(Message::Port { listen_port: 6881 });
    }

    #[test]
    fn frame_lengths_match_protocol_table() {
        assert_eq!(Message::Choke.serialize().len(), 4 + 1);
        assert_eq!(Message::Have { piece_index: 0 }.serialize().len(), 4 + 5);
        assert_eq!(
            Message::Request { index: 0, begin: 0, length: 0 }.serialize().len(),
            4 + 13
        );
        assert_eq!(
            Message::Piece { index: 0, begin: 0, block: vec![0; 100] }.serialize().len(),
            4 + 9 + 100
        );
    }

    #[test]
    fn bitfield_bit_order_is_msb_first_per_byte() {
        // Bit i (MSB-first in byte i/8) set means piece i is available.
        let bits = vec![0b1000_0001u8];
        let msg = Message::Bitfield { bits: bits.clone() };
        if let Message::Bitfield { bits } = msg {
            let piece_0 = bits[0] & 0b1000_0000 != 0;
            let piece_7 = bits[0] & 0b0000_0001 != 0;
            assert!(piece_0 && piece_7);
        }
    }

    #[test]
    fn rejects_mismatched_length_prefix() {
        let mut raw = Message::Choke.serialize();
        raw[3] = 5; // length prefix now disagrees with actual frame size
        assert!(Message::parse(&raw).is_err());
    }
}
