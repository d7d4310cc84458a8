//! HTTP tracker client: one GET request per announce, bencoded response.
//!
//! Announces are stateless from our side — every call builds a fresh query
//! string from the torrent's info-hash and our own peer-id and port, and
//! parses whatever the tracker hands back (compact or non-compact peer
//! lists) into a flat [`Peer`] list.
use std::net::{IpAddr, Ipv4Addr};

use serde::Deserialize;
use thiserror::Error;
use tracing::instrument;

use crate::torrent::metainfo::Torrent;

/// Spec's `TrackerError` kind: failures talking to the tracker, none of
/// which abort the whole download — the orchestrator treats an announce
/// failure as "no peers this round".
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("invalid announce URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("tracker request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("malformed tracker response: {0}")]
    MalformedResponse(#[from] serde_bencode::Error),
}

pub type TrackerResult<T> = std::result::Result<T, TrackerError>;

/// A client communicating with a single torrent's tracker. Stateless past
/// the peer-id and listening port, both fixed for the client's lifetime.
#[derive(Debug)]
pub struct Client {
    peer_id: [u8; 20],
    port: u16,
}

/// Parameters of an announce request, per spec §4.6.
#[derive(Debug)]
pub struct AnnounceRequest {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
    pub compact: bool,
    pub event: &'static str,
}

/// A peer the tracker told us about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub ip: IpAddr,
    pub port: u16,
}

/// The parsed announce response: how long to wait before the next
/// announce, and who to try connecting to.
#[derive(Debug)]
pub struct AnnounceResponse {
    pub interval: i64,
    pub peers: Vec<Peer>,
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    #[serde(default)]
    interval: i64,
    #[serde(default)]
    peers: RawPeers,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPeers {
    Compact(Vec<u8>),
    NonCompact(Vec<RawPeerDict>),
}

impl Default for RawPeers {
    fn default() -> Self {
        RawPeers::Compact(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
struct RawPeerDict {
    ip: String,
    port: u16,
}

impl Client {
    pub fn new(peer_id: [u8; 20], port: u16) -> Self {
        Client { peer_id, port }
    }

    /// Announce to `torrent`'s tracker and return the peer list it offers.
    #[instrument(skip(self, torrent), fields(announce = %torrent.announce), level = "debug")]
    pub async fn announce(&self, torrent: &Torrent, downloaded: u64) -> TrackerResult<AnnounceResponse> {
        let request = AnnounceRequest {
            info_hash: torrent.info_hash,
            peer_id: self.peer_id,
            port: self.port,
            uploaded: 0,
            downloaded,
            left: torrent.total_length().saturating_sub(downloaded),
            compact: true,
            event: "started",
        };

        let mut url = url::Url::parse(&torrent.announce)?;
        let params = [
            ("info_hash", url_encode(&request.info_hash)),
            ("peer_id", url_encode(&request.peer_id)),
            ("port", request.port.to_string()),
            ("uploaded", request.uploaded.to_string()),
            ("downloaded", request.downloaded.to_string()),
            ("left", request.left.to_string()),
            ("compact", (request.compact as i32).to_string()),
            ("event", request.event.to_string()),
        ];
        url.query_pairs_mut().extend_pairs(&params).finish();
        tracing::debug!(%url, "announcing to tracker");

        let response = reqwest::get(url).await?;
        let body = response.bytes().await?;
        Self::parse_announce_response(&body)
    }

    /// Decode a bencoded tracker response, handling both the compact
    /// (6-byte-per-peer) and non-compact (dict-per-peer) `peers` forms.
    fn parse_announce_response(bytes: &[u8]) -> TrackerResult<AnnounceResponse> {
        let raw: RawResponse = serde_bencode::from_bytes(bytes)?;
        let peers = match raw.peers {
            RawPeers::Compact(bytes) => bytes
                .chunks_exact(6)
                .map(|chunk| Peer {
                    ip: IpAddr::V4(Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3])),
                    port: u16::from_be_bytes([chunk[4], chunk[5]]),
                })
                .collect(),
            RawPeers::NonCompact(dicts) => dicts
                .into_iter()
                .filter_map(|dict| dict.ip.parse::<IpAddr>().ok().map(|ip| Peer { ip, port: dict.port }))
                .collect(),
        };
        Ok(AnnounceResponse { interval: raw.interval, peers })
    }
}

/// RFC 3986 percent-encoding, used for the binary `info_hash`/`peer_id`
/// query parameters trackers expect raw (not base64 or hex).
fn url_encode(bytes: &[u8]) -> String {
    let mut encoded = String::with_capacity(bytes.len() * 3);
    for &byte in bytes {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char);
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compact_peer_list() {
        let mut body = b"d8:intervali1800e5:peers12:".to_vec();
        body.extend_from_slice(&[127, 0, 0, 1, 0x1A, 0xE1]);
        body.extend_from_slice(&[10, 0, 0, 2, 0x1A, 0xE2]);
        body.push(b'e');

        let response = Client::parse_announce_response(&body).unwrap();
        assert_eq!(response.interval, 1800);
        assert_eq!(response.peers.len(), 2);
        assert_eq!(response.peers[0].ip, IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)));
        assert_eq!(response.peers[0].port, 6881);
    }

    #[test]
    fn parses_non_compact_peer_list() {
        let body = b"d8:intervali900e5:peersld2:ip9:127.0.0.14:porti6881eeee";
        let response = Client::parse_announce_response(body).unwrap();
        assert_eq!(response.interval, 900);
        assert_eq!(response.peers[0].port, 6881);
    }

    #[test]
    fn url_encode_preserves_unreserved_and_escapes_the_rest() {
        assert_eq!(url_encode(b"az09-._~"), "az09-._~");
        assert_eq!(url_encode(&[0x00, 0xFF]), "%00%FF");
    }
}
