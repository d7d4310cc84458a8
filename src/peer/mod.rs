//! Peer wire protocol: handshake, typed messages, the stream framer, and
//! the per-connection session state machine.
use thiserror::Error;

pub mod handshake;
pub mod message;
pub mod session;

pub use handshake::Handshake;
pub use message::Message;
pub use session::PeerSession;

/// Spec's `PeerFailure` error kind: anything that discards a single peer
/// session without aborting the download.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("invalid handshake: {0}")]
    InvalidHandshake(String),

    #[error("info hash mismatch")]
    InfoHashMismatch,

    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}

pub type PeerResult<T> = std::result::Result<T, PeerError>;
