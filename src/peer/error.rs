use thiserror::Error;

use crate::storage::StorageError;

/// Errors that end a peer session.
///
/// Every variant is fatal to the one connection it occurred on and to
/// nothing else; the swarm reaps the dead session and carries on.
#[derive(Debug, Error)]
pub enum PeerError {
    /// Network I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer sent a malformed handshake.
    #[error("invalid handshake")]
    InvalidHandshake,

    /// The peer's handshake names a different torrent.
    #[error("info hash mismatch")]
    InfoHashMismatch,

    /// Received a malformed protocol message.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Received a message id outside the protocol.
    #[error("unknown message id: {0}")]
    UnknownMessageId(u8),

    /// A length prefix no real frame would carry.
    #[error("frame length {0} exceeds limit")]
    FrameTooLarge(usize),

    /// Bitfield payload does not match the torrent's piece count.
    #[error("bitfield length {got}, expected {expected}")]
    BitfieldLength { got: usize, expected: usize },

    /// The connection was closed by the peer.
    #[error("connection closed")]
    ConnectionClosed,

    /// A socket operation timed out.
    #[error("timeout")]
    Timeout,

    /// The peer claims no piece we still need.
    #[error("peer has nothing we need")]
    NothingToRequest,

    /// A received block was rejected by the piece store.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}
