//! Peer wire protocol (BEP-3)
//!
//! The handshake and message codec, the per-peer bitfield, and the session
//! task that drives one TCP connection from connect through the pipelined
//! request loop. This client only leeches: it advertises no pieces and
//! never answers a request.

mod bitfield;
mod error;
mod message;
mod peer_id;
mod session;

pub use bitfield::Bitfield;
pub use error::PeerError;
pub use message::{Message, MessageId, HANDSHAKE_LEN, PROTOCOL};
pub use peer_id::PeerId;
pub use session::{PeerSession, MAX_IN_FLIGHT};

#[cfg(test)]
mod tests;
