use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::error::PeerError;

/// The BitTorrent protocol identifier sent in every handshake.
pub const PROTOCOL: &[u8] = b"BitTorrent protocol";
/// Length of the handshake frame in bytes.
pub const HANDSHAKE_LEN: usize = 68;

// a length prefix above this is a corrupt stream, not a real frame
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Message type identifiers in the peer wire protocol.
///
/// Each message except the handshake and keep-alive carries a one-byte id
/// after the length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    /// Peer stops serving our requests.
    Choke = 0,
    /// Peer is ready to serve our requests.
    Unchoke = 1,
    /// Sender wants to download.
    Interested = 2,
    /// Sender does not want to download.
    NotInterested = 3,
    /// Announce a newly acquired piece.
    Have = 4,
    /// Announce all available pieces at once.
    Bitfield = 5,
    /// Ask for a block of a piece.
    Request = 6,
    /// Deliver a block of a piece.
    Piece = 7,
    /// Withdraw a pending request.
    Cancel = 8,
}

impl TryFrom<u8> for MessageId {
    type Error = PeerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageId::Choke),
            1 => Ok(MessageId::Unchoke),
            2 => Ok(MessageId::Interested),
            3 => Ok(MessageId::NotInterested),
            4 => Ok(MessageId::Have),
            5 => Ok(MessageId::Bitfield),
            6 => Ok(MessageId::Request),
            7 => Ok(MessageId::Piece),
            8 => Ok(MessageId::Cancel),
            _ => Err(PeerError::UnknownMessageId(value)),
        }
    }
}

/// A peer wire frame, with the handshake and keep-alive as first-class
/// cases so session code can match on one type for everything that arrives.
///
/// # Examples
///
/// ```
/// use remora::peer::Message;
///
/// let request = Message::Request { index: 0, begin: 0, length: 16384 };
/// let bytes = request.encode();
/// assert_eq!(bytes.len(), 17); // 4-byte length + 1-byte id + 12-byte payload
///
/// let (consumed, decoded) = Message::decode(&bytes).unwrap().unwrap();
/// assert_eq!(consumed, 17);
/// assert_eq!(decoded, request);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// The 68-byte connection opener carrying the swarm id.
    Handshake {
        info_hash: [u8; 20],
        peer_id: [u8; 20],
    },
    /// Zero-length frame keeping the connection open.
    KeepAlive,
    /// Peer will not serve requests.
    Choke,
    /// Peer will serve requests.
    Unchoke,
    /// Sender wants to download from us.
    Interested,
    /// Sender no longer wants to download from us.
    NotInterested,
    /// Peer acquired the given piece.
    Have(u32),
    /// Peer's full piece map, packed MSB-first.
    Bitfield(Bytes),
    /// Ask for `length` bytes at `begin` within piece `index`.
    Request { index: u32, begin: u32, length: u32 },
    /// A block of piece data.
    Piece { index: u32, begin: u32, data: Bytes },
    /// Withdraw an earlier request.
    Cancel { index: u32, begin: u32, length: u32 },
}

impl Message {
    /// Encodes the frame for transmission, length prefix included.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        match self {
            Message::Handshake { info_hash, peer_id } => {
                buf.reserve(HANDSHAKE_LEN);
                buf.put_u8(PROTOCOL.len() as u8);
                buf.put_slice(PROTOCOL);
                buf.put_slice(&[0u8; 8]);
                buf.put_slice(info_hash);
                buf.put_slice(peer_id);
            }
            Message::KeepAlive => {
                buf.put_u32(0);
            }
            Message::Choke => {
                buf.put_u32(1);
                buf.put_u8(MessageId::Choke as u8);
            }
            Message::Unchoke => {
                buf.put_u32(1);
                buf.put_u8(MessageId::Unchoke as u8);
            }
            Message::Interested => {
                buf.put_u32(1);
                buf.put_u8(MessageId::Interested as u8);
            }
            Message::NotInterested => {
                buf.put_u32(1);
                buf.put_u8(MessageId::NotInterested as u8);
            }
            Message::Have(piece) => {
                buf.put_u32(5);
                buf.put_u8(MessageId::Have as u8);
                buf.put_u32(*piece);
            }
            Message::Bitfield(bits) => {
                buf.put_u32(1 + bits.len() as u32);
                buf.put_u8(MessageId::Bitfield as u8);
                buf.put_slice(bits);
            }
            Message::Request {
                index,
                begin,
                length,
            } => {
                buf.put_u32(13);
                buf.put_u8(MessageId::Request as u8);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_u32(*length);
            }
            Message::Piece { index, begin, data } => {
                buf.put_u32(9 + data.len() as u32);
                buf.put_u8(MessageId::Piece as u8);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_slice(data);
            }
            Message::Cancel {
                index,
                begin,
                length,
            } => {
                buf.put_u32(13);
                buf.put_u8(MessageId::Cancel as u8);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_u32(*length);
            }
        }

        buf.freeze()
    }

    /// Attempts to decode one frame from the front of a reassembly buffer.
    ///
    /// Returns `Ok(Some((consumed, message)))` when a full frame is present
    /// — the caller must drop exactly `consumed` bytes — and `Ok(None)` when
    /// more bytes are needed. A handshake is recognized by its first four
    /// bytes (`0x13` followed by `"Bit"`); everything else is a
    /// length-prefixed frame.
    pub fn decode(buf: &[u8]) -> Result<Option<(usize, Message)>, PeerError> {
        if buf.len() < 4 {
            return Ok(None);
        }

        if buf[..4] == [0x13, b'B', b'i', b't'] {
            return Self::decode_handshake(buf);
        }

        let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

        if length > MAX_FRAME_LEN {
            return Err(PeerError::FrameTooLarge(length));
        }

        if length == 0 {
            return Ok(Some((4, Message::KeepAlive)));
        }

        if buf.len() < 4 + length {
            return Ok(None);
        }

        let mut payload = &buf[4..4 + length];
        let id = MessageId::try_from(payload.get_u8())?;

        let message = match id {
            MessageId::Choke => Message::Choke,
            MessageId::Unchoke => Message::Unchoke,
            MessageId::Interested => Message::Interested,
            MessageId::NotInterested => Message::NotInterested,
            MessageId::Have => {
                if payload.remaining() < 4 {
                    return Err(PeerError::InvalidMessage("have too short".into()));
                }
                Message::Have(payload.get_u32())
            }
            MessageId::Bitfield => Message::Bitfield(Bytes::copy_from_slice(payload)),
            MessageId::Request => {
                if payload.remaining() < 12 {
                    return Err(PeerError::InvalidMessage("request too short".into()));
                }
                Message::Request {
                    index: payload.get_u32(),
                    begin: payload.get_u32(),
                    length: payload.get_u32(),
                }
            }
            MessageId::Piece => {
                if payload.remaining() < 8 {
                    return Err(PeerError::InvalidMessage("piece too short".into()));
                }
                Message::Piece {
                    index: payload.get_u32(),
                    begin: payload.get_u32(),
                    data: Bytes::copy_from_slice(payload),
                }
            }
            MessageId::Cancel => {
                if payload.remaining() < 12 {
                    return Err(PeerError::InvalidMessage("cancel too short".into()));
                }
                Message::Cancel {
                    index: payload.get_u32(),
                    begin: payload.get_u32(),
                    length: payload.get_u32(),
                }
            }
        };

        Ok(Some((4 + length, message)))
    }

    fn decode_handshake(buf: &[u8]) -> Result<Option<(usize, Message)>, PeerError> {
        if buf.len() < HANDSHAKE_LEN {
            return Ok(None);
        }

        if &buf[1..20] != PROTOCOL {
            return Err(PeerError::InvalidHandshake);
        }

        // bytes 20..28 are the reserved extension bits, which we ignore
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&buf[28..48]);

        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&buf[48..68]);

        Ok(Some((HANDSHAKE_LEN, Message::Handshake { info_hash, peer_id })))
    }
}
