use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::time::{interval_at, timeout, Instant};
use tracing::{debug, trace};

use crate::metainfo::InfoHash;
use crate::storage::PieceStore;

use super::bitfield::Bitfield;
use super::error::PeerError;
use super::message::Message;
use super::peer_id::PeerId;

/// Maximum REQUESTs outstanding per peer.
pub const MAX_IN_FLIGHT: usize = 4;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

struct InFlight {
    piece: u32,
    offset: u32,
    sent_at: Instant,
}

// the next block to ask for: a piece and an offset within it
#[derive(Debug, Clone, Copy)]
struct Cursor {
    piece: u32,
    sub_offset: u32,
}

/// One session per remote address.
///
/// Connects, handshakes, records what the peer advertises, and once
/// unchoked keeps up to [`MAX_IN_FLIGHT`] block requests outstanding,
/// feeding every received block into the shared [`PieceStore`]. The session
/// ends on any protocol or transport error, or when the peer has no piece
/// we still need; the swarm notices through the shared `connected` flag.
pub struct PeerSession {
    addr: String,
    info_hash: InfoHash,
    peer_id: PeerId,
    store: Arc<PieceStore>,
    connected: Arc<AtomicBool>,
    handshaked: bool,
    choked: bool,
    peer_bitfield: Option<Bitfield>,
    in_flight: Vec<InFlight>,
    cursor: Option<Cursor>,
}

impl PeerSession {
    pub fn new(
        addr: String,
        info_hash: InfoHash,
        peer_id: PeerId,
        store: Arc<PieceStore>,
        connected: Arc<AtomicBool>,
    ) -> Self {
        Self {
            addr,
            info_hash,
            peer_id,
            store,
            connected,
            handshaked: false,
            choked: true,
            peer_bitfield: None,
            in_flight: Vec::with_capacity(MAX_IN_FLIGHT),
            cursor: None,
        }
    }

    /// Drives the session until it ends. The shared `connected` flag is set
    /// while the TCP stream is up and cleared on return.
    pub async fn run(mut self) -> Result<(), PeerError> {
        let result = self.run_inner().await;
        self.connected.store(false, Ordering::Relaxed);

        match &result {
            Ok(()) => trace!(addr = %self.addr, "peer session finished"),
            Err(e) => debug!(addr = %self.addr, error = %e, "peer session ended"),
        }

        result
    }

    async fn run_inner(&mut self) -> Result<(), PeerError> {
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| PeerError::Timeout)??;
        self.connected.store(true, Ordering::Relaxed);
        trace!(addr = %self.addr, "connected");

        let (mut reader, mut writer) = stream.into_split();

        let handshake = Message::Handshake {
            info_hash: *self.info_hash.as_bytes(),
            peer_id: *self.peer_id.as_bytes(),
        };
        send(&mut writer, handshake).await?;

        let mut read_buf = BytesMut::with_capacity(32 * 1024);
        let mut keepalive =
            interval_at(Instant::now() + KEEPALIVE_INTERVAL, KEEPALIVE_INTERVAL);

        loop {
            tokio::select! {
                read = reader.read_buf(&mut read_buf) => {
                    if read? == 0 {
                        return Err(PeerError::ConnectionClosed);
                    }
                    // drain every complete frame; back-to-back messages
                    // often share a segment
                    while let Some((consumed, message)) = Message::decode(&read_buf)? {
                        let _ = read_buf.split_to(consumed);
                        self.handle(&mut writer, message).await?;
                    }
                }
                _ = keepalive.tick() => {
                    self.expire_requests();
                    self.fill_pipeline(&mut writer).await?;
                    send(&mut writer, Message::KeepAlive).await?;
                }
            }
        }
    }

    async fn handle(
        &mut self,
        writer: &mut OwnedWriteHalf,
        message: Message,
    ) -> Result<(), PeerError> {
        if !self.handshaked {
            let Message::Handshake { info_hash, .. } = message else {
                return Err(PeerError::InvalidMessage(
                    "expected handshake first".into(),
                ));
            };

            if info_hash != *self.info_hash.as_bytes() {
                return Err(PeerError::InfoHashMismatch);
            }

            self.handshaked = true;
            trace!(addr = %self.addr, "handshake complete");
            return send(writer, Message::Interested).await;
        }

        match message {
            Message::Handshake { .. } => {
                Err(PeerError::InvalidMessage("repeated handshake".into()))
            }
            Message::KeepAlive => Ok(()),
            Message::Choke => {
                trace!(addr = %self.addr, "choked");
                self.choked = true;
                Ok(())
            }
            Message::Unchoke => {
                trace!(addr = %self.addr, "unchoked");
                self.choked = false;
                self.fill_pipeline(writer).await
            }
            // we advertise nothing, so the peer's interest is moot
            Message::Interested | Message::NotInterested => Ok(()),
            Message::Have(index) => {
                self.peer_bitfield
                    .get_or_insert_with(|| Bitfield::new(self.store.piece_count()))
                    .set(index as usize);
                Ok(())
            }
            Message::Bitfield(bytes) => {
                let expected = self.store.piece_count().div_ceil(8);
                if bytes.len() != expected {
                    return Err(PeerError::BitfieldLength {
                        got: bytes.len(),
                        expected,
                    });
                }
                self.peer_bitfield =
                    Some(Bitfield::from_bytes(bytes, self.store.piece_count()));
                Ok(())
            }
            // a leecher never unchokes anyone, so these carry no obligation
            Message::Request { .. } | Message::Cancel { .. } => Ok(()),
            Message::Piece { index, begin, data } => {
                trace!(
                    addr = %self.addr,
                    piece = index,
                    offset = begin,
                    len = data.len(),
                    "block received"
                );
                self.in_flight
                    .retain(|r| !(r.piece == index && r.offset == begin));
                self.store.save(index, begin, &data).await?;
                self.fill_pipeline(writer).await
            }
        }
    }

    // a peer that unchoked us and then went silent must not hold its four
    // slots forever; stale requests are re-issued through the normal pick
    fn expire_requests(&mut self) {
        let before = self.in_flight.len();
        self.in_flight
            .retain(|r| r.sent_at.elapsed() < REQUEST_TIMEOUT);

        let expired = before - self.in_flight.len();
        if expired > 0 {
            debug!(addr = %self.addr, expired, "dropped stale requests");
        }
    }

    async fn fill_pipeline(&mut self, writer: &mut OwnedWriteHalf) -> Result<(), PeerError> {
        if self.choked || !self.handshaked {
            return Ok(());
        }

        while self.in_flight.len() < MAX_IN_FLIGHT {
            let (piece, offset, length) = self.next_request()?;

            self.in_flight.push(InFlight {
                piece,
                offset,
                sent_at: Instant::now(),
            });

            trace!(addr = %self.addr, piece, offset, length, "requesting block");
            send(
                writer,
                Message::Request {
                    index: piece,
                    begin: offset,
                    length,
                },
            )
            .await?;
        }

        Ok(())
    }

    /// Picks the next block to request.
    ///
    /// The cursor walks blocks within its piece and wraps to the next piece
    /// index when the piece is exhausted. Whenever the cursor is unset, or
    /// points at a piece the peer no longer claims or that finished in the
    /// meantime, a fresh piece is chosen uniformly at random from the
    /// incomplete pieces the peer advertises. No such piece means the peer
    /// has nothing further to offer and the session ends.
    fn next_request(&mut self) -> Result<(u32, u32, u32), PeerError> {
        let claimed = self
            .peer_bitfield
            .as_ref()
            .ok_or(PeerError::NothingToRequest)?;
        let piece_count = self.store.piece_count() as u32;

        let mut hops = 0;
        loop {
            let cursor = match self.cursor {
                Some(c)
                    if claimed.has(c.piece as usize)
                        && !self.store.is_piece_complete(c.piece) =>
                {
                    c
                }
                _ => {
                    let piece = self
                        .store
                        .pick_random_incomplete(claimed)
                        .ok_or(PeerError::NothingToRequest)?;
                    Cursor {
                        piece,
                        sub_offset: 0,
                    }
                }
            };

            match self
                .store
                .first_incomplete_after(cursor.piece, cursor.sub_offset)
            {
                Some((offset, length)) => {
                    let next = offset + length;
                    self.cursor = if u64::from(next) >= self.store.piece_size(cursor.piece) {
                        Some(Cursor {
                            piece: (cursor.piece + 1) % piece_count,
                            sub_offset: 0,
                        })
                    } else {
                        Some(Cursor {
                            piece: cursor.piece,
                            sub_offset: next,
                        })
                    };
                    return Ok((cursor.piece, offset, length));
                }
                None => {
                    // remaining blocks sit before the hint (the piece was
                    // reset mid-walk); move on and re-pick if needed
                    self.cursor = Some(Cursor {
                        piece: (cursor.piece + 1) % piece_count,
                        sub_offset: 0,
                    });
                    hops += 1;
                    if hops > piece_count {
                        return Err(PeerError::NothingToRequest);
                    }
                }
            }
        }
    }
}

async fn send<W: AsyncWrite + Unpin>(writer: &mut W, message: Message) -> Result<(), PeerError> {
    let data = message.encode();
    timeout(WRITE_TIMEOUT, writer.write_all(&data))
        .await
        .map_err(|_| PeerError::Timeout)??;
    Ok(())
}
