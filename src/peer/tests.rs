use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::metainfo::{self, InfoHash};
use crate::storage::{FileLayout, PieceStore};

use super::*;

#[test]
fn test_bitfield_msb_first() {
    let mut bf = Bitfield::new(16);
    assert!(!bf.has(0));

    bf.set(0);
    assert_eq!(bf.as_bytes(), &[0x80, 0x00]);

    bf.set(15);
    assert_eq!(bf.as_bytes(), &[0x80, 0x01]);
    assert_eq!(bf.count_ones(), 2);

    bf.clear(0);
    assert!(!bf.has(0));
    assert!(bf.has(15));
}

#[test]
fn test_bitfield_from_bytes_ignores_spare_bits() {
    // 0xC0 declares bits 0 and 1; for a 2-piece torrent nothing else counts
    let bf = Bitfield::from_bytes(Bytes::from_static(&[0xC0]), 2);
    assert!(bf.has(0));
    assert!(bf.has(1));
    assert_eq!(bf.count_ones(), 2);
    assert!(bf.is_full());

    // trailing set bits past the declared length are dropped
    let bf = Bitfield::from_bytes(Bytes::from_static(&[0xFF]), 3);
    assert_eq!(bf.count_ones(), 3);
    assert!(!bf.has(3));
    assert_eq!(bf.as_bytes(), &[0xE0]);
}

#[test]
fn test_bitfield_misaligned_fill() {
    let mut bf = Bitfield::new(13);
    bf.fill(true);
    assert_eq!(bf.count_ones(), 13);
    assert!(bf.is_full());

    bf.fill(false);
    assert_eq!(bf.count_ones(), 0);
    assert!(bf.is_empty());
}

#[test]
fn test_encode_exact_bytes() {
    let request = Message::Request {
        index: 1,
        begin: 16384,
        length: 16384,
    };
    assert_eq!(
        request.encode().as_ref(),
        &[
            0, 0, 0, 13, 6, // length 13, id 6
            0, 0, 0, 1, // index
            0, 0, 0x40, 0, // begin
            0, 0, 0x40, 0, // length
        ]
    );

    assert_eq!(Message::KeepAlive.encode().as_ref(), &[0, 0, 0, 0]);
    assert_eq!(Message::Choke.encode().as_ref(), &[0, 0, 0, 1, 0]);
    assert_eq!(
        Message::Have(9).encode().as_ref(),
        &[0, 0, 0, 5, 4, 0, 0, 0, 9]
    );
}

#[test]
fn test_piece_payload_field_order() {
    let piece = Message::Piece {
        index: 1,
        begin: 2,
        data: Bytes::from_static(b"abc"),
    };
    assert_eq!(
        piece.encode().as_ref(),
        &[0, 0, 0, 12, 7, 0, 0, 0, 1, 0, 0, 0, 2, b'a', b'b', b'c']
    );
}

#[test]
fn test_handshake_layout() {
    let handshake = Message::Handshake {
        info_hash: [0xAA; 20],
        peer_id: [0xBB; 20],
    };
    let bytes = handshake.encode();

    assert_eq!(bytes.len(), HANDSHAKE_LEN);
    assert_eq!(bytes[0], 19);
    assert_eq!(&bytes[1..20], PROTOCOL);
    assert_eq!(&bytes[20..28], &[0u8; 8]);
    assert_eq!(&bytes[28..48], &[0xAA; 20]);
    assert_eq!(&bytes[48..68], &[0xBB; 20]);
}

#[test]
fn test_decode_round_trip_all_variants() {
    let messages = vec![
        Message::Handshake {
            info_hash: [1; 20],
            peer_id: [2; 20],
        },
        Message::KeepAlive,
        Message::Choke,
        Message::Unchoke,
        Message::Interested,
        Message::NotInterested,
        Message::Have(42),
        Message::Bitfield(Bytes::from_static(&[0xC0])),
        Message::Request {
            index: 1,
            begin: 0,
            length: 16384,
        },
        Message::Piece {
            index: 1,
            begin: 16384,
            data: Bytes::from_static(b"hello"),
        },
        Message::Cancel {
            index: 1,
            begin: 0,
            length: 16384,
        },
    ];

    for message in messages {
        let encoded = message.encode();
        let (consumed, decoded) = Message::decode(&encoded).unwrap().unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded, message);
    }
}

#[test]
fn test_decode_needs_more() {
    assert!(Message::decode(&[]).unwrap().is_none());
    assert!(Message::decode(&[0, 0, 0]).unwrap().is_none());

    // length prefix present, payload still missing
    assert!(Message::decode(&[0, 0, 0, 5, 4, 0]).unwrap().is_none());

    // a handshake cut short
    let handshake = Message::Handshake {
        info_hash: [1; 20],
        peer_id: [2; 20],
    }
    .encode();
    assert!(Message::decode(&handshake[..40]).unwrap().is_none());
}

#[test]
fn test_decode_unknown_id() {
    let result = Message::decode(&[0, 0, 0, 1, 14]);
    assert!(matches!(result, Err(PeerError::UnknownMessageId(14))));
}

#[test]
fn test_decode_consumes_one_frame_at_a_time() {
    // handshake and bitfield arriving in the same segment
    let mut buf = BytesMut::new();
    buf.extend_from_slice(
        &Message::Handshake {
            info_hash: [1; 20],
            peer_id: [2; 20],
        }
        .encode(),
    );
    buf.extend_from_slice(&Message::Bitfield(Bytes::from_static(&[0xC0])).encode());
    buf.extend_from_slice(&Message::Unchoke.encode());

    let (consumed, message) = Message::decode(&buf).unwrap().unwrap();
    assert!(matches!(message, Message::Handshake { .. }));
    let _ = buf.split_to(consumed);

    let (consumed, message) = Message::decode(&buf).unwrap().unwrap();
    assert!(matches!(message, Message::Bitfield(_)));
    let _ = buf.split_to(consumed);

    let (consumed, message) = Message::decode(&buf).unwrap().unwrap();
    assert!(matches!(message, Message::Unchoke));
    let _ = buf.split_to(consumed);

    assert!(buf.is_empty());
}

#[test]
fn test_peer_id_default() {
    let id = PeerId::default();
    assert_eq!(id.as_bytes(), b"-BT0001-000000000000");
    assert_eq!(id.client_id(), Some("BT0001"));
    assert_eq!(id.to_string(), "-BT0001-000000000000");
}

// ---- session tests against an in-process fake peer ----

fn test_store(temp: &tempfile::TempDir) -> Arc<PieceStore> {
    let files = vec![
        metainfo::File {
            path: PathBuf::from("a.bin"),
            length: 20000,
            offset: 0,
        },
        metainfo::File {
            path: PathBuf::from("b.bin"),
            length: 45536,
            offset: 20000,
        },
    ];
    let layout = FileLayout::new(temp.path().to_path_buf(), files).unwrap();
    PieceStore::new(layout, 32768, vec![[0u8; 20], [1u8; 20]])
}

struct FakePeer {
    stream: TcpStream,
    buf: BytesMut,
}

impl FakePeer {
    async fn next_message(&mut self) -> Message {
        loop {
            if let Some((consumed, message)) = Message::decode(&self.buf).unwrap() {
                let _ = self.buf.split_to(consumed);
                return message;
            }
            let n = self.stream.read_buf(&mut self.buf).await.unwrap();
            assert!(n > 0, "session closed the connection early");
        }
    }

    async fn send(&mut self, message: Message) {
        self.stream.write_all(&message.encode()).await.unwrap();
    }
}

async fn spawn_session(
    store: Arc<PieceStore>,
    info_hash: InfoHash,
) -> (
    FakePeer,
    Arc<AtomicBool>,
    tokio::task::JoinHandle<Result<(), PeerError>>,
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let connected = Arc::new(AtomicBool::new(false));
    let session = PeerSession::new(
        addr,
        info_hash,
        PeerId::default(),
        store,
        connected.clone(),
    );
    let task = tokio::spawn(session.run());

    let (stream, _) = listener.accept().await.unwrap();
    let peer = FakePeer {
        stream,
        buf: BytesMut::new(),
    };

    (peer, connected, task)
}

#[tokio::test]
async fn test_session_pipelines_four_requests() {
    let temp = tempfile::TempDir::new().unwrap();
    let store = test_store(&temp);
    let info_hash = InfoHash::from_bytes([7u8; 20]);

    let (mut peer, connected, task) = spawn_session(store, info_hash).await;

    let Message::Handshake {
        info_hash: theirs,
        peer_id,
    } = peer.next_message().await
    else {
        panic!("expected handshake first");
    };
    assert_eq!(theirs, [7u8; 20]);
    assert_eq!(&peer_id, PeerId::default().as_bytes());

    // handshake, full bitfield, and unchoke all in one segment
    let mut opening = BytesMut::new();
    opening.extend_from_slice(
        &Message::Handshake {
            info_hash: [7u8; 20],
            peer_id: [9u8; 20],
        }
        .encode(),
    );
    opening.extend_from_slice(&Message::Bitfield(Bytes::from_static(&[0xC0])).encode());
    opening.extend_from_slice(&Message::Unchoke.encode());
    peer.stream.write_all(&opening).await.unwrap();

    assert!(matches!(peer.next_message().await, Message::Interested));

    let mut requested = HashSet::new();
    for _ in 0..4 {
        let Message::Request {
            index,
            begin,
            length,
        } = peer.next_message().await
        else {
            panic!("expected a request");
        };
        assert_eq!(length, 16384);
        requested.insert((index, begin));
    }

    // with two 2-block pieces the full pipeline covers every block once
    let expected: HashSet<_> = [(0, 0), (0, 16384), (1, 0), (1, 16384)].into();
    assert_eq!(requested, expected);

    assert!(connected.load(Ordering::Relaxed));
    task.abort();
}

#[tokio::test]
async fn test_session_rejects_wrong_info_hash() {
    let temp = tempfile::TempDir::new().unwrap();
    let store = test_store(&temp);
    let info_hash = InfoHash::from_bytes([7u8; 20]);

    let (mut peer, connected, task) = spawn_session(store.clone(), info_hash).await;
    let _ = peer.next_message().await;

    // info hash off by one bit
    let mut bad_hash = [7u8; 20];
    bad_hash[0] ^= 0x01;
    peer.send(Message::Handshake {
        info_hash: bad_hash,
        peer_id: [9u8; 20],
    })
    .await;

    let result = task.await.unwrap();
    assert!(matches!(result, Err(PeerError::InfoHashMismatch)));
    assert!(!connected.load(Ordering::Relaxed));

    // the swarm's pieces saw nothing
    assert_eq!(store.progress(), (0, 2));
}

#[tokio::test]
async fn test_session_rejects_bad_bitfield_length() {
    let temp = tempfile::TempDir::new().unwrap();
    let store = test_store(&temp);
    let info_hash = InfoHash::from_bytes([7u8; 20]);

    let (mut peer, _, task) = spawn_session(store, info_hash).await;
    let _ = peer.next_message().await;

    peer.send(Message::Handshake {
        info_hash: [7u8; 20],
        peer_id: [9u8; 20],
    })
    .await;
    let _ = peer.next_message().await; // interested

    // two bytes for a two-piece torrent: one too many
    peer.send(Message::Bitfield(Bytes::from_static(&[0xC0, 0x00])))
        .await;

    let result = task.await.unwrap();
    assert!(matches!(result, Err(PeerError::BitfieldLength { .. })));
}

#[tokio::test]
async fn test_session_closes_when_peer_has_nothing() {
    let temp = tempfile::TempDir::new().unwrap();
    let store = test_store(&temp);
    let info_hash = InfoHash::from_bytes([7u8; 20]);

    let (mut peer, _, task) = spawn_session(store, info_hash).await;
    let _ = peer.next_message().await;

    peer.send(Message::Handshake {
        info_hash: [7u8; 20],
        peer_id: [9u8; 20],
    })
    .await;
    let _ = peer.next_message().await; // interested

    // an empty claim set leaves the session nothing to ask for
    peer.send(Message::Bitfield(Bytes::from_static(&[0x00])))
        .await;
    peer.send(Message::Unchoke).await;

    let result = task.await.unwrap();
    assert!(matches!(result, Err(PeerError::NothingToRequest)));
}

#[tokio::test]
async fn test_session_stores_received_blocks() {
    let temp = tempfile::TempDir::new().unwrap();

    // single 16384-byte piece so one block completes it
    let content: Vec<u8> = (0..16384u32).map(|i| (i % 251) as u8).collect();
    let mut hasher = Sha1::new();
    hasher.update(&content);
    let hash: [u8; 20] = hasher.finalize().into();

    let files = vec![metainfo::File {
        path: PathBuf::from("single.bin"),
        length: 16384,
        offset: 0,
    }];
    let layout = FileLayout::new(temp.path().to_path_buf(), files).unwrap();
    let store = PieceStore::new(layout, 16384, vec![hash]);
    store.allocate().await.unwrap();

    let info_hash = InfoHash::from_bytes([7u8; 20]);
    let (mut peer, _, task) = spawn_session(store.clone(), info_hash).await;
    let _ = peer.next_message().await;

    peer.send(Message::Handshake {
        info_hash: [7u8; 20],
        peer_id: [9u8; 20],
    })
    .await;
    let _ = peer.next_message().await; // interested

    peer.send(Message::Bitfield(Bytes::from_static(&[0x80])))
        .await;
    peer.send(Message::Unchoke).await;

    let Message::Request {
        index,
        begin,
        length,
    } = peer.next_message().await
    else {
        panic!("expected a request");
    };
    assert_eq!((index, begin, length), (0, 0, 16384));

    peer.send(Message::Piece {
        index: 0,
        begin: 0,
        data: Bytes::from(content.clone()),
    })
    .await;

    // the piece was the whole torrent, so the session runs out of work
    let result = task.await.unwrap();
    assert!(matches!(result, Err(PeerError::NothingToRequest)));

    assert!(store.is_complete());
    let on_disk = std::fs::read(temp.path().join("single.bin")).unwrap();
    assert_eq!(on_disk, content);
}
