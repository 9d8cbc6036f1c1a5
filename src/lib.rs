//! remora - a leech-only BitTorrent client
//!
//! Given a `.torrent` file, remora announces to the torrent's HTTP
//! trackers, connects to the peers they return, downloads every piece over
//! the peer wire protocol, verifies each piece against its SHA-1 hash, and
//! scatter-writes the bytes into the file layout the metainfo describes.
//! It never seeds: no piece is advertised and no request is served.
//!
//! # Modules
//!
//! - [`bencode`] - bencode decoding for metainfo and tracker responses
//! - [`metainfo`] - `.torrent` parsing and the info hash
//! - [`peer`] - peer wire protocol and per-peer sessions
//! - [`storage`] - piece assembly, verification, and the disk layout
//! - [`tracker`] - HTTP tracker announces
//! - [`swarm`] - the coordinator tying the pieces together

pub mod bencode;
pub mod metainfo;
pub mod peer;
pub mod storage;
pub mod swarm;
pub mod tracker;

pub use metainfo::{InfoHash, Metainfo};
pub use peer::{Bitfield, Message, PeerError, PeerId, PeerSession};
pub use storage::{FileLayout, PieceStore, StorageError, BLOCK_SIZE};
pub use swarm::Swarm;
pub use tracker::{Tracker, TrackerError};
