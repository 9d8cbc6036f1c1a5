//! Torrent metainfo handling (BEP-3)
//!
//! Parses `.torrent` files into the descriptor the download engine works
//! from: piece length, per-piece SHA-1 hashes, the ordered file list with
//! cumulative offsets, and the info hash identifying the swarm.

mod error;
mod info_hash;
mod torrent;

pub use error::MetainfoError;
pub use info_hash::InfoHash;
pub use torrent::{File, Info, Metainfo};
