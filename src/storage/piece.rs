use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use sha1::{Digest, Sha1};
use tracing::{debug, info, warn};

use crate::peer::Bitfield;

use super::error::StorageError;
use super::file::FileLayout;

/// The block unit of the peer wire protocol.
pub const BLOCK_SIZE: u32 = 16384;

/// Soft cap on buffers kept in memory for pieces already on disk.
pub const CACHE_BUDGET: u64 = 16 * 1024 * 1024;

const VERIFY_BATCH: usize = 32;

// per-piece bookkeeping; the buffer exists from the first received block
// until the piece is evicted after landing on disk
struct PieceState {
    blocks: Bitfield,
    received: u32,
    buffer: Option<Vec<u8>>,
    on_disk: bool,
}

/// Accumulates blocks into pieces, verifies them, and persists them.
///
/// Shared by every peer session. Each piece has its own lock, and no lock
/// is held across hashing or disk I/O: a completed piece is verified and
/// written from a snapshot, then the outcome is applied back under the
/// lock. Duplicate blocks — the same offset delivered twice, possibly by
/// different peers — are discarded without any state change.
pub struct PieceStore {
    layout: FileLayout,
    piece_length: u64,
    total_length: u64,
    hashes: Vec<[u8; 20]>,
    pieces: Vec<Mutex<PieceState>>,
}

impl PieceStore {
    pub fn new(layout: FileLayout, piece_length: u64, hashes: Vec<[u8; 20]>) -> Arc<Self> {
        let total_length = layout.total_length();

        let pieces = (0..hashes.len())
            .map(|index| {
                let blocks = piece_size_of(index as u32, piece_length, total_length)
                    .div_ceil(u64::from(BLOCK_SIZE)) as usize;
                Mutex::new(PieceState {
                    blocks: Bitfield::new(blocks),
                    received: 0,
                    buffer: None,
                    on_disk: false,
                })
            })
            .collect();

        Arc::new(Self {
            layout,
            piece_length,
            total_length,
            hashes,
            pieces,
        })
    }

    pub fn piece_count(&self) -> usize {
        self.hashes.len()
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    /// Length of a piece; only the last piece may be short.
    pub fn piece_size(&self, piece: u32) -> u64 {
        piece_size_of(piece, self.piece_length, self.total_length)
    }

    fn block_count(&self, piece: u32) -> u32 {
        self.piece_size(piece).div_ceil(u64::from(BLOCK_SIZE)) as u32
    }

    /// Creates the output files and sizes them to their declared lengths.
    pub async fn allocate(&self) -> Result<(), StorageError> {
        self.layout.allocate().await
    }

    /// Ingests one block.
    ///
    /// Returns `Ok(true)` when this block completed the piece and it
    /// verified and reached disk. A failed verification or a failed write
    /// clears the completion mask (keeping the buffer for overwrite) so the
    /// piece is fetched again; neither is an error to the caller. Only a
    /// block that overruns the piece is: that is a protocol violation by
    /// the peer that sent it.
    pub async fn save(&self, piece: u32, offset: u32, data: &[u8]) -> Result<bool, StorageError> {
        let state_lock = self
            .pieces
            .get(piece as usize)
            .ok_or(StorageError::InvalidPieceIndex(piece))?;
        let size = self.piece_size(piece);

        if u64::from(offset) + data.len() as u64 > size {
            return Err(StorageError::BlockOutOfRange {
                piece,
                offset,
                length: data.len(),
            });
        }

        let block = (offset / BLOCK_SIZE) as usize;

        let completed = {
            let mut state = state_lock.lock();

            if state.blocks.has(block) {
                return Ok(false);
            }

            let buffer = state.buffer.get_or_insert_with(|| vec![0; size as usize]);
            buffer[offset as usize..offset as usize + data.len()].copy_from_slice(data);

            state.blocks.set(block);
            state.received += 1;

            if state.received == self.block_count(piece) {
                state.buffer.clone()
            } else {
                None
            }
        };

        let Some(buffer) = completed else {
            return Ok(false);
        };

        let mut hasher = Sha1::new();
        hasher.update(&buffer);
        let digest: [u8; 20] = hasher.finalize().into();

        if digest != self.hashes[piece as usize] {
            warn!(piece, "piece failed verification, discarding");
            self.reset(piece);
            return Ok(false);
        }

        let start = u64::from(piece) * self.piece_length;
        if let Err(e) = self.layout.write_range(start, &buffer).await {
            warn!(piece, error = %e, "piece write failed, discarding");
            self.reset(piece);
            return Ok(false);
        }

        state_lock.lock().on_disk = true;
        debug!(piece, "piece verified and written");
        Ok(true)
    }

    // back to square one for this piece; the buffer stays and is simply
    // overwritten by the re-download
    fn reset(&self, piece: u32) {
        let mut state = self.pieces[piece as usize].lock();
        state.blocks.fill(false);
        state.received = 0;
    }

    /// First block at or past `hint` that has not been received, as
    /// `(offset, length)`. `None` when nothing remains at or past the hint.
    pub fn first_incomplete_after(&self, piece: u32, hint: u32) -> Option<(u32, u32)> {
        let size = self.piece_size(piece);
        let state = self.pieces.get(piece as usize)?.lock();

        if state.on_disk {
            return None;
        }

        // block-align upward; the cursor always hands in aligned offsets
        let mut offset = hint.div_ceil(BLOCK_SIZE) * BLOCK_SIZE;

        while u64::from(offset) < size {
            if !state.blocks.has((offset / BLOCK_SIZE) as usize) {
                let length = u64::from(BLOCK_SIZE).min(size - u64::from(offset)) as u32;
                return Some((offset, length));
            }
            offset += BLOCK_SIZE;
        }

        None
    }

    /// Whether a piece is verified and on disk.
    pub fn is_piece_complete(&self, piece: u32) -> bool {
        self.pieces
            .get(piece as usize)
            .map(|p| p.lock().on_disk)
            .unwrap_or(false)
    }

    /// Whether every piece is verified and on disk.
    pub fn is_complete(&self) -> bool {
        self.pieces.iter().all(|p| p.lock().on_disk)
    }

    /// `(pieces on disk, total pieces)`.
    pub fn progress(&self) -> (usize, usize) {
        let done = self.pieces.iter().filter(|p| p.lock().on_disk).count();
        (done, self.pieces.len())
    }

    /// Uniformly random incomplete piece among those the peer claims.
    pub fn pick_random_incomplete(&self, claimed: &Bitfield) -> Option<u32> {
        let mut candidates: Vec<u32> = (0..self.piece_count() as u32)
            .filter(|&i| claimed.has(i as usize) && !self.is_piece_complete(i))
            .collect();

        candidates.shuffle(&mut rand::rng());
        candidates.first().copied()
    }

    /// Best-effort recovery of pieces a previous run already wrote.
    ///
    /// Reads each piece's byte range back from the files and accepts it
    /// when the SHA-1 matches, without buffering it in memory. Read
    /// failures leave the piece empty; it will simply be downloaded.
    pub async fn verify_existing(&self) {
        let piece_count = self.piece_count();
        if piece_count == 0 {
            return;
        }

        let mut recovered = 0usize;
        for batch_start in (0..piece_count).step_by(VERIFY_BATCH) {
            let batch_end = (batch_start + VERIFY_BATCH).min(piece_count);
            let checks = (batch_start..batch_end).map(|i| self.verify_from_disk(i as u32));
            recovered += join_all(checks).await.into_iter().filter(|&ok| ok).count();
        }

        if recovered > 0 {
            info!(recovered, total = piece_count, "recovered pieces from disk");
        }
    }

    async fn verify_from_disk(&self, piece: u32) -> bool {
        let size = self.piece_size(piece);
        let mut buffer = vec![0u8; size as usize];
        let start = u64::from(piece) * self.piece_length;

        if self.layout.read_range(start, &mut buffer).await.is_err() {
            return false;
        }

        let mut hasher = Sha1::new();
        hasher.update(&buffer);
        let digest: [u8; 20] = hasher.finalize().into();

        if digest != self.hashes[piece as usize] {
            return false;
        }

        let mut state = self.pieces[piece as usize].lock();
        state.blocks.fill(true);
        state.received = self.block_count(piece);
        state.on_disk = true;
        true
    }

    /// Total bytes of buffers still held for pieces already on disk.
    pub fn cached_bytes(&self) -> u64 {
        self.pieces
            .iter()
            .enumerate()
            .filter(|(_, p)| {
                let state = p.lock();
                state.on_disk && state.buffer.is_some()
            })
            .map(|(i, _)| self.piece_size(i as u32))
            .sum()
    }

    /// Drops the buffers of a randomly chosen half of the cached pieces
    /// once their total size exceeds `budget`.
    pub fn evict_cached(&self, budget: u64) {
        let mut cached: Vec<u32> = Vec::new();
        let mut total = 0u64;

        for (index, piece) in self.pieces.iter().enumerate() {
            let state = piece.lock();
            if state.on_disk && state.buffer.is_some() {
                cached.push(index as u32);
                total += self.piece_size(index as u32);
            }
        }

        if total <= budget {
            return;
        }

        cached.shuffle(&mut rand::rng());
        let victims = cached.len().div_ceil(2);

        for &index in cached.iter().take(victims) {
            self.pieces[index as usize].lock().buffer = None;
        }

        debug!(victims, cached_bytes = total, "evicted cached piece buffers");
    }
}

fn piece_size_of(piece: u32, piece_length: u64, total_length: u64) -> u64 {
    let start = u64::from(piece) * piece_length;
    piece_length.min(total_length.saturating_sub(start))
}
