use std::path::PathBuf;
use std::sync::Arc;

use sha1::{Digest, Sha1};
use tempfile::TempDir;

use crate::metainfo;
use crate::peer::Bitfield;

use super::*;

fn sha1_of(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn file(path: &str, length: u64, offset: u64) -> metainfo::File {
    metainfo::File {
        path: PathBuf::from(path),
        length,
        offset,
    }
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_add(seed)).collect()
}

// piece_length 32768, one 20000-byte file then one 45536-byte file
fn two_file_store(temp: &TempDir, content: &[u8]) -> Arc<PieceStore> {
    assert_eq!(content.len(), 65536);

    let layout = FileLayout::new(
        temp.path().to_path_buf(),
        vec![file("a.bin", 20000, 0), file("b.bin", 45536, 20000)],
    )
    .unwrap();

    let hashes = vec![sha1_of(&content[..32768]), sha1_of(&content[32768..])];
    PieceStore::new(layout, 32768, hashes)
}

#[test]
fn test_find_file_boundaries() {
    let layout = FileLayout::new(
        PathBuf::from("/tmp/unused"),
        vec![
            file("a", 100, 0),
            file("b", 50, 100),
            file("c", 200, 150),
        ],
    )
    .unwrap();

    assert_eq!(layout.find_file_at(0), Some(0));
    assert_eq!(layout.find_file_at(99), Some(0));
    assert_eq!(layout.find_file_at(100), Some(1));
    assert_eq!(layout.find_file_at(149), Some(1));
    assert_eq!(layout.find_file_at(150), Some(2));
    assert_eq!(layout.find_file_at(349), Some(2));
    assert_eq!(layout.find_file_at(350), None);
}

#[test]
fn test_spans_across_three_files() {
    let layout = FileLayout::new(
        PathBuf::from("/tmp/unused"),
        vec![
            file("a", 100, 0),
            file("b", 50, 100),
            file("c", 200, 150),
        ],
    )
    .unwrap();

    let spans = layout.spans(90, 100).unwrap();
    assert_eq!(
        spans,
        vec![
            FileSpan {
                file_index: 0,
                file_offset: 90,
                length: 10
            },
            FileSpan {
                file_index: 1,
                file_offset: 0,
                length: 50
            },
            FileSpan {
                file_index: 2,
                file_offset: 0,
                length: 40
            },
        ]
    );
}

#[test]
fn test_spans_single_file_and_exact_boundary() {
    let layout = FileLayout::new(
        PathBuf::from("/tmp/unused"),
        vec![file("a", 100, 0), file("b", 100, 100)],
    )
    .unwrap();

    // fully inside one file
    let spans = layout.spans(10, 50).unwrap();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].file_index, 0);

    // range ending exactly on the file boundary stays in one file
    let spans = layout.spans(50, 50).unwrap();
    assert_eq!(spans.len(), 1);
    assert_eq!(
        spans[0],
        FileSpan {
            file_index: 0,
            file_offset: 50,
            length: 50
        }
    );

    assert!(layout.spans(150, 100).is_err());
}

#[test]
fn test_path_traversal_rejected() {
    let result = FileLayout::new(
        PathBuf::from("/tmp/unused"),
        vec![file("../escape", 10, 0)],
    );
    assert!(matches!(result, Err(StorageError::PathTraversal(_))));

    let result = FileLayout::new(PathBuf::from("/tmp/unused"), vec![file("/abs", 10, 0)]);
    assert!(matches!(result, Err(StorageError::PathTraversal(_))));
}

#[tokio::test]
async fn test_scatter_write_two_files() {
    let temp = TempDir::new().unwrap();
    let content = pattern(65536, 1);
    let store = two_file_store(&temp, &content);
    store.allocate().await.unwrap();

    // piece 0 arrives as two blocks, "from two different peers" in any order
    assert!(!store.save(0, 16384, &content[16384..32768]).await.unwrap());
    assert!(store.save(0, 0, &content[..16384]).await.unwrap());
    assert!(store.is_piece_complete(0));

    // bytes [0, 20000) land in file a, [20000, 32768) at the start of file b
    let a = std::fs::read(temp.path().join("a.bin")).unwrap();
    let b = std::fs::read(temp.path().join("b.bin")).unwrap();
    assert_eq!(&a[..], &content[..20000]);
    assert_eq!(&b[..12768], &content[20000..32768]);
}

#[tokio::test]
async fn test_save_rejects_overrun() {
    let temp = TempDir::new().unwrap();
    let content = pattern(65536, 2);
    let store = two_file_store(&temp, &content);
    store.allocate().await.unwrap();

    let result = store.save(1, 32768 - 100, &[0u8; 200]).await;
    assert!(matches!(result, Err(StorageError::BlockOutOfRange { .. })));

    let result = store.save(9, 0, &[0u8; 16]).await;
    assert!(matches!(result, Err(StorageError::InvalidPieceIndex(9))));
}

#[tokio::test]
async fn test_save_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let content = pattern(65536, 3);
    let store = two_file_store(&temp, &content);
    store.allocate().await.unwrap();

    store.save(0, 0, &content[..16384]).await.unwrap();
    // the duplicate is discarded: no double count, block still pending at 16384
    store.save(0, 0, &[0xFFu8; 16384]).await.unwrap();

    assert_eq!(store.first_incomplete_after(0, 0), Some((16384, 16384)));
    assert!(!store.is_piece_complete(0));
}

#[tokio::test]
async fn test_hash_mismatch_resets_piece() {
    let temp = TempDir::new().unwrap();
    let content = pattern(65536, 4);
    let store = two_file_store(&temp, &content);
    store.allocate().await.unwrap();

    store.save(1, 0, &content[32768..49152]).await.unwrap();

    // corrupted second block: right length, wrong bytes
    let done = store.save(1, 16384, &pattern(16384, 99)).await.unwrap();
    assert!(!done);
    assert!(!store.is_piece_complete(1));

    // the mask reset, so the next request targets offset 0 again
    assert_eq!(store.first_incomplete_after(1, 0), Some((0, 16384)));

    // a clean re-download succeeds
    store.save(1, 0, &content[32768..49152]).await.unwrap();
    assert!(store.save(1, 16384, &content[49152..]).await.unwrap());
    assert!(store.is_piece_complete(1));
}

#[tokio::test]
async fn test_short_last_piece_and_block() {
    let temp = TempDir::new().unwrap();
    // 40000 bytes: piece 0 is 32768, piece 1 is 7232 (one short block)
    let layout =
        FileLayout::new(temp.path().to_path_buf(), vec![file("solo.bin", 40000, 0)]).unwrap();
    let content = pattern(40000, 5);
    let hashes = vec![sha1_of(&content[..32768]), sha1_of(&content[32768..])];
    let store = PieceStore::new(layout, 32768, hashes);
    store.allocate().await.unwrap();

    assert_eq!(store.piece_size(1), 7232);
    assert_eq!(store.first_incomplete_after(1, 0), Some((0, 7232)));

    assert!(store.save(1, 0, &content[32768..]).await.unwrap());
    assert!(store.is_piece_complete(1));

    let on_disk = std::fs::read(temp.path().join("solo.bin")).unwrap();
    assert_eq!(&on_disk[32768..], &content[32768..]);
}

#[tokio::test]
async fn test_verify_existing_recovers_clean_pieces() {
    let temp = TempDir::new().unwrap();
    let content = pattern(65536, 6);

    // a previous run left file a complete and file b half garbage
    std::fs::write(temp.path().join("a.bin"), &content[..20000]).unwrap();
    let mut b = content[20000..].to_vec();
    b[20000..].fill(0xAA); // corrupts piece 1, leaves piece 0 intact
    std::fs::write(temp.path().join("b.bin"), &b).unwrap();

    let store = two_file_store(&temp, &content);
    store.allocate().await.unwrap();
    store.verify_existing().await;

    assert!(store.is_piece_complete(0));
    assert!(!store.is_piece_complete(1));
    // recovery never buffers the piece
    assert_eq!(store.cached_bytes(), 0);
    assert_eq!(store.progress(), (1, 2));
}

#[tokio::test]
async fn test_eviction_respects_budget() {
    let temp = TempDir::new().unwrap();
    // eight 32 KiB pieces, every one downloaded and cached
    let content = pattern(8 * 32768, 7);
    let layout = FileLayout::new(
        temp.path().to_path_buf(),
        vec![file("big.bin", 8 * 32768, 0)],
    )
    .unwrap();
    let hashes: Vec<[u8; 20]> = content.chunks(32768).map(sha1_of).collect();
    let store = PieceStore::new(layout, 32768, hashes);
    store.allocate().await.unwrap();

    for piece in 0..8u32 {
        let start = piece as usize * 32768;
        store
            .save(piece, 0, &content[start..start + 16384])
            .await
            .unwrap();
        store
            .save(piece, 16384, &content[start + 16384..start + 32768])
            .await
            .unwrap();
    }

    assert!(store.is_complete());
    assert_eq!(store.cached_bytes(), 8 * 32768);

    // under budget: nothing happens
    store.evict_cached(8 * 32768);
    assert_eq!(store.cached_bytes(), 8 * 32768);

    // over budget: half the cached pieces are dropped
    store.evict_cached(4 * 32768);
    assert_eq!(store.cached_bytes(), 4 * 32768);

    // completion state is untouched by eviction
    assert!(store.is_complete());
}

#[tokio::test]
async fn test_pick_random_incomplete_respects_claims() {
    let temp = TempDir::new().unwrap();
    let content = pattern(65536, 8);
    let store = two_file_store(&temp, &content);
    store.allocate().await.unwrap();

    let mut claimed = Bitfield::new(2);
    assert_eq!(store.pick_random_incomplete(&claimed), None);

    claimed.set(1);
    assert_eq!(store.pick_random_incomplete(&claimed), Some(1));

    store.save(1, 0, &content[32768..49152]).await.unwrap();
    store.save(1, 16384, &content[49152..]).await.unwrap();
    assert_eq!(store.pick_random_incomplete(&claimed), None);
}
