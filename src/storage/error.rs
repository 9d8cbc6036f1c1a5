use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid piece index: {0}")]
    InvalidPieceIndex(u32),

    #[error("block out of range: piece {piece}, offset {offset}, length {length}")]
    BlockOutOfRange {
        piece: u32,
        offset: u32,
        length: usize,
    },

    #[error("byte range {offset}+{length} outside the file layout")]
    RangeOutOfBounds { offset: u64, length: u64 },

    #[error("path traversal detected in file path: {0}")]
    PathTraversal(String),
}
