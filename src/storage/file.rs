use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::metainfo;

use super::error::StorageError;

/// A slice of one file touched by a read or write of the linear byte space.
#[derive(Debug, PartialEq, Eq)]
pub struct FileSpan {
    pub file_index: usize,
    pub file_offset: u64,
    pub length: u64,
}

/// The on-disk shape of the torrent: an ordered list of files at cumulative
/// offsets under a download root.
///
/// Open file handles are cached for the lifetime of the layout; each file
/// is opened create-or-reuse (never truncating on open), which gives the
/// same bytes on disk as reopening per write would.
pub struct FileLayout {
    base_dir: PathBuf,
    files: Vec<metainfo::File>,
    total_length: u64,
    handles: DashMap<usize, Arc<Mutex<File>>>,
}

impl FileLayout {
    /// Creates a layout rooted at `base_dir`.
    ///
    /// # Errors
    ///
    /// Rejects file paths that escape the download root (`..`, absolute
    /// paths, or drive prefixes).
    pub fn new(base_dir: PathBuf, files: Vec<metainfo::File>) -> Result<Self, StorageError> {
        for file in &files {
            validate_path(&file.path)?;
        }

        let total_length = files.iter().map(|f| f.length).sum();

        Ok(Self {
            base_dir,
            files,
            total_length,
            handles: DashMap::new(),
        })
    }

    pub fn files(&self) -> &[metainfo::File] {
        &self.files
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    /// Creates every file and sizes it to its declared length.
    ///
    /// Oversized leftovers from an earlier run are truncated, short or
    /// missing files extended; pieces already present are picked up by the
    /// startup verification pass afterwards.
    pub async fn allocate(&self) -> Result<(), StorageError> {
        for (index, file) in self.files.iter().enumerate() {
            let handle = self.handle(index).await?;
            let f = handle.lock().await;
            f.set_len(file.length).await?;
        }
        Ok(())
    }

    /// Index of the file containing byte `offset` of the linear space.
    pub fn find_file_at(&self, offset: u64) -> Option<usize> {
        let mut lo = 0;
        let mut hi = self.files.len();

        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let file = &self.files[mid];

            if file.offset > offset {
                hi = mid;
            } else if file.offset + file.length <= offset {
                lo = mid + 1;
            } else {
                return Some(mid);
            }
        }

        None
    }

    /// Splits `offset..offset + length` into per-file spans, in file order.
    pub fn spans(&self, offset: u64, length: u64) -> Result<Vec<FileSpan>, StorageError> {
        if length == 0 {
            return Ok(Vec::new());
        }

        let mut index = self
            .find_file_at(offset)
            .ok_or(StorageError::RangeOutOfBounds { offset, length })?;

        let mut spans = Vec::new();
        let mut cursor = offset;
        let mut remaining = length;

        while remaining > 0 {
            let file = self
                .files
                .get(index)
                .ok_or(StorageError::RangeOutOfBounds { offset, length })?;

            // zero-length files occupy no bytes of the linear space
            if file.length == 0 {
                index += 1;
                continue;
            }

            let file_offset = cursor - file.offset;
            let take = remaining.min(file.length - file_offset);

            spans.push(FileSpan {
                file_index: index,
                file_offset,
                length: take,
            });

            cursor += take;
            remaining -= take;
            index += 1;
        }

        Ok(spans)
    }

    /// Reads `buf.len()` bytes starting at `offset` of the linear space.
    pub async fn read_range(&self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        let spans = self.spans(offset, buf.len() as u64)?;
        let mut at = 0usize;

        for span in spans {
            let handle = self.handle(span.file_index).await?;
            let mut file = handle.lock().await;

            file.seek(SeekFrom::Start(span.file_offset)).await?;
            file.read_exact(&mut buf[at..at + span.length as usize])
                .await?;

            at += span.length as usize;
        }

        Ok(())
    }

    /// Writes `data` starting at `offset` of the linear space, scattering
    /// across as many files as the range touches.
    pub async fn write_range(&self, offset: u64, data: &[u8]) -> Result<(), StorageError> {
        let spans = self.spans(offset, data.len() as u64)?;
        let mut at = 0usize;

        for span in spans {
            let handle = self.handle(span.file_index).await?;
            let mut file = handle.lock().await;

            file.seek(SeekFrom::Start(span.file_offset)).await?;
            file.write_all(&data[at..at + span.length as usize]).await?;

            at += span.length as usize;
        }

        Ok(())
    }

    async fn handle(&self, index: usize) -> Result<Arc<Mutex<File>>, StorageError> {
        if let Some(handle) = self.handles.get(&index) {
            return Ok(handle.clone());
        }

        let path = self.base_dir.join(&self.files[index].path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .await?;

        let handle = Arc::new(Mutex::new(file));
        self.handles.insert(index, handle.clone());
        Ok(handle)
    }
}

fn validate_path(path: &Path) -> Result<(), StorageError> {
    for component in path.components() {
        match component {
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(StorageError::PathTraversal(path.display().to_string()));
            }
            _ => {}
        }
    }
    Ok(())
}
