//! Ordered file assembler.
//!
//! Segments arrive from the connection pool out of order (different workers
//! finish at different times). The assembler buffers out-of-order segments
//! in a sparse map, keeps a bit-vector of which segment indices have been
//! received, and advances a write cursor through the file sequentially —
//! writes only ever append, never seek backwards, so the output file is
//! built with a single forward pass regardless of arrival order.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{DownloadError, Result};

struct Inner {
    file: File,
    received: Vec<bool>,
    pending: HashMap<usize, Vec<u8>>,
    write_cursor: usize,
    bytes_written: u64,
}

/// Assembles one output file from segments delivered in arbitrary order.
pub struct FileAssembler {
    path: PathBuf,
    segment_count: usize,
    inner: Mutex<Inner>,
}

impl FileAssembler {
    /// Create a new assembler writing to `path`, expecting `segment_count`
    /// segments indexed `0..segment_count`. Truncates any existing file.
    pub async fn create(path: &Path, segment_count: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = File::create(path).await?;
        Ok(Self {
            path: path.to_path_buf(),
            segment_count,
            inner: Mutex::new(Inner {
                file,
                received: vec![false; segment_count],
                pending: HashMap::new(),
                write_cursor: 0,
                bytes_written: 0,
            }),
        })
    }

    /// Output path this assembler writes to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Deliver one decoded segment's bytes. Delivering the same `index`
    /// twice is a no-op (idempotent) — the second delivery is dropped
    /// silently, since retried segment jobs may both succeed in a race.
    pub async fn write_segment(&self, index: usize, data: Vec<u8>) -> Result<()> {
        if index >= self.segment_count {
            return Err(DownloadError::AssemblerIo {
                path: self.path.clone(),
                reason: format!(
                    "segment index {index} out of range for {} segments",
                    self.segment_count
                ),
            }
            .into());
        }

        let mut inner = self.inner.lock().await;
        if inner.received[index] {
            return Ok(());
        }
        inner.received[index] = true;
        inner.pending.insert(index, data);

        while let Some(chunk) = inner.pending.remove(&inner.write_cursor) {
            let len = chunk.len() as u64;
            inner.file.write_all(&chunk).await.map_err(|e| DownloadError::AssemblerIo {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
            inner.bytes_written += len;
            inner.write_cursor += 1;
        }

        Ok(())
    }

    /// Number of bytes written to the file cursor so far (only counts
    /// contiguous, in-order bytes — segments buffered ahead of a gap don't
    /// count until the gap closes).
    pub async fn bytes_written(&self) -> u64 {
        self.inner.lock().await.bytes_written
    }

    /// True once every segment index `0..segment_count` has been written
    /// through to the file in order.
    pub async fn is_complete(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.write_cursor == self.segment_count
    }

    /// Flush and close the underlying file. Returns an error if segments
    /// are still missing — a caller should only call this after confirming
    /// `is_complete()`.
    pub async fn close(self) -> Result<PathBuf> {
        let mut inner = self.inner.into_inner();
        if inner.write_cursor != self.segment_count {
            return Err(DownloadError::AssemblerIo {
                path: self.path.clone(),
                reason: format!(
                    "closed with {} of {} segments written",
                    inner.write_cursor, self.segment_count
                ),
            }
            .into());
        }
        inner.file.flush().await.map_err(|e| DownloadError::AssemblerIo {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        Ok(self.path)
    }
}
