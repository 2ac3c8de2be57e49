//! Splitting the stale-file list into worker tasks.

use parsync_store::FileSpec;
use serde::Serialize;

/// A contiguous run of stale files assigned to exactly one worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncTask {
    files: Vec<FileSpec>,
}

impl SyncTask {
    /// Creates a task from an ordered list of files.
    pub fn new(files: Vec<FileSpec>) -> Self {
        Self { files }
    }

    /// Files in the order they will be synced.
    pub fn files(&self) -> &[FileSpec] {
        &self.files
    }

    /// Number of files in the task.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns true if the task holds no files.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Consumes the task, returning its files.
    pub fn into_files(self) -> Vec<FileSpec> {
        self.files
    }
}

/// Target chunk size for `len` items over `workers` workers.
///
/// This is `floor(len / workers)`, raised to one when there are more
/// workers than items.
pub fn chunk_size(len: usize, workers: usize) -> usize {
    (len / workers.max(1)).max(1)
}

/// Cuts `items` into at most `workers` contiguous, non-empty chunks.
///
/// Chunks are cut from the front at `chunk_size(len, workers)`; the last
/// chunk absorbs the remainder. With more workers than items every chunk
/// holds one item. Concatenating the chunks yields `items` unchanged.
pub fn split_contiguous<T>(items: Vec<T>, workers: usize) -> Vec<Vec<T>> {
    let len = items.len();
    if len == 0 {
        return Vec::new();
    }

    let count = workers.max(1).min(len);
    let size = chunk_size(len, workers);

    let mut rest = items.into_iter();
    let mut chunks: Vec<Vec<T>> = Vec::with_capacity(count);
    for _ in 1..count {
        chunks.push(rest.by_ref().take(size).collect());
    }
    chunks.push(rest.collect());
    chunks
}

/// Partitions the preview result into one task per worker.
pub fn partition(files: Vec<FileSpec>, workers: usize) -> Vec<SyncTask> {
    split_contiguous(files, workers)
        .into_iter()
        .map(SyncTask::new)
        .collect()
}
