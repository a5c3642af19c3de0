//! In-memory file store
//!
//! Process-wide table of transferred files, keyed by filename. Files exist
//! only for the lifetime of the process; nothing is persisted. A single
//! internal mutex guards both per-entry state transitions and structural
//! mutation of the map, so the store can be shared across concurrent
//! transfer sessions behind an `Arc`.
//!
//! The write path is capability-based: `begin_write` hands out a
//! [`WriteHandle`] and is the only entry point that can claim a filename,
//! which is what makes the single-writer-per-filename guarantee hold. A
//! completed file is immutable and may be read by any number of sessions
//! without further coordination.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;

/// Default ceiling on the aggregate size of all completed files (1 MiB).
pub const DEFAULT_CAPACITY: u64 = 1024 * 1024;

/// Errors returned by store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Another write session currently owns this filename.
    #[error("file '{0}' is currently being written")]
    AlreadyWriting(String),

    /// The filename holds a completed file, which is immutable.
    #[error("file '{0}' already exists on server")]
    AlreadyExists(String),

    /// Accepting the chunk would push the store past its capacity ceiling.
    #[error("store capacity of {0} bytes exceeded")]
    CapacityExceeded(u64),

    /// No completed file under this filename.
    #[error("file '{0}' not found on server")]
    NotFound(String),
}

/// Per-filename record of a transfer in progress or a completed file.
#[derive(Debug, Default)]
struct FileEntry {
    /// Block number to payload. Written exactly once per block during a
    /// write; block numbers start at 1.
    chunks: HashMap<u16, Vec<u8>>,
    /// True while a write session owns this entry.
    writing: bool,
    /// True once the terminal short block has been accepted.
    completed: bool,
}

#[derive(Debug, Default)]
struct StoreInner {
    files: HashMap<String, FileEntry>,
    /// Aggregate byte count across all completed files. Updated only at
    /// `finish_write` so an aborted transfer never double counts.
    total_bytes: u64,
}

/// Exclusive write capability for one filename.
///
/// Obtained from [`FileStore::begin_write`] and consumed by
/// [`FileStore::finish_write`] or [`FileStore::abort_write`]. Tracks the
/// session's running byte count, which becomes part of the store's
/// aggregate total only when the write finishes.
#[derive(Debug, PartialEq, Eq)]
pub struct WriteHandle {
    filename: String,
    received: u64,
}

impl WriteHandle {
    /// The filename this handle owns.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Bytes accepted so far through this handle.
    pub fn received(&self) -> u64 {
        self.received
    }
}

/// Shared in-memory file store with capacity accounting.
#[derive(Debug)]
pub struct FileStore {
    inner: Mutex<StoreInner>,
    capacity: u64,
}

impl Default for FileStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl FileStore {
    /// Create a store that will hold at most `capacity` bytes of completed
    /// file content.
    pub fn new(capacity: u64) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            capacity,
        }
    }

    /// The configured capacity ceiling in bytes.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Aggregate size of all completed files.
    pub fn total_bytes(&self) -> u64 {
        self.lock().total_bytes
    }

    /// Claim `filename` for writing.
    ///
    /// Fails with [`StoreError::AlreadyWriting`] while another session
    /// holds the filename, and with [`StoreError::AlreadyExists`] once a
    /// completed file occupies it. A leftover entry from an aborted write
    /// is reclaimed and reset.
    pub fn begin_write(&self, filename: &str) -> Result<WriteHandle, StoreError> {
        let mut inner = self.lock();

        if let Some(entry) = inner.files.get(filename) {
            if entry.writing && !entry.completed {
                return Err(StoreError::AlreadyWriting(filename.to_string()));
            }
            if entry.completed {
                return Err(StoreError::AlreadyExists(filename.to_string()));
            }
        }

        inner.files.insert(
            filename.to_string(),
            FileEntry {
                chunks: HashMap::new(),
                writing: true,
                completed: false,
            },
        );

        Ok(WriteHandle {
            filename: filename.to_string(),
            received: 0,
        })
    }

    /// Record one block of an in-progress write.
    ///
    /// Rejects with [`StoreError::CapacityExceeded`] when the session's
    /// cumulative bytes plus all completed files would pass the ceiling.
    /// Re-delivery of a block number overwrites the previous payload
    /// rather than appending.
    pub fn put_chunk(&self, handle: &mut WriteHandle, block: u16, payload: Vec<u8>) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let capacity = self.capacity;
        let total_bytes = inner.total_bytes;

        let Some(entry) = inner.files.get_mut(&handle.filename) else {
            // Unreachable through the public API: the handle keeps the
            // entry alive until finish or abort consumes it.
            return Err(StoreError::NotFound(handle.filename.clone()));
        };

        let replaced = entry.chunks.get(&block).map_or(0, |old| old.len() as u64);
        let projected = total_bytes + handle.received - replaced + payload.len() as u64;
        if projected > capacity {
            return Err(StoreError::CapacityExceeded(capacity));
        }

        handle.received = handle.received - replaced + payload.len() as u64;
        entry.chunks.insert(block, payload);
        Ok(())
    }

    /// Mark the write complete and fold its bytes into the aggregate total.
    /// The file becomes immutable and readable.
    pub fn finish_write(&self, handle: WriteHandle) {
        let mut inner = self.lock();
        if let Some(entry) = inner.files.get_mut(&handle.filename) {
            entry.writing = false;
            entry.completed = true;
        }
        inner.total_bytes += handle.received;
    }

    /// Abandon the write. Accumulated chunks are discarded from the
    /// accounting and the filename can be reclaimed by a later write.
    pub fn abort_write(&self, handle: WriteHandle) {
        let mut inner = self.lock();
        if let Some(entry) = inner.files.get_mut(&handle.filename) {
            entry.writing = false;
        }
    }

    /// Fetch one block of a completed file.
    ///
    /// `Ok(None)` past the last stored block signals end-of-file. A
    /// filename that is absent or not yet completed is
    /// [`StoreError::NotFound`].
    pub fn read_chunk(&self, filename: &str, block: u16) -> Result<Option<Vec<u8>>, StoreError> {
        let inner = self.lock();
        let entry = inner
            .files
            .get(filename)
            .filter(|entry| entry.completed)
            .ok_or_else(|| StoreError::NotFound(filename.to_string()))?;
        Ok(entry.chunks.get(&block).cloned())
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finish_file(store: &FileStore, filename: &str, blocks: &[&[u8]]) {
        let mut handle = store.begin_write(filename).unwrap();
        for (i, payload) in blocks.iter().enumerate() {
            store.put_chunk(&mut handle, (i + 1) as u16, payload.to_vec()).unwrap();
        }
        store.finish_write(handle);
    }

    #[test]
    fn begin_write_conflicts() {
        let store = FileStore::default();

        let handle = store.begin_write("a.txt").unwrap();
        assert_eq!(
            store.begin_write("a.txt"),
            Err(StoreError::AlreadyWriting("a.txt".to_string()))
        );

        store.finish_write(handle);
        assert_eq!(
            store.begin_write("a.txt"),
            Err(StoreError::AlreadyExists("a.txt".to_string()))
        );
    }

    #[test]
    fn aborted_write_is_reclaimable() {
        let store = FileStore::default();

        let mut handle = store.begin_write("a.txt").unwrap();
        store.put_chunk(&mut handle, 1, b"partial".to_vec()).unwrap();
        store.abort_write(handle);

        // Aborted bytes never reach the aggregate total.
        assert_eq!(store.total_bytes(), 0);
        assert_eq!(
            store.read_chunk("a.txt", 1),
            Err(StoreError::NotFound("a.txt".to_string()))
        );

        // A later writer gets a fresh entry.
        let handle = store.begin_write("a.txt").unwrap();
        store.finish_write(handle);
        assert_eq!(store.read_chunk("a.txt", 1), Ok(None));
    }

    #[test]
    fn read_chunk_requires_completion() {
        let store = FileStore::default();
        assert_eq!(
            store.read_chunk("missing", 1),
            Err(StoreError::NotFound("missing".to_string()))
        );

        let mut handle = store.begin_write("a.txt").unwrap();
        store.put_chunk(&mut handle, 1, b"hello".to_vec()).unwrap();

        // Still writing: not visible to readers.
        assert_eq!(
            store.read_chunk("a.txt", 1),
            Err(StoreError::NotFound("a.txt".to_string()))
        );

        store.finish_write(handle);
        assert_eq!(store.read_chunk("a.txt", 1), Ok(Some(b"hello".to_vec())));
        assert_eq!(store.read_chunk("a.txt", 2), Ok(None));
        assert_eq!(store.total_bytes(), 5);
    }

    #[test]
    fn put_chunk_is_idempotent_on_redelivery() {
        let store = FileStore::default();
        let mut handle = store.begin_write("a.txt").unwrap();

        store.put_chunk(&mut handle, 1, vec![1; 512]).unwrap();
        store.put_chunk(&mut handle, 1, vec![2; 512]).unwrap();
        assert_eq!(handle.received(), 512);

        store.finish_write(handle);
        assert_eq!(store.read_chunk("a.txt", 1), Ok(Some(vec![2; 512])));
        assert_eq!(store.total_bytes(), 512);
    }

    #[test]
    fn capacity_rejects_oversized_write() {
        let store = FileStore::new(1000);
        let mut handle = store.begin_write("big.bin").unwrap();

        store.put_chunk(&mut handle, 1, vec![0; 512]).unwrap();
        assert_eq!(
            store.put_chunk(&mut handle, 2, vec![0; 512]),
            Err(StoreError::CapacityExceeded(1000))
        );
    }

    #[test]
    fn capacity_accounts_for_completed_files() {
        let store = FileStore::new(600);
        finish_file(&store, "first.bin", &[&[0; 512]]);
        assert_eq!(store.total_bytes(), 512);

        let mut handle = store.begin_write("second.bin").unwrap();
        assert_eq!(
            store.put_chunk(&mut handle, 1, vec![0; 100]),
            Err(StoreError::CapacityExceeded(600))
        );
        // A chunk that fits under the remaining headroom is fine.
        store.put_chunk(&mut handle, 1, vec![0; 88]).unwrap();
    }

    #[test]
    fn writers_for_distinct_filenames_are_independent() {
        let store = FileStore::default();
        let a = store.begin_write("a.txt").unwrap();
        let b = store.begin_write("b.txt").unwrap();
        store.finish_write(a);
        store.abort_write(b);

        assert_eq!(store.read_chunk("a.txt", 1), Ok(None));
        assert!(store.read_chunk("b.txt", 1).is_err());
    }

    #[test]
    fn concurrent_begin_write_has_one_winner() {
        use std::sync::Arc;

        let store = Arc::new(FileStore::default());
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            tasks.push(std::thread::spawn(move || store.begin_write("contested.bin").is_ok()));
        }

        let winners = tasks
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|&won| won)
            .count();
        assert_eq!(winners, 1);
    }
}
