//! Log-structured persistent key-value store.
//!
//! ## Frame Format
//!
//! ```text
//! | payload_len (4) | crc32 (4) | payload (N) |
//! ```
//!
//! A payload is one [`WriteBatch`]:
//!
//! ```text
//! | op_count (4) | op* |
//! op := | tag (1) | key_len (4) | key | [ value_len (4) | value ]   (value only for puts)
//! ```
//!
//! All integers are little-endian. One frame is written per batch, so a
//! batch is durable all-or-nothing: a torn or corrupt tail frame is
//! discarded on replay.

use crate::error::{StorageError, StorageResult};
use crate::kv::{BatchOp, KeyValueStore, WriteBatch};
use crate::memory::{apply_ops, collect_prefix};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

const FRAME_HEADER_SIZE: usize = 8;
const TAG_PUT: u8 = 1;
const TAG_DELETE: u8 = 2;
/// Payload size at which compaction starts a new frame.
const COMPACT_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Default number of operations between two automatic syncs.
pub const DEFAULT_OPS_BETWEEN_SYNCS: u64 = 100_000;

/// When a [`LogStore`] forces its file to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// Sync only on `flush` and `close`.
    OnClose,
    /// Sync after every `n` logged operations, and on `flush`/`close`.
    EveryOps(u64),
    /// Sync after every write.
    Always,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self::EveryOps(DEFAULT_OPS_BETWEEN_SYNCS)
    }
}

/// Options for opening a [`LogStore`].
#[derive(Debug, Clone)]
pub struct LogStoreOptions {
    /// Durability policy.
    pub sync_policy: SyncPolicy,
    /// Whether to create the file if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for LogStoreOptions {
    fn default() -> Self {
        Self {
            sync_policy: SyncPolicy::default(),
            create_if_missing: true,
        }
    }
}

impl LogStoreOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sync policy.
    #[must_use]
    pub const fn sync_policy(mut self, policy: SyncPolicy) -> Self {
        self.sync_policy = policy;
        self
    }

    /// Sets whether a missing file is created.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }
}

struct LogInner {
    file: File,
    index: BTreeMap<Vec<u8>, Vec<u8>>,
    file_len: u64,
    unsynced_ops: u64,
}

/// A persistent key-value store backed by an append-only log file.
///
/// Every write appends one CRC-framed record; an ordered in-memory index
/// is rebuilt by replaying the log on open. [`LogStore::compact`]
/// rewrites the file with only the live entries.
///
/// The store holds an exclusive advisory lock on `<file>.lock` for its
/// whole lifetime.
///
/// # Example
///
/// ```no_run
/// use modelstore_storage::{KeyValueStore, LogStore, LogStoreOptions};
/// use std::path::Path;
///
/// let store = LogStore::open(Path::new("model.log"), LogStoreOptions::default()).unwrap();
/// store.put(b"key", b"value").unwrap();
/// store.close().unwrap();
/// ```
pub struct LogStore {
    path: PathBuf,
    options: LogStoreOptions,
    inner: RwLock<LogInner>,
    lock_file: Mutex<Option<File>>,
    closed: AtomicBool,
}

impl LogStore {
    /// Opens (or creates) the log at `path` and replays it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another handle owns the store,
    /// or an I/O error if the file cannot be opened.
    pub fn open(path: &Path, options: LogStoreOptions) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let lock_path = lock_path_for(path);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked {
                path: lock_path.display().to_string(),
            });
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(options.create_if_missing)
            .open(path)?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let (index, valid_len, frames) = replay(&bytes);
        if valid_len < bytes.len() {
            warn!(
                path = %path.display(),
                discarded = bytes.len() - valid_len,
                "discarding torn tail of log"
            );
            file.set_len(valid_len as u64)?;
            file.sync_all()?;
        }

        info!(
            path = %path.display(),
            frames,
            keys = index.len(),
            "opened log store"
        );

        Ok(Self {
            path: path.to_path_buf(),
            options,
            inner: RwLock::new(LogInner {
                file,
                index,
                file_len: valid_len as u64,
                unsynced_ops: 0,
            }),
            lock_file: Mutex::new(Some(lock_file)),
            closed: AtomicBool::new(false),
        })
    }

    /// Returns the path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the current size of the log file in bytes.
    #[must_use]
    pub fn file_len(&self) -> u64 {
        self.inner.read().file_len
    }

    /// Rewrites the log so it contains only the live entries.
    ///
    /// The compacted log is written to a sibling file as a sequence of
    /// bounded frames, synced, and then renamed over the original.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed or any file operation fails;
    /// the original log is left untouched in that case.
    pub fn compact(&self) -> StorageResult<u64> {
        self.ensure_open()?;
        let mut inner = self.inner.write();

        let before = inner.file_len;
        let frames = compaction_frames(&inner.index, COMPACT_FRAME_BYTES)?;

        let tmp_path = self.path.with_extension("compact");
        {
            let mut tmp = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            for frame in &frames {
                tmp.write_all(frame)?;
            }
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        inner.file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&self.path)?;
        inner.file_len = frames.iter().map(|f| f.len() as u64).sum();
        inner.unsynced_ops = 0;

        info!(
            path = %self.path.display(),
            before,
            after = inner.file_len,
            "compacted log store"
        );
        Ok(before.saturating_sub(inner.file_len))
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }

    /// Appends one frame, then applies it to the index.
    fn append(&self, ops: Vec<BatchOp>) -> StorageResult<()> {
        self.ensure_open()?;
        let mut inner = self.inner.write();
        self.append_locked(&mut inner, ops)
    }

    fn append_locked(&self, inner: &mut LogInner, ops: Vec<BatchOp>) -> StorageResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let frame = encode_frame(&ops)?;
        let op_count = ops.len() as u64;

        let must_sync = match self.options.sync_policy {
            SyncPolicy::Always => true,
            SyncPolicy::EveryOps(n) => inner.unsynced_ops + op_count >= n.max(1),
            SyncPolicy::OnClose => false,
        };
        commit_frame(&mut inner.file, inner.file_len, &frame, |file| {
            if must_sync {
                file.sync_data()
            } else {
                Ok(())
            }
        })?;
        inner.file_len += frame.len() as u64;
        inner.unsynced_ops = if must_sync {
            0
        } else {
            inner.unsynced_ops + op_count
        };

        apply_ops(&mut inner.index, ops);
        Ok(())
    }
}

/// Writes `frame` at the end of `file`, then runs `sync`.
///
/// On any failure the file is cut back to `len`, so a frame the caller
/// was told about as failed never replays.
fn commit_frame<F>(file: &mut File, len: u64, frame: &[u8], sync: F) -> io::Result<()>
where
    F: FnOnce(&File) -> io::Result<()>,
{
    let result = file.write_all(frame).and_then(|()| sync(file));
    if let Err(e) = result {
        if let Err(truncate_err) = file.set_len(len) {
            warn!(error = %truncate_err, "failed to roll back unacknowledged frame");
        }
        return Err(e);
    }
    Ok(())
}

impl KeyValueStore for LogStore {
    fn name(&self) -> &str {
        "log"
    }

    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        Ok(self.inner.read().index.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        let mut inner = self.inner.write();
        let previous = inner.index.get(key).cloned();
        self.append_locked(
            &mut inner,
            vec![BatchOp::Put {
                key: key.to_vec(),
                value: value.to_vec(),
            }],
        )?;
        Ok(previous)
    }

    fn delete(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        let mut inner = self.inner.write();
        let previous = inner.index.get(key).cloned();
        if previous.is_some() {
            self.append_locked(&mut inner, vec![BatchOp::Delete { key: key.to_vec() }])?;
        }
        Ok(previous)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.ensure_open()?;
        Ok(collect_prefix(&self.inner.read().index, prefix))
    }

    fn write_batch(&self, batch: WriteBatch) -> StorageResult<()> {
        self.append(batch.into_ops())
    }

    fn len(&self) -> StorageResult<usize> {
        self.ensure_open()?;
        Ok(self.inner.read().index.len())
    }

    fn flush(&self) -> StorageResult<()> {
        self.ensure_open()?;
        let mut inner = self.inner.write();
        inner.file.sync_all()?;
        inner.unsynced_ops = 0;
        Ok(())
    }

    fn close(&self) -> StorageResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!(path = %self.path.display(), "closing log store");

        let result = self.inner.write().file.sync_all();
        if let Some(lock_file) = self.lock_file.lock().take() {
            if let Err(e) = FileExt::unlock(&lock_file) {
                warn!(error = %e, "failed to release log store lock");
            }
        }
        result.map_err(StorageError::from)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for LogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStore")
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Drop for LogStore {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}

fn frame_len(len: usize) -> StorageResult<u32> {
    u32::try_from(len).map_err(|_| StorageError::FrameTooLarge { size: len })
}

fn encode_frame(ops: &[BatchOp]) -> StorageResult<Vec<u8>> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&frame_len(ops.len())?.to_le_bytes());
    for op in ops {
        match op {
            BatchOp::Put { key, value } => {
                payload.push(TAG_PUT);
                payload.extend_from_slice(&frame_len(key.len())?.to_le_bytes());
                payload.extend_from_slice(key);
                payload.extend_from_slice(&frame_len(value.len())?.to_le_bytes());
                payload.extend_from_slice(value);
            }
            BatchOp::Delete { key } => {
                payload.push(TAG_DELETE);
                payload.extend_from_slice(&frame_len(key.len())?.to_le_bytes());
                payload.extend_from_slice(key);
            }
        }
    }

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&frame_len(payload.len())?.to_le_bytes());
    frame.extend_from_slice(&compute_crc32(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Splits the live entries into frames of roughly `max_bytes` payload.
fn compaction_frames(
    index: &BTreeMap<Vec<u8>, Vec<u8>>,
    max_bytes: usize,
) -> StorageResult<Vec<Vec<u8>>> {
    let mut frames = Vec::new();
    let mut ops = Vec::new();
    let mut pending = 0usize;
    for (key, value) in index {
        pending += key.len() + value.len() + 9;
        ops.push(BatchOp::Put {
            key: key.clone(),
            value: value.clone(),
        });
        if pending >= max_bytes {
            frames.push(encode_frame(&ops)?);
            ops.clear();
            pending = 0;
        }
    }
    if !ops.is_empty() {
        frames.push(encode_frame(&ops)?);
    }
    Ok(frames)
}

/// Replays `bytes`, returning the index, the length of the valid prefix
/// and the number of frames applied.
fn replay(bytes: &[u8]) -> (BTreeMap<Vec<u8>, Vec<u8>>, usize, usize) {
    let mut index = BTreeMap::new();
    let mut offset = 0;
    let mut frames = 0;

    while bytes.len() - offset >= FRAME_HEADER_SIZE {
        let len = read_u32(bytes, offset) as usize;
        let crc = read_u32(bytes, offset + 4);
        let start = offset + FRAME_HEADER_SIZE;
        let Some(end) = start.checked_add(len).filter(|end| *end <= bytes.len()) else {
            break;
        };
        let payload = &bytes[start..end];
        if compute_crc32(payload) != crc {
            break;
        }
        let Some(ops) = decode_payload(payload) else {
            break;
        };
        apply_ops(&mut index, ops);
        offset = end;
        frames += 1;
    }

    (index, offset, frames)
}

fn decode_payload(payload: &[u8]) -> Option<Vec<BatchOp>> {
    let mut cursor = Cursor { data: payload, pos: 0 };
    let count = cursor.u32()? as usize;
    let mut ops = Vec::with_capacity(count.min(payload.len()));
    for _ in 0..count {
        let tag = cursor.u8()?;
        let key = cursor.bytes()?;
        match tag {
            TAG_PUT => {
                let value = cursor.bytes()?;
                ops.push(BatchOp::Put { key, value });
            }
            TAG_DELETE => ops.push(BatchOp::Delete { key }),
            _ => return None,
        }
    }
    (cursor.pos == payload.len()).then_some(ops)
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn u8(&mut self) -> Option<u8> {
        let b = *self.data.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    fn u32(&mut self) -> Option<u32> {
        if self.data.len() - self.pos < 4 {
            return None;
        }
        let v = read_u32(self.data, self.pos);
        self.pos += 4;
        Some(v)
    }

    fn bytes(&mut self) -> Option<Vec<u8>> {
        let len = self.u32()? as usize;
        let end = self.pos.checked_add(len)?;
        let out = self.data.get(self.pos..end)?.to_vec();
        self.pos = end;
        Some(out)
    }
}

/// Computes CRC32 checksum for data.
pub fn compute_crc32(data: &[u8]) -> u32 {
    // IEEE polynomial
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> LogStore {
        LogStore::open(&dir.path().join("model.log"), LogStoreOptions::default()).unwrap()
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn log_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = open(&dir);
            store.put(b"a", b"1").unwrap();
            store.put(b"b", b"2").unwrap();
            store.delete(b"a").unwrap();
            store.close().unwrap();
        }

        let store = open(&dir);
        assert_eq!(store.get(b"a").unwrap(), None);
        assert_eq!(store.get(b"b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn log_second_open_is_locked() {
        let dir = TempDir::new().unwrap();
        let _store = open(&dir);
        let second = LogStore::open(&dir.path().join("model.log"), LogStoreOptions::default());
        assert!(matches!(second, Err(StorageError::Locked { .. })));
    }

    #[test]
    fn log_lock_released_on_close() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store.close().unwrap();
        let reopened = open(&dir);
        assert!(!reopened.is_closed());
    }

    #[test]
    fn log_torn_tail_is_discarded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.log");
        {
            let store = open(&dir);
            let mut batch = WriteBatch::new();
            batch.put(b"a".to_vec(), b"1".to_vec());
            batch.put(b"b".to_vec(), b"2".to_vec());
            store.write_batch(batch).unwrap();
            store.close().unwrap();
        }
        let valid_len = fs::metadata(&path).unwrap().len();
        {
            // Half-written second frame
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            let frame = encode_frame(&[BatchOp::Put {
                key: b"c".to_vec(),
                value: b"3".to_vec(),
            }])
            .unwrap();
            file.write_all(&frame[..frame.len() - 2]).unwrap();
        }

        let store = open(&dir);
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(b"b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.get(b"c").unwrap(), None);
        assert_eq!(store.file_len(), valid_len);
    }

    #[test]
    fn log_corrupt_frame_drops_whole_batch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.log");
        {
            let store = open(&dir);
            let mut batch = WriteBatch::new();
            batch.put(b"a".to_vec(), b"1".to_vec());
            batch.put(b"b".to_vec(), b"2".to_vec());
            store.write_batch(batch).unwrap();
            store.close().unwrap();
        }
        {
            let mut bytes = fs::read(&path).unwrap();
            let last = bytes.len() - 1;
            bytes[last] ^= 0xFF;
            fs::write(&path, bytes).unwrap();
        }

        let store = open(&dir);
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn log_compact_keeps_live_entries() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        for i in 0..50u8 {
            store.put(b"counter", &[i]).unwrap();
        }
        store.put(b"other", b"x").unwrap();
        let before = store.file_len();

        let reclaimed = store.compact().unwrap();
        assert!(reclaimed > 0);
        assert!(store.file_len() < before);

        store.put(b"after", b"y").unwrap();
        store.close().unwrap();

        let store = open(&dir);
        assert_eq!(store.get(b"counter").unwrap(), Some(vec![49]));
        assert_eq!(store.get(b"other").unwrap(), Some(b"x".to_vec()));
        assert_eq!(store.get(b"after").unwrap(), Some(b"y".to_vec()));
    }

    #[test]
    fn log_missing_file_without_create_fails() {
        let dir = TempDir::new().unwrap();
        let result = LogStore::open(
            &dir.path().join("absent.log"),
            LogStoreOptions::new().create_if_missing(false),
        );
        assert!(matches!(result, Err(StorageError::Io(_))));
    }

    #[test]
    fn log_sync_policies_accept_writes() {
        for policy in [SyncPolicy::Always, SyncPolicy::OnClose, SyncPolicy::EveryOps(2)] {
            let dir = TempDir::new().unwrap();
            let store = LogStore::open(
                &dir.path().join("model.log"),
                LogStoreOptions::new().sync_policy(policy),
            )
            .unwrap();
            for i in 0..5u8 {
                store.put(&[i], &[i]).unwrap();
            }
            store.flush().unwrap();
            assert_eq!(store.len().unwrap(), 5);
        }
    }

    #[test]
    fn log_closed_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store.close().unwrap();
        assert!(store.close().is_ok());
        assert!(matches!(store.put(b"a", b"1"), Err(StorageError::Closed)));
    }

    #[test]
    fn failed_sync_rolls_back_frame() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("raw.log");
        fs::write(&path, b"head").unwrap();
        let mut file = OpenOptions::new().read(true).append(true).open(&path).unwrap();

        let result = commit_frame(&mut file, 4, b"unacknowledged", |_| {
            Err(io::Error::other("sync failed"))
        });
        assert!(result.is_err());
        assert_eq!(fs::metadata(&path).unwrap().len(), 4);

        commit_frame(&mut file, 4, b"tail", |f| f.sync_data()).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"headtail".to_vec());
    }

    #[test]
    fn oversized_lengths_are_rejected() {
        assert!(matches!(
            frame_len(u32::MAX as usize + 1),
            Err(StorageError::FrameTooLarge { .. })
        ));
        assert_eq!(frame_len(7).unwrap(), 7);
    }

    #[test]
    fn compaction_splits_large_live_sets() {
        let mut index = BTreeMap::new();
        for i in 0..100u32 {
            index.insert(i.to_be_bytes().to_vec(), vec![0u8; 64]);
        }
        let frames = compaction_frames(&index, 1024).unwrap();
        assert!(frames.len() > 1);

        let bytes: Vec<u8> = frames.concat();
        let (replayed, valid_len, count) = replay(&bytes);
        assert_eq!(replayed, index);
        assert_eq!(valid_len, bytes.len());
        assert_eq!(count, frames.len());
        assert!(compaction_frames(&BTreeMap::new(), 1024).unwrap().is_empty());
    }

    #[test]
    fn concurrent_puts_report_each_previous_once() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        let threads = 4u32;
        let per_thread = 100u32;

        let previous: Vec<Option<Vec<u8>>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..threads)
                .map(|t| {
                    let store = &store;
                    scope.spawn(move || {
                        (0..per_thread)
                            .map(|i| store.put(b"key", &(t * per_thread + i).to_be_bytes()).unwrap())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });

        // Every write is observed as the previous value of exactly one other write
        assert_eq!(previous.iter().filter(|p| p.is_none()).count(), 1);
        let mut seen: Vec<Vec<u8>> = previous.into_iter().flatten().collect();
        seen.push(store.get(b"key").unwrap().unwrap());
        seen.sort();
        let before = seen.len();
        seen.dedup();
        assert_eq!(seen.len(), before);
        assert_eq!(seen.len(), (threads * per_thread) as usize);
    }
}
