//! Disk-backed persistent tier that survives process restarts.
//!
//! Each entry is one file named after the key digest. A file holds a small
//! header (magic, write timestamp, key) followed by the raw payload. Writes go
//! to a temporary file that is renamed into place, so readers only ever see a
//! whole record. An in-memory index ordered by write time is rebuilt from the
//! headers on open and backs `count`, the quota and range deletion.
//!
//! Renames and unlinks of record files, together with the matching index
//! update, run under one commit lock. The index therefore always describes the
//! files on disk once a call returns.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::domain::entities::{CacheKey, PersistentEntry};
use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::ports::{ClockPort, PersistentStorePort};

/// Maximum disk cache size in bytes (200 MB default).
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 200 * 1024 * 1024;

const RECORD_EXT: &str = "img";
const TEMP_EXT: &str = "tmp";
const RECORD_MAGIC: &[u8; 4] = b"PXC1";
const HEADER_LEN: usize = 16;

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    written_at: DateTime<Utc>,
    size: u64,
}

#[derive(Debug, Default)]
struct StoreIndex {
    entries: HashMap<CacheKey, IndexEntry>,
    by_age: BTreeSet<(DateTime<Utc>, CacheKey)>,
    total_size: u64,
    /// Bytes claimed by writes that have not committed yet.
    reserved: u64,
}

impl StoreIndex {
    fn insert(&mut self, key: CacheKey, entry: IndexEntry) {
        self.remove(&key);
        self.by_age.insert((entry.written_at, key.clone()));
        self.total_size += entry.size;
        self.entries.insert(key, entry);
    }

    fn remove(&mut self, key: &CacheKey) -> Option<IndexEntry> {
        let entry = self.entries.remove(key)?;
        self.by_age.remove(&(entry.written_at, key.clone()));
        self.total_size = self.total_size.saturating_sub(entry.size);
        Some(entry)
    }

    /// Claims `size` bytes for a write of `key`, counting in-flight writes.
    fn reserve(&mut self, key: &CacheKey, size: u64, limit: u64) -> CacheResult<()> {
        let replaced = self.entries.get(key).map_or(0, |entry| entry.size);
        let projected = (self.total_size + self.reserved).saturating_sub(replaced) + size;
        if projected > limit {
            return Err(CacheError::QuotaExceeded {
                needed: size,
                limit,
            });
        }
        self.reserved += size;
        Ok(())
    }

    fn release(&mut self, size: u64) {
        self.reserved = self.reserved.saturating_sub(size);
    }

    /// Keys written at or before `cutoff`, oldest first.
    fn expired_by(&self, cutoff: DateTime<Utc>) -> Vec<CacheKey> {
        self.by_age
            .iter()
            .take_while(|(written_at, _)| *written_at <= cutoff)
            .map(|(_, key)| key.clone())
            .collect()
    }

    fn is_expired_by(&self, key: &CacheKey, cutoff: DateTime<Utc>) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| entry.written_at <= cutoff)
    }
}

struct RecordHeader {
    key: CacheKey,
    written_at: DateTime<Utc>,
}

#[allow(clippy::cast_possible_truncation)]
fn encode_record(key: &CacheKey, written_at: DateTime<Utc>, payload: &[u8]) -> Bytes {
    let key_bytes = key.as_str().as_bytes();
    let mut buf = BytesMut::with_capacity(HEADER_LEN + key_bytes.len() + payload.len());
    buf.put_slice(RECORD_MAGIC);
    buf.put_i64(written_at.timestamp_millis());
    buf.put_u32(key_bytes.len() as u32);
    buf.put_slice(key_bytes);
    buf.put_slice(payload);
    buf.freeze()
}

fn parse_header(buf: &mut impl Buf) -> CacheResult<RecordHeader> {
    if buf.remaining() < HEADER_LEN {
        return Err(CacheError::Corrupt("truncated header".to_string()));
    }

    let mut magic = [0u8; 4];
    buf.copy_to_slice(&mut magic);
    if &magic != RECORD_MAGIC {
        return Err(CacheError::Corrupt("bad magic".to_string()));
    }

    let millis = buf.get_i64();
    let key_len = buf.get_u32() as usize;
    if buf.remaining() < key_len {
        return Err(CacheError::Corrupt("truncated key".to_string()));
    }

    let key = String::from_utf8(buf.copy_to_bytes(key_len).to_vec())
        .map_err(|e| CacheError::Corrupt(format!("key is not utf-8: {e}")))?;
    let written_at = DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| CacheError::Corrupt(format!("timestamp out of range: {millis}")))?;

    Ok(RecordHeader {
        key: CacheKey::new(key),
        written_at,
    })
}

fn decode_record(mut raw: Bytes) -> CacheResult<PersistentEntry> {
    let header = parse_header(&mut raw)?;
    Ok(PersistentEntry {
        key: header.key,
        payload: raw,
        written_at: header.written_at,
    })
}

/// Reads only the header of a record file. Returns it with the file size.
async fn read_header(path: &Path) -> CacheResult<(RecordHeader, u64)> {
    let mut file = fs::File::open(path).await?;
    let size = file.metadata().await?.len();

    let mut head = vec![0u8; HEADER_LEN];
    file.read_exact(&mut head)
        .await
        .map_err(|e| CacheError::Corrupt(format!("short header: {e}")))?;

    let key_len = (&head[12..HEADER_LEN]).get_u32() as usize;
    if (HEADER_LEN + key_len) as u64 > size {
        return Err(CacheError::Corrupt("key length exceeds file".to_string()));
    }
    head.resize(HEADER_LEN + key_len, 0);
    file.read_exact(&mut head[HEADER_LEN..])
        .await
        .map_err(|e| CacheError::Corrupt(format!("short key: {e}")))?;

    let header = parse_header(&mut head.as_slice())?;
    Ok((header, size))
}

fn write_error(e: &std::io::Error, needed: u64, limit: u64) -> CacheError {
    if e.kind() == std::io::ErrorKind::StorageFull {
        CacheError::QuotaExceeded { needed, limit }
    } else {
        CacheError::Io(format!("Failed to write cache record: {e}"))
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().is_some_and(|e| e == ext)
}

async fn write_temp(path: &Path, record: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(record).await?;
    file.flush().await
}

/// Persistent tier storing raw image bytes on disk.
pub struct DiskImageCache {
    cache_dir: PathBuf,
    max_size: u64,
    index: Mutex<StoreIndex>,
    commit: tokio::sync::Mutex<()>,
    clock: Arc<dyn ClockPort>,
}

impl DiskImageCache {
    /// Opens (or creates) a cache in `cache_dir`, rebuilding the index from
    /// the records found there. Unreadable records are removed.
    ///
    /// # Errors
    /// Returns `StorageUnavailable` if the directory cannot be created or read.
    pub async fn open(
        cache_dir: PathBuf,
        max_size: u64,
        clock: Arc<dyn ClockPort>,
    ) -> CacheResult<Self> {
        fs::create_dir_all(&cache_dir).await.map_err(|e| {
            CacheError::StorageUnavailable(format!("Failed to create cache dir: {e}"))
        })?;

        let mut entries = fs::read_dir(&cache_dir).await.map_err(|e| {
            CacheError::StorageUnavailable(format!("Failed to read cache dir: {e}"))
        })?;

        let mut index = StoreIndex::default();
        let mut discarded = 0usize;

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(dir = %cache_dir.display(), error = %e, "Cache dir scan stopped early, index is partial");
                    break;
                }
            };

            let path = entry.path();
            if has_extension(&path, RECORD_EXT) {
                match read_header(&path).await {
                    Ok((header, size)) => index.insert(
                        header.key,
                        IndexEntry {
                            written_at: header.written_at,
                            size,
                        },
                    ),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Discarding unreadable cache record");
                        let _ = fs::remove_file(&path).await;
                        discarded += 1;
                    }
                }
            } else if has_extension(&path, TEMP_EXT) {
                let _ = fs::remove_file(&path).await;
            }
        }

        info!(
            dir = %cache_dir.display(),
            entries = index.entries.len(),
            size = index.total_size,
            discarded = discarded,
            "Opened persistent image cache"
        );

        Ok(Self {
            cache_dir,
            max_size,
            index: Mutex::new(index),
            commit: tokio::sync::Mutex::new(()),
            clock,
        })
    }

    /// Returns the cache directory.
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Returns the bytes currently used on disk.
    pub fn current_size(&self) -> u64 {
        self.index.lock().total_size
    }

    /// Returns the configured quota in bytes.
    #[must_use]
    pub const fn max_size(&self) -> u64 {
        self.max_size
    }

    fn record_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir.join(format!("{}.{RECORD_EXT}", key.digest()))
    }

    /// Unlinks a record and drops it from the index. The index entry stays if
    /// the file cannot be removed. Callers hold the commit lock.
    async fn remove_record(&self, key: &CacheKey) -> CacheResult<bool> {
        let path = self.record_path(key);
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(CacheError::Io(format!("Failed to remove cache record: {e}")));
            }
        }
        Ok(self.index.lock().remove(key).is_some())
    }

    /// Removes `.img` files the index does not know about, except those
    /// belonging to `keep`. Callers hold the commit lock.
    async fn remove_unindexed(&self, keep: &HashSet<String>) -> CacheResult<()> {
        let mut entries = fs::read_dir(&self.cache_dir).await.map_err(|e| {
            CacheError::StorageUnavailable(format!("Failed to read cache dir: {e}"))
        })?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CacheError::Io(format!("Failed to read entry: {e}")))?
        {
            let path = entry.path();
            let indexed = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .is_some_and(|stem| keep.contains(stem));
            if has_extension(&path, RECORD_EXT)
                && !indexed
                && fs::remove_file(&path).await.is_err()
            {
                warn!(path = %path.display(), "Failed to remove cache file");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PersistentStorePort for DiskImageCache {
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<PersistentEntry>> {
        let path = self.record_path(key);
        let raw = match fs::read(&path).await {
            Ok(raw) => Bytes::from(raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let _commit = self.commit.lock().await;
                if !fs::try_exists(&path).await.unwrap_or(true) {
                    self.index.lock().remove(key);
                }
                trace!(key = %key, "Disk cache miss");
                return Ok(None);
            }
            Err(e) => return Err(CacheError::Io(format!("Failed to read cache record: {e}"))),
        };

        let entry = match decode_record(raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = %key, error = %e, "Removing corrupt cache record");
                let _commit = self.commit.lock().await;
                let _ = self.remove_record(key).await;
                return Err(e);
            }
        };

        if entry.key != *key {
            trace!(key = %key, stored = %entry.key, "Digest collision, treating as miss");
            return Ok(None);
        }

        trace!(key = %key, path = %path.display(), "Disk cache hit");
        Ok(Some(entry))
    }

    async fn put(&self, key: &CacheKey, payload: Bytes) -> CacheResult<()> {
        let written_at = self.clock.now();
        let record = encode_record(key, written_at, &payload);
        let size = record.len() as u64;

        self.index.lock().reserve(key, size, self.max_size)?;

        let path = self.record_path(key);
        let temp = self.cache_dir.join(format!(
            "{}.{}.{TEMP_EXT}",
            key.digest(),
            Uuid::new_v4().simple()
        ));

        let written = match write_temp(&temp, &record).await {
            Ok(()) => {
                let _commit = self.commit.lock().await;
                let renamed = fs::rename(&temp, &path).await;
                let mut index = self.index.lock();
                index.release(size);
                if renamed.is_ok() {
                    index.insert(key.clone(), IndexEntry { written_at, size });
                }
                renamed
            }
            Err(e) => {
                self.index.lock().release(size);
                Err(e)
            }
        };

        if let Err(e) = written {
            let _ = fs::remove_file(&temp).await;
            return Err(write_error(&e, size, self.max_size));
        }

        debug!(key = %key, path = %path.display(), size = size, "Stored record in disk cache");
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> CacheResult<()> {
        let _commit = self.commit.lock().await;
        if self.remove_record(key).await? {
            debug!(key = %key, "Deleted record from disk cache");
        }
        Ok(())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> CacheResult<usize> {
        let stale = self.index.lock().expired_by(cutoff);
        let mut removed = 0usize;
        let mut failure = None;

        for key in stale {
            match self.delete_if_older(&key, cutoff).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to remove expired record");
                    failure = Some(e);
                }
            }
        }

        debug!(removed = removed, cutoff = %cutoff, "Removed expired disk cache records");
        failure.map_or(Ok(removed), Err)
    }

    async fn delete_if_older(&self, key: &CacheKey, cutoff: DateTime<Utc>) -> CacheResult<bool> {
        let _commit = self.commit.lock().await;
        let stale = self.index.lock().is_expired_by(key, cutoff);
        if !stale {
            return Ok(false);
        }
        self.remove_record(key).await
    }

    async fn clear(&self) -> CacheResult<()> {
        let _commit = self.commit.lock().await;
        let keys: Vec<CacheKey> = self.index.lock().entries.keys().cloned().collect();

        let mut removed = 0usize;
        let mut kept = HashSet::new();
        for key in keys {
            match self.remove_record(&key).await {
                Ok(_) => removed += 1,
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to remove cache record");
                    kept.insert(key.digest());
                }
            }
        }

        self.remove_unindexed(&kept).await?;

        info!(removed = removed, kept = kept.len(), "Cleared disk cache");
        if kept.is_empty() {
            Ok(())
        } else {
            Err(CacheError::Io(format!(
                "{} cache records could not be removed",
                kept.len()
            )))
        }
    }

    async fn count(&self) -> CacheResult<usize> {
        Ok(self.index.lock().entries.len())
    }
}

/// Returns the default cache directory path.
#[must_use]
pub fn default_cache_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "pixcache", "pixcache").map_or_else(
        || {
            std::env::temp_dir()
                .join("pixcache")
                .join("cache")
                .join("images")
        },
        |dirs| dirs.cache_dir().join("images"),
    )
}
