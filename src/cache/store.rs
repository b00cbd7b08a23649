//! Mutex-serialized disk cache shared across request-issuing threads.
//!
//! [`DiskCache`] is a cloneable handle over one shared store: every clone
//! refers to the same directory, the same size accounting, and the same
//! lock. All operations acquire that single lock for their full duration,
//! so reads, writes, removals, and metadata updates are serialized with
//! each other regardless of which handle issued them.
//!
//! Entries live on disk as a body file (`<sha256(url)>.data`) plus a JSON
//! metadata sidecar (`<sha256(url)>.meta`). In-progress inserts stream into
//! a `.part` temp file outside the lock and are renamed into place on
//! completion; abandoned inserts clean their temp file up on drop.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};
use url::Url;

use super::error::CacheError;
use super::metadata::CacheMetadata;

/// Shared handle to the disk-backed response cache.
///
/// Cloning is cheap and every clone observes the same underlying store;
/// inject one handle into each component that needs cache access instead of
/// reaching for global state.
#[derive(Debug, Clone)]
pub struct DiskCache {
    inner: Arc<Mutex<CacheState>>,
}

/// State guarded by the single cache lock.
#[derive(Debug)]
struct CacheState {
    root: PathBuf,
    /// Total bytes across body and metadata files, maintained incrementally.
    size: u64,
}

/// Writable handle for an in-progress cache insert.
///
/// Returned by [`DiskCache::begin_insert`]; the response body is streamed in
/// via [`write`](EntryWriter::write) without holding the cache lock, then
/// committed with [`DiskCache::insert_complete`]. Dropping the writer
/// without committing removes the partial file.
#[derive(Debug)]
pub struct EntryWriter {
    metadata: CacheMetadata,
    file: Option<File>,
    part_path: PathBuf,
    data_path: PathBuf,
    meta_path: PathBuf,
    bytes_written: u64,
    completed: bool,
}

impl EntryWriter {
    /// Appends a chunk of the response body to the pending entry.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Io` if writing the temp file fails.
    pub fn write(&mut self, chunk: &[u8]) -> Result<(), CacheError> {
        if let Some(file) = self.file.as_mut() {
            file.write_all(chunk)
                .map_err(|e| CacheError::io(self.part_path.clone(), e))?;
            self.bytes_written += chunk.len() as u64;
        }
        Ok(())
    }

    /// Bytes written into the pending entry so far.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// The URL this pending entry will be stored under.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.metadata.url
    }
}

impl Drop for EntryWriter {
    fn drop(&mut self) {
        if !self.completed {
            // Abandoned insert: close the handle, then discard the partial.
            self.file.take();
            if let Err(error) = fs::remove_file(&self.part_path) {
                if error.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.part_path.display(), %error, "failed to discard partial cache entry");
                }
            }
        }
    }
}

impl DiskCache {
    /// Opens (or creates) a cache rooted at `dir`.
    ///
    /// Scans existing entries once to establish size accounting and removes
    /// partial files left behind by interrupted inserts. Fails eagerly if
    /// the directory cannot be created or read, so callers can decide at
    /// startup whether to run uncached.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Io` if the directory cannot be created or
    /// scanned.
    #[instrument(level = "debug", skip_all, fields(dir = %dir.as_ref().display()))]
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, CacheError> {
        let root = dir.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| CacheError::io(root.clone(), e))?;

        let mut size: u64 = 0;
        let entries = fs::read_dir(&root).map_err(|e| CacheError::io(root.clone(), e))?;
        for entry in entries {
            let entry = entry.map_err(|e| CacheError::io(root.clone(), e))?;
            let path = entry.path();
            match path.extension().and_then(|ext| ext.to_str()) {
                // Leftover from an interrupted insert.
                Some("part") => {
                    debug!(path = %path.display(), "removing stale partial cache entry");
                    let _ = fs::remove_file(&path);
                }
                Some("data" | "meta") => {
                    size += entry.metadata().map(|m| m.len()).unwrap_or(0);
                }
                _ => {}
            }
        }

        debug!(bytes = size, "disk cache opened");
        Ok(Self {
            inner: Arc::new(Mutex::new(CacheState { root, size })),
        })
    }

    /// Current total cache size in bytes (body and metadata files).
    #[must_use]
    pub fn size(&self) -> u64 {
        self.lock().size
    }

    /// Returns the cached body for `url` if a fresh entry exists.
    ///
    /// Never touches the network. Entries past their validity window are
    /// treated as absent (they remain on disk until overwritten or
    /// removed).
    ///
    /// # Errors
    ///
    /// Returns `CacheError` if the entry exists but cannot be read or its
    /// metadata cannot be parsed.
    pub fn fetch(&self, url: &Url) -> Result<Option<Vec<u8>>, CacheError> {
        let state = self.lock();
        let (data_path, meta_path) = state.entry_paths(url.as_str());
        let Some(meta) = read_metadata(&meta_path)? else {
            return Ok(None);
        };
        if !meta.is_fresh(SystemTime::now()) {
            debug!(%url, "cache entry expired");
            return Ok(None);
        }
        match fs::read(&data_path) {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::io(data_path, e)),
        }
    }

    /// Returns the stored metadata for `url`, if any.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Corrupt` if the metadata file cannot be parsed.
    pub fn metadata(&self, url: &Url) -> Result<Option<CacheMetadata>, CacheError> {
        let state = self.lock();
        let (_, meta_path) = state.entry_paths(url.as_str());
        read_metadata(&meta_path)
    }

    /// Replaces the stored metadata for an existing entry without touching
    /// the body. Returns `false` if no entry exists for the metadata's URL.
    ///
    /// # Errors
    ///
    /// Returns `CacheError` if writing the metadata file fails.
    pub fn update_metadata(&self, metadata: &CacheMetadata) -> Result<bool, CacheError> {
        let mut state = self.lock();
        let (data_path, meta_path) = state.entry_paths(&metadata.url);
        if !data_path.exists() {
            return Ok(false);
        }
        let old = file_size(&meta_path);
        let bytes = serde_json::to_vec(metadata)
            .map_err(|e| CacheError::corrupt(meta_path.clone(), e))?;
        fs::write(&meta_path, &bytes).map_err(|e| CacheError::io(meta_path.clone(), e))?;
        state.size = state.size.saturating_sub(old) + bytes.len() as u64;
        Ok(true)
    }

    /// Begins inserting an entry for the metadata's URL.
    ///
    /// The returned writer owns a `.part` temp file; stream the body into it
    /// (no lock held), then commit with [`insert_complete`](Self::insert_complete).
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Io` if the temp file cannot be created.
    pub fn begin_insert(&self, metadata: CacheMetadata) -> Result<EntryWriter, CacheError> {
        // Unique per insert so concurrent writers for the same URL never
        // share a temp file; the lock only serializes the commit.
        static PART_SEQ: AtomicU64 = AtomicU64::new(0);
        let state = self.lock();
        let (data_path, meta_path) = state.entry_paths(&metadata.url);
        let part_path = data_path.with_extension(format!(
            "{}.part",
            PART_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        let file = File::create(&part_path).map_err(|e| CacheError::io(part_path.clone(), e))?;
        debug!(url = %metadata.url, "cache insert started");
        Ok(EntryWriter {
            metadata,
            file: Some(file),
            part_path,
            data_path,
            meta_path,
            bytes_written: 0,
            completed: false,
        })
    }

    /// Commits an insert started with [`begin_insert`](Self::begin_insert):
    /// persists the metadata sidecar, renames the body into place, and
    /// updates size accounting. Replaces any previous entry for the URL.
    ///
    /// # Errors
    ///
    /// Returns `CacheError` if finalizing either file fails; the partial
    /// entry is discarded in that case.
    pub fn insert_complete(&self, mut writer: EntryWriter) -> Result<(), CacheError> {
        let mut state = self.lock();

        // Close the body handle before the rename (required on Windows).
        if let Some(mut file) = writer.file.take() {
            file.flush()
                .map_err(|e| CacheError::io(writer.part_path.clone(), e))?;
        }

        let bytes = serde_json::to_vec(&writer.metadata)
            .map_err(|e| CacheError::corrupt(writer.meta_path.clone(), e))?;
        let replaced = file_size(&writer.data_path) + file_size(&writer.meta_path);

        fs::write(&writer.meta_path, &bytes)
            .map_err(|e| CacheError::io(writer.meta_path.clone(), e))?;
        fs::rename(&writer.part_path, &writer.data_path)
            .map_err(|e| CacheError::io(writer.data_path.clone(), e))?;

        state.size = state.size.saturating_sub(replaced)
            + file_size(&writer.data_path)
            + bytes.len() as u64;
        writer.completed = true;
        debug!(
            url = %writer.metadata.url,
            bytes = writer.bytes_written,
            total = state.size,
            "cache entry stored"
        );
        Ok(())
    }

    /// Deletes the entry for `url`; returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Io` if an existing file cannot be removed.
    pub fn remove(&self, url: &Url) -> Result<bool, CacheError> {
        let mut state = self.lock();
        let (data_path, meta_path) = state.entry_paths(url.as_str());
        let freed = file_size(&data_path) + file_size(&meta_path);
        let mut existed = false;
        for path in [&data_path, &meta_path] {
            match fs::remove_file(path) {
                Ok(()) => existed = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(CacheError::io(path.clone(), e)),
            }
        }
        state.size = state.size.saturating_sub(freed);
        if existed {
            debug!(%url, "cache entry removed");
        }
        Ok(existed)
    }

    /// Removes every entry in the cache.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Io` if the cache directory cannot be scanned or
    /// a file cannot be removed.
    pub fn clear(&self) -> Result<(), CacheError> {
        let mut state = self.lock();
        let entries =
            fs::read_dir(&state.root).map_err(|e| CacheError::io(state.root.clone(), e))?;
        for entry in entries {
            let entry = entry.map_err(|e| CacheError::io(state.root.clone(), e))?;
            let path = entry.path();
            if matches!(
                path.extension().and_then(|ext| ext.to_str()),
                Some("data" | "meta" | "part")
            ) {
                fs::remove_file(&path).map_err(|e| CacheError::io(path.clone(), e))?;
            }
        }
        state.size = 0;
        debug!("cache cleared");
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CacheState {
    /// Body and metadata paths for a URL's entry.
    fn entry_paths(&self, url: &str) -> (PathBuf, PathBuf) {
        let key = format!("{:x}", Sha256::digest(url.as_bytes()));
        (
            self.root.join(format!("{key}.data")),
            self.root.join(format!("{key}.meta")),
        )
    }
}

fn file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

fn read_metadata(meta_path: &Path) -> Result<Option<CacheMetadata>, CacheError> {
    let bytes = match fs::read(meta_path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CacheError::io(meta_path.to_path_buf(), e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| CacheError::corrupt(meta_path.to_path_buf(), e))
}
