//! Static file cache.
//!
//! Stores raw bytes, optional pre-compressed variants, and the stat
//! metadata conditional responses are derived from, under the reserved
//! `files` scope keyed by absolute path.

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tracing::debug;

use crate::compress::{Compressor, EncodedVariants, Encoding};
use crate::config::CacheSettings;
use crate::error::CacheError;

use super::store::{CacheStore, CacheValue, FILES_SCOPE, Lifespan};

/// Filesystem metadata captured at cache time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStats {
    pub len: u64,
    /// Modification time in milliseconds since the Unix epoch.
    pub modified_ms: u128,
}

impl FileStats {
    /// Opaque validator token for conditional GETs.
    pub fn etag(&self) -> String {
        format!("{}-{}", self.len, self.modified_ms)
    }
}

/// One cached static file.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub variants: EncodedVariants,
    pub stats: FileStats,
}

/// Whether `set_file` may suspend while reading from disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileReadMode {
    /// Read on the current thread with `std::fs`.
    Blocking,
    /// Read through `tokio::fs`, yielding at I/O boundaries.
    Async,
}

/// Cache facade over the reserved `files` scope.
#[derive(Clone)]
pub struct FileCache {
    store: CacheStore,
    compressor: Arc<dyn Compressor>,
    settings: CacheSettings,
}

impl FileCache {
    pub fn new(store: CacheStore, compressor: Arc<dyn Compressor>, settings: CacheSettings) -> Self {
        Self {
            store,
            compressor,
            settings,
        }
    }

    /// Cache a file's contents.
    ///
    /// When `bytes` is absent the file and its stat metadata are read from
    /// disk per `mode`. A read failure leaves no partial record behind.
    pub async fn set_file(
        &self,
        path: &Path,
        bytes: Option<Bytes>,
        lifespan: Lifespan,
        reset_on_access: bool,
        mode: FileReadMode,
    ) -> Result<(), CacheError> {
        let key = path_key(path)?;
        let (bytes, stats) = match bytes {
            Some(bytes) => {
                let stats = FileStats {
                    len: bytes.len() as u64,
                    modified_ms: unix_millis(SystemTime::now()),
                };
                (bytes, stats)
            }
            None => self.read_from_disk(path, &key, mode).await?,
        };
        let variants =
            EncodedVariants::encode(bytes, self.compressor.as_ref(), self.settings.compress_variants)
                .map_err(|err| CacheError::read_failure(&key, err))?;
        self.store.insert(
            FILES_SCOPE,
            &key,
            CacheValue::File(FileRecord { variants, stats }),
            lifespan,
            reset_on_access,
        );
        debug!(path = %key, "cached static file");
        Ok(())
    }

    /// Fetch the whole record for a path.
    pub fn get_file(&self, path: &Path) -> Result<Option<FileRecord>, CacheError> {
        let key = path_key(path)?;
        Ok(self
            .store
            .get(FILES_SCOPE, &key)?
            .and_then(|value| match value {
                CacheValue::File(record) => Some(record),
                _ => None,
            }))
    }

    /// Fetch one encoded variant of a cached file.
    pub fn get_file_variant(
        &self,
        path: &Path,
        encoding: Encoding,
    ) -> Result<Option<Bytes>, CacheError> {
        Ok(self
            .get_file(path)?
            .and_then(|record| record.variants.get(encoding).cloned()))
    }

    /// Fetch only the stat metadata, without cloning the body variants.
    pub fn get_file_stats(&self, path: &Path) -> Result<Option<FileStats>, CacheError> {
        Ok(self.get_file(path)?.map(|record| record.stats))
    }

    pub fn exists_file(&self, path: &Path) -> bool {
        path_key(path)
            .map(|key| self.store.exists(FILES_SCOPE, &key))
            .unwrap_or(false)
    }

    pub fn clear_file(&self, path: &Path) -> Result<bool, CacheError> {
        let key = path_key(path)?;
        self.store.clear(FILES_SCOPE, &key)
    }

    async fn read_from_disk(
        &self,
        path: &Path,
        key: &str,
        mode: FileReadMode,
    ) -> Result<(Bytes, FileStats), CacheError> {
        match mode {
            FileReadMode::Blocking => {
                let contents =
                    std::fs::read(path).map_err(|err| CacheError::read_failure(key, err))?;
                let metadata =
                    std::fs::metadata(path).map_err(|err| CacheError::read_failure(key, err))?;
                Ok((Bytes::from(contents), stats_from(&metadata)))
            }
            FileReadMode::Async => {
                let contents = tokio::fs::read(path)
                    .await
                    .map_err(|err| CacheError::read_failure(key, err))?;
                let metadata = tokio::fs::metadata(path)
                    .await
                    .map_err(|err| CacheError::read_failure(key, err))?;
                Ok((Bytes::from(contents), stats_from(&metadata)))
            }
        }
    }
}

fn stats_from(metadata: &std::fs::Metadata) -> FileStats {
    let modified_ms = metadata
        .modified()
        .map(unix_millis)
        .unwrap_or_default();
    FileStats {
        len: metadata.len(),
        modified_ms,
    }
}

fn unix_millis(at: SystemTime) -> u128 {
    at.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default()
}

fn path_key(path: &Path) -> Result<String, CacheError> {
    let key = path.to_string_lossy();
    if key.is_empty() {
        return Err(CacheError::missing_arguments("file path must be non-empty"));
    }
    Ok(key.into_owned())
}
