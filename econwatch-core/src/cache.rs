//! Short-lived JSON cache in front of whole fetches.
//!
//! Layout: `{cache_dir}/{blake3(key)[..16]}.json`
//!
//! - The file's mtime is the entry's write time; an entry is fresh while
//!   `now - written_at <= max_age`.
//! - Stale entries stay on disk until overwritten or cleared.
//! - Writes are atomic (write to .tmp, rename into place).
//! - A file that fails to parse, or whose stored key differs, is a miss.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct Envelope<T> {
    key: String,
    payload: T,
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    key: &'a str,
    payload: &'a T,
}

/// One file in the cache directory.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntryInfo {
    pub file: String,
    pub key: Option<String>,
    pub size_bytes: u64,
    pub age: Duration,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheInfo {
    pub entries: Vec<CacheEntryInfo>,
    pub total_bytes: u64,
}

/// The JSON cache.
#[derive(Debug, Clone)]
pub struct DataCache {
    dir: PathBuf,
}

impl DataCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `{cache_dir}/{first 16 hex chars of blake3(key)}.json`
    pub fn entry_path(&self, key: &str) -> PathBuf {
        let hash = blake3::hash(key.as_bytes()).to_hex();
        self.dir.join(format!("{}.json", &hash.as_str()[..16]))
    }

    /// Cached payload if present and no older than `max_age`.
    pub fn get<T: DeserializeOwned>(&self, key: &str, max_age: Duration) -> Option<T> {
        self.get_at(key, max_age, SystemTime::now())
    }

    /// [`get`](Self::get) against an explicit clock.
    pub fn get_at<T: DeserializeOwned>(
        &self,
        key: &str,
        max_age: Duration,
        now: SystemTime,
    ) -> Option<T> {
        let written = self.written_at(key)?;
        // an mtime in the future counts as age zero
        let age = now.duration_since(written).unwrap_or_default();
        if age > max_age {
            debug!(key, age_secs = age.as_secs(), "cache entry expired");
            return None;
        }

        let text = fs::read_to_string(self.entry_path(key)).ok()?;
        match serde_json::from_str::<Envelope<T>>(&text) {
            Ok(envelope) if envelope.key == key => {
                debug!(key, "cache hit");
                Some(envelope.payload)
            }
            Ok(_) => {
                warn!(key, "cache entry belongs to a different key");
                None
            }
            Err(e) => {
                warn!(key, error = %e, "unreadable cache entry");
                None
            }
        }
    }

    /// Write time of the entry for `key`.
    pub fn written_at(&self, key: &str) -> Option<SystemTime> {
        fs::metadata(self.entry_path(key)).ok()?.modified().ok()
    }

    /// Store `payload` under `key`, replacing any existing entry.
    pub fn set<T: Serialize>(&self, key: &str, payload: &T) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.entry_path(key);
        let tmp_path = path.with_extension("json.tmp");

        let bytes = serde_json::to_vec(&EnvelopeRef { key, payload })?;
        fs::write(&tmp_path, bytes)?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            CacheError::Io(e)
        })?;
        debug!(key, path = %path.display(), "cache entry written");
        Ok(())
    }

    /// Return a fresh cached payload, or run `fetch` and cache its result.
    ///
    /// A failed cache write is logged; the fetched value is still returned.
    pub fn get_or_fetch<T, F>(&self, key: &str, max_age: Duration, fetch: F) -> T
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        if let Some(hit) = self.get(key, max_age) {
            return hit;
        }
        let value = fetch();
        if let Err(e) = self.set(key, &value) {
            warn!(key, error = %e, "failed to write cache entry");
        }
        value
    }

    /// Remove one entry, or every entry when `key` is `None`. Returns the number removed.
    pub fn clear(&self, key: Option<&str>) -> Result<usize, CacheError> {
        match key {
            Some(key) => match fs::remove_file(self.entry_path(key)) {
                Ok(()) => Ok(1),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
                Err(e) => Err(e.into()),
            },
            None => {
                let mut removed = 0;
                for path in self.entry_files()? {
                    fs::remove_file(&path)?;
                    removed += 1;
                }
                Ok(removed)
            }
        }
    }

    /// Entries with their size and age.
    pub fn info(&self) -> Result<CacheInfo, CacheError> {
        let now = SystemTime::now();
        let mut info = CacheInfo::default();
        for path in self.entry_files()? {
            let meta = fs::metadata(&path)?;
            let age = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            let key = fs::read_to_string(&path)
                .ok()
                .and_then(|t| serde_json::from_str::<Envelope<serde_json::Value>>(&t).ok())
                .map(|e| e.key);
            info.total_bytes += meta.len();
            info.entries.push(CacheEntryInfo {
                file: path
                    .file_name()
                    .map(|f| f.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                key,
                size_bytes: meta.len(),
                age,
            });
        }
        info.entries.sort_by(|a, b| a.file.cmp(&b.file));
        Ok(info)
    }

    fn entry_files(&self) -> Result<Vec<PathBuf>, CacheError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                files.push(path);
            }
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn cache() -> (tempfile::TempDir, DataCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = DataCache::new(dir.path().join("cache"));
        (dir, cache)
    }

    #[test]
    fn entry_path_is_short_stable_hash() {
        let (_dir, cache) = cache();
        let a = cache.entry_path("cso:live_register");
        assert_eq!(a, cache.entry_path("cso:live_register"));
        assert_ne!(a, cache.entry_path("cso:cpi"));
        let name = a.file_name().unwrap().to_str().unwrap();
        assert_eq!(name.len(), 16 + ".json".len());
    }

    #[test]
    fn set_then_get() {
        let (_dir, cache) = cache();
        cache.set("k", &vec![1.5, 2.5]).unwrap();
        let hit: Option<Vec<f64>> = cache.get("k", Duration::from_secs(60));
        assert_eq!(hit, Some(vec![1.5, 2.5]));
        assert_eq!(cache.get::<Vec<f64>>("other", Duration::from_secs(60)), None);
    }

    #[test]
    fn corrupt_entry_is_a_miss() {
        let (_dir, cache) = cache();
        cache.set("k", &1u32).unwrap();
        fs::write(cache.entry_path("k"), "{not json").unwrap();
        assert_eq!(cache.get::<u32>("k", Duration::from_secs(60)), None);
    }

    #[test]
    fn get_or_fetch_only_fetches_on_miss() {
        let (_dir, cache) = cache();
        let calls = Cell::new(0);
        let fetch = || {
            calls.set(calls.get() + 1);
            "fresh".to_string()
        };
        let ttl = Duration::from_secs(60);
        assert_eq!(cache.get_or_fetch("k", ttl, fetch), "fresh");
        assert_eq!(cache.get_or_fetch("k", ttl, fetch), "fresh");
        assert_eq!(calls.get(), 1);

        let later = cache.written_at("k").unwrap() + Duration::from_secs(61);
        assert_eq!(cache.get_at::<String>("k", ttl, later), None);
    }

    #[test]
    fn clear_one_and_all() {
        let (_dir, cache) = cache();
        cache.set("a", &1).unwrap();
        cache.set("b", &2).unwrap();
        assert_eq!(cache.clear(Some("a")).unwrap(), 1);
        assert_eq!(cache.clear(Some("a")).unwrap(), 0);
        assert_eq!(cache.info().unwrap().entries.len(), 1);
        assert_eq!(cache.clear(None).unwrap(), 1);
        assert!(cache.info().unwrap().entries.is_empty());
    }

    #[test]
    fn info_reports_keys_and_sizes() {
        let (_dir, cache) = cache();
        cache.set("ecb:rates", &"x").unwrap();
        let info = cache.info().unwrap();
        assert_eq!(info.entries.len(), 1);
        assert_eq!(info.entries[0].key.as_deref(), Some("ecb:rates"));
        assert_eq!(info.total_bytes, info.entries[0].size_bytes);
    }
}
