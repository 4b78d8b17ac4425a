//! File-backed cache for upstream API responses
//!
//! Each entry is a JSON envelope holding the cached payload as raw JSON, the
//! time it was fetched, and free-form metadata. Staleness is decided at read
//! time against a caller-supplied TTL, so one entry can be fresh for one
//! caller and stale for another. Writes go through a uniquely named temp file
//! and an atomic rename, so readers never observe a half-written entry.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use directories::ProjectDirs;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when reading or writing cache entries
#[derive(Error, Debug)]
pub enum CacheError {
    /// The cache file or directory could not be read, written, or replaced
    #[error("cache I/O failed: {0}")]
    Io(#[from] io::Error),
    /// An entry exists on disk but no longer decodes
    #[error("cache entry '{key}' is corrupt: {source}")]
    CorruptEntry {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    /// The payload handed to `write` could not be serialized
    #[error("failed to encode cache payload for '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A cache entry as persisted to disk.
///
/// The payload is kept as raw JSON so the cache never needs to know the
/// concrete shape of what each source stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// The cached payload, exactly as the source serialized it
    pub payload: serde_json::Value,
    /// When the payload was fetched from the upstream source
    pub fetched_at: DateTime<Utc>,
    /// Free-form annotations (source name, city, ...) kept for debugging
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

/// A raw entry returned by [`FileCache::read`]
#[derive(Debug, Clone)]
pub struct CachedEntry {
    /// The entry as stored
    pub entry: Entry,
    /// True when the entry is older than the TTL the caller asked for
    pub is_stale: bool,
}

/// A decoded entry returned by [`FileCache::read_typed`]
#[derive(Debug, Clone)]
pub struct CachedData<T> {
    /// The deserialized payload
    pub data: T,
    /// When the payload was fetched from the upstream source
    pub fetched_at: DateTime<Utc>,
    /// Entry annotations as written
    pub meta: HashMap<String, String>,
    /// True when the entry is older than the TTL the caller asked for
    pub is_stale: bool,
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Distinguishes temp files of concurrent writers within one process.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Manages cached API responses on the filesystem
#[derive(Clone)]
pub struct FileCache {
    /// Directory where cache files are stored
    cache_dir: PathBuf,
    /// Time source used to stamp writes and judge staleness
    clock: Clock,
}

impl fmt::Debug for FileCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileCache")
            .field("cache_dir", &self.cache_dir)
            .finish()
    }
}

impl FileCache {
    /// Creates a new cache using the platform-specific cache directory.
    ///
    /// Returns `None` if the cache directory cannot be determined.
    pub fn new() -> Option<Self> {
        let proj_dirs = ProjectDirs::from("", "", "famdash")?;
        Some(Self::with_dir(proj_dirs.cache_dir().to_path_buf()))
    }

    /// Creates a cache rooted at a specific directory.
    pub fn with_dir(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            clock: Arc::new(Utc::now),
        }
    }

    /// Overrides the time source (primarily for testing TTL behavior).
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Writes a payload under the given key, stamping it with the current time.
    ///
    /// The entry is serialized to a uniquely named temp file in the cache
    /// directory and atomically renamed into place, so concurrent writers to
    /// the same key cannot corrupt each other and one of them wins whole.
    ///
    /// # Arguments
    /// * `key` - Cache key; sanitized to a safe file name
    /// * `data` - Payload to serialize and store
    /// * `meta` - Annotations stored alongside the payload
    ///
    /// # Returns
    /// The entry as written, including the stamped fetch time.
    pub fn write<T: Serialize>(
        &self,
        key: &str,
        data: &T,
        meta: HashMap<String, String>,
    ) -> Result<Entry, CacheError> {
        fs::create_dir_all(&self.cache_dir)?;

        let entry = Entry {
            payload: serde_json::to_value(data).map_err(|source| CacheError::Encode {
                key: key.to_string(),
                source,
            })?,
            fetched_at: (self.clock)(),
            meta,
        };
        let json = serde_json::to_string_pretty(&entry).map_err(|source| CacheError::Encode {
            key: key.to_string(),
            source,
        })?;

        let path = self.entry_path(key);
        let tmp = self.temp_path(key);
        if let Err(err) = fs::write(&tmp, &json) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }
        if let Err(err) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }

        Ok(entry)
    }

    /// Reads the raw entry for a key, judging staleness against `ttl`.
    ///
    /// A TTL of zero (or less) means the entry never goes stale, which is how
    /// callers ask for any copy at all as a fallback. A missing key returns
    /// `Ok(None)`; a file that exists but cannot be decoded returns
    /// `CacheError::CorruptEntry` so callers can tell broken data from no
    /// data.
    pub fn read(&self, key: &str, ttl: Duration) -> Result<Option<CachedEntry>, CacheError> {
        let path = self.entry_path(key);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let entry: Entry =
            serde_json::from_str(&contents).map_err(|source| CacheError::CorruptEntry {
                key: key.to_string(),
                source,
            })?;
        let is_stale = self.is_stale(entry.fetched_at, ttl);

        Ok(Some(CachedEntry { entry, is_stale }))
    }

    /// Reads an entry and decodes its payload into `T`.
    ///
    /// A payload that no longer matches `T` is reported as
    /// `CacheError::CorruptEntry`; the raw envelope stays readable through
    /// [`FileCache::read`].
    pub fn read_typed<T: DeserializeOwned>(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<Option<CachedData<T>>, CacheError> {
        let Some(cached) = self.read(key, ttl)? else {
            return Ok(None);
        };
        let CachedEntry { entry, is_stale } = cached;

        let data =
            serde_json::from_value(entry.payload).map_err(|source| CacheError::CorruptEntry {
                key: key.to_string(),
                source,
            })?;

        Ok(Some(CachedData {
            data,
            fetched_at: entry.fetched_at,
            meta: entry.meta,
            is_stale,
        }))
    }

    /// Removes the entry for a key. Removing an absent key is not an error.
    pub fn delete(&self, key: &str) -> Result<(), CacheError> {
        match fs::remove_file(self.entry_path(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// An entry is stale once it is strictly older than the TTL.
    fn is_stale(&self, fetched_at: DateTime<Utc>, ttl: Duration) -> bool {
        if ttl <= Duration::zero() {
            return false;
        }
        (self.clock)() - fetched_at > ttl
    }

    /// Returns the file path for a cache key.
    fn entry_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", sanitize_key(key)))
    }

    /// Temp file names are unique per writer so concurrent writes to the same
    /// key never share a temp file.
    fn temp_path(&self, key: &str) -> PathBuf {
        let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.cache_dir.join(format!(
            ".{}.{}-{}.tmp",
            sanitize_key(key),
            process::id(),
            seq
        ))
    }
}

/// Maps a cache key to a safe file name.
///
/// Keeps ASCII alphanumerics, `-`, and `_`; every other character becomes
/// `_`. A key that is empty after trimming whitespace becomes `"cache"`. The
/// mapping is idempotent but not injective: keys differing only in replaced
/// characters share a file.
fn sanitize_key(key: &str) -> String {
    let cleaned: String = key
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        return "cache".to_string();
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Snapshot {
        temperature: f64,
        summary: String,
    }

    #[derive(Debug, Deserialize)]
    struct Incompatible {
        #[allow(dead_code)]
        name: String,
    }

    fn sample_snapshot() -> Snapshot {
        Snapshot {
            temperature: 21.5,
            summary: "clear".to_string(),
        }
    }

    /// Creates a cache in a temp directory, returning both so the directory
    /// is not dropped prematurely.
    fn create_test_cache() -> (FileCache, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let cache = FileCache::with_dir(temp_dir.path().to_path_buf());
        (cache, temp_dir)
    }

    fn fixed_time(secs_after_epoch_hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, secs_after_epoch_hour)
            .unwrap()
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let (cache, _dir) = create_test_cache();
        let snapshot = sample_snapshot();

        cache
            .write("weather:JP:tokyo", &snapshot, HashMap::new())
            .expect("write failed");

        let cached = cache
            .read_typed::<Snapshot>("weather:JP:tokyo", Duration::minutes(5))
            .expect("read failed")
            .expect("entry missing");

        assert_eq!(cached.data, snapshot);
        assert!(!cached.is_stale);
    }

    #[test]
    fn test_read_missing_key_returns_none() {
        let (cache, _dir) = create_test_cache();
        let cached = cache
            .read("nothing_here", Duration::minutes(5))
            .expect("read failed");
        assert!(cached.is_none());
    }

    #[test]
    fn test_write_stamps_fetched_at_from_clock() {
        let (cache, dir) = create_test_cache();
        let now = fixed_time(0);
        let cache = cache.with_clock(move || now);

        let entry = cache
            .write("stamped", &sample_snapshot(), HashMap::new())
            .expect("write failed");
        assert_eq!(entry.fetched_at, now);

        // A reader with its own clock sees the writer's stamp.
        let reader = FileCache::with_dir(dir.path().to_path_buf());
        let cached = reader
            .read("stamped", Duration::zero())
            .expect("read failed")
            .expect("entry missing");
        assert_eq!(cached.entry.fetched_at, now);
    }

    #[test]
    fn test_entry_exactly_at_ttl_is_still_fresh() {
        let (cache, dir) = create_test_cache();
        let written_at = fixed_time(0);
        cache
            .with_clock(move || written_at)
            .write("boundary", &sample_snapshot(), HashMap::new())
            .expect("write failed");

        // Age == TTL: fresh. Staleness requires strictly older.
        let at_ttl = FileCache::with_dir(dir.path().to_path_buf())
            .with_clock(move || written_at + Duration::seconds(60));
        let cached = at_ttl
            .read("boundary", Duration::seconds(60))
            .expect("read failed")
            .expect("entry missing");
        assert!(!cached.is_stale);

        // One second past the TTL: stale.
        let past_ttl = FileCache::with_dir(dir.path().to_path_buf())
            .with_clock(move || written_at + Duration::seconds(61));
        let cached = past_ttl
            .read("boundary", Duration::seconds(60))
            .expect("read failed")
            .expect("entry missing");
        assert!(cached.is_stale);
    }

    #[test]
    fn test_zero_ttl_never_goes_stale() {
        let (cache, dir) = create_test_cache();
        let written_at = fixed_time(0);
        cache
            .with_clock(move || written_at)
            .write("old_entry", &sample_snapshot(), HashMap::new())
            .expect("write failed");

        let much_later = FileCache::with_dir(dir.path().to_path_buf())
            .with_clock(move || written_at + Duration::days(365));
        let cached = much_later
            .read("old_entry", Duration::zero())
            .expect("read failed")
            .expect("entry missing");
        assert!(!cached.is_stale);
    }

    #[test]
    fn test_corrupt_entry_file_is_reported_not_dropped() {
        let (cache, dir) = create_test_cache();
        std::fs::write(dir.path().join("broken.json"), "{not valid json").unwrap();

        let result = cache.read("broken", Duration::minutes(5));
        assert!(matches!(result, Err(CacheError::CorruptEntry { .. })));

        // A corrupt entry is distinguishable from a missing one.
        let missing = cache.read("absent", Duration::minutes(5)).unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_payload_shape_mismatch_is_corrupt_but_envelope_survives() {
        let (cache, _dir) = create_test_cache();
        cache
            .write("shaped", &sample_snapshot(), HashMap::new())
            .expect("write failed");

        let result = cache.read_typed::<Incompatible>("shaped", Duration::minutes(5));
        assert!(matches!(result, Err(CacheError::CorruptEntry { .. })));

        // The raw envelope still reads fine.
        let raw = cache
            .read("shaped", Duration::minutes(5))
            .expect("read failed");
        assert!(raw.is_some());
    }

    #[test]
    fn test_overwrite_replaces_previous_entry() {
        let (cache, _dir) = create_test_cache();
        cache
            .write("city", &sample_snapshot(), HashMap::new())
            .expect("first write failed");

        let updated = Snapshot {
            temperature: -3.0,
            summary: "snow".to_string(),
        };
        cache
            .write("city", &updated, HashMap::new())
            .expect("second write failed");

        let cached = cache
            .read_typed::<Snapshot>("city", Duration::minutes(5))
            .expect("read failed")
            .expect("entry missing");
        assert_eq!(cached.data, updated);
    }

    #[test]
    fn test_meta_round_trips() {
        let (cache, _dir) = create_test_cache();
        let meta = HashMap::from([
            ("source".to_string(), "open-meteo".to_string()),
            ("city".to_string(), "tokyo".to_string()),
        ]);
        cache
            .write("annotated", &sample_snapshot(), meta.clone())
            .expect("write failed");

        let cached = cache
            .read("annotated", Duration::minutes(5))
            .expect("read failed")
            .expect("entry missing");
        assert_eq!(cached.entry.meta, meta);
    }

    #[test]
    fn test_delete_removes_entry() {
        let (cache, _dir) = create_test_cache();
        cache
            .write("gone_soon", &sample_snapshot(), HashMap::new())
            .expect("write failed");

        cache.delete("gone_soon").expect("delete failed");
        assert!(cache.read("gone_soon", Duration::zero()).unwrap().is_none());
    }

    #[test]
    fn test_delete_missing_key_is_ok() {
        let (cache, _dir) = create_test_cache();
        assert!(cache.delete("never_existed").is_ok());
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let (cache, dir) = create_test_cache();
        cache
            .write("tidy", &sample_snapshot(), HashMap::new())
            .expect("write failed");

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["tidy.json".to_string()]);
    }

    #[test]
    fn test_keys_with_special_characters_round_trip() {
        let (cache, dir) = create_test_cache();
        cache
            .write("weather:JP:tokyo/area", &sample_snapshot(), HashMap::new())
            .expect("write failed");

        // Same key reads back, and the file landed inside the cache dir.
        let cached = cache
            .read_typed::<Snapshot>("weather:JP:tokyo/area", Duration::minutes(5))
            .expect("read failed");
        assert!(cached.is_some());
        assert!(dir.path().join("weather_JP_tokyo_area.json").exists());
    }

    #[test]
    fn test_sanitize_key_replaces_unsafe_characters() {
        assert_eq!(sanitize_key("weather:JP:tokyo"), "weather_JP_tokyo");
        assert_eq!(sanitize_key("a/b\\c d"), "a_b_c_d");
        assert_eq!(sanitize_key("already-safe_123"), "already-safe_123");
    }

    #[test]
    fn test_sanitize_key_empty_falls_back_to_sentinel() {
        assert_eq!(sanitize_key(""), "cache");
        assert_eq!(sanitize_key("   "), "cache");
    }

    #[test]
    fn test_sanitize_key_is_idempotent() {
        let once = sanitize_key("weather:JP:東京");
        assert_eq!(sanitize_key(&once), once);
    }
}
