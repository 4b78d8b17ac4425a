//! Cache module for storing API responses to disk
//!
//! Provides a file-backed cache with per-read TTLs and atomic writes. Reads
//! degrade gracefully: expired entries come back with an `is_stale` flag and
//! corrupt entries are reported rather than silently dropped, so the
//! application can keep serving cached data when upstream APIs fail.

pub mod keys;
mod store;

pub use store::{CacheError, CachedData, CachedEntry, Entry, FileCache};
