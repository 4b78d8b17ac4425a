//! Cache key builders shared by the data sources
//!
//! Every key used in the crate is built here so sources cannot drift apart on
//! naming. The store maps keys to file names by replacing anything outside
//! `[A-Za-z0-9_-]` with `_`; keys that differ only in replaced characters
//! would collide, so builders stick to configured, trusted values.

/// Cache key for one location's weather snapshot.
pub fn weather(country: &str, city: &str) -> String {
    format!("weather:{}:{}", country, city)
}

/// Cache key for the merged calendar aggregate across all collections.
pub fn calendar_events() -> &'static str {
    "calendar_events_all"
}

/// Cache key for the merged task aggregate across all collections.
pub fn tasks_items() -> &'static str {
    "tasks_items_all"
}
