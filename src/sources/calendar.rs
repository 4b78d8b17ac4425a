//! Calendar source backed by a CalDAV bridge service
//!
//! Fetches the coming week's events from every configured calendar, merges
//! them into a day-bucketed view in Japan Standard Time, and caches the view
//! on disk. Individual calendars are allowed to fail; the view is degraded
//! rather than lost as long as at least one calendar responds.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use chrono_tz::Asia::Tokyo;
use serde::Deserialize;
use thiserror::Error;

use crate::cache::{keys, FileCache};
use crate::sources::{now_jst, CalendarDay, CalendarView, Event, Served};

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Color applied when neither the event nor its calendar specifies one.
const DEFAULT_EVENT_COLOR: &str = "#3788d8";

/// Errors that can occur when fetching calendar data
#[derive(Error, Debug)]
pub enum CalendarError {
    /// No calendars are configured
    #[error("no calendars configured")]
    NoCollections,
    /// Network request failed
    #[error("Calendar request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    /// The bridge returned a non-success status
    #[error("Calendar server returned HTTP {0}")]
    BadStatus(reqwest::StatusCode),
    /// Failed to parse the bridge response
    #[error("Failed to parse calendar data: {0}")]
    ParseError(#[from] serde_json::Error),
    /// Every configured calendar failed to load
    #[error("all {total} calendars failed to load")]
    AllCollectionsFailed { total: usize },
    /// Some calendars failed while others loaded
    #[error("{failed} of {total} calendars failed to load")]
    PartialFailure { failed: usize, total: usize },
}

/// A single event as returned by the bridge
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEvent {
    pub id: String,
    pub title: String,
    pub start: DateTime<chrono::FixedOffset>,
    #[serde(default)]
    pub end: Option<DateTime<chrono::FixedOffset>>,
    #[serde(default)]
    pub all_day: bool,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// One calendar's events plus its display color
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollectionEvents {
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub events: Vec<RemoteEvent>,
}

/// Source of events for a named calendar within a time window
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn fetch_events(
        &self,
        collection: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<CollectionEvents, CalendarError>;
}

/// Event source that talks to the CalDAV bridge over HTTP
pub struct HttpEventSource {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl HttpEventSource {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}

#[async_trait]
impl EventSource for HttpEventSource {
    async fn fetch_events(
        &self,
        collection: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<CollectionEvents, CalendarError> {
        let url = format!(
            "{}/calendars/{}/events",
            self.base_url.trim_end_matches('/'),
            collection
        );

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .query(&[
                ("start", window_start.to_rfc3339()),
                ("end", window_end.to_rfc3339()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(CalendarError::BadStatus(response.status()));
        }

        let body = response.text().await?;
        let events: CollectionEvents = serde_json::from_str(&body)?;
        Ok(events)
    }
}

/// Aggregates events from every configured calendar with disk-backed caching
pub struct CalendarService<S: EventSource> {
    source: S,
    cache: FileCache,
    ttl: Duration,
    collections: Vec<String>,
}

impl<S: EventSource> CalendarService<S> {
    /// Creates a new calendar service.
    ///
    /// # Arguments
    /// * `source` - Where events come from
    /// * `cache` - Cache used for the merged view and stale fallback
    /// * `ttl` - How long a cached view stays fresh
    /// * `collections` - Calendar names to aggregate
    pub fn new(source: S, cache: FileCache, ttl: Duration, collections: Vec<String>) -> Self {
        Self {
            source,
            cache,
            ttl,
            collections,
        }
    }

    /// Fetches the week view, serving from cache when fresh.
    ///
    /// Calendars are fetched concurrently. A subset of calendars failing
    /// degrades the view; all of them failing falls back to any cached copy
    /// and is only fatal when none exists.
    pub async fn fetch(&self) -> Result<Served<CalendarView, CalendarError>, CalendarError> {
        let key = keys::calendar_events();

        if let Ok(Some(cached)) = self.cache.read_typed::<CalendarView>(key, self.ttl) {
            if !cached.is_stale {
                return Ok(Served::fresh(cached.data));
            }
        }

        if self.collections.is_empty() {
            return Err(CalendarError::NoCollections);
        }

        let today = now_jst().date_naive();
        let window_start = jst_midnight(today);
        let window_end = jst_midnight(today + Duration::days(7));

        let fetches = self.collections.iter().map(|name| {
            let source = &self.source;
            async move {
                let result = source.fetch_events(name, window_start, window_end).await;
                (name.as_str(), result)
            }
        });
        let results = futures::future::join_all(fetches).await;

        let total = self.collections.len();
        let mut failed = 0;
        let mut events = Vec::new();
        for (name, result) in results {
            match result {
                Ok(collection) => {
                    let collection_color = collection.color;
                    for event in collection.events {
                        events.push(normalize_event(event, name, collection_color.as_deref()));
                    }
                }
                Err(_) => failed += 1,
            }
        }

        if events.is_empty() && failed > 0 {
            let err = CalendarError::AllCollectionsFailed { total };
            if let Ok(Some(cached)) = self.cache.read_typed::<CalendarView>(key, Duration::zero())
            {
                return Ok(Served::degraded(cached.data, err));
            }
            return Err(err);
        }

        let view = build_week_view(events, today);
        let meta = HashMap::from([("source".to_string(), "calendar_all".to_string())]);
        let _ = self.cache.write(key, &view, meta);

        if failed > 0 {
            Ok(Served::degraded(
                view,
                CalendarError::PartialFailure { failed, total },
            ))
        } else {
            Ok(Served::fresh(view))
        }
    }
}

/// Midnight on the given date in Japan Standard Time, as a UTC instant.
fn jst_midnight(date: NaiveDate) -> DateTime<Utc> {
    // JST is UTC+9 with no daylight saving, so midnight is fixed arithmetic.
    DateTime::from_naive_utc_and_offset(date.and_time(NaiveTime::MIN) - Duration::hours(9), Utc)
}

/// An event tagged with the Japan-local date it belongs to
struct BucketedEvent {
    date: NaiveDate,
    all_day: bool,
    event: Event,
}

/// Converts a remote event into the view shape and assigns its day bucket.
fn normalize_event(
    event: RemoteEvent,
    calendar: &str,
    collection_color: Option<&str>,
) -> BucketedEvent {
    let color = event
        .color
        .as_deref()
        .and_then(normalize_hex_color)
        .or_else(|| collection_color.and_then(normalize_hex_color))
        .unwrap_or_else(|| DEFAULT_EVENT_COLOR.to_string());
    let end = event.end.unwrap_or(event.start + Duration::hours(1));
    let date = event.start.with_timezone(&Tokyo).date_naive();

    BucketedEvent {
        date,
        all_day: event.all_day,
        event: Event {
            id: event.id,
            title: event.title,
            start: event.start,
            end,
            color,
            calendar: calendar.to_string(),
            description: event.description.unwrap_or_default(),
        },
    }
}

/// Validates a hex color and normalizes it to uppercase `#RRGGBB` form.
///
/// Accepts 3-digit shorthand, 6-digit, and 8-digit (alpha dropped) values
/// with or without a leading `#`. Anything else yields `None`.
fn normalize_hex_color(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_start_matches('#');
    if !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    let rgb = match trimmed.len() {
        3 => trimmed.chars().flat_map(|c| [c, c]).collect::<String>(),
        6 => trimmed.to_string(),
        8 => trimmed[..6].to_string(),
        _ => return None,
    };
    Some(format!("#{}", rgb.to_uppercase()))
}

/// Builds the seven-day view starting at `today`.
///
/// Every day is present even when empty. All-day events are ordered by
/// title, timed events by start time. Events bucketed outside the week are
/// dropped.
fn build_week_view(events: Vec<BucketedEvent>, today: NaiveDate) -> CalendarView {
    let mut days: Vec<CalendarDay> = (0..7)
        .map(|offset| CalendarDay {
            date: today + Duration::days(offset),
            all_day: Vec::new(),
            timed: Vec::new(),
        })
        .collect();

    for bucketed in events {
        let offset = (bucketed.date - today).num_days();
        if !(0..7).contains(&offset) {
            continue;
        }
        let day = &mut days[offset as usize];
        if bucketed.all_day {
            day.all_day.push(bucketed.event);
        } else {
            day.timed.push(bucketed.event);
        }
    }

    for day in &mut days {
        day.all_day.sort_by(|a, b| a.title.cmp(&b.title));
        day.timed.sort_by_key(|event| event.start);
    }

    CalendarView { days }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};
    use tempfile::TempDir;

    fn create_test_cache() -> (FileCache, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let cache = FileCache::with_dir(temp_dir.path().to_path_buf());
        (cache, temp_dir)
    }

    struct FakeSource {
        collections: HashMap<String, CollectionEvents>,
    }

    #[async_trait]
    impl EventSource for FakeSource {
        async fn fetch_events(
            &self,
            collection: &str,
            _window_start: DateTime<Utc>,
            _window_end: DateTime<Utc>,
        ) -> Result<CollectionEvents, CalendarError> {
            self.collections
                .get(collection)
                .cloned()
                .ok_or(CalendarError::BadStatus(
                    reqwest::StatusCode::SERVICE_UNAVAILABLE,
                ))
        }
    }

    fn remote_event(id: &str, title: &str, start: DateTime<Utc>) -> RemoteEvent {
        RemoteEvent {
            id: id.to_string(),
            title: title.to_string(),
            start: start.into(),
            end: None,
            all_day: false,
            color: None,
            description: None,
        }
    }

    fn service(
        collections: HashMap<String, CollectionEvents>,
        cache: FileCache,
        names: &[&str],
    ) -> CalendarService<FakeSource> {
        CalendarService::new(
            FakeSource { collections },
            cache,
            Duration::minutes(5),
            names.iter().map(|n| n.to_string()).collect(),
        )
    }

    fn event_count(view: &CalendarView) -> usize {
        view.days
            .iter()
            .map(|day| day.all_day.len() + day.timed.len())
            .sum()
    }

    #[tokio::test]
    async fn test_merges_events_from_all_calendars() {
        let (cache, _dir) = create_test_cache();
        let soon = Utc::now() + Duration::hours(1);
        let collections = HashMap::from([
            (
                "family".to_string(),
                CollectionEvents {
                    color: None,
                    events: vec![remote_event("1", "Dentist", soon)],
                },
            ),
            (
                "school".to_string(),
                CollectionEvents {
                    color: None,
                    events: vec![
                        remote_event("2", "Sports day", soon),
                        remote_event("3", "PTA meeting", soon),
                    ],
                },
            ),
        ]);

        let served = service(collections, cache, &["family", "school"])
            .fetch()
            .await
            .expect("fetch failed");

        assert!(served.degraded.is_none());
        assert_eq!(event_count(&served.data), 3);
        let all: Vec<&Event> = served
            .data
            .days
            .iter()
            .flat_map(|d| d.timed.iter())
            .collect();
        assert!(all.iter().any(|e| e.calendar == "family"));
        assert!(all.iter().any(|e| e.calendar == "school"));
    }

    #[tokio::test]
    async fn test_partial_failure_degrades_the_view() {
        let (cache, _dir) = create_test_cache();
        let soon = Utc::now() + Duration::hours(1);
        let collections = HashMap::from([(
            "family".to_string(),
            CollectionEvents {
                color: None,
                events: vec![remote_event("1", "Dentist", soon)],
            },
        )]);

        let served = service(collections, cache, &["family", "school"])
            .fetch()
            .await
            .expect("fetch failed");

        assert_eq!(event_count(&served.data), 1);
        assert!(matches!(
            served.degraded,
            Some(CalendarError::PartialFailure {
                failed: 1,
                total: 2
            })
        ));
    }

    #[tokio::test]
    async fn test_all_failures_fall_back_to_stale_cache() {
        let (cache, dir) = create_test_cache();
        let written_at = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let stale_view = build_week_view(vec![], written_at.date_naive());
        cache
            .clone()
            .with_clock(move || written_at)
            .write(keys::calendar_events(), &stale_view, HashMap::new())
            .unwrap();

        let served = service(
            HashMap::new(),
            FileCache::with_dir(dir.path().to_path_buf()),
            &["family", "school"],
        )
        .fetch()
        .await
        .expect("fetch failed");

        assert_eq!(served.data.days.len(), 7);
        assert!(matches!(
            served.degraded,
            Some(CalendarError::AllCollectionsFailed { total: 2 })
        ));
    }

    #[tokio::test]
    async fn test_all_failures_without_cache_are_fatal() {
        let (cache, _dir) = create_test_cache();

        let result = service(HashMap::new(), cache, &["family"]).fetch().await;
        assert!(matches!(
            result,
            Err(CalendarError::AllCollectionsFailed { total: 1 })
        ));
    }

    #[tokio::test]
    async fn test_no_calendars_configured_is_fatal() {
        let (cache, _dir) = create_test_cache();

        let result = service(HashMap::new(), cache, &[]).fetch().await;
        assert!(matches!(result, Err(CalendarError::NoCollections)));
    }

    #[tokio::test]
    async fn test_fresh_cache_short_circuits_the_sources() {
        let (cache, _dir) = create_test_cache();
        let view = build_week_view(vec![], now_jst().date_naive());
        cache
            .write(keys::calendar_events(), &view, HashMap::new())
            .unwrap();

        // Every source fetch would fail; a fresh cache entry means none runs.
        let served = service(HashMap::new(), cache, &["family"])
            .fetch()
            .await
            .expect("fetch failed");

        assert!(served.degraded.is_none());
        assert_eq!(served.data.days.len(), 7);
    }

    #[test]
    fn test_week_view_has_seven_ascending_days() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        let view = build_week_view(vec![], today);

        assert_eq!(view.days.len(), 7);
        assert_eq!(view.days[0].date, today);
        assert_eq!(
            view.days[6].date,
            NaiveDate::from_ymd_opt(2026, 3, 15).unwrap()
        );
        for pair in view.days.windows(2) {
            assert!(pair[0].date < pair[1].date);
        }
    }

    #[test]
    fn test_all_day_events_sort_by_title() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        let start = Utc.with_ymd_and_hms(2026, 3, 9, 1, 0, 0).unwrap();
        let mut zebra = remote_event("1", "Zoo trip", start);
        zebra.all_day = true;
        let mut apple = remote_event("2", "Art class", start);
        apple.all_day = true;

        let view = build_week_view(
            vec![
                normalize_event(zebra, "family", None),
                normalize_event(apple, "family", None),
            ],
            today,
        );

        let titles: Vec<&str> = view.days[0].all_day.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["Art class", "Zoo trip"]);
    }

    #[test]
    fn test_timed_events_sort_by_start() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        let later = remote_event("1", "Dinner", Utc.with_ymd_and_hms(2026, 3, 9, 9, 0, 0).unwrap());
        let earlier =
            remote_event("2", "Breakfast", Utc.with_ymd_and_hms(2026, 3, 9, 0, 0, 0).unwrap());

        let view = build_week_view(
            vec![
                normalize_event(later, "family", None),
                normalize_event(earlier, "family", None),
            ],
            today,
        );

        let titles: Vec<&str> = view.days[0].timed.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["Breakfast", "Dinner"]);
    }

    #[test]
    fn test_event_date_uses_japan_time() {
        // 16:00 UTC on March 10th is 01:00 on March 11th in Japan.
        let event = remote_event(
            "1",
            "Late call",
            Utc.with_ymd_and_hms(2026, 3, 10, 16, 0, 0).unwrap(),
        );

        let bucketed = normalize_event(event, "family", None);
        assert_eq!(bucketed.date, NaiveDate::from_ymd_opt(2026, 3, 11).unwrap());
    }

    #[test]
    fn test_events_outside_the_week_are_dropped() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        let before = remote_event(
            "1",
            "Old",
            Utc.with_ymd_and_hms(2026, 3, 1, 1, 0, 0).unwrap(),
        );
        let after = remote_event(
            "2",
            "Far",
            Utc.with_ymd_and_hms(2026, 3, 20, 1, 0, 0).unwrap(),
        );

        let view = build_week_view(
            vec![
                normalize_event(before, "family", None),
                normalize_event(after, "family", None),
            ],
            today,
        );

        assert_eq!(event_count(&view), 0);
    }

    #[test]
    fn test_missing_end_defaults_to_one_hour() {
        let start = Utc.with_ymd_and_hms(2026, 3, 9, 1, 0, 0).unwrap();
        let bucketed = normalize_event(remote_event("1", "Lunch", start), "family", None);

        assert_eq!(bucketed.event.end - bucketed.event.start, Duration::hours(1));
    }

    #[test]
    fn test_explicit_end_is_kept() {
        let start = Utc.with_ymd_and_hms(2026, 3, 9, 1, 0, 0).unwrap();
        let mut event = remote_event("1", "Workshop", start);
        event.end = Some((start + Duration::hours(3)).into());

        let bucketed = normalize_event(event, "family", None);
        assert_eq!(bucketed.event.end - bucketed.event.start, Duration::hours(3));
    }

    #[test]
    fn test_normalize_hex_color_formats() {
        assert_eq!(normalize_hex_color("#3788d8"), Some("#3788D8".to_string()));
        assert_eq!(normalize_hex_color("abc"), Some("#AABBCC".to_string()));
        assert_eq!(
            normalize_hex_color("#11223344"),
            Some("#112233".to_string())
        );
        assert_eq!(normalize_hex_color(" #fff "), Some("#FFFFFF".to_string()));
        assert_eq!(normalize_hex_color("red"), None);
        assert_eq!(normalize_hex_color(""), None);
        assert_eq!(normalize_hex_color("#12345"), None);
    }

    #[test]
    fn test_color_precedence() {
        let start = Utc.with_ymd_and_hms(2026, 3, 9, 1, 0, 0).unwrap();
        let mut own_color = remote_event("1", "A", start);
        own_color.color = Some("abc".to_string());
        let plain = remote_event("2", "B", start);

        let from_event = normalize_event(own_color, "family", Some("#ff0000"));
        let from_collection = normalize_event(plain.clone(), "family", Some("#ff0000"));
        let fallback = normalize_event(plain, "family", None);

        assert_eq!(from_event.event.color, "#AABBCC");
        assert_eq!(from_collection.event.color, "#FF0000");
        assert_eq!(fallback.event.color, DEFAULT_EVENT_COLOR);
    }

    #[test]
    fn test_invalid_collection_color_falls_through_to_default() {
        let start = Utc.with_ymd_and_hms(2026, 3, 9, 1, 0, 0).unwrap();
        let bucketed = normalize_event(
            remote_event("1", "A", start),
            "family",
            Some("not-a-color"),
        );

        assert_eq!(bucketed.event.color, DEFAULT_EVENT_COLOR);
    }

    #[test]
    fn test_remote_event_deserializes_bridge_fields() {
        let raw = r##"{
            "id": "evt-1",
            "title": "Field trip",
            "start": "2026-03-10T09:00:00+09:00",
            "allDay": true,
            "color": "#ABCDEF"
        }"##;

        let event: RemoteEvent = serde_json::from_str(raw).unwrap();
        assert!(event.all_day);
        assert!(event.end.is_none());
        assert_eq!(event.color.as_deref(), Some("#ABCDEF"));
        assert!(event.description.is_none());

        let offset = FixedOffset::east_opt(9 * 3600).unwrap();
        assert_eq!(event.start.offset(), &offset);
    }

    #[test]
    fn test_window_starts_at_japan_midnight() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        let start = jst_midnight(date);

        // Midnight JST on March 9th is 15:00 UTC on March 8th.
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 8, 15, 0, 0).unwrap());
    }
}
