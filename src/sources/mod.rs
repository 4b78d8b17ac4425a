//! Data sources for the family dashboard
//!
//! This module contains the view models shared by every data source and the
//! source clients themselves: weather from Open-Meteo, and calendar events
//! and tasks aggregated from shared provider collections. All sources cache
//! their views on disk and keep serving stale data when an upstream fails.

pub mod calendar;
pub mod tasks;
pub mod weather;

pub use calendar::{CalendarError, CalendarService, EventSource, HttpEventSource, RemoteEvent};
pub use tasks::{HttpTaskSource, RemoteTask, TaskService, TaskSource, TasksError};
pub use weather::{WeatherClient, WeatherError};

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use chrono_tz::Asia::Tokyo;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Outcome of a cache-backed fetch.
///
/// When the upstream fails but a cached copy exists, sources still return a
/// view and attach the absorbed failure as `degraded`, so callers can report
/// the problem without losing the data.
#[derive(Debug)]
pub struct Served<T, E> {
    /// The view to present
    pub data: T,
    /// The upstream failure this view papered over, if any
    pub degraded: Option<E>,
}

impl<T, E> Served<T, E> {
    /// Wraps a view that came from the upstream or a fresh cache hit.
    pub fn fresh(data: T) -> Self {
        Self {
            data,
            degraded: None,
        }
    }

    /// Wraps a best-effort view that absorbed an upstream failure.
    pub fn degraded(data: T, error: E) -> Self {
        Self {
            data,
            degraded: Some(error),
        }
    }
}

/// Current time in the dashboard's home timezone.
///
/// Day boundaries (the calendar window, "today") are always decided in this
/// zone, regardless of where the process runs.
pub(crate) fn now_jst() -> DateTime<Tz> {
    Utc::now().with_timezone(&Tokyo)
}

/// Weather snapshot for one location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherView {
    /// Display name of the location
    pub location: String,
    /// Conditions right now
    pub current: CurrentConditions,
    /// Today's outlook
    pub today: TodayOutlook,
    /// Upcoming precipitation probability on three-hour boundaries
    pub precip_slots: Vec<PrecipSlot>,
    /// Daily forecast for the coming week
    pub weekly: Vec<DailyForecast>,
    /// Active weather alerts; empty when the provider offers none
    pub alerts: Vec<WeatherAlert>,
}

/// Weather conditions right now
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentConditions {
    /// Temperature in degrees Celsius
    pub temperature: f64,
    /// Current weather condition
    pub condition: WeatherCondition,
    /// Icon code for the condition
    pub icon: String,
    /// Relative humidity percentage (0-100)
    pub humidity: u8,
    /// Wind speed in m/s
    pub wind_speed: f64,
}

/// Today's temperature range and overall outlook
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodayOutlook {
    /// Forecast high in degrees Celsius
    pub max_temp: f64,
    /// Forecast low in degrees Celsius
    pub min_temp: f64,
    /// Summary condition; mirrors the current condition
    pub summary: WeatherCondition,
}

/// Precipitation probability for one upcoming three-hour slot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrecipSlot {
    /// Slot start as `HH:00` local time
    pub time: String,
    /// Probability of precipitation, rounded to the nearest ten percent
    pub precip: u8,
}

/// Forecast for a single upcoming day
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyForecast {
    pub date: NaiveDate,
    /// Forecast high in degrees Celsius
    pub max_temp: f64,
    /// Forecast low in degrees Celsius
    pub min_temp: f64,
    pub condition: WeatherCondition,
    /// Icon code for the condition
    pub icon: String,
}

/// A weather alert or advisory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherAlert {
    pub title: String,
    pub headline: String,
    pub description: String,
    pub severity: String,
}

/// Weather conditions derived from WMO weather codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WeatherCondition {
    Clear,
    Cloudy,
    Fog,
    LightRain,
    Rain,
    HeavyRain,
    Showers,
    Snow,
    Blizzard,
    Thunderstorm,
    Unknown,
}

/// Seven-day calendar window
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarView {
    /// One bucket per day, in ascending date order
    pub days: Vec<CalendarDay>,
}

/// Events for a single day of the window
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarDay {
    pub date: NaiveDate,
    /// All-day events, ordered by title
    pub all_day: Vec<Event>,
    /// Events with a start time, in chronological order
    pub timed: Vec<Event>,
}

/// One calendar event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub title: String,
    /// Event start; local midnight for all-day events
    pub start: DateTime<FixedOffset>,
    /// Event end; one hour after start when the source omits it
    pub end: DateTime<FixedOffset>,
    /// Display color as `#RRGGBB`
    pub color: String,
    /// Name of the collection the event came from
    pub calendar: String,
    #[serde(default)]
    pub description: String,
}

/// Merged, sorted task list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TasksView {
    /// Tasks in display order; see the tasks module for the ordering rules
    pub items: Vec<TaskItem>,
}

/// One task in the merged list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub notes: String,
    pub status: TaskStatus,
    /// Due date, if the task has one
    pub due_date: Option<NaiveDate>,
    /// Normalized priority where 3 is the most urgent and 1 the least
    pub priority: u8,
    pub created_at: DateTime<Utc>,
}

/// Completion state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskStatus {
    NeedsAction,
    Completed,
}
