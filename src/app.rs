//! Application state and the view operations the CLI exposes
//!
//! [`App`] owns one service per data source plus the shared cache and error
//! store. Every view operation records the outcome with the store, so the
//! status report always reflects the most recent round of fetches.

use serde::Serialize;

use crate::cache::{keys, FileCache};
use crate::config::Config;
use crate::sources::{
    CalendarError, CalendarService, CalendarView, EventSource, HttpEventSource, HttpTaskSource,
    Served, TaskService, TaskSource, TasksError, TasksView, WeatherClient, WeatherError,
    WeatherView,
};
use crate::status::{build_report, ErrorStore, StatusReport};

/// Everything the dashboard can show in one response.
///
/// A source that failed outright is `null` rather than omitted; the status
/// section explains what went wrong.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardView {
    pub weather: Option<WeatherView>,
    pub calendar: Option<CalendarView>,
    pub tasks: Option<TasksView>,
    pub status: StatusReport,
}

/// Application state shared by all commands
pub struct App<E: EventSource, T: TaskSource> {
    weather: WeatherClient,
    calendar: CalendarService<E>,
    tasks: TaskService<T>,
    status: ErrorStore,
    cache: FileCache,
    city: String,
    country: String,
}

impl App<HttpEventSource, HttpTaskSource> {
    /// Wires up the HTTP-backed services from configuration.
    pub fn from_config(config: &Config, cache: FileCache) -> Self {
        let weather = WeatherClient::new(cache.clone(), config.refresh_interval("weather"));
        let events = HttpEventSource::new(
            config.provider.server_url.clone(),
            config.provider.username.clone(),
            config.provider.password.clone(),
        );
        let calendar = CalendarService::new(
            events,
            cache.clone(),
            config.refresh_interval("calendar"),
            config.provider.calendar_names.clone(),
        );
        let task_source = HttpTaskSource::new(
            config.provider.server_url.clone(),
            config.provider.username.clone(),
            config.provider.password.clone(),
        );
        let tasks = TaskService::new(
            task_source,
            cache.clone(),
            config.refresh_interval("tasks"),
            config.provider.task_list_names.clone(),
        );

        Self {
            weather,
            calendar,
            tasks,
            status: ErrorStore::new(),
            cache,
            city: config.location.city_name.clone(),
            country: config.location.country.clone(),
        }
    }
}

impl<E: EventSource, T: TaskSource> App<E, T> {
    /// Creates an App with custom services (for testing)
    #[cfg(test)]
    fn with_services(
        weather: WeatherClient,
        calendar: CalendarService<E>,
        tasks: TaskService<T>,
        status: ErrorStore,
        cache: FileCache,
        city: &str,
        country: &str,
    ) -> Self {
        Self {
            weather,
            calendar,
            tasks,
            status,
            cache,
            city: city.to_string(),
            country: country.to_string(),
        }
    }

    /// Fetches the weather view and records the outcome.
    pub async fn weather_view(&self) -> Result<Served<WeatherView, WeatherError>, WeatherError> {
        let result = self.weather.fetch(&self.city, &self.country).await;
        self.record("weather", &result);
        result
    }

    /// Fetches the calendar week view and records the outcome.
    pub async fn calendar_view(
        &self,
    ) -> Result<Served<CalendarView, CalendarError>, CalendarError> {
        let result = self.calendar.fetch().await;
        self.record("calendar", &result);
        result
    }

    /// Fetches the merged task list and records the outcome.
    pub async fn tasks_view(&self) -> Result<Served<TasksView, TasksError>, TasksError> {
        let result = self.tasks.fetch().await;
        self.record("tasks", &result);
        result
    }

    /// Builds the health report without touching any source.
    pub fn status_view(&self) -> StatusReport {
        build_report(
            &self.status,
            &self.cache,
            &keys::weather(&self.country, &self.city),
        )
    }

    /// Fetches every source concurrently and returns whatever succeeded.
    pub async fn dashboard_view(&self) -> DashboardView {
        let (weather, calendar, tasks) = futures::future::join3(
            self.weather_view(),
            self.calendar_view(),
            self.tasks_view(),
        )
        .await;

        DashboardView {
            weather: weather.ok().map(|served| served.data),
            calendar: calendar.ok().map(|served| served.data),
            tasks: tasks.ok().map(|served| served.data),
            status: self.status_view(),
        }
    }

    /// Updates the error store from a fetch outcome.
    ///
    /// Degraded results count as errors: the caller got data, but the source
    /// is not healthy.
    fn record<V, F: std::fmt::Display>(&self, source: &str, result: &Result<Served<V, F>, F>) {
        match result {
            Ok(served) => match &served.degraded {
                Some(err) => self.status.set(source, err.to_string()),
                None => self.status.clear(source),
            },
            Err(err) => self.status.set(source, err.to_string()),
        }
    }
}
