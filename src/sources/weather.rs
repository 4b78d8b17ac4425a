//! Weather source backed by the Open-Meteo forecast API
//!
//! Fetches current conditions plus hourly and daily forecasts for a fixed set
//! of cities, converts them into the dashboard's view, and caches the view on
//! disk. When the API is unreachable the most recent cached copy is served,
//! however old, with the failure attached.

use std::collections::HashMap;

use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};
use serde::Deserialize;
use thiserror::Error;

use crate::cache::{keys, FileCache};
use crate::sources::{
    now_jst, CurrentConditions, DailyForecast, PrecipSlot, Served, TodayOutlook, WeatherCondition,
    WeatherView,
};

const OPEN_METEO_URL: &str = "https://api.open-meteo.com/v1/forecast";
const USER_AGENT: &str = concat!("famdash/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Errors that can occur when fetching weather data
#[derive(Error, Debug)]
pub enum WeatherError {
    /// Network request failed
    #[error("Weather API request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    /// API returned a non-success status
    #[error("Weather API returned HTTP {0}")]
    BadStatus(reqwest::StatusCode),
    /// Failed to parse the API response
    #[error("Failed to parse weather data: {0}")]
    ParseError(#[from] serde_json::Error),
    /// The response was missing a required field
    #[error("Missing required field: {0}")]
    MissingField(String),
    /// The configured city has no known coordinates
    #[error("Unknown city: {0}")]
    UnknownCity(String),
}

/// Coordinates for the cities the bundled provider knows about.
///
/// Open-Meteo is queried by latitude and longitude, so only locations listed
/// here can be fetched. City names are matched exactly, in lowercase.
pub fn city_coordinates(city: &str) -> Option<(f64, f64)> {
    let coords = match city {
        "himeji" => (34.815353, 134.685479),
        "tokyo" => (35.6762, 139.6503),
        "osaka" => (34.6937, 135.5023),
        "kyoto" => (35.0116, 135.7681),
        "kobe" => (34.6901, 135.1955),
        "nagoya" => (35.1815, 136.9066),
        "fukuoka" => (33.5904, 130.4017),
        "sapporo" => (43.0642, 141.3469),
        _ => return None,
    };
    Some(coords)
}

/// Client for the Open-Meteo forecast API with disk-backed caching
pub struct WeatherClient {
    client: reqwest::Client,
    base_url: String,
    cache: FileCache,
    ttl: Duration,
}

impl WeatherClient {
    /// Creates a new weather client.
    ///
    /// # Arguments
    /// * `cache` - Cache used for snapshots and stale fallback
    /// * `ttl` - How long a cached snapshot stays fresh
    pub fn new(cache: FileCache, ttl: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            base_url: OPEN_METEO_URL.to_string(),
            cache,
            ttl,
        }
    }

    /// Overrides the API base URL (primarily for testing).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Fetches the weather snapshot for a city, serving from cache when fresh.
    ///
    /// On upstream failure any cached copy, fresh or stale, is returned with
    /// the failure attached; the failure is only fatal when no cached copy
    /// exists. An unknown city is always fatal since no fetch could ever have
    /// populated the cache for it.
    pub async fn fetch(
        &self,
        city: &str,
        country: &str,
    ) -> Result<Served<WeatherView, WeatherError>, WeatherError> {
        let (latitude, longitude) =
            city_coordinates(city).ok_or_else(|| WeatherError::UnknownCity(city.to_string()))?;
        let key = keys::weather(country, city);

        if let Ok(Some(cached)) = self.cache.read_typed::<WeatherView>(&key, self.ttl) {
            if !cached.is_stale {
                return Ok(Served::fresh(cached.data));
            }
        }

        match self.fetch_snapshot(latitude, longitude, city).await {
            Ok(view) => {
                let meta = HashMap::from([
                    ("city".to_string(), city.to_string()),
                    ("country".to_string(), country.to_string()),
                    ("source".to_string(), "open-meteo".to_string()),
                ]);
                let _ = self.cache.write(&key, &view, meta);
                Ok(Served::fresh(view))
            }
            Err(err) => {
                if let Ok(Some(cached)) = self.cache.read_typed::<WeatherView>(&key, Duration::zero())
                {
                    return Ok(Served::degraded(cached.data, err));
                }
                Err(err)
            }
        }
    }

    /// Fetches and converts a fresh snapshot from the API.
    async fn fetch_snapshot(
        &self,
        latitude: f64,
        longitude: f64,
        city: &str,
    ) -> Result<WeatherView, WeatherError> {
        let url = format!(
            "{}?latitude={:.2}&longitude={:.2}&current=temperature_2m,relative_humidity_2m,weather_code,wind_speed_10m&daily=weather_code,temperature_2m_max,temperature_2m_min,precipitation_probability_max&hourly=precipitation_probability&timezone=Asia/Tokyo&forecast_days=7",
            self.base_url, latitude, longitude
        );

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(WeatherError::BadStatus(response.status()));
        }
        let body = response.text().await?;
        let parsed: OpenMeteoResponse = serde_json::from_str(&body)?;

        to_weather_view(parsed, city, now_jst().naive_local())
    }
}

/// Converts an API response into the dashboard view.
///
/// `now_local` is the current local time in the forecast's timezone; hourly
/// slots at or before it are dropped.
fn to_weather_view(
    response: OpenMeteoResponse,
    city: &str,
    now_local: NaiveDateTime,
) -> Result<WeatherView, WeatherError> {
    let current_condition = weather_code_to_condition(response.current.weather_code);
    let current = CurrentConditions {
        temperature: response.current.temperature_2m,
        condition: current_condition,
        icon: weather_code_to_icon(response.current.weather_code).to_string(),
        humidity: response.current.relative_humidity_2m,
        wind_speed: response.current.wind_speed_10m,
    };

    let max_temp = response
        .daily
        .temperature_2m_max
        .first()
        .copied()
        .ok_or_else(|| WeatherError::MissingField("daily.temperature_2m_max".to_string()))?;
    let min_temp = response
        .daily
        .temperature_2m_min
        .first()
        .copied()
        .ok_or_else(|| WeatherError::MissingField("daily.temperature_2m_min".to_string()))?;
    let today = TodayOutlook {
        max_temp,
        min_temp,
        summary: current_condition,
    };

    let precip_slots = precip_slots(
        &response.hourly.time,
        &response.hourly.precipitation_probability,
        now_local,
    );

    let mut weekly = Vec::new();
    for i in 0..response.daily.time.len().min(7) {
        let (Some(code), Some(max), Some(min)) = (
            response.daily.weather_code.get(i).copied(),
            response.daily.temperature_2m_max.get(i).copied(),
            response.daily.temperature_2m_min.get(i).copied(),
        ) else {
            break;
        };
        let Ok(date) = NaiveDate::parse_from_str(&response.daily.time[i], "%Y-%m-%d") else {
            continue;
        };
        weekly.push(DailyForecast {
            date,
            max_temp: max,
            min_temp: min,
            condition: weather_code_to_condition(code),
            icon: weather_code_to_icon(code).to_string(),
        });
    }

    Ok(WeatherView {
        location: city.to_string(),
        current,
        today,
        precip_slots,
        weekly,
        alerts: Vec::new(),
    })
}

/// Picks upcoming slots on three-hour boundaries from the hourly forecast.
///
/// Probabilities are rounded to the nearest ten percent and at most eight
/// slots (one day's worth) are returned.
fn precip_slots(
    times: &[String],
    probabilities: &[u8],
    now_local: NaiveDateTime,
) -> Vec<PrecipSlot> {
    let mut slots = Vec::new();
    for (time, probability) in times.iter().zip(probabilities) {
        if slots.len() >= 8 {
            break;
        }
        let Ok(parsed) = NaiveDateTime::parse_from_str(time, "%Y-%m-%dT%H:%M") else {
            continue;
        };
        if parsed <= now_local || parsed.hour() % 3 != 0 {
            continue;
        }
        let rounded = ((f64::from(*probability) / 10.0).round() * 10.0) as u8;
        slots.push(PrecipSlot {
            time: format!("{:02}:00", parsed.hour()),
            precip: rounded,
        });
    }
    slots
}

/// Maps a WMO weather code to a broad condition bucket.
pub fn weather_code_to_condition(code: u8) -> WeatherCondition {
    match code {
        0 => WeatherCondition::Clear,
        1..=3 => WeatherCondition::Cloudy,
        45 | 48 => WeatherCondition::Fog,
        51 | 53 | 55 => WeatherCondition::LightRain,
        61 | 63 | 65 => WeatherCondition::Rain,
        71 | 73 | 75 => WeatherCondition::Snow,
        77 => WeatherCondition::Blizzard,
        80..=82 => WeatherCondition::HeavyRain,
        85 | 86 => WeatherCondition::Showers,
        95 | 96 | 99 => WeatherCondition::Thunderstorm,
        _ => WeatherCondition::Unknown,
    }
}

/// Maps a WMO weather code to its icon code.
///
/// Finer-grained than the condition buckets: codes 1 (mainly clear) and 2-3
/// (overcast) share a condition but get different icons.
pub fn weather_code_to_icon(code: u8) -> &'static str {
    match code {
        0 => "01d",
        1 => "02d",
        2 | 3 => "03d",
        45 | 48 => "50d",
        51 | 53 | 55 => "09d",
        61 | 63 | 65 => "10d",
        71 | 73 | 75 => "13d",
        77 => "14d",
        80..=82 => "11d",
        85 | 86 => "12d",
        95 | 96 | 99 => "15d",
        _ => "04u",
    }
}

/// Open-Meteo API response structure (only the fields we use)
#[derive(Debug, Deserialize)]
struct OpenMeteoResponse {
    current: CurrentBlock,
    daily: DailyBlock,
    hourly: HourlyBlock,
}

#[derive(Debug, Deserialize)]
struct CurrentBlock {
    temperature_2m: f64,
    relative_humidity_2m: u8,
    weather_code: u8,
    wind_speed_10m: f64,
}

#[derive(Debug, Deserialize)]
struct DailyBlock {
    time: Vec<String>,
    weather_code: Vec<u8>,
    temperature_2m_max: Vec<f64>,
    temperature_2m_min: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct HourlyBlock {
    time: Vec<String>,
    precipitation_probability: Vec<u8>,
}
