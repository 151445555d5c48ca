use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Most forecast days the workflow ever asks for.
pub const MAX_FORECAST_DAYS: u8 = 7;

/// Partial city name typed by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationQuery {
    pub text: String,
}

impl LocationQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForecastRequest {
    pub city: String,
    pub days: u8,
}

impl ForecastRequest {
    /// `days` is clamped into `1..=MAX_FORECAST_DAYS`.
    pub fn new(city: impl Into<String>, days: u8) -> Self {
        Self { city: city.into(), days: days.clamp(1, MAX_FORECAST_DAYS) }
    }
}

/// One row of a location lookup. Only `name` and `country` mean anything to
/// the workflow; the remaining fields are carried through for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateLocation {
    pub id: Option<u64>,
    pub name: String,
    pub region: String,
    pub country: String,
    pub lat: f64,
    pub lon: f64,
    pub url: Option<String>,
}

impl CandidateLocation {
    pub fn label(&self) -> String {
        format!("{}, {}", self.name, self.country)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub text: String,
    pub icon: String,
}

impl Condition {
    /// The API hands out protocol-relative icon paths (`//cdn.weatherapi.com/...`).
    pub fn icon_url(&self) -> String {
        if self.icon.starts_with("//") {
            format!("https:{}", self.icon)
        } else {
            self.icon.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotLocation {
    pub name: String,
    pub region: String,
    pub country: String,
    pub localtime: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentConditions {
    pub temp_c: f64,
    pub feels_like_c: f64,
    pub condition: Condition,
    pub wind_kph: f64,
    pub humidity: u8,
    pub is_day: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaySummary {
    pub avg_temp_c: f64,
    pub max_temp_c: f64,
    pub min_temp_c: f64,
    pub condition: Condition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Astro {
    pub sunrise: String,
    pub sunset: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastDay {
    pub date: NaiveDate,
    pub day: DaySummary,
    pub astro: Astro,
}

impl ForecastDay {
    /// Full English weekday, e.g. "Monday".
    pub fn weekday_name(&self) -> String {
        self.date.format("%A").to_string()
    }
}

/// Complete weather payload for one city.
///
/// Providers only ever build this from a response that carried both current
/// conditions and at least one forecast day, so holders never deal with a
/// half-filled value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    pub location: SnapshotLocation,
    pub current: CurrentConditions,
    pub forecast: Vec<ForecastDay>,
}

impl WeatherSnapshot {
    pub fn location_label(&self) -> String {
        format!("{}, {}", self.location.name, self.location.country)
    }

    /// Sunrise of the first forecast day, which is today in the city's timezone.
    pub fn todays_sunrise(&self) -> Option<&str> {
        self.forecast.first().map(|d| d.astro.sunrise.as_str())
    }
}
