use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::model::{
    Astro, CandidateLocation, Condition, CurrentConditions, DaySummary, ForecastDay,
    ForecastRequest, LocationQuery, SnapshotLocation, WeatherSnapshot,
};

use super::WeatherProvider;

pub const DEFAULT_BASE_URL: &str = "https://api.weatherapi.com/v1";

#[derive(Debug, Clone)]
pub struct WeatherApiProvider {
    api_key: String,
    base_url: String,
    http: Client,
}

impl WeatherApiProvider {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL, timeout)
    }

    /// Point the provider at another host, e.g. a mock server.
    pub fn with_base_url(api_key: String, base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client for WeatherAPI.com")?;

        Ok(Self { api_key, base_url: base_url.trim_end_matches('/').to_string(), http })
    }

    async fn get_json(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<String> {
        let url = format!("{}/{endpoint}", self.base_url);

        let res = self
            .http
            .get(&url)
            .query(&[("key", self.api_key.as_str())])
            .query(params)
            .send()
            .await
            .with_context(|| format!("Failed to send request to WeatherAPI.com ({endpoint})"))?;

        let status = res.status();
        let body = res
            .text()
            .await
            .with_context(|| format!("Failed to read WeatherAPI {endpoint} response body"))?;

        if !status.is_success() {
            return Err(anyhow!(
                "WeatherAPI {endpoint} request failed with status {}: {}",
                status,
                truncate_body(&body),
            ));
        }

        Ok(body)
    }
}

#[derive(Debug, Deserialize)]
struct WaSearchEntry {
    id: Option<u64>,
    name: String,
    #[serde(default)]
    region: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    lat: f64,
    #[serde(default)]
    lon: f64,
    url: Option<String>,
}

impl From<WaSearchEntry> for CandidateLocation {
    fn from(e: WaSearchEntry) -> Self {
        Self {
            id: e.id,
            name: e.name,
            region: e.region,
            country: e.country,
            lat: e.lat,
            lon: e.lon,
            url: e.url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WaLocation {
    name: String,
    #[serde(default)]
    region: String,
    country: String,
    localtime: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WaCondition {
    text: String,
    #[serde(default)]
    icon: String,
}

impl From<WaCondition> for Condition {
    fn from(c: WaCondition) -> Self {
        Self { text: c.text, icon: c.icon }
    }
}

#[derive(Debug, Deserialize)]
struct WaCurrent {
    temp_c: f64,
    feelslike_c: f64,
    humidity: u8,
    wind_kph: f64,
    #[serde(default)]
    is_day: u8,
    condition: WaCondition,
}

#[derive(Debug, Deserialize)]
struct WaDay {
    avgtemp_c: f64,
    maxtemp_c: f64,
    mintemp_c: f64,
    condition: WaCondition,
}

#[derive(Debug, Deserialize)]
struct WaAstro {
    sunrise: String,
    sunset: String,
}

#[derive(Debug, Deserialize)]
struct WaForecastDay {
    date: String,
    day: WaDay,
    astro: WaAstro,
}

#[derive(Debug, Deserialize)]
struct WaForecast {
    forecastday: Vec<WaForecastDay>,
}

#[derive(Debug, Deserialize)]
struct WaForecastResponse {
    location: WaLocation,
    current: WaCurrent,
    forecast: WaForecast,
}

impl TryFrom<WaForecastDay> for ForecastDay {
    type Error = anyhow::Error;

    fn try_from(d: WaForecastDay) -> Result<Self> {
        let date = NaiveDate::parse_from_str(&d.date, "%Y-%m-%d")
            .with_context(|| format!("Invalid forecast date '{}'", d.date))?;

        Ok(Self {
            date,
            day: DaySummary {
                avg_temp_c: d.day.avgtemp_c,
                max_temp_c: d.day.maxtemp_c,
                min_temp_c: d.day.mintemp_c,
                condition: d.day.condition.into(),
            },
            astro: Astro { sunrise: d.astro.sunrise, sunset: d.astro.sunset },
        })
    }
}

impl TryFrom<WaForecastResponse> for WeatherSnapshot {
    type Error = anyhow::Error;

    fn try_from(parsed: WaForecastResponse) -> Result<Self> {
        if parsed.forecast.forecastday.is_empty() {
            return Err(anyhow!("WeatherAPI response contained no forecastday data"));
        }

        let forecast = parsed
            .forecast
            .forecastday
            .into_iter()
            .map(ForecastDay::try_from)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            location: SnapshotLocation {
                name: parsed.location.name,
                region: parsed.location.region,
                country: parsed.location.country,
                localtime: parsed.location.localtime,
            },
            current: CurrentConditions {
                temp_c: parsed.current.temp_c,
                feels_like_c: parsed.current.feelslike_c,
                condition: parsed.current.condition.into(),
                wind_kph: parsed.current.wind_kph,
                humidity: parsed.current.humidity,
                is_day: parsed.current.is_day == 1,
            },
            forecast,
        })
    }
}

#[async_trait]
impl WeatherProvider for WeatherApiProvider {
    async fn search_locations(&self, query: &LocationQuery) -> Result<Vec<CandidateLocation>> {
        let body = self.get_json("search.json", &[("q", query.text.as_str())]).await?;

        let parsed: Vec<WaSearchEntry> =
            serde_json::from_str(&body).context("Failed to parse WeatherAPI search JSON")?;

        Ok(parsed.into_iter().map(CandidateLocation::from).collect())
    }

    async fn forecast(&self, request: &ForecastRequest) -> Result<WeatherSnapshot> {
        let days = request.days.to_string();
        let body = self
            .get_json(
                "forecast.json",
                &[
                    ("q", request.city.as_str()),
                    ("days", days.as_str()),
                    ("aqi", "no"),
                    ("alerts", "no"),
                ],
            )
            .await?;

        let parsed: WaForecastResponse =
            serde_json::from_str(&body).context("Failed to parse WeatherAPI forecast JSON")?;

        WeatherSnapshot::try_from(parsed)
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() > MAX {
        let cut = (0..=MAX).rev().find(|i| body.is_char_boundary(*i)).unwrap_or(0);
        format!("{}...", &body[..cut])
    } else {
        body.to_string()
    }
}
