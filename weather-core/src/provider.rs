use crate::{
    Config,
    model::{CandidateLocation, ForecastRequest, LocationQuery, WeatherSnapshot},
    provider::weatherapi::WeatherApiProvider,
};
use async_trait::async_trait;
use std::fmt::Debug;

pub mod weatherapi;

/// The two remote operations the workflow depends on.
#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    /// Cities whose name starts with the query. An empty list is a valid answer;
    /// transport and auth problems must come back as errors.
    async fn search_locations(
        &self,
        query: &LocationQuery,
    ) -> anyhow::Result<Vec<CandidateLocation>>;

    async fn forecast(&self, request: &ForecastRequest) -> anyhow::Result<WeatherSnapshot>;
}

/// Construct the WeatherAPI.com provider from config.
pub fn provider_from_config(config: &Config) -> anyhow::Result<Box<dyn WeatherProvider>> {
    let api_key = config.api_key().ok_or_else(|| {
        anyhow::anyhow!(
            "No API key configured for WeatherAPI.com.\n\
                 Hint: run `weather configure` and enter your API key."
        )
    })?;

    let provider = WeatherApiProvider::new(api_key.to_owned(), config.request_timeout())?;
    Ok(Box::new(provider))
}
