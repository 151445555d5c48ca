//! Core library for the `weather` CLI.
//!
//! This crate defines:
//! - Configuration handling
//! - The WeatherAPI.com client behind the [`WeatherProvider`] trait
//! - Persistence of the last chosen city
//! - The search-and-select [`Workflow`] a weather screen renders from
//!
//! It is used by `weather-cli`, but can also be reused by other front ends.

pub mod config;
pub mod error;
pub mod model;
pub mod provider;
pub mod store;
pub mod workflow;

pub use config::Config;
pub use error::WorkflowError;
pub use model::{CandidateLocation, ForecastDay, ForecastRequest, LocationQuery, WeatherSnapshot};
pub use provider::{WeatherProvider, provider_from_config};
pub use store::{FileStore, KeyValueStore, LAST_CITY_KEY, MemoryStore};
pub use workflow::{Phase, Workflow, WorkflowOptions, WorkflowState};
