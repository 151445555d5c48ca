use std::time::Duration;

use thiserror::Error;

/// Failures the workflow publishes in its state.
///
/// Provider errors are `anyhow` chains; they are flattened into a message here
/// so the error can be cloned into every observer's copy of the state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("Location lookup for '{query}' failed: {message}")]
    Lookup { query: String, message: String },

    #[error("Forecast for '{city}' failed: {message}")]
    Forecast { city: String, message: String },

    #[error("{operation} timed out after {}s", .after.as_secs_f32())]
    Timeout { operation: String, after: Duration },

    #[error("Workflow has already been initialized")]
    AlreadyInitialized,
}

impl WorkflowError {
    pub fn lookup(query: &str, err: &anyhow::Error) -> Self {
        Self::Lookup { query: query.to_string(), message: format!("{err:#}") }
    }

    pub fn forecast(city: &str, err: &anyhow::Error) -> Self {
        Self::Forecast { city: city.to_string(), message: format!("{err:#}") }
    }

    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout { operation: operation.into(), after }
    }

    /// Network-level failures; the user can retry these.
    pub fn is_network_failure(&self) -> bool {
        !matches!(self, Self::AlreadyInitialized)
    }
}
