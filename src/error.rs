//! Error types for the relay.
//!
//! Expected fetch outcomes (budget blocks, cache misses without network, upstream
//! failures) are not errors; they are variants of
//! [`FetchOutcome`](crate::orchestrator::FetchOutcome). `RelayError` covers
//! infrastructure faults only.

use crate::config::ConfigurationError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RelayError {
    #[error("Store error: {0}")]
    Store(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Executor error: {0}")]
    Executor(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for RelayError {
    fn from(error: serde_json::Error) -> Self {
        RelayError::Serialization(format!("JSON serialization error: {error}"))
    }
}

impl From<sqlx::Error> for RelayError {
    fn from(err: sqlx::Error) -> Self {
        RelayError::Store(err.to_string())
    }
}

impl From<ConfigurationError> for RelayError {
    fn from(err: ConfigurationError) -> Self {
        RelayError::Configuration(err.to_string())
    }
}

pub type RelayResult<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_errors_map_to_serialization() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let relay: RelayError = err.into();
        assert!(matches!(relay, RelayError::Serialization(_)));
        assert!(relay.to_string().starts_with("Serialization error: JSON serialization error"));
    }

    #[test]
    fn test_configuration_errors_keep_their_message() {
        let relay: RelayError =
            ConfigurationError::invalid_value("budget.fresh_limit", "0", "must be positive").into();
        assert_eq!(
            relay.to_string(),
            "Configuration error: Invalid value '0' for field 'budget.fresh_limit': must be positive"
        );
    }
}
