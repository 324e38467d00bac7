//! Error taxonomy for the pipeline.
//!
//! Each component surfaces its own error type; [`PipelineError`] is what
//! the orchestrator returns from a failed step.

use thiserror::Error;

/// The weather API was unreachable or answered with a non-2xx status.
#[derive(Debug, Error)]
pub enum UpstreamFetchError {
    #[error("Weather API request failed for {city} on {date}")]
    Request {
        date: String,
        city: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Weather API returned HTTP {status} for {city} on {date}")]
    Status {
        date: String,
        city: String,
        status: reqwest::StatusCode,
    },

    #[error("Weather API returned a body that is not JSON for {city} on {date}")]
    Decode {
        date: String,
        city: String,
        #[source]
        source: serde_json::Error,
    },
}

/// The object store is unreachable, rejected the request, or the key is missing.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object '{0}' not found")]
    NotFound(String),

    #[error("Object store request failed for '{key}'")]
    Request {
        key: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Object store returned HTTP {status} for '{key}': {body}")]
    Status {
        key: String,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Object store is not configured: {0}")]
    Config(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

/// The destination database is unreachable or rejected the rows.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Invalid destination table name '{0}'")]
    InvalidTable(String),

    #[error("Failed to connect to database '{path}'")]
    Connect {
        path: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to write rows to table '{table}'")]
    Write {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to create database directory '{0}'")]
    Io(String, #[source] std::io::Error),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Upstream(#[from] UpstreamFetchError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("Failed to decode JSON object '{key}'")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode weather document as JSON")]
    Encode(#[source] serde_json::Error),

    #[error("CSV error for object '{key}'")]
    Csv {
        key: String,
        #[source]
        source: csv::Error,
    },
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
