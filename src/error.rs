//! Domain-specific error types for netsleuth.
//!
//! Uses `thiserror` for ergonomic error definitions that integrate
//! with the broader `anyhow` error handling strategy. Only ingestion and
//! authentication errors abort a run; lookup errors are absorbed into a
//! per-destination verdict by the resolver.

use thiserror::Error;

/// Errors raised while exchanging client credentials for a bearer token.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing credential: {0}")]
    MissingCredential(&'static str),

    #[error("Identity endpoint unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Token endpoint returned status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Token response could not be parsed: {0}")]
    MalformedResponse(String),

    #[error("Token response did not contain an access token")]
    MissingToken,
}

/// Errors from a single passive-DNS lookup.
///
/// These never abort a run; the resolver turns each into a `Failed` verdict.
#[derive(Error, Debug)]
pub enum LookupError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("DNS resolution failed with status code {0}")]
    Status(u16),

    #[error("failed to parse response: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for LookupError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Parse(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Errors that make an input file unusable.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to open input '{path}': {source}")]
    Open {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("Missing required column '{0}'")]
    MissingColumn(String),

    #[error("Row {row}: column '{column}' has non-numeric value '{value}'")]
    InvalidMetric {
        row: usize,
        column: String,
        value: String,
    },

    #[error("Row {row}: {source}")]
    Row {
        row: usize,
        #[source]
        source: csv::Error,
    },
}

/// Result type alias using anyhow for application-level error handling.
pub type Result<T> = anyhow::Result<T>;
