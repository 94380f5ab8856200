//! Error types for the client.

use thiserror::Error;

use crate::transport::TransportError;

/// Client error type.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// API returned an error response.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message from the API (`detail` field when present).
        message: String,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// The streaming connection could not be established or broke.
    #[error("Connection failure: {0}")]
    Transport(#[from] TransportError),

    /// A newer `open` or `close` replaced this connection attempt.
    #[error("Connection attempt superseded")]
    Superseded,

    /// A send was refused locally.
    #[error("Send rejected: {0}")]
    Rejected(#[from] SendRejected),

    /// The operation needs an access token and none is held.
    #[error("Not authenticated")]
    NotAuthenticated,
}

/// Reasons a send is refused before anything reaches the network.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendRejected {
    /// The connection is not `Open`.
    #[error("connection is not open")]
    NotConnected,
    /// The input is empty after trimming whitespace.
    #[error("message is empty")]
    EmptyInput,
    /// The previous assistant turn has not produced a fragment yet.
    #[error("waiting for the assistant to reply")]
    TurnPending,
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;
