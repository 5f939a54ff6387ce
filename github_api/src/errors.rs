//! Error types for the API client.

use serde::Deserialize;
use url::Url;

/// A single error returned inside a GraphQL response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphQlError {
    /// Error category reported by the service, e.g. `NOT_FOUND`.
    #[serde(rename = "type", default)]
    pub error_type: String,
    /// Path segments locating the error within the response tree.
    #[serde(default)]
    pub path: Vec<String>,
    pub message: String,
}

/// One or more errors returned in an otherwise well-formed GraphQL response.
///
/// Only constructed when the decoded envelope's error list is non-empty,
/// even if partial `data` was also present.
#[derive(thiserror::Error, Debug)]
#[error("GraphQL error: {}", join_messages(.errors))]
pub struct GraphQlErrorResponse {
    pub errors: Vec<GraphQlError>,
}

fn join_messages(errors: &[GraphQlError]) -> String {
    let messages: Vec<&str> = errors.iter().map(|e| e.message.as_str()).collect();
    messages.join("\n")
}

/// Errors that can occur when making API requests.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The API returned a non-success status.
    #[error("{}", format_http_error(.status, .url, .message))]
    Http {
        status: u16,
        url: Url,
        /// Best-effort extraction of the `message` field from the response
        /// body; empty when the body was not decodable as such.
        message: String,
    },
    /// The GraphQL response carried a non-empty error list.
    #[error(transparent)]
    GraphQl(#[from] GraphQlErrorResponse),
    /// The underlying transport failed (network error, timeout).
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    /// A success response carried a body that could not be decoded.
    #[error("failed to decode response: {0}")]
    Deserialize(#[from] serde_json::Error),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    /// The reauthentication flow failed or was unavailable.
    #[error("{0}")]
    Reauth(String),
}

fn format_http_error(status: &u16, url: &Url, message: &str) -> String {
    if message.is_empty() {
        format!("HTTP {} ({})", status, url)
    } else {
        format!("HTTP {}: {} ({})", status, message, url)
    }
}
