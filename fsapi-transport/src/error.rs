//! Error types for the FSAPI transport

use thiserror::Error;

/// Errors that can occur during a single request/response round trip
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network or HTTP communication error
    #[error("Network/HTTP error: {0}")]
    Network(String),

    /// The device answered with an empty body
    #[error("Empty response body")]
    EmptyBody,

    /// XML parsing error
    #[error("XML parsing error: {0}")]
    Parse(String),
}
