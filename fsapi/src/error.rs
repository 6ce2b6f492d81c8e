use fsapi_transport::TransportError;
use thiserror::Error;

use crate::response::Status;

/// Protocol-level errors for FSAPI operations
///
/// Wraps transport failures and adds the protocol's own failure modes:
/// non-OK statuses, missing payloads and the reconnection outcomes.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network failure, empty body or unparseable XML
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The response parsed as XML but lacks required elements
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// The device answered with a non-OK status
    #[error("{path} returned {status}")]
    Status { path: String, status: Status },

    /// The node does not exist on this device or is currently blocked
    ///
    /// Devices report this for optional nodes (FM range, Spotify user) and
    /// it says nothing about the health of the session.
    #[error("Node {node} unavailable ({status})")]
    NodeUnavailable { node: String, status: Status },

    /// Status OK but no value in the response
    #[error("No value returned for {0}")]
    MissingPayload(String),

    /// CREATE_SESSION did not produce a session id
    #[error("Session rejected: {0}")]
    SessionRejected(String),

    /// The connection is down; no request was sent
    #[error("Device is disconnected")]
    Disconnected,

    /// Reconnecting after a failure did not recover the call
    #[error("Session expired and could not be re-established: {source}")]
    SessionExpired {
        #[source]
        source: Box<ApiError>,
    },

    /// The connection was shut down for good
    #[error("Connection closed")]
    Closed,
}

impl ApiError {
    /// Whether this failure should trigger a new session
    ///
    /// Transport failures and unexpected statuses count; a missing or blocked
    /// node and the connection's own terminal errors do not.
    pub fn is_session_fault(&self) -> bool {
        matches!(
            self,
            ApiError::Transport(_) | ApiError::Malformed(_) | ApiError::Status { .. }
        )
    }
}

/// Type alias for results that can return an ApiError
pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_fault_classification() {
        assert!(ApiError::Transport(TransportError::EmptyBody).is_session_fault());
        assert!(ApiError::Status {
            path: "GET/netremote.sys.power".into(),
            status: Status::Fail,
        }
        .is_session_fault());

        assert!(!ApiError::NodeUnavailable {
            node: "netremote.spotify.username".into(),
            status: Status::NodeDoesNotExist,
        }
        .is_session_fault());
        assert!(!ApiError::Disconnected.is_session_fault());
        assert!(!ApiError::MissingPayload("netremote.sys.power".into()).is_session_fault());
    }

    #[test]
    fn test_display_includes_status_token() {
        let err = ApiError::Status {
            path: "SET/netremote.sys.audio.volume".into(),
            status: Status::Other("FS_PACKET_BAD".into()),
        };
        assert_eq!(
            err.to_string(),
            "SET/netremote.sys.audio.volume returned FS_PACKET_BAD"
        );
    }
}
