//! Error types for radio-state

use std::fmt;

/// Result type for radio-state operations
pub type Result<T> = std::result::Result<T, StateError>;

/// Errors that can occur while synchronizing a device
#[derive(Debug)]
pub enum StateError {
    /// Error from the protocol layer
    Api(fsapi::ApiError),

    /// No property registered under this key or name
    UnknownProperty(String),

    /// The property cannot be written
    ReadOnly(String),

    /// A typed value does not fit the property kind
    InvalidValue { property: String, reason: String },

    /// A wire value could not be interpreted
    Decode { property: String, raw: String },

    /// The device has been stopped
    Stopped,

    /// Capability bootstrap failed
    Bootstrap(String),
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateError::Api(err) => write!(f, "API error: {}", err),
            StateError::UnknownProperty(key) => write!(f, "Unknown property: {}", key),
            StateError::ReadOnly(key) => write!(f, "Property is read-only: {}", key),
            StateError::InvalidValue { property, reason } => {
                write!(f, "Invalid value for {}: {}", property, reason)
            }
            StateError::Decode { property, raw } => {
                write!(f, "Cannot decode {:?} for {}", raw, property)
            }
            StateError::Stopped => write!(f, "Device has been stopped"),
            StateError::Bootstrap(msg) => write!(f, "Bootstrap failed: {}", msg),
        }
    }
}

impl std::error::Error for StateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StateError::Api(err) => Some(err),
            _ => None,
        }
    }
}

impl From<fsapi::ApiError> for StateError {
    fn from(err: fsapi::ApiError) -> Self {
        StateError::Api(err)
    }
}
