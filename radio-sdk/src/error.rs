use thiserror::Error;

#[derive(Error, Debug)]
pub enum SdkError {
    #[error("State error: {0}")]
    State(#[from] radio_state::StateError),

    #[error("API error: {0}")]
    Api(#[from] fsapi::ApiError),

    #[error("No radio at {0}")]
    DeviceNotFound(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<fsapi_transport::TransportError> for SdkError {
    fn from(err: fsapi_transport::TransportError) -> Self {
        SdkError::Api(err.into())
    }
}
