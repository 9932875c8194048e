use thiserror::Error;

/// Status of a failed MQTT call or operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MqttError {
    /// Rejected by validation before anything reached the network.
    #[error("BAD PARAMETER: {0}")]
    BadParameter(String),

    #[error("NO MEMORY")]
    NoMemory,

    #[error("NO FREE CONNECTION SLOT")]
    NoFreeSlot,

    #[error("SERVER REFUSED")]
    ServerRefused,

    #[error("BAD RESPONSE RECEIVED")]
    BadResponse,

    #[error("TIMEOUT")]
    Timeout,

    #[error("NETWORK ERROR: {0}")]
    NetworkError(String),

    #[error("MQTT ERROR: {0}")]
    Mqtt(String),
}

impl From<courier_core::error::Error> for MqttError {
    fn from(err: courier_core::error::Error) -> Self {
        use courier_core::error::Error;

        match err {
            Error::RemainingLengthTooLarge(_) => MqttError::BadParameter(err.to_string()),
            Error::BadResponse { .. } => MqttError::BadResponse,
            err => MqttError::Mqtt(err.to_string()),
        }
    }
}

impl From<std::io::Error> for MqttError {
    fn from(err: std::io::Error) -> Self {
        MqttError::NetworkError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MqttError>;
