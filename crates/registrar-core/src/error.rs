//! Error types for registrar-core

use thiserror::Error;

/// Result type alias for registrar operations
pub type Result<T> = std::result::Result<T, RegistrarError>;

/// Main error type for registrar operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistrarError {
    /// A URI could not be parsed
    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    /// The request was malformed and never reached the backend
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Too many live contacts in a single bind
    #[error("Too many contacts ({count}) in bind for {aor}, maximum is {max}")]
    TooManyContacts { aor: String, count: usize, max: usize },

    /// Storage layer failure (remote store down, network error...)
    #[error("Backend error: {0}")]
    Backend(String),

    /// A record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for RegistrarError {
    fn from(err: serde_json::Error) -> Self {
        RegistrarError::Serialization(format!("JSON error: {}", err))
    }
}

impl From<rmp_serde::encode::Error> for RegistrarError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        RegistrarError::Serialization(format!("MessagePack encode error: {}", err))
    }
}

impl From<rmp_serde::decode::Error> for RegistrarError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        RegistrarError::Serialization(format!("MessagePack decode error: {}", err))
    }
}

impl From<prost::EncodeError> for RegistrarError {
    fn from(err: prost::EncodeError) -> Self {
        RegistrarError::Serialization(format!("Protobuf encode error: {}", err))
    }
}

impl From<prost::DecodeError> for RegistrarError {
    fn from(err: prost::DecodeError) -> Self {
        RegistrarError::Serialization(format!("Protobuf decode error: {}", err))
    }
}

impl From<config::ConfigError> for RegistrarError {
    fn from(err: config::ConfigError) -> Self {
        RegistrarError::ConfigError(err.to_string())
    }
}
