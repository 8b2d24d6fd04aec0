//! Error taxonomy for the streaming consumer
//!
//! A [`ParseError`] concerns one message and never stops the consumer. A
//! [`ConnectionError`] is fatal: the consumer returns it and the process
//! exits non-zero.

use thiserror::Error;

/// Result type alias for streaming operations
pub type Result<T> = std::result::Result<T, StreamError>;

/// Malformed message payload
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Payload is not a JSON object")]
    NotAnObject,

    #[error("Missing field {0:?}")]
    MissingField(&'static str),

    #[error("Field {field:?} has an invalid value: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// Broker unreachable or connection refused
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Broker connection failed: {0}")]
    Connection(#[from] rumqttc::ConnectionError),

    #[error("Broker refused the connection: {0}")]
    Refused(String),

    #[error("MQTT client request failed: {0}")]
    Client(#[from] rumqttc::ClientError),
}

/// Umbrella error of the streaming crate
#[derive(Error, Debug)]
pub enum StreamError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Sink error: {0}")]
    Sink(String),

    #[error("Invalid topic pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
