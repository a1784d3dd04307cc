//! Error types for perfcap
//!
//! Transport and attach failures reach consumers as the `Display` text passed
//! to the error hook, so messages are written to stand on their own.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Protocol error {code}: {message}")]
    Protocol { code: i64, message: String },

    #[error("Transport closed: {0}")]
    Closed(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum AttachError {
    #[error("Target is already attached by another debugger")]
    AlreadyAttached,

    #[error("Protocol version {requested} not supported (browser speaks {available})")]
    UnsupportedVersion { requested: String, available: String },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Capture duration must be greater than zero")]
    ZeroDuration,

    #[error("Read chunk size must be greater than zero")]
    ZeroChunkSize,

    #[error("{name} timeout must be greater than zero")]
    ZeroTimeout { name: &'static str },
}

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Failed to create debugging pipe: {0}")]
    PipeFailed(std::io::Error),

    #[error("Failed to spawn {browser}: {error}")]
    SpawnFailed { browser: String, error: std::io::Error },
}
