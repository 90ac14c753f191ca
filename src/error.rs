//! Error types for the Signpath gateway

use thiserror::Error;

/// Result type alias for Signpath operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Signpath gateway
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Network or HTTP-level failure talking to the completion API
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed stream frame (recoverable; logged and skipped)
    #[error("decode error: {0}")]
    Decode(String),

    /// Speech synthesis engine failure (aborts the current utterance only)
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Speech recognition service failure
    #[error("recognition error: {0}")]
    Recognition(String),

    /// Gesture camera service failure
    #[error("camera error: {0}")]
    Camera(String),

    /// Avatar video generation failure
    #[error("video error: {0}")]
    Video(String),

    /// Blank or otherwise invalid input (silently ignored by callers)
    #[error("validation error: {0}")]
    Validation(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}
