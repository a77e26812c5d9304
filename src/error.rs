//! Error types for infercore.

use thiserror::Error;

/// Result type alias for infercore operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for infercore.
#[derive(Error, Debug)]
pub enum Error {
    /// Block allocation failed - no free blocks available.
    #[error("out of KV cache blocks")]
    OutOfBlocks,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The engine's request queue has been shut down.
    #[error("engine has been stopped")]
    EngineStopped,

    /// The scheduler worker thread panicked.
    #[error("scheduler worker thread panicked")]
    WorkerPanicked,

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
