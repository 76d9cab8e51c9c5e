use thiserror::Error;

/// All errors produced by scriva-core.
///
/// Benign speech-input anomalies (duplicate finals, out-of-order partials)
/// are logged and absorbed rather than surfaced here; only configuration,
/// lifecycle and delivery faults reach the caller.
#[derive(Debug, Error)]
pub enum ScrivaError {
    #[error("invalid tuning configuration: {0}")]
    ConfigInvalid(String),

    #[error("speech engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("recording is already active")]
    AlreadyRecording,

    #[error("recording is not active")]
    NotRecording,

    #[error("delivery sink rejected operations: {0}")]
    DeliveryFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ScrivaError>;
