//! Error types

use thiserror::Error;

/// Crate-level error
#[derive(Debug, Error)]
pub enum Error {
    #[error("audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by capture devices, streams and the audio pipeline
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AudioError {
    #[error("invalid device index: {0}")]
    InvalidDevice(usize),

    #[error("device {0} has no input channels")]
    NoInputChannels(usize),

    #[error("invalid stream configuration: {0}")]
    InvalidConfig(String),

    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to open stream: {0}")]
    StreamOpen(String),

    #[error("failed to start stream: {0}")]
    StreamPlay(String),

    #[error("device enumeration failed: {0}")]
    Enumeration(String),

    #[error("thread error: {0}")]
    Thread(String),

    #[error("audio source has been shut down")]
    ShutDown,
}

/// Failure reported by (or caught around) a client frame handler
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallbackError {
    #[error("frame handler failed: {0}")]
    Failed(String),

    #[error("frame handler panicked: {0}")]
    Panicked(String),
}

impl CallbackError {
    /// Build a `Panicked` error from a caught unwind payload
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::Panicked(message)
    }
}
