//! Error types and handling
//!
//! The public error taxonomy of the recorder, plus the shape errors take when
//! they are handed to a UI layer.

use crate::capture::CaptureError;
use crate::export::MergeError;
use crate::recorder::writer::SinkError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Recorder-wide error type
#[derive(Error, Debug)]
pub enum RecorderError {
    /// Recording could not be set up; the session stays idle
    #[error("Setup error: {0}")]
    Setup(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Already recording")]
    AlreadyRecording,

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Writer error: {0}")]
    Writer(#[from] SinkError),

    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The session task is gone (runtime shut down)
    #[error("Recording session is no longer running")]
    SessionClosed,
}

impl RecorderError {
    /// Stable error code for the UI layer
    pub fn code(&self) -> &'static str {
        match self {
            RecorderError::Setup(_) => "SETUP_ERROR",
            RecorderError::PermissionDenied(_) => "PERMISSION_DENIED",
            RecorderError::AlreadyRecording => "ALREADY_RECORDING",
            RecorderError::Capture(_) => "CAPTURE_ERROR",
            RecorderError::Writer(_) => "WRITER_ERROR",
            RecorderError::Merge(_) => "MERGE_ERROR",
            RecorderError::Io(_) => "IO_ERROR",
            RecorderError::Config(_) => "CONFIG_ERROR",
            RecorderError::SessionClosed => "SESSION_CLOSED",
        }
    }
}

/// Error response for frontend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<RecorderError> for ErrorResponse {
    fn from(error: RecorderError) -> Self {
        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using RecorderError
pub type RecorderResult<T> = Result<T, RecorderError>;
