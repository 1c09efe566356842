//! Playback error types.

use thiserror::Error;

/// Failures reported by the playback engine.
///
/// None of these are fatal to the process: the controller always returns to idle and
/// the error is surfaced through the session outcome.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlaybackError {
    /// The requested output device is not currently enumerable.
    #[error("output device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The output stream could not be opened or a write failed.
    #[error("output stream failed: {0}")]
    StreamFailed(String),

    /// The audio bytes could not be decoded into samples.
    #[error("audio decode failed: {0}")]
    DecodeFailed(String),
}
