use thiserror::Error;

/// Why a "speak" trigger did not start playback.
///
/// All variants are reported to the user; none of them end the process.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReadAloudError {
    /// Nothing to speak.
    #[error("Clipboard is empty.")]
    EmptyInput,

    #[error("clipboard unavailable: {0}")]
    Clipboard(String),

    /// The speech service rejected the request or could not be reached.
    #[error("speech request failed: {0}")]
    RequestFailed(String),

    /// The speech service returned audio that could not be decoded.
    #[error("audio decode failed: {0}")]
    DecodeFailed(String),
}
