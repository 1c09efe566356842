//! Default-device fallback around [`StreamWriter`].
//!
//! An explicitly selected device gets exactly one attempt, and only if it is enumerable
//! at the moment playback starts. Any failure on it is retried once on the system
//! default device, continuing from the sample where the explicit device stopped. A
//! failure on the default device is terminal for the request.

use crate::buffer::SampleBuffer;
use crate::device::DeviceRegistry;
use crate::error::PlaybackError;
use crate::stream::{PlaybackSignal, StreamOutcome, StreamWriter};

/// Final result of a playback request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Completed { device: String },
    Stopped,
    Failed(PlaybackError),
}

#[derive(Clone)]
pub struct FallbackPolicy {
    registry: DeviceRegistry,
    writer: StreamWriter,
}

impl FallbackPolicy {
    pub fn new(registry: DeviceRegistry, writer: StreamWriter) -> Self {
        Self { registry, writer }
    }

    pub fn play(
        &self,
        buffer: &SampleBuffer,
        device: Option<&str>,
        signal: &dyn PlaybackSignal,
    ) -> PlaybackOutcome {
        let mut start = 0;

        if let Some(id) = device {
            if self.registry.validate(id) {
                match self.writer.write(buffer, Some(id), 0, signal) {
                    StreamOutcome::Failed { cursor, error } => {
                        tracing::warn!(
                            device = %id,
                            cursor,
                            "selected device failed, retrying on default device: {error}"
                        );
                        start = cursor;
                    }
                    other => return finish(other),
                }
            } else {
                tracing::warn!(
                    device = %id,
                    "{}; playing on default device",
                    PlaybackError::DeviceUnavailable(id.to_string())
                );
            }
        }

        finish(self.writer.write(buffer, None, start, signal))
    }
}

fn finish(outcome: StreamOutcome) -> PlaybackOutcome {
    match outcome {
        StreamOutcome::Completed { device } => PlaybackOutcome::Completed { device },
        StreamOutcome::Stopped { .. } => PlaybackOutcome::Stopped,
        StreamOutcome::Failed { error, .. } => {
            tracing::error!("playback failed: {error}");
            PlaybackOutcome::Failed(error)
        }
    }
}
