//! Chunked writer from a [`SampleBuffer`] to one output device.

use std::sync::Arc;

use crate::buffer::SampleBuffer;
use crate::config::PlaybackConfig;
use crate::error::PlaybackError;
use crate::output::{AudioOutput, StreamSpec};

/// What the writer should do at a chunk boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Live control signal consulted by the writer before every chunk.
///
/// `checkpoint` receives the cursor (samples written so far) and may block while playback
/// is paused. It must return promptly once playback is resumed or stopped.
pub trait PlaybackSignal {
    fn checkpoint(&self, cursor: usize) -> Flow;
}

impl<F> PlaybackSignal for F
where
    F: Fn(usize) -> Flow,
{
    fn checkpoint(&self, cursor: usize) -> Flow {
        self(cursor)
    }
}

/// Result of writing a buffer to a device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Every sample was written and drained to the device.
    Completed { device: String },
    /// The control signal asked to stop at `cursor`.
    Stopped { cursor: usize },
    /// Opening or writing failed; `cursor` samples had been written.
    Failed { cursor: usize, error: PlaybackError },
}

/// Writes buffers to an [`AudioOutput`] in fixed-size chunks.
#[derive(Clone)]
pub struct StreamWriter {
    output: Arc<dyn AudioOutput>,
    config: PlaybackConfig,
}

impl StreamWriter {
    pub fn new(output: Arc<dyn AudioOutput>, config: PlaybackConfig) -> Self {
        Self { output, config }
    }

    /// Write `buffer[start..]` to `device` (system default when `None`).
    pub fn write(
        &self,
        buffer: &SampleBuffer,
        device: Option<&str>,
        start: usize,
        signal: &dyn PlaybackSignal,
    ) -> StreamOutcome {
        let channels = buffer.channels() as usize;
        let mut cursor = start.min(buffer.len()) / channels * channels;

        let spec = StreamSpec {
            sample_rate: buffer.sample_rate(),
            channels: buffer.channels(),
            chunk_frames: self.config.chunk_frames.max(1),
        };
        let mut sink = match self.output.open(device, &spec) {
            Ok(sink) => sink,
            Err(error) => return StreamOutcome::Failed { cursor, error },
        };
        tracing::debug!(
            device = sink.device_name(),
            start = cursor,
            total = buffer.len(),
            "stream writer started"
        );

        let chunk = self.config.chunk_samples(buffer.channels());
        let samples = buffer.samples();
        while cursor < samples.len() {
            if signal.checkpoint(cursor) == Flow::Stop {
                return StreamOutcome::Stopped { cursor };
            }
            let end = (cursor + chunk).min(samples.len());
            if let Err(error) = sink.write(&samples[cursor..end]) {
                return StreamOutcome::Failed { cursor, error };
            }
            cursor = end;
        }

        if let Err(error) = sink.finish() {
            return StreamOutcome::Failed { cursor, error };
        }
        StreamOutcome::Completed {
            device: sink.device_name().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryOutput, ramp_buffer};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn writer(output: &Arc<MemoryOutput>, chunk_frames: usize) -> StreamWriter {
        StreamWriter::new(
            output.clone(),
            PlaybackConfig {
                chunk_frames,
                ..PlaybackConfig::default()
            },
        )
    }

    #[test]
    fn writes_every_sample_in_fixed_chunks() {
        let output = Arc::new(MemoryOutput::new());
        let buffer = ramp_buffer(1_000, 16_000, 1);
        let checkpoints = AtomicUsize::new(0);
        let signal = |_: usize| {
            checkpoints.fetch_add(1, Ordering::Relaxed);
            Flow::Continue
        };

        let outcome = writer(&output, 256).write(&buffer, None, 0, &signal);

        assert!(matches!(outcome, StreamOutcome::Completed { .. }));
        assert_eq!(output.written(None), buffer.samples());
        assert_eq!(output.write_sizes(), vec![256, 256, 256, 232]);
        assert_eq!(checkpoints.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn chunks_are_whole_frames_for_stereo() {
        let output = Arc::new(MemoryOutput::new());
        let buffer = ramp_buffer(300, 48_000, 2);

        writer(&output, 100).write(&buffer, None, 0, &|_: usize| Flow::Continue);

        assert_eq!(output.write_sizes(), vec![200, 200, 200]);
    }

    #[test]
    fn stop_signal_ends_before_next_chunk() {
        let output = Arc::new(MemoryOutput::new());
        let buffer = ramp_buffer(1_000, 16_000, 1);

        let outcome =
            writer(&output, 100).write(&buffer, None, 0, &|cursor: usize| {
                if cursor >= 300 { Flow::Stop } else { Flow::Continue }
            });

        assert_eq!(outcome, StreamOutcome::Stopped { cursor: 300 });
        assert_eq!(output.written(None), &buffer.samples()[..300]);
    }

    #[test]
    fn resumes_from_start_offset() {
        let output = Arc::new(MemoryOutput::new());
        let buffer = ramp_buffer(1_000, 16_000, 1);

        writer(&output, 128).write(&buffer, None, 600, &|_: usize| Flow::Continue);

        assert_eq!(output.written(None), &buffer.samples()[600..]);
    }

    #[test]
    fn open_failure_is_reported_at_start_cursor() {
        let output = Arc::new(MemoryOutput::new().fail_open(None));
        let buffer = ramp_buffer(100, 16_000, 1);

        let outcome = writer(&output, 32).write(&buffer, None, 0, &|_: usize| Flow::Continue);

        assert!(matches!(
            outcome,
            StreamOutcome::Failed { cursor: 0, error: PlaybackError::StreamFailed(_) }
        ));
    }

    #[test]
    fn write_failure_reports_cursor_of_failed_chunk() {
        let output = Arc::new(MemoryOutput::new().fail_write_after(None, 64));
        let buffer = ramp_buffer(200, 16_000, 1);

        let outcome = writer(&output, 32).write(&buffer, None, 0, &|_: usize| Flow::Continue);

        assert!(matches!(outcome, StreamOutcome::Failed { cursor: 64, .. }));
        assert_eq!(output.written(None), &buffer.samples()[..64]);
    }

    #[test]
    fn empty_buffer_completes_without_writes() {
        let output = Arc::new(MemoryOutput::new());
        let buffer = SampleBuffer::new(Vec::new(), 16_000, 1);

        let outcome = writer(&output, 32).write(&buffer, None, 0, &|_: usize| Flow::Continue);

        assert!(matches!(outcome, StreamOutcome::Completed { .. }));
        assert!(output.write_sizes().is_empty());
    }
}
