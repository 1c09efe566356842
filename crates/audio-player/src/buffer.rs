//! Decoded audio buffer handed to the playback engine.

use std::time::Duration;

/// Immutable, decoded audio: interleaved normalized `f32` samples plus their format.
///
/// Lengths and offsets used by the playback engine are counted in **samples**
/// (not frames), so a stereo frame advances a cursor by two.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl SampleBuffer {
    /// Wrap interleaved samples.
    ///
    /// A trailing partial frame is dropped so the buffer always holds whole frames.
    pub fn new(mut samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        let channels = channels.max(1);
        let whole = samples.len() - samples.len() % channels as usize;
        samples.truncate(whole);
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Total length in samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Total length in frames.
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Playback duration at the buffer's own sample rate.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }
}
