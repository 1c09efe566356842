//! Audio output backends.
//!
//! [`AudioOutput`] is the seam between the playback engine and the audio subsystem:
//! it enumerates devices and opens blocking [`OutputSink`]s. [`CpalOutput`] is the real
//! backend; tests use the in-memory one from [`crate::testing`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};

use crate::config::PlaybackConfig;
use crate::device::{self, DeviceDescriptor};
use crate::error::PlaybackError;
use crate::playback::{self, CallbackConfig};
use crate::queue::{PushError, SharedAudio};
use crate::resample::ChunkResampler;

/// Format of the audio a sink will receive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamSpec {
    pub sample_rate: u32,
    pub channels: u16,
    /// Largest chunk (in frames) that will be passed to a single `write`.
    pub chunk_frames: usize,
}

/// An audio subsystem that can enumerate output devices and open streams on them.
pub trait AudioOutput: Send + Sync {
    /// Live device enumeration (never cached).
    fn devices(&self) -> Result<Vec<DeviceDescriptor>, PlaybackError>;

    /// Open an output stream on `device`, or on the system default when `None`.
    fn open(
        &self,
        device: Option<&str>,
        spec: &StreamSpec,
    ) -> Result<Box<dyn OutputSink>, PlaybackError>;
}

/// An open output stream owned by a single playback worker.
///
/// Dropping the sink closes the stream.
pub trait OutputSink {
    /// Name of the device this sink plays on.
    fn device_name(&self) -> &str;

    /// Write interleaved samples, blocking until the device accepted them.
    fn write(&mut self, samples: &[f32]) -> Result<(), PlaybackError>;

    /// Wait for written audio to reach the device.
    fn finish(&mut self) -> Result<(), PlaybackError>;
}

/// CPAL-backed output on the default host.
///
/// Holds no device handles: every call re-enumerates the host.
#[derive(Clone, Debug, Default)]
pub struct CpalOutput {
    config: PlaybackConfig,
}

impl CpalOutput {
    pub fn new(config: PlaybackConfig) -> Self {
        Self { config }
    }
}

impl AudioOutput for CpalOutput {
    fn devices(&self) -> Result<Vec<DeviceDescriptor>, PlaybackError> {
        let host = cpal::default_host();
        device::list_output_devices(&host).map_err(|e| PlaybackError::DeviceUnavailable(format!("{e:#}")))
    }

    fn open(
        &self,
        device_id: Option<&str>,
        spec: &StreamSpec,
    ) -> Result<Box<dyn OutputSink>, PlaybackError> {
        let host = cpal::default_host();
        let device = match device_id {
            Some(id) => device::find_output_device(&host, id)
                .map_err(|e| PlaybackError::DeviceUnavailable(format!("{id}: {e:#}")))?
                .ok_or_else(|| PlaybackError::DeviceUnavailable(id.to_string()))?,
            None => device::default_output_device(&host)
                .map(|(d, _)| d)
                .ok_or_else(|| PlaybackError::DeviceUnavailable("no default output device".into()))?,
        };
        let device_name = device
            .description()
            .map(|d| d.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        let supported = device::choose_stream_config(&device, spec.sample_rate, spec.channels)
            .map_err(|e| PlaybackError::StreamFailed(format!("{device_name}: {e:#}")))?;
        let stream_config: cpal::StreamConfig = supported.clone().into();
        let out_rate = stream_config.sample_rate;

        let resampler = if out_rate != spec.sample_rate {
            Some(
                ChunkResampler::new(
                    spec.sample_rate,
                    out_rate,
                    spec.channels as usize,
                    spec.chunk_frames,
                )
                .map_err(|e| PlaybackError::StreamFailed(format!("{e:#}")))?,
            )
        } else {
            None
        };

        let chunk_out_frames = (spec.chunk_frames as u64 * out_rate as u64
            / spec.sample_rate.max(1) as u64)
            .max(1) as usize;
        let channels = spec.channels.max(1) as usize;
        let capacity = chunk_out_frames * channels * self.config.queue_chunks.max(1);
        let queue = Arc::new(SharedAudio::new(channels, capacity));
        let failed = Arc::new(AtomicBool::new(false));

        let stream = playback::build_output_stream(
            &device,
            &stream_config,
            supported.sample_format(),
            &queue,
            CallbackConfig {
                refill_max_frames: chunk_out_frames,
                failed: failed.clone(),
            },
        )
        .map_err(|e| PlaybackError::StreamFailed(format!("{device_name}: {e:#}")))?;
        stream
            .play()
            .map_err(|e| PlaybackError::StreamFailed(format!("{device_name}: {e}")))?;

        tracing::info!(
            device = %device_name,
            source_rate_hz = spec.sample_rate,
            output_rate_hz = out_rate,
            output_channels = stream_config.channels,
            sample_format = ?supported.sample_format(),
            "output stream opened"
        );

        Ok(Box::new(CpalSink {
            _stream: stream,
            device_name,
            queue,
            failed,
            resampler,
            stall_timeout: self.config.stall_timeout,
            tail: Duration::from_secs_f64(chunk_out_frames as f64 / out_rate.max(1) as f64),
        }))
    }
}

struct CpalSink {
    _stream: cpal::Stream,
    device_name: String,
    queue: Arc<SharedAudio>,
    failed: Arc<AtomicBool>,
    resampler: Option<ChunkResampler>,
    stall_timeout: Duration,
    /// Audio still inside the device buffer after the queue drains.
    tail: Duration,
}

impl CpalSink {
    fn check_failed(&self) -> Result<(), PlaybackError> {
        if self.failed.load(Ordering::Acquire) {
            return Err(PlaybackError::StreamFailed(format!(
                "{}: device reported a stream error",
                self.device_name
            )));
        }
        Ok(())
    }

    fn push(&self, samples: &[f32]) -> Result<(), PlaybackError> {
        match self.queue.push_interleaved(samples, self.stall_timeout) {
            Ok(()) => Ok(()),
            Err(PushError::Closed) => {
                self.check_failed()?;
                Err(PlaybackError::StreamFailed(format!("{}: stream closed", self.device_name)))
            }
            Err(PushError::Stalled) => Err(PlaybackError::StreamFailed(format!(
                "{}: device stopped consuming audio",
                self.device_name
            ))),
        }
    }
}

impl OutputSink for CpalSink {
    fn device_name(&self) -> &str {
        &self.device_name
    }

    fn write(&mut self, samples: &[f32]) -> Result<(), PlaybackError> {
        self.check_failed()?;
        match self.resampler.as_mut() {
            Some(r) => {
                let converted = r
                    .process(samples)
                    .map_err(|e| PlaybackError::StreamFailed(format!("{e:#}")))?
                    .to_vec();
                self.push(&converted)
            }
            None => self.push(samples),
        }
    }

    fn finish(&mut self) -> Result<(), PlaybackError> {
        if let Some(r) = self.resampler.as_mut() {
            let tail = r
                .flush()
                .map_err(|e| PlaybackError::StreamFailed(format!("{e:#}")))?;
            self.push(&tail)?;
        }
        if !self.queue.wait_drained(self.stall_timeout) {
            self.check_failed()?;
            return Err(PlaybackError::StreamFailed(format!(
                "{}: device stopped consuming audio",
                self.device_name
            )));
        }
        self.check_failed()?;
        std::thread::sleep(self.tail);
        Ok(())
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.queue.close();
    }
}
