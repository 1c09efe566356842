//! In-memory output backend and fixtures for tests.
//!
//! [`MemoryOutput`] records every open and write, can pace writes to (a multiple of) real
//! time, and injects open/write failures per device. `None` as a device key means the
//! system default device.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::buffer::SampleBuffer;
use crate::device::DeviceDescriptor;
use crate::error::PlaybackError;
use crate::output::{AudioOutput, OutputSink, StreamSpec};

const DEFAULT_NAME: &str = "memory-default";

#[derive(Default)]
struct Recorder {
    opens: Vec<Option<String>>,
    sinks: Vec<SinkRecord>,
    active: usize,
    max_active: usize,
}

struct SinkRecord {
    device: Option<String>,
    samples: Vec<f32>,
    write_sizes: Vec<usize>,
}

#[derive(Default)]
pub struct MemoryOutput {
    devices: Mutex<Vec<DeviceDescriptor>>,
    recorder: Arc<Mutex<Recorder>>,
    fail_open: HashSet<Option<String>>,
    fail_write_after: HashMap<Option<String>, usize>,
    speed: Option<f64>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(self, device: DeviceDescriptor) -> Self {
        lock(&self.devices).push(device);
        self
    }

    /// Opening `device` fails with a stream error.
    pub fn fail_open(mut self, device: Option<&str>) -> Self {
        self.fail_open.insert(device.map(str::to_string));
        self
    }

    /// Writes on `device` fail once a sink has accepted `samples` samples.
    pub fn fail_write_after(mut self, device: Option<&str>, samples: usize) -> Self {
        self.fail_write_after
            .insert(device.map(str::to_string), samples);
        self
    }

    /// Block each write for its audio duration divided by `speed`.
    pub fn paced(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn remove_device(&self, id: &str) {
        lock(&self.devices).retain(|d| d.id != id);
    }

    /// Every open attempt, including failed ones, in order.
    pub fn opens(&self) -> Vec<Option<String>> {
        lock(&self.recorder).opens.clone()
    }

    /// All samples written to `device`, concatenated across sinks.
    pub fn written(&self, device: Option<&str>) -> Vec<f32> {
        let rec = lock(&self.recorder);
        rec.sinks
            .iter()
            .filter(|s| s.device.as_deref() == device)
            .flat_map(|s| s.samples.iter().copied())
            .collect()
    }

    /// Samples written by each successfully opened sink, in open order.
    pub fn sink_samples(&self) -> Vec<Vec<f32>> {
        lock(&self.recorder)
            .sinks
            .iter()
            .map(|s| s.samples.clone())
            .collect()
    }

    pub fn write_sizes(&self) -> Vec<usize> {
        lock(&self.recorder)
            .sinks
            .iter()
            .flat_map(|s| s.write_sizes.iter().copied())
            .collect()
    }

    pub fn active_sinks(&self) -> usize {
        lock(&self.recorder).active
    }

    /// Highest number of sinks that were open at the same time.
    pub fn max_active_sinks(&self) -> usize {
        lock(&self.recorder).max_active
    }
}

impl AudioOutput for MemoryOutput {
    fn devices(&self) -> Result<Vec<DeviceDescriptor>, PlaybackError> {
        Ok(lock(&self.devices).clone())
    }

    fn open(
        &self,
        device: Option<&str>,
        spec: &StreamSpec,
    ) -> Result<Box<dyn OutputSink>, PlaybackError> {
        let key = device.map(str::to_string);
        let mut rec = lock(&self.recorder);
        rec.opens.push(key.clone());

        if let Some(id) = device {
            if !lock(&self.devices).iter().any(|d| d.id == id) {
                return Err(PlaybackError::DeviceUnavailable(id.to_string()));
            }
        }
        if self.fail_open.contains(&key) {
            return Err(PlaybackError::StreamFailed(format!(
                "{}: open failed",
                device.unwrap_or(DEFAULT_NAME)
            )));
        }

        rec.sinks.push(SinkRecord {
            device: key.clone(),
            samples: Vec::new(),
            write_sizes: Vec::new(),
        });
        rec.active += 1;
        rec.max_active = rec.max_active.max(rec.active);

        Ok(Box::new(MemorySink {
            name: device.unwrap_or(DEFAULT_NAME).to_string(),
            index: rec.sinks.len() - 1,
            recorder: self.recorder.clone(),
            fail_after: self.fail_write_after.get(&key).copied(),
            written: 0,
            frame_time: self.speed.map(|speed| {
                Duration::from_secs_f64(1.0 / (spec.sample_rate.max(1) as f64 * speed))
            }),
            channels: spec.channels.max(1) as usize,
        }))
    }
}

struct MemorySink {
    name: String,
    index: usize,
    recorder: Arc<Mutex<Recorder>>,
    fail_after: Option<usize>,
    written: usize,
    frame_time: Option<Duration>,
    channels: usize,
}

impl OutputSink for MemorySink {
    fn device_name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, samples: &[f32]) -> Result<(), PlaybackError> {
        if self.fail_after.is_some_and(|limit| self.written >= limit) {
            return Err(PlaybackError::StreamFailed(format!("{}: write failed", self.name)));
        }
        if let Some(frame_time) = self.frame_time {
            std::thread::sleep(frame_time * (samples.len() / self.channels) as u32);
        }
        let mut rec = lock(&self.recorder);
        let sink = &mut rec.sinks[self.index];
        sink.samples.extend_from_slice(samples);
        sink.write_sizes.push(samples.len());
        self.written += samples.len();
        Ok(())
    }

    fn finish(&mut self) -> Result<(), PlaybackError> {
        Ok(())
    }
}

impl Drop for MemorySink {
    fn drop(&mut self) {
        lock(&self.recorder).active -= 1;
    }
}

/// A buffer whose samples are all distinct, so replays and gaps are detectable.
pub fn ramp_buffer(frames: usize, sample_rate: u32, channels: u16) -> SampleBuffer {
    let total = frames * channels.max(1) as usize;
    let samples = (0..total)
        .map(|i| i as f32 / total.max(1) as f32)
        .collect();
    SampleBuffer::new(samples, sample_rate, channels)
}

/// Encode `samples` as a 16-bit PCM WAV file.
pub fn wav_bytes(samples: &[f32], sample_rate: u32, channels: u16) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let block_align = channels * 2;
    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for s in samples {
        let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}
