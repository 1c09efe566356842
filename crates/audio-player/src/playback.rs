//! CPAL stream construction and the real-time output callback.
//!
//! The callback never blocks: it takes whatever the writer has queued, remaps channels
//! frame by frame and pads with silence when the queue runs dry.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, anyhow};
use cpal::traits::DeviceTrait;

use crate::queue::SharedAudio;

#[derive(Clone, Debug)]
pub(crate) struct CallbackConfig {
    /// Frames taken from the queue per refill.
    pub(crate) refill_max_frames: usize,
    /// Raised by the stream error callback; the sink reports it on the next write.
    pub(crate) failed: Arc<AtomicBool>,
}

/// Open a CPAL stream fed from `queue`, which holds interleaved `f32` audio at the
/// stream rate.
pub(crate) fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    queue: &Arc<SharedAudio>,
    cfg: CallbackConfig,
) -> Result<cpal::Stream> {
    use cpal::SampleFormat as F;
    match sample_format {
        F::F32 => build_stream::<f32>(device, config, queue, cfg),
        F::I16 => build_stream::<i16>(device, config, queue, cfg),
        F::I32 => build_stream::<i32>(device, config, queue, cfg),
        F::U16 => build_stream::<u16>(device, config, queue, cfg),
        other => Err(anyhow!("output sample format {other:?} is not supported")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: &Arc<SharedAudio>,
    cfg: CallbackConfig,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let out_channels = usize::from(config.channels.max(1));
    let mut pending = Pending::new(queue.channels(), cfg.refill_max_frames.max(1));

    let source = queue.clone();
    let on_error = {
        let queue = queue.clone();
        let failed = cfg.failed.clone();
        move |err: cpal::StreamError| {
            tracing::warn!("output stream error: {err}");
            failed.store(true, Ordering::Release);
            queue.close();
        }
    };

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            for out in data.chunks_mut(out_channels) {
                match pending.next_frame(&source) {
                    Some(frame) => {
                        for (ch, slot) in out.iter_mut().enumerate() {
                            *slot = T::from_sample(mapped_sample(frame, out_channels, ch));
                        }
                    }
                    None => out.fill(T::EQUILIBRIUM),
                }
            }
        },
        on_error,
        None,
    )?;
    Ok(stream)
}

/// Samples already taken from the queue, so the callback touches the lock once per refill.
struct Pending {
    samples: Vec<f32>,
    offset: usize,
    channels: usize,
    refill_frames: usize,
}

impl Pending {
    fn new(channels: usize, refill_frames: usize) -> Self {
        Self {
            samples: Vec::new(),
            offset: 0,
            channels: channels.max(1),
            refill_frames,
        }
    }

    fn next_frame(&mut self, queue: &SharedAudio) -> Option<&[f32]> {
        if self.offset + self.channels > self.samples.len() {
            self.samples = queue.pop_up_to(self.refill_frames)?;
            self.offset = 0;
            if self.samples.len() < self.channels {
                return None;
            }
        }
        let frame = &self.samples[self.offset..self.offset + self.channels];
        self.offset += self.channels;
        Some(frame)
    }
}

/// Sample for output channel `ch` given one source frame.
///
/// Stereo folds down to mono by averaging, mono fans out to every output channel, and
/// any other layout reuses the last source channel for extra outputs.
fn mapped_sample(frame: &[f32], out_channels: usize, ch: usize) -> f32 {
    match (frame.len(), out_channels) {
        (2, 1) => (frame[0] + frame[1]) * 0.5,
        (1, _) => frame[0],
        (n, _) => frame[ch.min(n - 1)],
    }
}
