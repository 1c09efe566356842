//! Chunked resampling for devices that cannot run at the buffer's sample rate.
//!
//! Uses Rubato's sinc resampler with a fixed input size equal to the writer chunk, so each
//! chunk the stream writer hands to the output is converted in one call. The last, shorter
//! chunk is processed as a partial block.
//!
//! The sinc filter delays its output by [`Resampler::output_delay`] frames. That many
//! leading frames are dropped, and [`ChunkResampler::flush`] pushes silence through the
//! filter so the end of the clip comes out. Total output is `input * ratio` frames.

use anyhow::{Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

/// Upper bound on silent blocks fed by `flush`; the filter delay is far shorter.
const MAX_FLUSH_BLOCKS: usize = 64;

pub(crate) struct ChunkResampler {
    resampler: Box<dyn Resampler<f32>>,
    channels: usize,
    chunk_frames: usize,
    ratio: f64,
    out_interleaved: Vec<f32>,
    /// Leading output frames still to discard.
    delay_left: usize,
    frames_in: u64,
    frames_out: u64,
}

impl ChunkResampler {
    pub(crate) fn new(
        src_rate: u32,
        dst_rate: u32,
        channels: usize,
        chunk_frames: usize,
    ) -> Result<Self> {
        if src_rate == 0 || dst_rate == 0 {
            return Err(anyhow!("invalid resample rates {src_rate} -> {dst_rate}"));
        }
        let channels = channels.max(1);
        let chunk_frames = chunk_frames.max(1);
        let ratio = dst_rate as f64 / src_rate as f64;

        let sinc_len = 128;
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: calculate_cutoff(sinc_len, window),
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window,
        };

        let resampler = Async::<f32>::new_sinc(
            ratio,
            1.1,
            &params,
            chunk_frames,
            channels,
            FixedAsync::Input,
        )
        .map_err(|e| anyhow!("resampler init: {e}"))?;

        let out_frames = resampler.output_frames_max();
        let delay = resampler.output_delay();
        tracing::info!(src_rate, dst_rate, channels, delay, "resampling output");
        Ok(Self {
            resampler: Box::new(resampler),
            channels,
            chunk_frames,
            ratio,
            out_interleaved: vec![0.0; out_frames * channels],
            delay_left: delay,
            frames_in: 0,
            frames_out: 0,
        })
    }

    /// Resample one writer chunk (at most `chunk_frames` frames, interleaved).
    pub(crate) fn process(&mut self, input: &[f32]) -> Result<&[f32]> {
        let frames = input.len() / self.channels;
        if frames == 0 {
            return Ok(&[]);
        }
        if frames > self.chunk_frames {
            return Err(anyhow!(
                "chunk of {frames} frames exceeds resampler block of {}",
                self.chunk_frames
            ));
        }
        self.frames_in += frames as u64;
        let (start, end) = self.run_block(input, frames)?;
        self.frames_out += (end - start) as u64;
        Ok(&self.out_interleaved[start * self.channels..end * self.channels])
    }

    /// Drain the filter delay line: the output still owed for everything passed to
    /// [`process`](Self::process).
    pub(crate) fn flush(&mut self) -> Result<Vec<f32>> {
        let expected = (self.frames_in as f64 * self.ratio).round() as u64;
        let silence = vec![0.0f32; self.chunk_frames * self.channels];
        let mut tail = Vec::new();
        for _ in 0..MAX_FLUSH_BLOCKS {
            if self.frames_out >= expected {
                break;
            }
            let (start, end) = self.run_block(&silence, self.chunk_frames)?;
            let owed = (expected - self.frames_out) as usize;
            let end = end.min(start + owed);
            tail.extend_from_slice(&self.out_interleaved[start * self.channels..end * self.channels]);
            self.frames_out += (end - start) as u64;
        }
        Ok(tail)
    }

    /// Resample `frames` frames into `out_interleaved`; returns the frame range past the
    /// filter delay.
    fn run_block(&mut self, input: &[f32], frames: usize) -> Result<(usize, usize)> {
        let input_adapter = InterleavedSlice::new(input, self.channels, frames)
            .map_err(|e| anyhow!("interleaved slice (input): {e}"))?;
        let out_capacity_frames = self.out_interleaved.len() / self.channels;
        let mut output_adapter =
            InterleavedSlice::new_mut(&mut self.out_interleaved, self.channels, out_capacity_frames)
                .map_err(|e| anyhow!("interleaved slice (output): {e}"))?;

        let indexing = Indexing {
            input_offset: 0,
            output_offset: 0,
            active_channels_mask: None,
            partial_len: (frames < self.chunk_frames).then_some(frames),
        };

        let (_nbr_in, nbr_out) = self
            .resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
            .map_err(|e| anyhow!("resampler process: {e}"))?;

        let skip = self.delay_left.min(nbr_out);
        self.delay_left -= skip;
        Ok((skip, nbr_out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_rates() {
        assert!(ChunkResampler::new(0, 48_000, 1, 256).is_err());
        assert!(ChunkResampler::new(16_000, 0, 1, 256).is_err());
    }

    #[test]
    fn rejects_oversized_chunk() {
        let mut r = ChunkResampler::new(16_000, 48_000, 1, 64).unwrap();
        assert!(r.process(&[0.0; 65]).is_err());
    }

    #[test]
    fn upsampling_produces_more_frames_over_time() {
        let mut r = ChunkResampler::new(16_000, 48_000, 2, 256).unwrap();
        let chunk = vec![0.0f32; 256 * 2];
        let mut produced = 0usize;
        for _ in 0..20 {
            produced += r.process(&chunk).unwrap().len();
        }
        // The filter delay holds some output back; steady state is 3x input.
        assert!(produced > 256 * 2 * 20 * 2);
        assert_eq!(produced % 2, 0);
    }

    fn resample_all(src_rate: u32, dst_rate: u32, input: &[f32], chunk: usize) -> Vec<f32> {
        let mut r = ChunkResampler::new(src_rate, dst_rate, 1, chunk).unwrap();
        let mut out = Vec::new();
        for block in input.chunks(chunk) {
            out.extend_from_slice(r.process(block).unwrap());
        }
        out.extend(r.flush().unwrap());
        out
    }

    #[test]
    fn flush_emits_full_length_including_tail() {
        // 24 kHz speech on a 48 kHz device; length is not a multiple of the chunk.
        let input = vec![0.25f32; 24_000 / 10 + 77];
        let out = resample_all(24_000, 48_000, &input, 512);
        assert_eq!(out.len(), input.len() * 2);

        // Well inside the clip the level is steady; the final frame is still signal,
        // not the silence that pads the delay line.
        let settled = out[out.len() - 400];
        assert!((settled - 0.25).abs() < 0.02, "settled {settled}");
        let last = out[out.len() - 1];
        assert!(last > 0.05, "last {last}");
    }

    #[test]
    fn leading_filter_delay_is_trimmed() {
        // An impulse at the first frame must come out near the first output frame.
        let mut input = vec![0.0f32; 2_048];
        input[0] = 1.0;
        let out = resample_all(16_000, 48_000, &input, 256);
        let peak = out
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert!(peak <= 8, "impulse peak at output frame {peak}");
    }

    #[test]
    fn flush_without_input_is_empty() {
        let mut r = ChunkResampler::new(16_000, 48_000, 2, 256).unwrap();
        assert!(r.flush().unwrap().is_empty());
    }
}
