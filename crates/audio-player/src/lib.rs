//! Playback engine for decoded speech audio.
//!
//! The crate turns an in-memory [`buffer::SampleBuffer`] into device output through a
//! single [`controller::PlaybackController`]. Device access goes through the
//! [`output::AudioOutput`] seam so the engine can be driven by CPAL or by an in-memory
//! backend in tests.

pub mod buffer;
pub mod config;
pub mod controller;
pub mod decode;
pub mod device;
pub mod error;
pub mod fallback;
pub mod output;
pub mod stream;

mod playback;
mod queue;
mod resample;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
