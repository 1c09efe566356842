use std::time::Duration;

/// Playback tuning parameters shared by the writer, the CPAL output and the controller.
#[derive(Clone, Debug)]
pub struct PlaybackConfig {
    /// Frames written per device call; pause/stop are observed between chunks.
    pub chunk_frames: usize,
    /// Output queue depth in chunks (bounds latency between a write and the speaker).
    pub queue_chunks: usize,
    /// Longest a single device write may block before the device is considered lost.
    pub stall_timeout: Duration,
    /// How long `stop` waits for the worker before giving up on it.
    pub stop_timeout: Duration,
}

impl Default for PlaybackConfig {
    /// Defaults keep pause/stop latency in the tens of milliseconds at speech rates.
    fn default() -> Self {
        Self {
            chunk_frames: 512,
            queue_chunks: 2,
            stall_timeout: Duration::from_secs(2),
            stop_timeout: Duration::from_secs(1),
        }
    }
}

impl PlaybackConfig {
    /// Chunk size in samples for a given channel count.
    pub fn chunk_samples(&self, channels: u16) -> usize {
        self.chunk_frames.max(1) * channels.max(1) as usize
    }
}
