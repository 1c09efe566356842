//! Configuration loading and resolution.
//!
//! Values come from built-in defaults, then an optional TOML file, then command-line flags.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use audio_player::config::PlaybackConfig;
use serde::Deserialize;

use crate::cli::Args;

pub const DEFAULT_API_URL: &str = "http://localhost:8880/v1/audio/speech";
pub const DEFAULT_VOICE: &str = "af_sky+af_bella";
pub const DEFAULT_FORMAT: &str = "mp3";
const DEFAULT_SPEED: f32 = 1.0;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 60_000;

/// Config file schema. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub api_url: Option<String>,
    pub voice: Option<String>,
    pub response_format: Option<String>,
    pub speed: Option<f32>,
    /// Output device choice (id, index or name substring).
    pub device: Option<String>,
    pub chunk_frames: Option<usize>,
    pub stop_timeout_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
}

/// Fully resolved runtime configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct ReaderConfig {
    pub api_url: String,
    pub voice: String,
    pub response_format: String,
    pub speed: f32,
    pub device: Option<String>,
    pub chunk_frames: usize,
    pub stop_timeout: Duration,
    pub request_timeout: Duration,
}

/// Read and parse a TOML config file.
pub fn load_file(path: &Path) -> Result<FileConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read config {}", path.display()))?;
    parse(&raw).with_context(|| format!("parse config {}", path.display()))
}

fn parse(raw: &str) -> Result<FileConfig> {
    Ok(toml::from_str(raw)?)
}

impl ReaderConfig {
    /// Merge defaults, file values and flag overrides, then validate.
    pub fn resolve(args: &Args, file: FileConfig) -> Result<Self> {
        let playback = PlaybackConfig::default();
        let config = Self {
            api_url: pick(args.api_url.clone(), file.api_url, DEFAULT_API_URL),
            voice: pick(args.voice.clone(), file.voice, DEFAULT_VOICE),
            response_format: pick(
                args.response_format.clone(),
                file.response_format,
                DEFAULT_FORMAT,
            ),
            speed: args.speed.or(file.speed).unwrap_or(DEFAULT_SPEED),
            device: normalize(args.device.clone().or(file.device)),
            chunk_frames: args
                .chunk_frames
                .or(file.chunk_frames)
                .unwrap_or(playback.chunk_frames),
            stop_timeout: args
                .stop_timeout_ms
                .or(file.stop_timeout_ms)
                .map(Duration::from_millis)
                .unwrap_or(playback.stop_timeout),
            request_timeout: Duration::from_millis(
                args.request_timeout_ms
                    .or(file.request_timeout_ms)
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
            ),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !self.speed.is_finite() || self.speed <= 0.0 {
            bail!("speed must be a positive number, got {}", self.speed);
        }
        if self.chunk_frames == 0 {
            bail!("chunk_frames must be at least 1");
        }
        if self.api_url.is_empty() {
            bail!("api_url must not be empty");
        }
        if self.voice.is_empty() {
            bail!("voice must not be empty");
        }
        Ok(())
    }

    /// Playback engine settings derived from this config.
    pub fn playback(&self) -> PlaybackConfig {
        PlaybackConfig {
            chunk_frames: self.chunk_frames,
            stop_timeout: self.stop_timeout,
            ..PlaybackConfig::default()
        }
    }
}

fn pick(flag: Option<String>, file: Option<String>, default: &str) -> String {
    normalize(flag.or(file)).unwrap_or_else(|| default.to_string())
}

fn normalize(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
