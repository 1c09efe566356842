use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Default)]
#[command(name = "clip-reader", version, about = "Read the clipboard aloud")]
pub struct Args {
    /// TOML config file; command-line flags override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Output device: id, index from --list-devices, or name substring
    #[arg(long)]
    pub device: Option<String>,

    /// Pick the output device interactively at startup
    #[arg(long, conflicts_with = "device")]
    pub choose_device: bool,

    /// Speech endpoint, e.g. http://localhost:8880/v1/audio/speech
    #[arg(long)]
    pub api_url: Option<String>,

    /// Voice identifier (voices can be mixed with '+')
    #[arg(long)]
    pub voice: Option<String>,

    /// Audio format requested from the speech service
    #[arg(long = "format")]
    pub response_format: Option<String>,

    /// Speech speed multiplier
    #[arg(long)]
    pub speed: Option<f32>,

    /// Frames per device write (lower => faster pause/stop, higher => less overhead)
    #[arg(long)]
    pub chunk_frames: Option<usize>,

    /// How long stop/quit waits for playback to wind down before giving up
    #[arg(long)]
    pub stop_timeout_ms: Option<u64>,

    /// Timeout for the speech request
    #[arg(long)]
    pub request_timeout_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_overrides() {
        let args = Args::try_parse_from([
            "clip-reader",
            "--device",
            "usb",
            "--voice",
            "af_sky+af+af_nicole",
            "--format",
            "wav",
            "--speed",
            "1.3",
        ])
        .unwrap();
        assert_eq!(args.device.as_deref(), Some("usb"));
        assert_eq!(args.voice.as_deref(), Some("af_sky+af+af_nicole"));
        assert_eq!(args.response_format.as_deref(), Some("wav"));
        assert_eq!(args.speed, Some(1.3));
        assert!(!args.list_devices);
    }

    #[test]
    fn device_and_choose_device_conflict() {
        let res = Args::try_parse_from(["clip-reader", "--device", "1", "--choose-device"]);
        assert!(res.is_err());
    }
}
