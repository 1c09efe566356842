//! Process wiring: device selection, the trigger loop and shutdown.

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use audio_player::controller::{PlaybackController, PlaybackEvent};
use audio_player::device::{DeviceDescriptor, DeviceRegistry};
use audio_player::fallback::PlaybackOutcome;
use audio_player::output::{AudioOutput, CpalOutput};
use crossbeam_channel::{Receiver, select};

use crate::clipboard::SystemClipboard;
use crate::config::ReaderConfig;
use crate::dispatcher::{RequestDispatcher, SpeakAction};
use crate::error::ReadAloudError;
use crate::hotkeys::{self, HELP, Trigger};
use crate::speech::SpeechClient;
use crate::term::{self, RawMode};

/// Print the output devices `--device` accepts.
pub fn list_devices(config: &ReaderConfig) -> Result<()> {
    let output: Arc<dyn AudioOutput> = Arc::new(CpalOutput::new(config.playback()));
    let devices = DeviceRegistry::new(output)
        .list()
        .context("enumerate output devices")?;
    let mut out = io::stdout().lock();
    write_device_list(&mut out, &devices)?;
    Ok(())
}

fn write_device_list(out: &mut impl Write, devices: &[DeviceDescriptor]) -> io::Result<()> {
    if devices.is_empty() {
        writeln!(out, "No output devices found.")?;
    }
    for (index, d) in devices.iter().enumerate() {
        writeln!(
            out,
            "#{index} {}: {} ({} ch, {} Hz)",
            d.id, d.name, d.max_output_channels, d.sample_rate
        )?;
    }
    Ok(())
}

/// Run until quit. Returns once playback has wound down; exits the process outright
/// if it does not within the stop timeout.
pub fn run(config: ReaderConfig, choose_device: bool) -> Result<()> {
    let playback = config.playback();
    let output: Arc<dyn AudioOutput> = Arc::new(CpalOutput::new(playback.clone()));
    let registry = DeviceRegistry::new(output.clone());

    let device = if choose_device {
        let stdin = io::stdin();
        prompt_device(&registry, &mut stdin.lock(), &mut io::stdout())?
    } else {
        select_device(&registry, config.device.as_deref())
    };
    tracing::info!(
        device = device.as_deref().unwrap_or("default"),
        api = %config.api_url,
        voice = %config.voice,
        "clip-reader ready"
    );

    let controller = Arc::new(PlaybackController::new(output, playback));
    let events = controller.subscribe();
    let dispatcher = Arc::new(RequestDispatcher::new(
        controller.clone(),
        Arc::new(SystemClipboard),
        Arc::new(SpeechClient::new(&config)),
        device,
    ));

    let (tx, triggers) = crossbeam_channel::unbounded();
    let signal_tx = tx.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        signal_tx.send(Trigger::Quit).ok();
    }) {
        tracing::warn!("ctrl-c handler not installed: {e}");
    }

    let raw = match RawMode::enable() {
        Ok(raw) => Some(raw),
        Err(e) => {
            tracing::warn!("raw terminal mode unavailable, hotkeys disabled: {e}");
            None
        }
    };
    if raw.is_some() {
        hotkeys::spawn_key_listener(tx)?;
    } else {
        drop(tx);
    }
    term::say(HELP);

    trigger_loop(&controller, &dispatcher, &triggers, &events);
    shutdown(&controller, raw)
}

fn trigger_loop(
    controller: &Arc<PlaybackController>,
    dispatcher: &Arc<RequestDispatcher>,
    triggers: &Receiver<Trigger>,
    events: &Receiver<PlaybackEvent>,
) {
    loop {
        select! {
            recv(triggers) -> trigger => match trigger {
                Ok(Trigger::Speak) => spawn_speak(dispatcher.clone()),
                Ok(Trigger::Stop) => {
                    if !controller.stop() {
                        tracing::warn!("playback did not stop within the timeout");
                    }
                }
                Ok(Trigger::Quit) | Err(_) => return,
            },
            recv(events) -> event => {
                if let Ok(event) = event {
                    term::say(describe_event(&event));
                }
            }
        }
    }
}

/// Speak triggers run off the loop thread so stop and quit stay responsive while
/// the speech request is in flight.
fn spawn_speak(dispatcher: Arc<RequestDispatcher>) {
    let spawned = thread::Builder::new()
        .name("speak".into())
        .spawn(move || match dispatcher.speak() {
            Ok(SpeakAction::Started { samples }) => tracing::debug!(samples, "speak started playback"),
            Ok(_) => {}
            Err(ReadAloudError::EmptyInput) => term::say(ReadAloudError::EmptyInput.to_string()),
            Err(e) => {
                tracing::warn!("speak failed: {e}");
                term::say(format!("Error: {e}"));
            }
        });
    if let Err(e) = spawned {
        tracing::error!("spawn speak thread: {e}");
    }
}

fn shutdown(controller: &PlaybackController, raw: Option<RawMode>) -> Result<()> {
    term::say("Exiting...");
    let stopped = controller.stop();
    drop(raw);
    if !stopped {
        tracing::warn!("playback worker did not exit in time; terminating");
        std::process::exit(0);
    }
    Ok(())
}

fn describe_event(event: &PlaybackEvent) -> String {
    match event {
        PlaybackEvent::Started { total: _, device } => format!(
            "Playing on {}",
            device.as_deref().unwrap_or("default device")
        ),
        PlaybackEvent::Paused { .. } => "Paused.".to_string(),
        PlaybackEvent::Resumed { .. } => "Resumed.".to_string(),
        PlaybackEvent::Finished(PlaybackOutcome::Completed { device }) => {
            format!("Finished ({device}).")
        }
        PlaybackEvent::Finished(PlaybackOutcome::Stopped) => "Stopped.".to_string(),
        PlaybackEvent::Finished(PlaybackOutcome::Failed(e)) => format!("Playback failed: {e}"),
    }
}

/// Resolve a configured device choice; unknown choices fall back to the default device.
fn select_device(registry: &DeviceRegistry, choice: Option<&str>) -> Option<String> {
    let choice = choice?;
    match registry.resolve(choice) {
        Ok(Some(d)) => {
            tracing::info!(id = %d.id, name = %d.name, "output device selected");
            Some(d.id)
        }
        Ok(None) => {
            tracing::warn!(choice, "no output device matches; using the default device");
            None
        }
        Err(e) => {
            tracing::warn!(choice, "device lookup failed, using the default device: {e}");
            None
        }
    }
}

/// Ask whether to use the default device and, if not, which one.
fn prompt_device(
    registry: &DeviceRegistry,
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> Result<Option<String>> {
    write!(out, "Do you want to use the default audio device? (y/n): ")?;
    out.flush()?;
    if !read_answer(input)?.eq_ignore_ascii_case("n") {
        return Ok(None);
    }

    let devices = registry.list().context("enumerate output devices")?;
    writeln!(out, "Available audio devices:")?;
    write_device_list(out, &devices)?;
    write!(out, "Enter the ID of the audio device to use: ")?;
    out.flush()?;
    let answer = read_answer(input)?;

    match registry.resolve(&answer)? {
        Some(d) => {
            writeln!(out, "Audio device set to: {}", d.name)?;
            Ok(Some(d.id))
        }
        None => {
            writeln!(out, "Invalid device ID. Default audio device will be used.")?;
            Ok(None)
        }
    }
}

fn read_answer(input: &mut impl BufRead) -> Result<String> {
    let mut line = String::new();
    input.read_line(&mut line).context("read answer")?;
    Ok(line.trim().to_string())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use audio_player::error::PlaybackError;
    use audio_player::testing::MemoryOutput;

    use super::*;

    fn device(id: &str, name: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            id: id.to_string(),
            name: name.to_string(),
            max_output_channels: 2,
            sample_rate: 48_000,
        }
    }

    fn registry() -> DeviceRegistry {
        DeviceRegistry::new(Arc::new(
            MemoryOutput::new()
                .with_device(device("dev-a", "Built-in Speakers"))
                .with_device(device("dev-b", "USB Headset")),
        ))
    }

    fn prompt(answers: &str) -> (Option<String>, String) {
        let mut out = Vec::new();
        let chosen = prompt_device(&registry(), &mut Cursor::new(answers), &mut out).unwrap();
        (chosen, String::from_utf8(out).unwrap())
    }

    #[test]
    fn device_list_format() {
        let mut out = Vec::new();
        write_device_list(&mut out, &[device("dev-a", "Built-in Speakers")]).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "#0 dev-a: Built-in Speakers (2 ch, 48000 Hz)\n"
        );
    }

    #[test]
    fn prompt_default_answer_keeps_default() {
        let (chosen, out) = prompt("y\n");
        assert_eq!(chosen, None);
        assert!(!out.contains("Available audio devices"));
    }

    #[test]
    fn prompt_picks_listed_index() {
        let (chosen, out) = prompt("n\n1\n");
        assert_eq!(chosen.as_deref(), Some("dev-b"));
        assert!(out.contains("#1 dev-b: USB Headset"));
        assert!(out.contains("Audio device set to: USB Headset"));
    }

    #[test]
    fn prompt_invalid_choice_falls_back() {
        let (chosen, out) = prompt("N\n42\n");
        assert_eq!(chosen, None);
        assert!(out.contains("Invalid device ID"));
    }

    #[test]
    fn configured_choice_resolves_by_name() {
        assert_eq!(select_device(&registry(), Some("usb")).as_deref(), Some("dev-b"));
        assert_eq!(select_device(&registry(), Some("nothing-like-it")), None);
        assert_eq!(select_device(&registry(), None), None);
    }

    #[test]
    fn events_read_naturally() {
        assert_eq!(
            describe_event(&PlaybackEvent::Finished(PlaybackOutcome::Stopped)),
            "Stopped."
        );
        assert_eq!(
            describe_event(&PlaybackEvent::Finished(PlaybackOutcome::Failed(
                PlaybackError::StreamFailed("device lost".into())
            ))),
            format!(
                "Playback failed: {}",
                PlaybackError::StreamFailed("device lost".into())
            )
        );
    }
}
