//! Entry point for the "speak" trigger.

use std::sync::Arc;

use audio_player::buffer::SampleBuffer;
use audio_player::controller::{PlaybackController, PlaybackState};
use audio_player::decode::decode_audio;
use audio_player::error::PlaybackError;

use crate::clipboard::TextSource;
use crate::error::ReadAloudError;
use crate::speech::SpeechSynthesizer;

/// What a speak trigger ended up doing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpeakAction {
    /// New playback started with this many samples.
    Started { samples: usize },
    Paused,
    Resumed,
}

pub struct RequestDispatcher {
    controller: Arc<PlaybackController>,
    text: Arc<dyn TextSource>,
    speech: Arc<dyn SpeechSynthesizer>,
    device: Option<String>,
}

impl RequestDispatcher {
    pub fn new(
        controller: Arc<PlaybackController>,
        text: Arc<dyn TextSource>,
        speech: Arc<dyn SpeechSynthesizer>,
        device: Option<String>,
    ) -> Self {
        Self {
            controller,
            text,
            speech,
            device,
        }
    }

    /// Toggle pause when a session is active; otherwise read, synthesize, decode and play.
    ///
    /// The fetch runs inside the controller's toggle-or-start command, so a second
    /// trigger waits for it and then toggles the session it started instead of
    /// fetching again.
    pub fn speak(&self) -> Result<SpeakAction, ReadAloudError> {
        let mut started = None;
        let load = || -> Result<SampleBuffer, ReadAloudError> {
            let buffer = self.fetch()?;
            started = Some(buffer.len());
            Ok(buffer)
        };
        let state = self
            .controller
            .toggle_or_start_with(self.device.clone(), load)?;

        let action = match (started, state) {
            (Some(samples), _) => SpeakAction::Started { samples },
            (None, PlaybackState::Paused) => SpeakAction::Paused,
            (None, _) => SpeakAction::Resumed,
        };
        tracing::debug!(?action, "speak handled");
        Ok(action)
    }

    fn fetch(&self) -> Result<SampleBuffer, ReadAloudError> {
        let text = self.text.read_text()?;
        if text.trim().is_empty() {
            return Err(ReadAloudError::EmptyInput);
        }
        tracing::info!(chars = text.chars().count(), "reading clipboard aloud");
        tracing::debug!(%text, "clipboard text");

        let audio = self.speech.synthesize(&text)?;
        let buffer = decode_audio(audio, self.speech.format()).map_err(|e| match e {
            PlaybackError::DecodeFailed(msg) => ReadAloudError::DecodeFailed(msg),
            other => ReadAloudError::DecodeFailed(other.to_string()),
        })?;
        tracing::info!(
            samples = buffer.len(),
            rate = buffer.sample_rate(),
            channels = buffer.channels(),
            "speech decoded"
        );
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Barrier, Mutex};
    use std::thread;
    use std::time::Duration;

    use audio_player::config::PlaybackConfig;
    use audio_player::controller::PlaybackEvent;
    use audio_player::fallback::PlaybackOutcome;
    use audio_player::testing::{MemoryOutput, wav_bytes};

    use super::*;

    struct FixedText(Mutex<Result<String, ReadAloudError>>);

    impl FixedText {
        fn new(text: &str) -> Arc<Self> {
            Arc::new(Self(Mutex::new(Ok(text.to_string()))))
        }

        fn failing(err: ReadAloudError) -> Arc<Self> {
            Arc::new(Self(Mutex::new(Err(err))))
        }
    }

    impl TextSource for FixedText {
        fn read_text(&self) -> Result<String, ReadAloudError> {
            self.0.lock().unwrap().clone()
        }
    }

    struct FakeSpeech {
        reply: Result<Vec<u8>, ReadAloudError>,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl FakeSpeech {
        fn wav(samples: &[f32], rate: u32) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(wav_bytes(samples, rate, 1)),
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            })
        }

        fn slow(mut self: Arc<Self>, delay: Duration) -> Arc<Self> {
            Arc::get_mut(&mut self).unwrap().delay = delay;
            self
        }

        fn reply(reply: Result<Vec<u8>, ReadAloudError>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl SpeechSynthesizer for FakeSpeech {
        fn synthesize(&self, _text: &str) -> Result<Vec<u8>, ReadAloudError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.delay);
            self.reply.clone()
        }

        fn format(&self) -> &str {
            "wav"
        }
    }

    fn tone(frames: usize) -> Vec<f32> {
        (0..frames).map(|i| ((i % 100) as f32 / 100.0) - 0.5).collect()
    }

    fn setup(
        output: MemoryOutput,
        text: Arc<FixedText>,
        speech: Arc<FakeSpeech>,
    ) -> (Arc<MemoryOutput>, Arc<PlaybackController>, RequestDispatcher) {
        let output = Arc::new(output);
        let config = PlaybackConfig {
            chunk_frames: 256,
            ..PlaybackConfig::default()
        };
        let controller = Arc::new(PlaybackController::new(output.clone(), config));
        let dispatcher = RequestDispatcher::new(controller.clone(), text, speech, None);
        (output, controller, dispatcher)
    }

    #[test]
    fn speak_plays_decoded_clipboard_audio() {
        let samples = tone(4_000);
        let speech = FakeSpeech::wav(&samples, 16_000);
        let (output, controller, dispatcher) =
            setup(MemoryOutput::new(), FixedText::new("Hello"), speech.clone());
        let events = controller.subscribe();

        let action = dispatcher.speak().unwrap();

        assert_eq!(action, SpeakAction::Started { samples: 4_000 });
        assert!(controller.wait_idle(Duration::from_secs(5)));
        assert_eq!(speech.calls(), 1);
        let written = output.written(None);
        assert_eq!(written.len(), samples.len());
        for (got, want) in written.iter().zip(&samples) {
            assert!((got - want).abs() < 1e-3);
        }
        let finished = events
            .iter()
            .find(|e| matches!(e, PlaybackEvent::Finished(_)))
            .unwrap();
        assert!(matches!(
            finished,
            PlaybackEvent::Finished(PlaybackOutcome::Completed { .. })
        ));
    }

    #[test]
    fn blank_clipboard_is_empty_input() {
        let speech = FakeSpeech::wav(&tone(100), 16_000);
        let (output, controller, dispatcher) =
            setup(MemoryOutput::new(), FixedText::new("  \n\t "), speech.clone());

        assert_eq!(dispatcher.speak(), Err(ReadAloudError::EmptyInput));
        assert_eq!(speech.calls(), 0);
        assert!(output.opens().is_empty());
        assert_eq!(controller.state(), PlaybackState::Idle);
    }

    #[test]
    fn clipboard_error_is_reported() {
        let speech = FakeSpeech::wav(&tone(100), 16_000);
        let (_output, _controller, dispatcher) = setup(
            MemoryOutput::new(),
            FixedText::failing(ReadAloudError::Clipboard("no display".into())),
            speech.clone(),
        );

        assert_eq!(
            dispatcher.speak(),
            Err(ReadAloudError::Clipboard("no display".into()))
        );
        assert_eq!(speech.calls(), 0);
    }

    #[test]
    fn request_failure_leaves_controller_idle() {
        let speech = FakeSpeech::reply(Err(ReadAloudError::RequestFailed("Invalid voice".into())));
        let (output, controller, dispatcher) =
            setup(MemoryOutput::new(), FixedText::new("Hello"), speech);

        assert_eq!(
            dispatcher.speak(),
            Err(ReadAloudError::RequestFailed("Invalid voice".into()))
        );
        assert!(output.opens().is_empty());
        assert_eq!(controller.state(), PlaybackState::Idle);
    }

    #[test]
    fn undecodable_audio_is_decode_failed() {
        let speech = FakeSpeech::reply(Ok(b"definitely not audio".to_vec()));
        let (output, controller, dispatcher) =
            setup(MemoryOutput::new(), FixedText::new("Hello"), speech);

        assert!(matches!(
            dispatcher.speak(),
            Err(ReadAloudError::DecodeFailed(_))
        ));
        assert!(output.opens().is_empty());
        assert_eq!(controller.state(), PlaybackState::Idle);
    }

    #[test]
    fn second_speak_pauses_and_third_resumes() {
        let speech = FakeSpeech::wav(&tone(32_000), 16_000);
        let (_output, controller, dispatcher) = setup(
            MemoryOutput::new().paced(1.0),
            FixedText::new("Hello"),
            speech.clone(),
        );

        assert!(matches!(dispatcher.speak(), Ok(SpeakAction::Started { .. })));
        assert_eq!(dispatcher.speak(), Ok(SpeakAction::Paused));
        assert_eq!(controller.state(), PlaybackState::Paused);
        assert_eq!(dispatcher.speak(), Ok(SpeakAction::Resumed));
        assert_eq!(controller.state(), PlaybackState::Playing);
        assert_eq!(speech.calls(), 1);

        assert!(controller.stop());
    }

    #[test]
    fn concurrent_triggers_start_one_session() {
        const TRIGGERS: usize = 16;
        let speech = FakeSpeech::wav(&tone(48_000), 16_000).slow(Duration::from_millis(50));
        let (output, controller, dispatcher) = setup(
            MemoryOutput::new().paced(1.0),
            FixedText::new("Hello"),
            speech.clone(),
        );
        let dispatcher = Arc::new(dispatcher);
        let barrier = Arc::new(Barrier::new(TRIGGERS));

        let handles: Vec<_> = (0..TRIGGERS)
            .map(|_| {
                let dispatcher = dispatcher.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    dispatcher.speak()
                })
            })
            .collect();
        let actions: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();

        let started = actions
            .iter()
            .filter(|a| matches!(a, SpeakAction::Started { .. }))
            .count();
        assert_eq!(started, 1);
        assert_eq!(speech.calls(), 1);
        assert!(output.max_active_sinks() <= 1);

        assert!(controller.stop());
        assert_eq!(output.active_sinks(), 0);
    }
}
