//! Single-session playback state machine.
//!
//! [`PlaybackController`] owns the one playback session of the process. Commands
//! (`play`, `toggle_or_start`, `toggle_pause`, `stop`) are serialized through the worker
//! slot lock; session state lives behind a second lock paired with a [`Condvar`] that the
//! worker waits on while paused and that signals the return to idle.
//!
//! ## Threading
//! - At most one worker thread exists. `play` joins the previous worker before spawning.
//! - The worker observes commands only at chunk boundaries (see [`PlaybackSignal`]).
//! - A paused worker blocks on the condition variable; it never polls.
//! - `stop` never waits on the worker slot lock, so it stays bounded even while a `play`
//!   is joining a worker stuck on a hung device.

use std::convert::Infallible;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use crate::buffer::SampleBuffer;
use crate::config::PlaybackConfig;
use crate::device::DeviceRegistry;
use crate::fallback::{FallbackPolicy, PlaybackOutcome};
use crate::output::AudioOutput;
use crate::stream::{Flow, PlaybackSignal, StreamWriter};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
    /// Cancellation requested; the worker is draining toward `Idle`.
    Stopping,
}

/// Notifications for the trigger layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlaybackEvent {
    Started { total: usize, device: Option<String> },
    Paused { cursor: usize },
    Resumed { cursor: usize },
    Finished(PlaybackOutcome),
}

/// Point-in-time copy of the session record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaybackSnapshot {
    pub state: PlaybackState,
    /// Samples handed to the device so far.
    pub cursor: usize,
    /// Length of the current (or last) buffer in samples.
    pub total: usize,
    pub device: Option<String>,
    pub last_outcome: Option<PlaybackOutcome>,
}

struct Session {
    /// Bumped by every `play`; lets `stop` tell its session from a successor.
    generation: u64,
    state: PlaybackState,
    cursor: usize,
    total: usize,
    device: Option<String>,
    last_outcome: Option<PlaybackOutcome>,
}

struct Shared {
    session: Mutex<Session>,
    changed: Condvar,
    events: Mutex<Option<Sender<PlaybackEvent>>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: PlaybackEvent) {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = events.as_ref() {
            let _ = tx.send(event);
        }
    }
}

/// Control signal handed to the writer on behalf of the session.
struct SessionSignal<'a> {
    shared: &'a Shared,
}

impl PlaybackSignal for SessionSignal<'_> {
    fn checkpoint(&self, cursor: usize) -> Flow {
        let mut session = self.shared.lock();
        session.cursor = cursor;
        loop {
            match session.state {
                PlaybackState::Playing => return Flow::Continue,
                PlaybackState::Paused => {
                    session = self
                        .shared
                        .changed
                        .wait(session)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                PlaybackState::Stopping | PlaybackState::Idle => return Flow::Stop,
            }
        }
    }
}

pub struct PlaybackController {
    shared: Arc<Shared>,
    policy: FallbackPolicy,
    config: PlaybackConfig,
    /// Current worker. Held for the duration of every command, which serializes them.
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackController {
    pub fn new(output: Arc<dyn AudioOutput>, config: PlaybackConfig) -> Self {
        let policy = FallbackPolicy::new(
            DeviceRegistry::new(output.clone()),
            StreamWriter::new(output, config.clone()),
        );
        Self {
            shared: Arc::new(Shared {
                session: Mutex::new(Session {
                    generation: 0,
                    state: PlaybackState::Idle,
                    cursor: 0,
                    total: 0,
                    device: None,
                    last_outcome: None,
                }),
                changed: Condvar::new(),
                events: Mutex::new(None),
            }),
            policy,
            config,
            worker: Mutex::new(None),
        }
    }

    /// Receive playback events from now on. Replaces any previous subscriber.
    pub fn subscribe(&self) -> Receiver<PlaybackEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        *self.shared.events.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        rx
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.lock().state
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        let s = self.shared.lock();
        PlaybackSnapshot {
            state: s.state,
            cursor: s.cursor,
            total: s.total,
            device: s.device.clone(),
            last_outcome: s.last_outcome.clone(),
        }
    }

    /// Start playing `buffer`, stopping and joining any active session first.
    ///
    /// Returns once the new session is published as `Playing`; the audio is written by
    /// a worker thread.
    pub fn play(&self, buffer: SampleBuffer, device: Option<String>) {
        let mut worker = self.lock_worker();
        self.start_locked(&mut worker, buffer, device);
    }

    /// Idle: start `buffer`. Playing: pause. Paused: resume. Returns the new state.
    pub fn toggle_or_start(&self, buffer: SampleBuffer, device: Option<String>) -> PlaybackState {
        match self.toggle_or_start_with(device, || Ok::<_, Infallible>(buffer)) {
            Ok(state) => state,
            Err(never) => match never {},
        }
    }

    /// Like [`toggle_or_start`](Self::toggle_or_start), producing the buffer only when
    /// there is nothing to toggle.
    ///
    /// `load` runs while commands are serialized, so concurrent callers observe the
    /// session it starts. A failed load leaves the controller untouched.
    pub fn toggle_or_start_with<E>(
        &self,
        device: Option<String>,
        load: impl FnOnce() -> Result<SampleBuffer, E>,
    ) -> Result<PlaybackState, E> {
        let mut worker = self.lock_worker();
        if let Some(state) = self.toggle_locked() {
            return Ok(state);
        }
        let buffer = load()?;
        self.start_locked(&mut worker, buffer, device);
        Ok(PlaybackState::Playing)
    }

    /// Pause or resume the active session. Returns `None` when there is nothing to toggle.
    pub fn toggle_pause(&self) -> Option<PlaybackState> {
        let _worker = self.lock_worker();
        self.toggle_locked()
    }

    /// Stop the active session and wait (bounded by the configured stop timeout) for
    /// the worker to exit.
    ///
    /// Returns `false` if the worker was still running when the timeout elapsed; the
    /// next `play` joins it before starting a new one. Does not queue behind other
    /// commands, so the bound holds even while a `play` is joining a stuck worker.
    pub fn stop(&self) -> bool {
        let timeout = self.config.stop_timeout;
        let generation = self.request_stop();
        let (session, _) = self
            .shared
            .changed
            .wait_timeout_while(self.shared.lock(), timeout, |s| {
                s.generation == generation && s.state != PlaybackState::Idle
            })
            .unwrap_or_else(PoisonError::into_inner);
        let ended = session.generation != generation || session.state == PlaybackState::Idle;
        drop(session);

        if self.reap_finished_worker() || ended {
            return true;
        }
        tracing::warn!(
            timeout_ms = timeout.as_millis() as u64,
            "playback worker did not stop in time"
        );
        false
    }

    /// Block until the session is idle or `timeout` elapses.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let session = self.shared.lock();
        let (session, _) = self
            .shared
            .changed
            .wait_timeout_while(session, timeout, |s| s.state != PlaybackState::Idle)
            .unwrap_or_else(PoisonError::into_inner);
        session.state == PlaybackState::Idle
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn toggle_locked(&self) -> Option<PlaybackState> {
        let mut session = self.shared.lock();
        let (next, event) = match session.state {
            PlaybackState::Playing => (
                PlaybackState::Paused,
                PlaybackEvent::Paused {
                    cursor: session.cursor,
                },
            ),
            PlaybackState::Paused => (
                PlaybackState::Playing,
                PlaybackEvent::Resumed {
                    cursor: session.cursor,
                },
            ),
            PlaybackState::Idle | PlaybackState::Stopping => return None,
        };
        session.state = next;
        drop(session);
        self.shared.changed.notify_all();
        tracing::info!(state = ?next, "playback toggled");
        self.shared.emit(event);
        Some(next)
    }

    fn start_locked(
        &self,
        worker: &mut Option<JoinHandle<()>>,
        buffer: SampleBuffer,
        device: Option<String>,
    ) {
        self.stop_locked(worker);

        {
            let mut session = self.shared.lock();
            session.generation += 1;
            session.state = PlaybackState::Playing;
            session.cursor = 0;
            session.total = buffer.len();
            session.device = device.clone();
            session.last_outcome = None;
        }
        tracing::info!(
            samples = buffer.len(),
            rate_hz = buffer.sample_rate(),
            channels = buffer.channels(),
            device = device.as_deref().unwrap_or("default"),
            "playback started"
        );
        self.shared.emit(PlaybackEvent::Started {
            total: buffer.len(),
            device: device.clone(),
        });

        let shared = self.shared.clone();
        let policy = self.policy.clone();
        *worker = Some(thread::spawn(move || {
            run_session(&shared, &policy, buffer, device);
        }));
    }

    /// Move an active session to `Stopping` and wake its worker. Returns the session's
    /// generation.
    fn request_stop(&self) -> u64 {
        let mut session = self.shared.lock();
        if matches!(session.state, PlaybackState::Playing | PlaybackState::Paused) {
            session.state = PlaybackState::Stopping;
            tracing::info!(cursor = session.cursor, "playback stop requested");
        }
        let generation = session.generation;
        drop(session);
        self.shared.changed.notify_all();
        generation
    }

    /// Stop the active session and join its worker, however long that takes.
    fn stop_locked(&self, worker: &mut Option<JoinHandle<()>>) {
        self.request_stop();
        if let Some(handle) = worker.take() {
            self.join_worker(handle);
        }
    }

    /// Join the worker in the slot if it has already exited. Never blocks on the slot:
    /// a `play` holding it is joining that worker itself.
    fn reap_finished_worker(&self) -> bool {
        let mut worker = match self.worker.try_lock() {
            Ok(worker) => worker,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
            Err(TryLockError::WouldBlock) => return false,
        };
        if !worker.as_ref().is_some_and(JoinHandle::is_finished) {
            return false;
        }
        if let Some(handle) = worker.take() {
            self.join_worker(handle);
        }
        true
    }

    fn join_worker(&self, handle: JoinHandle<()>) {
        if handle.join().is_err() {
            tracing::error!("playback worker panicked");
            let mut session = self.shared.lock();
            session.state = PlaybackState::Idle;
            drop(session);
            self.shared.changed.notify_all();
        }
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_session(
    shared: &Shared,
    policy: &FallbackPolicy,
    buffer: SampleBuffer,
    device: Option<String>,
) {
    let signal = SessionSignal { shared };
    let outcome = policy.play(&buffer, device.as_deref(), &signal);

    let mut session = shared.lock();
    if matches!(outcome, PlaybackOutcome::Completed { .. }) {
        session.cursor = buffer.len();
    }
    session.state = PlaybackState::Idle;
    session.last_outcome = Some(outcome.clone());
    let cursor = session.cursor;
    drop(session);
    shared.changed.notify_all();

    tracing::info!(cursor, outcome = ?outcome, "playback finished");
    shared.emit(PlaybackEvent::Finished(outcome));
}
