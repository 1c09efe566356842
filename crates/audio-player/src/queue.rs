//! Bounded hand-off between a blocking writer and the CPAL callback.
//!
//! The writer blocks while the queue is full; the real-time callback drains it without
//! blocking. Queue depth bounds how much audio is still audible after a pause or stop.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Interleaved `f32` samples, at most `capacity` of them buffered.
///
/// One condition variable announces every change (push, pop, close). The `closed`
/// flag shares the sample mutex.
pub(crate) struct SharedAudio {
    channels: usize,
    capacity: usize,
    state: Mutex<QueueState>,
    changed: Condvar,
}

struct QueueState {
    samples: VecDeque<f32>,
    closed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PushError {
    /// Stream error or teardown.
    Closed,
    /// The callback freed no space within the stall timeout.
    Stalled,
}

impl SharedAudio {
    pub(crate) fn new(channels: usize, capacity: usize) -> Self {
        let channels = channels.max(1);
        Self {
            channels,
            capacity: capacity.max(channels),
            state: Mutex::new(QueueState {
                samples: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            changed: Condvar::new(),
        }
    }

    pub(crate) fn channels(&self) -> usize {
        self.channels
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock().samples.len()
    }

    /// Refuse further pushes and wake every waiter.
    pub(crate) fn close(&self) {
        self.lock().closed = true;
        self.changed.notify_all();
    }

    /// Append `samples`, waiting for room as needed.
    ///
    /// A wait that sees no progress for `stall_timeout` fails with [`PushError::Stalled`].
    pub(crate) fn push_interleaved(
        &self,
        samples: &[f32],
        stall_timeout: Duration,
    ) -> Result<(), PushError> {
        let mut rest = samples;
        while !rest.is_empty() {
            let (mut state, wait) = self
                .changed
                .wait_timeout_while(self.lock(), stall_timeout, |s| {
                    !s.closed && s.samples.len() >= self.capacity
                })
                .unwrap_or_else(PoisonError::into_inner);
            if state.closed {
                return Err(PushError::Closed);
            }
            if wait.timed_out() && state.samples.len() >= self.capacity {
                return Err(PushError::Stalled);
            }

            let n = (self.capacity - state.samples.len()).min(rest.len());
            let (now, later) = rest.split_at(n);
            state.samples.extend(now);
            rest = later;
            drop(state);
            self.changed.notify_all();
        }
        Ok(())
    }

    /// Take up to `max_frames` whole frames without waiting. `None` when none are buffered.
    pub(crate) fn pop_up_to(&self, max_frames: usize) -> Option<Vec<f32>> {
        let mut state = self.lock();
        let frames = (state.samples.len() / self.channels).min(max_frames);
        if frames == 0 {
            return None;
        }
        let taken: Vec<f32> = state.samples.drain(..frames * self.channels).collect();
        drop(state);
        self.changed.notify_all();
        Some(taken)
    }

    /// Wait until the callback consumed everything (`true`), or until close/timeout.
    pub(crate) fn wait_drained(&self, timeout: Duration) -> bool {
        let (state, _) = self
            .changed
            .wait_timeout_while(self.lock(), timeout, |s| !s.closed && !s.samples.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        state.samples.is_empty()
    }
}
