//! Terminal hotkeys.

use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    /// Read the clipboard aloud, or pause/resume the active session.
    Speak,
    Stop,
    Quit,
}

pub const HELP: &str = "Space: read clipboard / pause / resume   s: stop   q, Esc or Ctrl+C: quit";

pub fn trigger_for_key(key: &KeyEvent) -> Option<Trigger> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(Trigger::Quit),
        KeyCode::Char(' ') => Some(Trigger::Speak),
        KeyCode::Char('s') | KeyCode::Char('S') => Some(Trigger::Stop),
        KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => Some(Trigger::Quit),
        _ => None,
    }
}

/// Forward key presses as triggers until quit is pressed or the receiver goes away.
pub fn spawn_key_listener(tx: Sender<Trigger>) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("hotkeys".into())
        .spawn(move || {
            loop {
                let key = match event::read() {
                    Ok(Event::Key(key)) => key,
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!("terminal input unavailable: {e}");
                        return;
                    }
                };
                let Some(trigger) = trigger_for_key(&key) else {
                    continue;
                };
                if tx.send(trigger).is_err() || trigger == Trigger::Quit {
                    return;
                }
            }
        })
        .context("spawn hotkey thread")
}
