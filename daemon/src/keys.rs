/// Keyboard control surface.
///
/// A dedicated OS thread polls crossterm for key presses and forwards the
/// mapped [`ControlCommand`]s to the main event loop. The thread exits when
/// [`KeyReaderHandle::stop`] is called or the event loop goes away.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use tokio::sync::mpsc;

use crate::event::DaemonEvent;

/// How long one poll blocks before the stop flag is checked again.
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Persist history and exit.
    Quit,
    ResetAll,
    CycleMode,
    ToggleConfidence,
    ToggleRealTime,
    LoadHistory,
    IntervalUp,
    IntervalDown,
    RefreshSlower,
    RefreshFaster,
}

/// Key help shown in the header.
pub const KEY_HELP: &str = "q quit  r reset  m mode  c confidence  t real/game time  l load history  i/d interval  o/k refresh";

/// Maps a key press to its command. Ctrl+C quits.
pub fn parse_key(key: &KeyEvent) -> Option<ControlCommand> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    let KeyCode::Char(c) = key.code else {
        return None;
    };
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return (c == 'c').then_some(ControlCommand::Quit);
    }
    match c.to_ascii_lowercase() {
        'q' => Some(ControlCommand::Quit),
        'r' => Some(ControlCommand::ResetAll),
        'm' => Some(ControlCommand::CycleMode),
        'c' => Some(ControlCommand::ToggleConfidence),
        't' => Some(ControlCommand::ToggleRealTime),
        'l' => Some(ControlCommand::LoadHistory),
        'i' => Some(ControlCommand::IntervalUp),
        'd' => Some(ControlCommand::IntervalDown),
        'o' => Some(ControlCommand::RefreshSlower),
        'k' => Some(ControlCommand::RefreshFaster),
        _ => None,
    }
}

pub struct KeyReaderHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl KeyReaderHandle {
    /// Signals the reader thread to stop and waits for it.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Spawns the key reader thread. Commands are sent with `blocking_send`, so
/// the thread must not run inside the async runtime's worker threads.
pub fn start(tx: mpsc::Sender<DaemonEvent>) -> KeyReaderHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);

    let thread = std::thread::Builder::new()
        .name("key-reader".into())
        .spawn(move || {
            while !flag.load(Ordering::Relaxed) {
                match event::poll(POLL_TIMEOUT) {
                    Ok(false) => continue,
                    Ok(true) => {}
                    Err(e) => {
                        tracing::error!("terminal input unavailable: {e}");
                        break;
                    }
                }
                let command = match event::read() {
                    Ok(Event::Key(key)) => parse_key(&key),
                    Ok(_) => None,
                    Err(e) => {
                        tracing::warn!("failed to read terminal event: {e}");
                        None
                    }
                };
                if let Some(command) = command {
                    tracing::debug!(?command, "key command");
                    if tx.blocking_send(DaemonEvent::Control(command)).is_err() {
                        break;
                    }
                }
            }
        })
        .map_err(|e| tracing::error!("failed to spawn key reader: {e}"))
        .ok();

    KeyReaderHandle { stop, thread }
}
