//! Global hotkey bridge
//!
//! Key listeners cannot yield to the async runtime, so the bridge runs on a
//! dedicated OS thread and posts commands into the bus over a thread-safe
//! channel. The bus resolves `Run`/`Stop` against the currently bound
//! workflow; macro commands are forwarded to observers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossterm::event::{Event, KeyCode, KeyEventKind};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Scheduler commands a hotkey can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotkeyCommand {
    /// Run the currently bound workflow.
    Run,
    /// Stop the current run.
    Stop,
    /// Begin UI-side input recording.
    MacroStart,
    /// End UI-side input recording.
    MacroStop,
}

impl HotkeyCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::Stop => "stop",
            Self::MacroStart => "macro_start",
            Self::MacroStop => "macro_stop",
        }
    }
}

/// Key bindings for the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HotkeyBindings {
    pub run: KeyCode,
    pub stop: KeyCode,
    pub macro_start: KeyCode,
    pub macro_stop: KeyCode,
}

impl Default for HotkeyBindings {
    fn default() -> Self {
        Self {
            run: KeyCode::F(5),
            stop: KeyCode::F(6),
            macro_start: KeyCode::F(9),
            macro_stop: KeyCode::F(10),
        }
    }
}

impl HotkeyBindings {
    /// Map a key press to a command.
    pub fn command_for(&self, code: KeyCode) -> Option<HotkeyCommand> {
        if code == self.run {
            Some(HotkeyCommand::Run)
        } else if code == self.stop {
            Some(HotkeyCommand::Stop)
        } else if code == self.macro_start {
            Some(HotkeyCommand::MacroStart)
        } else if code == self.macro_stop {
            Some(HotkeyCommand::MacroStop)
        } else {
            None
        }
    }
}

/// The listener thread plus its shutdown flag.
pub struct HotkeyBridge {
    shutdown: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl HotkeyBridge {
    /// Spawn the listener thread. Commands arrive on `tx`; the receiver
    /// side lives on the bus.
    pub fn start(bindings: HotkeyBindings, tx: mpsc::Sender<HotkeyCommand>) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();

        let thread = std::thread::Builder::new()
            .name("hotkey-bridge".into())
            .spawn(move || {
                debug!("hotkey bridge thread started");
                while !flag.load(Ordering::SeqCst) {
                    match crossterm::event::poll(Duration::from_millis(200)) {
                        Ok(true) => match crossterm::event::read() {
                            Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                                if let Some(command) = bindings.command_for(key.code) {
                                    debug!(?command, "hotkey pressed");
                                    if tx.blocking_send(command).is_err() {
                                        break;
                                    }
                                }
                            }
                            Ok(_) => {}
                            Err(e) => {
                                warn!(error = %e, "hotkey bridge read failed, exiting");
                                break;
                            }
                        },
                        Ok(false) => {}
                        Err(e) => {
                            warn!(error = %e, "hotkey bridge poll failed, exiting");
                            break;
                        }
                    }
                }
                debug!("hotkey bridge thread exiting");
            })
            .expect("failed to spawn hotkey thread");

        Self {
            shutdown,
            thread: Some(thread),
        }
    }

    /// Stop the listener thread and wait for it to exit.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for HotkeyBridge {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_bindings_mapping() {
        let bindings = HotkeyBindings::default();
        assert_eq!(bindings.command_for(KeyCode::F(5)), Some(HotkeyCommand::Run));
        assert_eq!(bindings.command_for(KeyCode::F(6)), Some(HotkeyCommand::Stop));
        assert_eq!(bindings.command_for(KeyCode::F(9)), Some(HotkeyCommand::MacroStart));
        assert_eq!(bindings.command_for(KeyCode::F(10)), Some(HotkeyCommand::MacroStop));
        assert_eq!(bindings.command_for(KeyCode::Char('x')), None);
    }

    #[test]
    fn test_custom_bindings() {
        let bindings = HotkeyBindings {
            run: KeyCode::Char('r'),
            ..Default::default()
        };
        assert_eq!(bindings.command_for(KeyCode::Char('r')), Some(HotkeyCommand::Run));
        assert_eq!(bindings.command_for(KeyCode::F(5)), None);
    }

    #[test]
    fn test_command_names() {
        assert_eq!(HotkeyCommand::MacroStart.as_str(), "macro_start");
        assert_eq!(HotkeyCommand::Stop.as_str(), "stop");
    }

    #[tokio::test]
    async fn test_bridge_start_stop() {
        // Without a terminal the poll loop either idles or exits on error;
        // either way stop() must return promptly.
        let (tx, _rx) = mpsc::channel(8);
        let mut bridge = HotkeyBridge::start(HotkeyBindings::default(), tx);
        tokio::time::sleep(Duration::from_millis(50)).await;
        bridge.stop();
    }
}
