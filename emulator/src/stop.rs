//! Keyboard stop request for wall-clock runs.

use std::io;
use std::thread::{self, JoinHandle};

use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use tracing::{debug, info};

pub static STOP: Signal<CriticalSectionRawMutex, ()> = Signal::new();

/// Spawns a thread that raises [`STOP`] once `key` is pressed.
///
/// The terminal stays in cooked mode, so the key is seen after Enter.
pub fn listen_for_stop_key(key: char) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("stop-key".into())
        .spawn(move || {
            loop {
                match event::read() {
                    Ok(Event::Key(press))
                        if press.kind != KeyEventKind::Release && is_stop_key(press.code, key) =>
                    {
                        info!("stop requested from keyboard");
                        STOP.signal(());
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        debug!(error = %err, "keyboard unavailable; stop key disabled");
                        break;
                    }
                }
            }
        })
}

fn is_stop_key(code: KeyCode, key: char) -> bool {
    matches!(code, KeyCode::Char(c) if c.eq_ignore_ascii_case(&key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_key_ignores_case() {
        assert!(is_stop_key(KeyCode::Char('Q'), 'q'));
        assert!(is_stop_key(KeyCode::Char('q'), 'q'));
        assert!(!is_stop_key(KeyCode::Char('w'), 'q'));
        assert!(!is_stop_key(KeyCode::Enter, 'q'));
    }
}
