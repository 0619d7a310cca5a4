use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

/// Input events for the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    /// Quit the application
    Quit,
    /// Navigate to next tab
    NextTab,
    /// Navigate to previous tab
    PrevTab,
    /// Scroll up
    ScrollUp,
    /// Scroll down
    ScrollDown,
    /// Run the slow refresh now
    Refresh,
    /// Toggle help display
    ToggleHelp,
    /// Close help/overlay
    CloseOverlay,
    /// Open the command line
    OpenCommand,
    /// Typed into the command line
    Input(char),
    Backspace,
    Submit,
    /// No input (tick)
    Tick,
}

/// Poll for input events with a timeout
pub fn poll_event(timeout: Duration, command_mode: bool) -> Option<InputEvent> {
    if event::poll(timeout).ok()? {
        if let Event::Key(key) = event::read().ok()? {
            // Only handle key press events (not release)
            if key.kind != KeyEventKind::Press {
                return None;
            }
            return map_key(key, command_mode);
        }
    }

    Some(InputEvent::Tick)
}

pub fn map_key(key: KeyEvent, command_mode: bool) -> Option<InputEvent> {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return Some(InputEvent::Quit);
    }

    if command_mode {
        return match key.code {
            KeyCode::Esc => Some(InputEvent::CloseOverlay),
            KeyCode::Enter => Some(InputEvent::Submit),
            KeyCode::Backspace => Some(InputEvent::Backspace),
            KeyCode::Char(c) => Some(InputEvent::Input(c)),
            _ => None,
        };
    }

    Some(match key.code {
        KeyCode::Char('q') => InputEvent::Quit,
        KeyCode::Esc => InputEvent::CloseOverlay,

        // Tab navigation
        KeyCode::Tab => InputEvent::NextTab,
        KeyCode::BackTab => InputEvent::PrevTab,
        KeyCode::Right | KeyCode::Char('l') => InputEvent::NextTab,
        KeyCode::Left | KeyCode::Char('h') => InputEvent::PrevTab,

        // Scrolling
        KeyCode::Up | KeyCode::Char('k') => InputEvent::ScrollUp,
        KeyCode::Down | KeyCode::Char('j') => InputEvent::ScrollDown,
        KeyCode::PageUp => InputEvent::ScrollUp,
        KeyCode::PageDown => InputEvent::ScrollDown,

        // Actions
        KeyCode::Char('r') => InputEvent::Refresh,
        KeyCode::Char('?') => InputEvent::ToggleHelp,
        KeyCode::Char(':') => InputEvent::OpenCommand,

        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn command_mode_captures_letters() {
        assert_eq!(map_key(key(KeyCode::Char('q')), false), Some(InputEvent::Quit));
        assert_eq!(
            map_key(key(KeyCode::Char('q')), true),
            Some(InputEvent::Input('q'))
        );
        assert_eq!(map_key(key(KeyCode::Enter), true), Some(InputEvent::Submit));
        assert_eq!(
            map_key(key(KeyCode::Char(':')), false),
            Some(InputEvent::OpenCommand)
        );
    }

    #[test]
    fn ctrl_c_always_quits() {
        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(map_key(ctrl_c, true), Some(InputEvent::Quit));
        assert_eq!(map_key(ctrl_c, false), Some(InputEvent::Quit));
    }
}
