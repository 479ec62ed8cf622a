//! Keyboard handling.
//!
//! Maps crossterm key events to [`DashboardAction`]s. Kept separate from the
//! runner so key bindings are testable without a terminal.

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

/// Something the user asked the dashboard to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DashboardAction {
    /// Flip the LED.
    ToggleLed,
    /// Move the servo target by this many steps.
    NudgeServo(i32),
    /// Select auto mode as the servo target.
    ServoAuto,
    /// Send the servo target.
    SetServo,
    /// Leave the dashboard.
    Quit,
}

/// Convert a key event to an action, ignoring key releases.
#[must_use]
pub fn key_to_action(key: &KeyEvent) -> Option<DashboardAction> {
    if key.kind == KeyEventKind::Release {
        return None;
    }
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

    match key.code {
        KeyCode::Char('c') if ctrl => Some(DashboardAction::Quit),
        KeyCode::Char('q') | KeyCode::Esc => Some(DashboardAction::Quit),
        KeyCode::Char('l') => Some(DashboardAction::ToggleLed),
        KeyCode::Left => Some(DashboardAction::NudgeServo(-1)),
        KeyCode::Right => Some(DashboardAction::NudgeServo(1)),
        KeyCode::Char('a') => Some(DashboardAction::ServoAuto),
        KeyCode::Enter | KeyCode::Char('s') => Some(DashboardAction::SetServo),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::empty())
    }

    #[test]
    fn test_bindings() {
        assert_eq!(
            key_to_action(&make_key(KeyCode::Char('l'))),
            Some(DashboardAction::ToggleLed)
        );
        assert_eq!(
            key_to_action(&make_key(KeyCode::Left)),
            Some(DashboardAction::NudgeServo(-1))
        );
        assert_eq!(
            key_to_action(&make_key(KeyCode::Right)),
            Some(DashboardAction::NudgeServo(1))
        );
        assert_eq!(
            key_to_action(&make_key(KeyCode::Enter)),
            Some(DashboardAction::SetServo)
        );
        assert_eq!(key_to_action(&make_key(KeyCode::Esc)), Some(DashboardAction::Quit));
        assert_eq!(key_to_action(&make_key(KeyCode::Char('x'))), None);
    }

    #[test]
    fn test_ctrl_c_quits() {
        let key = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(key_to_action(&key), Some(DashboardAction::Quit));
    }

    #[test]
    fn test_release_ignored() {
        let mut key = make_key(KeyCode::Char('l'));
        key.kind = KeyEventKind::Release;
        assert_eq!(key_to_action(&key), None);
    }
}
