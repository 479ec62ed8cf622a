//! Terminal state guard.
//!
//! Restores the terminal when the dashboard exits, including on panic.

use crossterm::{
    cursor::Show,
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};

/// Puts the terminal into raw mode on the alternate screen and undoes both
/// on drop.
#[derive(Debug)]
pub struct TerminalGuard {
    _private: (),
}

impl TerminalGuard {
    /// Enter raw mode and the alternate screen.
    pub fn enter() -> std::io::Result<Self> {
        enable_raw_mode()?;
        // Constructed before the second call so a failure still restores raw mode.
        let guard = Self { _private: () };
        execute!(std::io::stdout(), EnterAlternateScreen)?;
        Ok(guard)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(std::io::stdout(), LeaveAlternateScreen, Show);
    }
}
