//! Terminal raw mode and size.

use crossterm::terminal;

use tapesh_core::{Error, Result};

/// RAII guard that restores the terminal to cooked mode on drop, on every
/// exit path including panics.
pub struct RawModeGuard {
    _private: (),
}

impl RawModeGuard {
    /// Put the calling terminal into raw mode.
    pub fn enter() -> Result<Self> {
        terminal::enable_raw_mode()
            .map_err(|e| Error::Other(format!("failed to enable raw terminal mode: {e}")))?;
        Ok(Self { _private: () })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        // Best-effort; there is no way to report failure from Drop.
        let _ = terminal::disable_raw_mode();
    }
}

/// Current terminal size as (columns, rows), falling back to 80x24 when it
/// cannot be determined (pipes, CI).
pub fn size() -> (u16, u16) {
    terminal::size().unwrap_or((80, 24))
}
