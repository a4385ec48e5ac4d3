//! Terminal hygiene
//!
//! A container's login machinery can flip the controlling terminal into
//! a raw-ish mode even when output is piped through `systemd-run`. The
//! mode is captured once at startup and restored around every poll and
//! after teardown.

use nix::sys::termios::{tcgetattr, tcsetattr, SetArg, Termios};
use std::io::{stdin, stdout, IsTerminal};
use std::os::fd::AsFd;
use std::sync::{Mutex, OnceLock};

static SAVED: OnceLock<Option<Mutex<Termios>>> = OnceLock::new();

/// Capture the terminal mode before any container can disturb it.
/// Subsequent calls are no-ops.
pub fn save_initial() {
    SAVED.get_or_init(|| {
        let out = stdout();
        if stdin().is_terminal() && out.is_terminal() {
            tcgetattr(out.as_fd()).ok().map(Mutex::new)
        } else {
            None
        }
    });
}

/// Restore the saved terminal mode. Does nothing when stdio is not a
/// terminal or no mode was captured.
pub fn restore() {
    if !stdin().is_terminal() {
        return;
    }
    if let Some(Some(saved)) = SAVED.get() {
        let saved = saved.lock().unwrap();
        let out = stdout();
        if out.is_terminal() {
            let _ = tcsetattr(out.as_fd(), SetArg::TCSANOW, &saved);
        }
    }
}
