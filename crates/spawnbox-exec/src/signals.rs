//! Recognized status words and diagnostic phrases
//!
//! `systemctl is-system-running` has no structured output, so boot
//! status is classified by matching its stdout word and stderr text.
//! The full set of phrases observed in the wild (not all of which are
//! matched today) is:
//!
//! - `Failed to connect to bus: Host is down`
//! - `Failed to connect to bus: Protocol error`
//! - `Failed to connect to bus: No such file or directory`
//! - `Failed to query system state: Connection reset by peer`
//! - stdout words: `starting`, `started`, `running`, `degraded`,
//!   `stopping`, `unknown`
//!
//! Matching is best-effort and intentionally non-exhaustive; new
//! phrases belong here, not inline at call sites.

/// Status words that count as "booted".
///
/// `degraded` means one or more secondary units failed while the system
/// itself is up and usable, so it is treated as ready.
pub const READY_WORDS: &[&str] = &["started", "running", "degraded"];

/// Substring of the bus diagnostic emitted when the machine was never
/// started or has fully exited.
pub const HOST_DOWN_MARKER: &str = "Host is down";

/// Substring of the launcher's stderr when a machine with the same
/// identity is already registered.
pub const ALREADY_EXISTS_MARKER: &str = "already exists";

/// `systemd-run` exit status meaning the requested command does not
/// exist inside the container.
pub const EXIT_CODE_COMMAND_NOT_FOUND: i32 = 203;
