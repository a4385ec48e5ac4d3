//! Backend trait between the lifecycle controller and the external
//! container tools
//!
//! The controller never shells out directly; everything it needs from
//! the host goes through this trait so tests can substitute a scripted
//! backend.

use crate::{CommandOutput, Result, RunOptions};
use crate::signals::{HOST_DOWN_MARKER, READY_WORDS};
use async_trait::async_trait;
use std::path::PathBuf;

/// Everything the external launcher needs to boot one container
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Root filesystem directory (already validated as an OS root)
    pub rootfs: PathBuf,
    /// Machine identity registered with the external control tools
    pub machine: String,
    /// Host cache directory bind-mounted into the container
    pub cache_dir: PathBuf,
}

/// Raw status signal from the external status-query tool
///
/// `word` is the trimmed stdout word, `diagnostic` the raw stderr text.
/// The query legitimately exits non-zero while the system is still
/// booting, so this carries no error semantics of its own.
#[derive(Debug, Clone, Default)]
pub struct MachineStatus {
    pub word: String,
    pub diagnostic: String,
}

impl MachineStatus {
    pub fn new(word: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        Self {
            word: word.into(),
            diagnostic: diagnostic.into(),
        }
    }

    /// The init system reports the machine as booted.
    pub fn is_ready(&self) -> bool {
        READY_WORDS.contains(&self.word.as_str())
    }

    /// The control bus could not reach the machine at all: it was never
    /// started or has fully exited.
    pub fn is_down(&self) -> bool {
        self.diagnostic.contains(HOST_DOWN_MARKER)
    }
}

/// Interface to the external namespace-container tools.
#[async_trait]
pub trait MachineBackend: Send + Sync {
    /// Boot a container and block until it is torn down.
    ///
    /// This is the launcher's contract: the call does not return while
    /// the container runs, so it is always driven from a dedicated
    /// task. An immediate non-zero exit (bad arguments, identity
    /// collision) surfaces as `CommandFailed` with captured stderr.
    async fn launch(&self, config: &LaunchConfig) -> Result<CommandOutput>;

    /// Run a command inside a booted machine.
    async fn run(&self, machine: &str, command: &str, opts: &RunOptions) -> Result<CommandOutput>;

    /// Query the machine's boot status without raising on non-zero exit.
    async fn query_status(&self, machine: &str) -> Result<MachineStatus>;

    /// Immediately terminate the machine, releasing all its resources.
    async fn terminate(&self, machine: &str) -> Result<()>;
}
