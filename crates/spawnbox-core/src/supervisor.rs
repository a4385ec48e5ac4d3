//! Boot supervision
//!
//! The launcher process runs for the container's whole life, so its
//! future is owned by a background task. Most launch failures surface
//! within a few hundred milliseconds of spawning; [`BootSupervisor::check`]
//! watches a bounded grace window for exactly those.

use crate::error::Result;
use spawnbox_exec::{ExecError, LaunchConfig, MachineBackend};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Details of a failed launch, replayed to the caller that started it.
#[derive(Debug, Clone)]
pub struct BootFailure {
    pub exit_code: Option<i32>,
    pub stderr: String,
    pub message: String,
}

impl BootFailure {
    fn from_exec(err: ExecError) -> Self {
        match err {
            ExecError::CommandFailed {
                exit_code, stderr, ..
            } => {
                let message = stderr.trim().to_string();
                BootFailure {
                    exit_code: Some(exit_code),
                    stderr,
                    message,
                }
            }
            other => BootFailure {
                exit_code: None,
                stderr: String::new(),
                message: other.to_string(),
            },
        }
    }
}

/// Owns the long-running launcher task for one container.
#[derive(Default)]
pub struct BootSupervisor {
    task: Option<JoinHandle<()>>,
    failure: Arc<Mutex<Option<BootFailure>>>,
    aborted: Arc<Notify>,
}

impl BootSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the launcher in the background. Success means the launcher
    /// is still running; an error is parked in the failure slot and the
    /// abort signal raised.
    pub fn start(&mut self, backend: Arc<dyn MachineBackend>, config: LaunchConfig) {
        let failure = Arc::clone(&self.failure);
        let aborted = Arc::clone(&self.aborted);
        self.task = Some(tokio::spawn(async move {
            match backend.launch(&config).await {
                Ok(_) => {
                    tracing::debug!("Launcher for machine {} exited", config.machine);
                }
                Err(err) => {
                    tracing::warn!("Launching machine {} failed: {}", config.machine, err);
                    *failure.lock().expect("failure slot poisoned") =
                        Some(BootFailure::from_exec(err));
                    aborted.notify_one();
                }
            }
        }));
    }

    /// Wait up to `grace` for an early launch failure.
    ///
    /// Errors that take longer than the grace window to materialize are
    /// caught later by the readiness poll timing out.
    pub async fn check(&self, grace: Duration) -> std::result::Result<(), BootFailure> {
        if self.task.is_none() {
            return Ok(());
        }
        match tokio::time::timeout(grace, self.aborted.notified()).await {
            Ok(()) => {
                let failure = self
                    .failure
                    .lock()
                    .expect("failure slot poisoned")
                    .take()
                    .unwrap_or_else(|| BootFailure {
                        exit_code: None,
                        stderr: String::new(),
                        message: "launcher aborted without error detail".to_string(),
                    });
                Err(failure)
            }
            Err(_) => Ok(()),
        }
    }

    /// Cancel the launcher task and reap it. The child process itself is
    /// killed on drop by the executor. Safe to call repeatedly.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
            // A JoinError from cancellation is the expected outcome here.
            let _ = task.await;
        }
        Ok(())
    }
}
