//! Container lifecycle controller
//!
//! Drives one ephemeral container from boot through teardown. The
//! controller holds no global state; it is handed its configuration and
//! a [`MachineBackend`] and keeps everything per-instance, so parallel
//! controllers in one process never interfere.

use crate::error::{LifecycleError, Result};
use crate::supervisor::{BootFailure, BootSupervisor};
use crate::tty;
use spawnbox_config::AppConfig;
use spawnbox_exec::signals::ALREADY_EXISTS_MARKER;
use spawnbox_exec::{
    resolve_os_root, CommandOutput, LaunchConfig, MachineBackend, MachineStatus, RunOptions,
};
use std::fmt;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;

/// Where a container is in its life.
///
/// `Destroyed` is terminal: once reached, no transition leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Booting,
    Running,
    Degraded,
    Unreachable,
    Terminating,
    Destroyed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Created => "created",
            LifecycleState::Booting => "booting",
            LifecycleState::Running => "running",
            LifecycleState::Degraded => "degraded",
            LifecycleState::Unreachable => "unreachable",
            LifecycleState::Terminating => "terminating",
            LifecycleState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// One ephemeral container, from boot to teardown.
pub struct Machine {
    backend: Arc<dyn MachineBackend>,
    config: AppConfig,
    rootfs: PathBuf,
    machine: String,
    supervisor: AsyncMutex<BootSupervisor>,
    state: Mutex<LifecycleState>,
    destroy_on_exit: AtomicBool,
}

impl Machine {
    /// Controller for the image at `rootfs`. The machine identity is
    /// derived from the image directory name.
    pub fn new(
        backend: Arc<dyn MachineBackend>,
        config: AppConfig,
        rootfs: impl Into<PathBuf>,
    ) -> Self {
        let rootfs = rootfs.into();
        let name = rootfs
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());
        Self::with_identity(backend, config, rootfs, format!("spawnbox-{}", name))
    }

    /// Controller with an explicit machine identity.
    pub fn with_identity(
        backend: Arc<dyn MachineBackend>,
        config: AppConfig,
        rootfs: impl Into<PathBuf>,
        machine: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            config,
            rootfs: rootfs.into(),
            machine: machine.into(),
            supervisor: AsyncMutex::new(BootSupervisor::new()),
            state: Mutex::new(LifecycleState::Created),
            destroy_on_exit: AtomicBool::new(true),
        }
    }

    pub fn identity(&self) -> &str {
        &self.machine
    }

    pub fn rootfs(&self) -> &Path {
        &self.rootfs
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock().expect("state lock poisoned")
    }

    fn set_state(&self, next: LifecycleState) {
        let mut state = self.state.lock().expect("state lock poisoned");
        if *state == LifecycleState::Destroyed {
            return;
        }
        tracing::debug!("Container {} state: {} -> {}", self.machine, state, next);
        *state = next;
    }

    pub fn destroy_on_exit(&self) -> bool {
        self.destroy_on_exit.load(Ordering::SeqCst)
    }

    pub fn set_destroy_on_exit(&self, value: bool) {
        self.destroy_on_exit.store(value, Ordering::SeqCst);
    }

    /// Boot the container and wait until it is ready for commands.
    pub async fn launch(&self) -> Result<()> {
        self.boot().await?;
        self.wait().await
    }

    /// Start the launcher in the background.
    ///
    /// Returns once the launcher has survived the configured grace
    /// window. Failures arriving within that window are surfaced here;
    /// slower ones are caught by [`Machine::wait`] timing out.
    pub async fn boot(&self) -> Result<()> {
        if !self.rootfs.exists() {
            return Err(LifecycleError::ImageNotFound(self.rootfs.clone()));
        }
        let os_root = resolve_os_root(&self.rootfs)?;

        let cache_dir = self.config.directories.cache.clone();
        std::fs::create_dir_all(&cache_dir)?;
        tracing::debug!("Cache directory is {}", cache_dir.display());

        tty::save_initial();
        tracing::info!("Spawning container {}", self.machine);
        self.set_state(LifecycleState::Booting);

        let launch = LaunchConfig {
            rootfs: os_root,
            machine: self.machine.clone(),
            cache_dir,
        };

        let mut supervisor = self.supervisor.lock().await;
        supervisor.start(Arc::clone(&self.backend), launch);
        if let Err(failure) = supervisor.check(self.config.runtime.grace_window()).await {
            // The launch never took: either nothing is running under
            // this identity, or the identity belongs to a foreign
            // machine. Terminating on exit would be wrong both ways.
            self.set_destroy_on_exit(false);
            return Err(self.classify_boot_failure(failure));
        }
        Ok(())
    }

    fn classify_boot_failure(&self, failure: BootFailure) -> LifecycleError {
        if failure.stderr.contains(ALREADY_EXISTS_MARKER) {
            LifecycleError::MachineExists {
                machine: self.machine.clone(),
                reason: failure.message,
            }
        } else {
            LifecycleError::BootLaunchFailed {
                machine: self.machine.clone(),
                message: failure.message,
            }
        }
    }

    /// Poll until the init system reports readiness, up to the
    /// configured boot timeout. On timeout the container is torn down
    /// before the error is returned.
    pub async fn wait(&self) -> Result<()> {
        let timeout = self.config.runtime.boot_timeout();
        let interval = self.config.runtime.poll_interval();
        tracing::info!(
            "Waiting for container {} to become available within {:?}",
            self.machine,
            timeout
        );

        eprintln!();
        let mut remaining = timeout;
        let mut ready: Option<MachineStatus> = None;
        loop {
            tty::restore();
            match self.backend.query_status(&self.machine).await {
                Ok(status) if status.is_ready() => {
                    ready = Some(status);
                    break;
                }
                Ok(status) => {
                    tracing::debug!("Container status is: {:?}", status.word);
                }
                Err(err) => {
                    tracing::debug!("Status query failed: {}", err);
                }
            }
            if remaining < interval {
                break;
            }
            tokio::time::sleep(interval).await;
            remaining -= interval;
            eprint!(".");
            let _ = std::io::stderr().flush();
        }
        eprintln!();
        tty::restore();

        match ready {
            Some(status) => {
                tracing::info!("Container status is: {}", status.word);
                if status.word == "degraded" {
                    self.set_state(LifecycleState::Degraded);
                } else {
                    self.set_state(LifecycleState::Running);
                }
                Ok(())
            }
            None => {
                self.set_state(LifecycleState::Unreachable);
                self.destroy().await;
                Err(LifecycleError::BootTimeout {
                    machine: self.machine.clone(),
                    timeout,
                })
            }
        }
    }

    /// Raw status signal from the external status-query tool.
    pub async fn status(&self) -> Result<MachineStatus> {
        self.backend
            .query_status(&self.machine)
            .await
            .map_err(Into::into)
    }

    /// Whether the init system currently reports the machine as booted.
    pub async fn is_running(&self, silent: bool) -> Result<bool> {
        let status = self.backend.query_status(&self.machine).await?;
        if !silent {
            tracing::info!("Container status is: {}", status.word);
            if !status.diagnostic.trim().is_empty() {
                tracing::debug!("Status diagnostic: {}", status.diagnostic.trim());
            }
        }
        Ok(status.is_ready() && !status.is_down())
    }

    /// Whether the control bus reports the machine as gone entirely.
    pub async fn is_down(&self) -> Result<bool> {
        let status = self.backend.query_status(&self.machine).await?;
        Ok(status.is_down())
    }

    /// Run a command inside the booted container.
    pub async fn run(&self, command: &str, opts: &RunOptions) -> Result<CommandOutput> {
        self.backend
            .run(&self.machine, command, opts)
            .await
            .map_err(Into::into)
    }

    /// Log basic host information from inside the container.
    pub async fn info(&self) {
        tracing::info!("Host information");
        if let Err(err) = self.run("/usr/bin/hostnamectl", &RunOptions::captured()).await {
            tracing::warn!("Unable to report host information: {}", err);
        }
    }

    /// Terminate the machine unless it is already gone.
    pub async fn terminate(&self) -> Result<()> {
        tracing::info!("Shutting down container {}", self.machine);
        match self.is_down().await {
            Ok(true) => {
                tracing::info!(
                    "Container {} not running, skipping termination",
                    self.machine
                );
                return Ok(());
            }
            Ok(false) => {}
            Err(err) => {
                tracing::debug!("Unable to query container before termination: {}", err);
            }
        }
        self.backend.terminate(&self.machine).await?;
        Ok(())
    }

    /// Tear the container down. Idempotent and infallible: teardown runs
    /// on every exit path, including error paths, so it only logs
    /// problems instead of raising them.
    pub async fn destroy(&self) {
        self.set_state(LifecycleState::Terminating);
        if self.destroy_on_exit() {
            if let Err(err) = self.terminate().await {
                tracing::warn!("Terminating container {} failed: {}", self.machine, err);
            }
        } else {
            tracing::debug!("Skipping teardown of container {}", self.machine);
        }
        if let Err(err) = self.supervisor.lock().await.stop().await {
            tracing::warn!("Stopping launcher for {} failed: {}", self.machine, err);
        }
        self.set_state(LifecycleState::Destroyed);
        tty::restore();
    }
}

/// Run `body` against the machine and destroy it afterwards, whether
/// the body succeeded or not.
pub async fn with_machine<T, F, Fut>(machine: Arc<Machine>, body: F) -> Result<T>
where
    F: FnOnce(Arc<Machine>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let result = body(Arc::clone(&machine)).await;
    machine.destroy().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{BackendCall, MockBackend};
    use std::path::Path;

    fn fast_config(root: &Path) -> AppConfig {
        let mut config = AppConfig::with_root(root);
        config.runtime.boot_timeout_ms = 80;
        config.runtime.poll_interval_ms = 10;
        config.runtime.grace_window_ms = 40;
        config
    }

    fn make_rootfs(base: &Path, name: &str) -> PathBuf {
        let rootfs = base.join(name);
        std::fs::create_dir_all(rootfs.join("etc")).unwrap();
        std::fs::write(rootfs.join("etc/os-release"), "ID=debian\n").unwrap();
        rootfs
    }

    #[tokio::test]
    async fn boot_rejects_missing_image() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockBackend::with_statuses(&["running"]);
        let machine = Machine::new(
            backend.clone(),
            fast_config(dir.path()),
            dir.path().join("no-such-image"),
        );

        let err = machine.boot().await.unwrap_err();
        assert!(matches!(err, LifecycleError::ImageNotFound(_)));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn boot_survives_grace_window_when_launcher_keeps_running() {
        let dir = tempfile::tempdir().unwrap();
        let rootfs = make_rootfs(dir.path(), "debian-bullseye");
        let backend = MockBackend::with_statuses(&["running"]);
        let machine = Machine::new(backend.clone(), fast_config(dir.path()), rootfs);

        machine.boot().await.unwrap();
        assert_eq!(machine.state(), LifecycleState::Booting);
        assert_eq!(
            backend.calls()[0],
            BackendCall::Launch {
                machine: "spawnbox-debian-bullseye".to_string()
            }
        );
        machine.destroy().await;
    }

    #[tokio::test]
    async fn immediate_launch_failure_surfaces_synchronously() {
        let dir = tempfile::tempdir().unwrap();
        let rootfs = make_rootfs(dir.path(), "debian-bullseye");
        let backend = MockBackend::failing_launch(1, "No such file or directory\n");
        let machine = Machine::new(backend.clone(), fast_config(dir.path()), rootfs);

        let err = machine.boot().await.unwrap_err();
        assert!(matches!(err, LifecycleError::BootLaunchFailed { .. }));
        // Nothing started, so there is nothing to terminate on exit.
        assert!(!machine.destroy_on_exit());
        machine.destroy().await;
        assert_eq!(backend.terminate_count(), 0);
    }

    #[tokio::test]
    async fn identity_collision_is_classified_with_hint() {
        let dir = tempfile::tempdir().unwrap();
        let rootfs = make_rootfs(dir.path(), "debian-bullseye");
        let backend = MockBackend::failing_launch(
            1,
            "Machine 'spawnbox-debian-bullseye' already exists.\n",
        );
        let machine = Machine::new(backend.clone(), fast_config(dir.path()), rootfs);

        let err = machine.boot().await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("spawnbox-debian-bullseye"));
        assert!(message.contains("machinectl terminate"));
        assert!(matches!(err, LifecycleError::MachineExists { .. }));

        // A colliding identity belongs to a foreign machine; teardown
        // must leave it alone.
        assert!(!machine.destroy_on_exit());
        machine.destroy().await;
        assert_eq!(backend.terminate_count(), 0);
        assert_eq!(machine.state(), LifecycleState::Destroyed);
    }

    #[tokio::test]
    async fn wait_polls_until_ready() {
        let dir = tempfile::tempdir().unwrap();
        let rootfs = make_rootfs(dir.path(), "debian-bullseye");
        let backend = MockBackend::with_statuses(&["starting", "starting", "running"]);
        let machine = Machine::new(backend.clone(), fast_config(dir.path()), rootfs);

        machine.boot().await.unwrap();
        machine.wait().await.unwrap();
        assert_eq!(machine.state(), LifecycleState::Running);

        let polls = backend
            .calls()
            .iter()
            .filter(|c| matches!(c, BackendCall::QueryStatus { .. }))
            .count();
        assert!(polls >= 3);
        machine.destroy().await;
    }

    #[tokio::test]
    async fn degraded_machine_is_ready_but_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let rootfs = make_rootfs(dir.path(), "centos-8");
        let backend = MockBackend::with_statuses(&["degraded"]);
        let machine = Machine::new(backend.clone(), fast_config(dir.path()), rootfs);

        machine.launch().await.unwrap();
        assert_eq!(machine.state(), LifecycleState::Degraded);
        assert!(machine.is_running(true).await.unwrap());
        machine.destroy().await;
    }

    #[tokio::test]
    async fn wait_timeout_tears_down_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let rootfs = make_rootfs(dir.path(), "debian-bullseye");
        let backend = MockBackend::with_statuses(&["starting"]);
        let machine = Machine::new(backend.clone(), fast_config(dir.path()), rootfs);

        machine.boot().await.unwrap();
        let err = machine.wait().await.unwrap_err();
        assert!(matches!(err, LifecycleError::BootTimeout { .. }));
        assert_eq!(backend.terminate_count(), 1);
        assert!(backend.was_terminated());
        assert_eq!(machine.state(), LifecycleState::Destroyed);
    }

    #[tokio::test]
    async fn destroy_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let rootfs = make_rootfs(dir.path(), "debian-bullseye");
        let backend = MockBackend::with_statuses(&["running"]);
        let machine = Machine::new(backend.clone(), fast_config(dir.path()), rootfs);

        machine.launch().await.unwrap();
        machine.destroy().await;
        machine.destroy().await;

        // The second pass sees the bus down and skips termination.
        assert_eq!(backend.terminate_count(), 1);
        assert_eq!(machine.state(), LifecycleState::Destroyed);
    }

    #[tokio::test]
    async fn with_machine_destroys_on_body_error() {
        let dir = tempfile::tempdir().unwrap();
        let rootfs = make_rootfs(dir.path(), "debian-bullseye");
        let backend = MockBackend::with_statuses(&["running"]);
        let machine = Arc::new(Machine::new(
            backend.clone(),
            fast_config(dir.path()),
            rootfs,
        ));

        machine.launch().await.unwrap();
        let result: Result<()> = with_machine(Arc::clone(&machine), |m| async move {
            m.run("/bin/false", &RunOptions::captured()).await?;
            Err(LifecycleError::BootLaunchFailed {
                machine: m.identity().to_string(),
                message: "unreached".to_string(),
            })
        })
        .await;

        assert!(result.is_err());
        assert_eq!(backend.terminate_count(), 1);
        assert_eq!(machine.state(), LifecycleState::Destroyed);
    }

    #[tokio::test]
    async fn run_and_teardown_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let rootfs = make_rootfs(dir.path(), "debian-bullseye");
        let backend = MockBackend::with_statuses(&["starting", "running"]);
        backend.set_run_result(0, "hello\n");
        let machine = Machine::new(backend.clone(), fast_config(dir.path()), rootfs);

        machine.launch().await.unwrap();
        let output = machine
            .run("/bin/echo hello", &RunOptions::captured())
            .await
            .unwrap();
        assert_eq!(output.stdout, "hello\n");
        machine.destroy().await;

        let calls = backend.calls();
        assert!(matches!(calls.first(), Some(BackendCall::Launch { .. })));
        assert!(matches!(calls.last(), Some(BackendCall::Terminate { .. })));
    }

    #[tokio::test]
    async fn command_failure_passes_exit_code_through() {
        let dir = tempfile::tempdir().unwrap();
        let rootfs = make_rootfs(dir.path(), "debian-bullseye");
        let backend = MockBackend::with_statuses(&["running"]);
        backend.set_run_result(203, "");
        let machine = Machine::new(backend.clone(), fast_config(dir.path()), rootfs);

        machine.launch().await.unwrap();
        let err = machine
            .run("/not/a/command", &RunOptions::captured())
            .await
            .unwrap_err();
        match err {
            LifecycleError::Exec(spawnbox_exec::ExecError::CommandFailed {
                exit_code, ..
            }) => assert_eq!(exit_code, 203),
            other => panic!("unexpected error: {}", other),
        }
        machine.destroy().await;
    }
}
