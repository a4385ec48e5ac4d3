//! systemd-nspawn backend
//!
//! Production implementation of [`MachineBackend`] on top of the host's
//! `systemd-nspawn`, `systemd-run`, `systemctl`, and `machinectl`
//! binaries, plus the command builders they share.

use crate::{
    run_host, CommandOutput, LaunchConfig, MachineBackend, MachineStatus, Result, RunOptions,
};
use async_trait::async_trait;
use std::path::Path;

/// Build the launcher invocation for one container.
///
/// `--volatile=overlay` keeps every change ephemeral: the backing image
/// is never mutated by a run. The host resolver configuration is bound
/// read-only, and the cache directory is shared with the container.
/// The shared cache bind has no cross-container locking; concurrent
/// boots on one host write into it unsynchronized.
pub fn boot_command(config: &LaunchConfig) -> String {
    format!(
        "systemd-nspawn --quiet --boot --link-journal=try-guest --volatile=overlay \
         --bind-ro=/etc/resolv.conf:/etc/resolv.conf --bind={cache}:{cache} \
         --directory={rootfs} --machine={machine}",
        cache = config.cache_dir.display(),
        rootfs = config.rootfs.display(),
        machine = config.machine,
    )
}

/// Build the transient-unit invocation for a command inside a machine.
///
/// `--wait` blocks until the payload finishes, `--pipe` connects stdio,
/// `--quiet` suppresses the unit banner.
pub fn machine_run_command(machine: &str, command: &str, pty: bool) -> String {
    let pty = if pty { "--pty " } else { "" };
    format!(
        "systemd-run --machine={} --wait --pipe --quiet {}{}",
        machine, pty, command
    )
}

/// Build the invocation for a command inside an unbooted OS root.
///
/// Used for image provisioning; points the namespace tool directly at a
/// filesystem directory instead of a registered machine.
pub fn rootfs_run_command(directory: &Path, command: &str) -> String {
    format!(
        "systemd-nspawn --directory={} --bind-ro=/etc/resolv.conf:/etc/resolv.conf --pipe {}",
        directory.display(),
        command
    )
}

fn status_query_command(machine: &str) -> String {
    format!("systemctl is-system-running --machine={}", machine)
}

fn terminate_command(machine: &str) -> String {
    format!("machinectl terminate {}", machine)
}

/// Run a command inside a booted machine via the transient-unit runner.
pub async fn run_in_machine(
    machine: &str,
    command: &str,
    opts: &RunOptions,
) -> Result<CommandOutput> {
    tracing::info!("Running command on container machine {}: {}", machine, command);
    let effective = machine_run_command(machine, command, opts.interactive);
    tracing::debug!("Effective command is: {}", effective);
    run_host(&effective, opts).await
}

/// Run a command within an unbooted root filesystem.
pub async fn run_in_rootfs(
    directory: &Path,
    command: &str,
    opts: &RunOptions,
) -> Result<CommandOutput> {
    tracing::info!(
        "Running command within rootfs at {}: {}",
        directory.display(),
        command
    );
    run_host(&rootfs_run_command(directory, command), opts).await
}

/// Query a machine's boot status.
///
/// Never raises on non-zero exit: the status tool reports failure while
/// the machine is still starting up or already gone.
pub async fn machine_status(machine: &str) -> Result<MachineStatus> {
    let output = run_host(
        &status_query_command(machine),
        &RunOptions::captured_unchecked(),
    )
    .await?;
    Ok(MachineStatus::new(output.stdout.trim(), output.stderr))
}

/// Terminate a machine immediately, without a clean shutdown.
pub async fn terminate_machine(machine: &str) -> Result<()> {
    run_host(&terminate_command(machine), &RunOptions::captured()).await?;
    Ok(())
}

/// [`MachineBackend`] backed by the host's systemd tools
#[derive(Debug, Default)]
pub struct NspawnBackend;

impl NspawnBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MachineBackend for NspawnBackend {
    async fn launch(&self, config: &LaunchConfig) -> Result<CommandOutput> {
        let command = boot_command(config);
        tracing::info!("Launch command is: {}", command);
        run_host(&command, &RunOptions::captured()).await
    }

    async fn run(&self, machine: &str, command: &str, opts: &RunOptions) -> Result<CommandOutput> {
        run_in_machine(machine, command, opts).await
    }

    async fn query_status(&self, machine: &str) -> Result<MachineStatus> {
        machine_status(machine).await
    }

    async fn terminate(&self, machine: &str) -> Result<()> {
        terminate_machine(machine).await
    }
}
