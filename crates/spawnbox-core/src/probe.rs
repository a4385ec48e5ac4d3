//! Readiness probes
//!
//! Checks run against a booted container: unit activity via the init
//! system's query tool, TCP reachability of published services, and the
//! package probe that installs a package and verifies the units and
//! ports it is supposed to bring up. A probe failure is a verdict about
//! the workload, not a controller error, so it gets its own error type.

use crate::error::LifecycleError;
use crate::machine::Machine;
use spawnbox_exec::{resolve_os_root, ExecError, RunOptions};
use std::io::Write;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Probe failed, unit {unit} is not active")]
    UnitInactive { unit: String },

    #[error("Address {address} did not become available within {timeout:?}")]
    AddressTimeout { address: String, timeout: Duration },

    #[error("Unable to acquire package at {0}")]
    InvalidPackage(String),

    #[error("Unknown network address {0}, expected host:port")]
    InvalidAddress(String),

    #[error("Unable to determine package manager for image at {0}")]
    UnsupportedSystem(String),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

pub type Result<T> = std::result::Result<T, ProbeError>;

/// Probe runner bound to one machine.
pub struct Probe<'a> {
    machine: &'a Machine,
}

impl<'a> Probe<'a> {
    pub fn new(machine: &'a Machine) -> Self {
        Self { machine }
    }

    /// Baseline health check: the journal daemon is up on every sane
    /// image, so its absence means the boot went wrong.
    pub async fn basic(&self) -> Result<()> {
        self.check_unit("systemd-journald").await
    }

    /// Verify a unit reports `active` inside the container.
    ///
    /// Only a clean `inactive` verdict is a probe failure. Anything
    /// else from the query (unknown unit, bus trouble) is a command
    /// error and propagates as such.
    pub async fn check_unit(&self, unit: &str) -> Result<()> {
        tracing::info!("Probing unit {}", unit);
        let command = format!("/bin/systemctl is-active {}", unit);
        match self.machine.run(&command, &RunOptions::captured()).await {
            Ok(_) => {
                tracing::info!("Unit {} is active", unit);
                Ok(())
            }
            Err(LifecycleError::Exec(ExecError::CommandFailed { ref stdout, .. }))
                if stdout.trim() == "inactive" =>
            {
                Err(ProbeError::UnitInactive {
                    unit: unit.to_string(),
                })
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Wait for a TCP endpoint published by the container to accept
    /// connections.
    pub async fn check_address(&self, host: &str, port: u16, timeout: Duration) -> Result<()> {
        let address = format!("{}:{}", host, port);
        tracing::info!("Probing address {}", address);
        let interval = Duration::from_millis(100);
        let mut remaining = timeout;
        loop {
            if port_is_up(host, port).await {
                tracing::info!("Address {} is available", address);
                return Ok(());
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
        Err(ProbeError::AddressTimeout { address, timeout })
    }

    /// Install a package into the booted container, start the units it
    /// ships, then verify unit activity and listening endpoints.
    ///
    /// The package is fetched from inside the container into the shared
    /// cache bind mount, so repeated probes against the same package
    /// reuse the download.
    pub async fn package(
        &self,
        package: &str,
        units: &[String],
        listen: &[String],
        network_timeout: Duration,
    ) -> Result<()> {
        if !package.starts_with("http") {
            return Err(ProbeError::InvalidPackage(package.to_string()));
        }

        let endpoints = listen
            .iter()
            .map(|address| parse_endpoint(address))
            .collect::<Result<Vec<_>>>()?;

        let downloads = self.machine.config().directories.downloads();
        let file_name = package.rsplit('/').next().unwrap_or("package");
        let local_package = downloads.join(file_name);

        tracing::info!("Downloading {}", package);
        self.run(&format!(
            "/usr/bin/wget --no-clobber --directory-prefix={} {}",
            downloads.display(),
            package
        ))
        .await?;

        tracing::info!("Installing package {}", local_package.display());
        if self.is_debian() {
            self.run(&format!(
                "/usr/bin/apt install --yes {}",
                local_package.display()
            ))
            .await?;
        } else if self.is_redhat() {
            self.run(&format!("/usr/bin/yum install -y {}", local_package.display()))
                .await?;
        } else {
            return Err(ProbeError::UnsupportedSystem(
                self.machine.rootfs().display().to_string(),
            ));
        }

        for unit in units {
            self.run(&format!("/bin/systemctl enable {}", unit)).await?;
            self.run(&format!("/bin/systemctl start {}", unit)).await?;
        }

        for unit in units {
            self.check_unit(unit).await?;
        }
        for (host, port) in endpoints {
            self.check_address(&host, port, network_timeout).await?;
        }
        Ok(())
    }

    async fn run(&self, command: &str) -> Result<()> {
        self.machine
            .run(command, &RunOptions::captured())
            .await
            .map_err(ProbeError::from)?;
        Ok(())
    }

    fn is_debian(&self) -> bool {
        self.os_marker_exists("etc/debian_version")
    }

    fn is_redhat(&self) -> bool {
        self.os_marker_exists("etc/redhat-release")
    }

    fn os_marker_exists(&self, marker: &str) -> bool {
        resolve_os_root(self.machine.rootfs())
            .map(|root| root.join(marker).exists())
            .unwrap_or(false)
    }
}

/// Split a `host:port` endpoint string.
pub fn parse_endpoint(address: &str) -> Result<(String, u16)> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| ProbeError::InvalidAddress(address.to_string()))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| ProbeError::InvalidAddress(address.to_string()))?;
    if host.is_empty() {
        return Err(ProbeError::InvalidAddress(address.to_string()));
    }
    Ok((host.to_string(), port))
}

/// One connection attempt, bounded so a dropped packet cannot hang the
/// probe loop.
pub async fn port_is_up(host: &str, port: u16) -> bool {
    matches!(
        tokio::time::timeout(Duration::from_secs(2), TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::Machine;
    use crate::test_support::{BackendCall, MockBackend};
    use spawnbox_config::AppConfig;
    use std::path::Path;
    use std::sync::Arc;

    fn probe_machine(backend: Arc<MockBackend>) -> Machine {
        let config = AppConfig::with_root(Path::new("/tmp/spawnbox-probe"));
        Machine::with_identity(backend, config, "/tmp/spawnbox-probe/img", "spawnbox-probe")
    }

    fn debian_machine(backend: Arc<MockBackend>, root: &Path) -> Machine {
        let rootfs = root.join("debian-bullseye");
        std::fs::create_dir_all(rootfs.join("etc")).unwrap();
        std::fs::write(rootfs.join("etc/os-release"), "ID=debian\n").unwrap();
        std::fs::write(rootfs.join("etc/debian_version"), "11.6\n").unwrap();
        Machine::with_identity(backend, AppConfig::with_root(root), rootfs, "spawnbox-probe")
    }

    #[tokio::test]
    async fn active_unit_passes() {
        let backend = MockBackend::with_statuses(&["running"]);
        backend.set_run_result(0, "active\n");
        let machine = probe_machine(backend);
        Probe::new(&machine).check_unit("systemd-journald").await.unwrap();
    }

    #[tokio::test]
    async fn inactive_unit_is_a_probe_failure() {
        let backend = MockBackend::with_statuses(&["running"]);
        backend.set_run_result(3, "inactive\n");
        let machine = probe_machine(backend);
        let err = Probe::new(&machine).check_unit("nginx").await.unwrap_err();
        match err {
            ProbeError::UnitInactive { unit } => assert_eq!(unit, "nginx"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn non_inactive_failure_propagates_as_command_error() {
        // A nonexistent unit or a bus problem is not a probe verdict.
        let backend = MockBackend::with_statuses(&["running"]);
        backend.set_run_result(4, "");
        let machine = probe_machine(backend);
        let err = Probe::new(&machine)
            .check_unit("no-such-unit")
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Lifecycle(_)));
    }

    #[tokio::test]
    async fn listening_address_passes() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let backend = MockBackend::with_statuses(&["running"]);
        let machine = probe_machine(backend);
        Probe::new(&machine)
            .check_address("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn closed_address_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let backend = MockBackend::with_statuses(&["running"]);
        let machine = probe_machine(backend);
        let err = Probe::new(&machine)
            .check_address("127.0.0.1", port, Duration::from_millis(150))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::AddressTimeout { .. }));
    }

    #[test]
    fn endpoints_are_parsed_or_rejected() {
        assert_eq!(
            parse_endpoint("127.0.0.1:8080").unwrap(),
            ("127.0.0.1".to_string(), 8080)
        );
        assert!(matches!(
            parse_endpoint("localhost"),
            Err(ProbeError::InvalidAddress(_))
        ));
        assert!(matches!(
            parse_endpoint(":80"),
            Err(ProbeError::InvalidAddress(_))
        ));
        assert!(matches!(
            parse_endpoint("localhost:notaport"),
            Err(ProbeError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn package_probe_rejects_non_downloadable_references() {
        let backend = MockBackend::with_statuses(&["running"]);
        let machine = probe_machine(backend.clone());
        let err = Probe::new(&machine)
            .package("file:///tmp/pkg.deb", &[], &[], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::InvalidPackage(_)));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn package_probe_installs_starts_and_verifies() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let dir = tempfile::tempdir().unwrap();
        let backend = MockBackend::with_statuses(&["running"]);
        backend.set_run_result(0, "active\n");
        let machine = debian_machine(backend.clone(), dir.path());

        Probe::new(&machine)
            .package(
                "https://example.org/pool/nginx_1.22_amd64.deb",
                &["nginx".to_string()],
                &[format!("127.0.0.1:{}", port)],
                Duration::from_secs(1),
            )
            .await
            .unwrap();

        let commands: Vec<String> = backend
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                BackendCall::Run { command, .. } => Some(command),
                _ => None,
            })
            .collect();
        assert!(commands.iter().any(|c| c.starts_with("/usr/bin/wget")));
        assert!(commands
            .iter()
            .any(|c| c.starts_with("/usr/bin/apt install") && c.ends_with("nginx_1.22_amd64.deb")));
        assert!(commands.contains(&"/bin/systemctl enable nginx".to_string()));
        assert!(commands.contains(&"/bin/systemctl start nginx".to_string()));
        assert!(commands.contains(&"/bin/systemctl is-active nginx".to_string()));
    }
}
