//! CLI command implementations

use anyhow::Result;
use spawnbox_config::AppConfig;
use spawnbox_core::probe::Probe;
use spawnbox_core::{with_machine, Machine};
use spawnbox_exec::{NspawnBackend, RunOptions};
use spawnbox_image::{find_distribution, ImageProvider};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// How long a probed TCP endpoint gets to start accepting connections.
const NETWORK_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Boot the image, run the command inside, tear the container down, and
/// return the command's exit code.
pub async fn run(
    config: AppConfig,
    image: &str,
    cmd: Vec<String>,
    interactive: bool,
    tty: bool,
) -> Result<i32> {
    let dist = find_distribution(image)?;
    let provider = ImageProvider::new(config.clone());
    let rootfs = provider.acquire(dist).await?;

    let backend = Arc::new(NspawnBackend::new());
    let machine = Arc::new(Machine::new(backend, config, rootfs));

    let payload = shell_words::join(&cmd);
    info!("Invoking command '{}' in image {}", payload, dist.fullname());
    let opts = RunOptions {
        // The payload's exit code is the verdict; relay it instead of
        // treating non-zero as a controller error.
        check: false,
        capture: !interactive,
        tee: !interactive,
        interactive: tty,
        cwd: None,
    };

    let output = with_machine(machine, |m| async move {
        m.launch().await?;
        m.run(&payload, &opts).await
    })
    .await?;
    Ok(output.exit_code)
}

/// Acquire and provision the named images, or all curated ones.
pub async fn pull(config: AppConfig, images: Vec<String>, all: bool, force: bool) -> Result<()> {
    let labels = if all {
        spawnbox_image::list_images()
    } else {
        images
    };

    for label in labels {
        let dist = find_distribution(&label)?;
        let provider = if force {
            ImageProvider::with_force(config.clone())
        } else {
            ImageProvider::new(config.clone())
        };
        let path = provider.acquire(dist).await?;
        println!("{}", path.display());
    }
    Ok(())
}

pub fn list_images() {
    for label in spawnbox_image::list_images() {
        println!("{}", label);
    }
}

/// Boot the image and verify the journal daemon is active inside.
pub async fn probe(config: AppConfig, image: &str) -> Result<()> {
    let dist = find_distribution(image)?;
    let provider = ImageProvider::new(config.clone());
    let rootfs = provider.acquire(dist).await?;

    let backend = Arc::new(NspawnBackend::new());
    let machine = Machine::new(backend, config, rootfs);

    machine.launch().await?;
    let verdict = Probe::new(&machine).basic().await;
    machine.destroy().await;
    verdict?;

    println!("Probe succeeded for {}", dist.fullname());
    Ok(())
}

/// Boot the image, install a package inside it, and verify the units
/// and TCP endpoints it is supposed to bring up.
pub async fn pkgprobe(
    config: AppConfig,
    image: &str,
    package: &str,
    units: Vec<String>,
    listen: Vec<String>,
) -> Result<()> {
    let dist = find_distribution(image)?;
    let provider = ImageProvider::new(config.clone());
    let rootfs = provider.acquire(dist).await?;

    info!("Probing package {} in image {}", package, dist.fullname());
    let backend = Arc::new(NspawnBackend::new());
    let machine = Machine::new(backend, config, rootfs);

    machine.launch().await?;
    machine.info().await;
    let verdict = Probe::new(&machine)
        .package(package, &units, &listen, NETWORK_PROBE_TIMEOUT)
        .await;
    machine.destroy().await;
    verdict?;

    println!("Package probe succeeded for {}", dist.fullname());
    Ok(())
}
