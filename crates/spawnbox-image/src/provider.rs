//! Image acquisition and provisioning
//!
//! Images are physically manifested under the archive directory and
//! activated by symlinking into the images directory, the same
//! archive/live split Let's Encrypt uses for certificates. Docker
//! images are converted to plain rootfs trees with `skopeo` and
//! `umoci`; tarball images are downloaded and unpacked with the host's
//! `tar`.

use crate::catalog::{Distribution, OsFamily};
use crate::error::{ImageError, Result};
use spawnbox_config::AppConfig;
use spawnbox_exec::{resolve_os_root, run_host, run_in_rootfs, RunOptions};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Packages installed into every image, needed by the probe runner.
const ADDITIONAL_PACKAGES: &str = "curl wget";

/// Init binaries whose presence makes a rootfs bootable.
const INIT_CANDIDATES: &[&str] = &[
    "usr/lib/systemd/systemd",
    "lib/systemd/systemd",
    "sbin/init",
];

pub struct ImageProvider {
    config: AppConfig,
    /// Discard cached artifacts and start from scratch
    force: bool,
}

impl ImageProvider {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            force: false,
        }
    }

    pub fn with_force(config: AppConfig) -> Self {
        Self {
            config,
            force: true,
        }
    }

    /// Path of the activated image, whether or not it exists yet.
    pub fn image_path(&self, dist: &Distribution) -> PathBuf {
        self.config.directories.images.join(dist.fullname())
    }

    fn staging_path(&self, dist: &Distribution) -> PathBuf {
        self.config
            .directories
            .archive
            .join(format!("{}.img", dist.fullname()))
    }

    fn oci_path(&self, dist: &Distribution) -> PathBuf {
        self.config
            .directories
            .archive
            .join(format!("{}.oci", dist.fullname()))
    }

    /// Make the image available for booting and return its activated
    /// path. Already-activated images are returned as-is unless forced.
    pub async fn acquire(&self, dist: &Distribution) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.config.directories.archive)?;
        std::fs::create_dir_all(&self.config.directories.images)?;

        let image = self.image_path(dist);
        if image.exists() && !self.force {
            tracing::debug!("Image {} is already activated", dist.fullname());
            return Ok(image);
        }

        tracing::info!("Provisioning container image {}", dist.fullname());
        tracing::info!("Acquiring container image from {}", dist.image);
        match dist.image.split_once("://") {
            Some(("docker", _)) => self.acquire_from_docker(dist).await?,
            Some(("http" | "https", _)) => self.acquire_from_http(dist).await?,
            _ => return Err(ImageError::InvalidImageReference(dist.image.to_string())),
        }

        let staging = self.staging_path(dist);
        let rootfs = resolve_os_root(&staging)?;
        if !has_init(&rootfs) {
            self.provision_systemd(dist, &rootfs).await?;
        } else {
            tracing::info!("Skipping systemd installation");
        }

        self.activate(dist)
    }

    /// Convert a Docker image into a plain rootfs via an OCI bundle.
    async fn acquire_from_docker(&self, dist: &Distribution) -> Result<()> {
        let oci = self.oci_path(dist);
        let staging = self.staging_path(dist);

        if self.force {
            remove_tree(&oci)?;
            remove_tree(&staging)?;
        }

        if !oci.join("index.json").exists() {
            run_host(
                &format!(
                    "skopeo copy --override-os=linux {} oci:{}:default",
                    dist.image,
                    oci.display()
                ),
                &RunOptions::captured(),
            )
            .await?;
        }

        if is_dir_empty(&staging) || is_dir_empty(&staging.join("rootfs")) {
            run_host(
                &format!(
                    "umoci unpack --rootless --image={}:default {}",
                    oci.display(),
                    staging.display()
                ),
                &RunOptions::captured(),
            )
            .await?;
        }
        Ok(())
    }

    /// Download a rootfs tarball and unpack it with the host's tar.
    async fn acquire_from_http(&self, dist: &Distribution) -> Result<()> {
        let staging = self.staging_path(dist);
        if self.force {
            remove_tree(&staging)?;
        }

        let downloads = self.config.directories.downloads();
        std::fs::create_dir_all(&downloads)?;
        let file_name = dist
            .image
            .rsplit('/')
            .next()
            .unwrap_or("image.tar")
            .to_string();
        let tarball = downloads.join(&file_name);

        if !tarball.exists() {
            download(dist.image, &tarball).await?;
        }

        if is_dir_empty(&staging) {
            tracing::info!(
                "Extracting rootfs from {} to {}",
                tarball.display(),
                staging.display()
            );
            std::fs::create_dir_all(&staging)?;
            run_host(
                &format!(
                    "tar --directory={} -xf {}",
                    staging.display(),
                    tarball.display()
                ),
                &RunOptions::captured(),
            )
            .await?;
        }
        Ok(())
    }

    /// Install systemd and the probe packages into an unbooted rootfs,
    /// per package-management family.
    async fn provision_systemd(&self, dist: &Distribution, rootfs: &Path) -> Result<()> {
        tracing::info!("Installing systemd into image {}", dist.fullname());
        let opts = RunOptions::captured();
        match dist.family {
            OsFamily::Debian => {
                run_in_rootfs(
                    rootfs,
                    &format!(
                        "sh -c 'export DEBIAN_FRONTEND=noninteractive; \
                         apt-get update; apt-get install --yes systemd {}'",
                        ADDITIONAL_PACKAGES
                    ),
                    &opts,
                )
                .await?;
            }
            OsFamily::RedHat => {
                if dist.name == "centos" && dist.release == "8" {
                    self.fix_centos_vault_repos(rootfs).await?;
                }
                let installer = if dist.name == "centos" { "yum" } else { "dnf" };
                run_in_rootfs(
                    rootfs,
                    &format!(
                        "{} install -y systemd {}",
                        installer, ADDITIONAL_PACKAGES
                    ),
                    &opts,
                )
                .await?;
            }
            OsFamily::Suse => {
                run_in_rootfs(
                    rootfs,
                    &format!("zypper install -y systemd {}", ADDITIONAL_PACKAGES),
                    &opts,
                )
                .await?;
            }
            OsFamily::Arch => {
                run_in_rootfs(
                    rootfs,
                    &format!("pacman -Syu --noconfirm systemd {}", ADDITIONAL_PACKAGES),
                    &opts,
                )
                .await?;
            }
        }

        if !has_init(rootfs) {
            return Err(ImageError::ProvisioningFailed(format!(
                "no init program found in {} after package installation",
                rootfs.display()
            )));
        }
        Ok(())
    }

    /// CentOS 8 is end-of-life; its mirrors moved to the vault.
    async fn fix_centos_vault_repos(&self, rootfs: &Path) -> Result<()> {
        let repos = rootfs.join("etc/yum.repos.d");
        run_host(
            &format!(
                "/bin/sh -c 'sed -i s/mirrorlist/#mirrorlist/g {}/*'",
                repos.display()
            ),
            &RunOptions::captured(),
        )
        .await?;
        run_host(
            &format!(
                "/bin/sh -c 'sed -i s|#baseurl=http://mirror.centos.org|baseurl=http://vault.centos.org|g {}/CentOS-*'",
                repos.display()
            ),
            &RunOptions::captured(),
        )
        .await?;
        Ok(())
    }

    /// Activate a staged image by symlinking it into the images
    /// directory. Rejects empty staging trees.
    pub fn activate(&self, dist: &Distribution) -> Result<PathBuf> {
        let staging = self.staging_path(dist);
        if is_dir_empty(&staging) {
            return Err(ImageError::InvalidPhysicalImage(staging));
        }
        let target = self.image_path(dist);
        if target.symlink_metadata().is_ok() {
            std::fs::remove_file(&target)?;
        }
        std::os::unix::fs::symlink(&staging, &target)?;
        tracing::info!("Installed image at {}", target.display());
        Ok(target)
    }
}

fn has_init(rootfs: &Path) -> bool {
    INIT_CANDIDATES
        .iter()
        .any(|candidate| rootfs.join(candidate).exists())
}

fn is_dir_empty(path: &Path) -> bool {
    match std::fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => true,
    }
}

fn remove_tree(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_dir_all(path)?;
    }
    Ok(())
}

/// Stream a URL to disk. Writes to a temporary name first so an
/// interrupted download never leaves a plausible-looking tarball.
async fn download(url: &str, target: &Path) -> Result<()> {
    tracing::info!("Downloading {}", url);
    let mut response = reqwest::get(url)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|source| ImageError::DownloadFailed {
            url: url.to_string(),
            source,
        })?;

    let partial = target.with_extension("part");
    let mut file = tokio::fs::File::create(&partial).await?;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|source| ImageError::DownloadFailed {
            url: url.to_string(),
            source,
        })?
    {
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    tokio::fs::rename(&partial, target).await?;
    Ok(())
}
