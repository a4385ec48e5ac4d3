//! Curated image catalog
//!
//! Every image spawnbox knows how to boot, keyed by a human label like
//! `debian-bullseye` or `debian-11`. Most images come from Docker Hub;
//! Ubuntu uses the minimal cloud-image tarballs because its Docker
//! image boots like a Debian one anyway.

use crate::error::{ImageError, Result};

/// Package-management family, which decides how an image gets systemd
/// installed during provisioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    Debian,
    RedHat,
    Suse,
    Arch,
}

/// One curated operating system image.
#[derive(Debug, Clone)]
pub struct Distribution {
    pub family: OsFamily,
    pub name: &'static str,
    /// Release codename or number, e.g. `bullseye` or `8`
    pub release: &'static str,
    /// Numeric version used as an alternative label suffix
    pub version: &'static str,
    /// Source URI, `docker://` or `https://`
    pub image: &'static str,
}

impl Distribution {
    /// Primary label, e.g. `debian-bullseye`
    pub fn fullname(&self) -> String {
        format!("{}-{}", self.name, self.release)
    }

    /// Version-based label, e.g. `debian-11`
    pub fn versionname(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }
}

pub const CURATED_DISTRIBUTIONS: &[Distribution] = &[
    // .deb based
    Distribution {
        family: OsFamily::Debian,
        name: "debian",
        release: "buster",
        version: "10",
        image: "docker://docker.io/debian:buster-slim",
    },
    Distribution {
        family: OsFamily::Debian,
        name: "debian",
        release: "bullseye",
        version: "11",
        image: "docker://docker.io/debian:bullseye-slim",
    },
    Distribution {
        family: OsFamily::Debian,
        name: "debian",
        release: "bookworm",
        version: "12",
        image: "docker://docker.io/debian:bookworm-slim",
    },
    Distribution {
        family: OsFamily::Debian,
        name: "debian",
        release: "sid",
        version: "unstable",
        image: "docker://docker.io/debian:sid-slim",
    },
    Distribution {
        family: OsFamily::Debian,
        name: "ubuntu",
        release: "focal",
        version: "20",
        image: "https://cloud-images.ubuntu.com/minimal/daily/focal/current/focal-minimal-cloudimg-amd64-root.tar.xz",
    },
    Distribution {
        family: OsFamily::Debian,
        name: "ubuntu",
        release: "jammy",
        version: "22",
        image: "https://cloud-images.ubuntu.com/minimal/daily/jammy/current/jammy-minimal-cloudimg-amd64-root.tar.xz",
    },
    // .rpm based
    Distribution {
        family: OsFamily::RedHat,
        name: "fedora",
        release: "36",
        version: "36",
        image: "docker://docker.io/fedora:36",
    },
    Distribution {
        family: OsFamily::RedHat,
        name: "fedora",
        release: "37",
        version: "37",
        image: "docker://docker.io/fedora:37",
    },
    Distribution {
        family: OsFamily::RedHat,
        name: "centos",
        release: "7",
        version: "7",
        image: "docker://docker.io/centos:7",
    },
    Distribution {
        family: OsFamily::RedHat,
        name: "centos",
        release: "8",
        version: "8",
        image: "docker://docker.io/centos:8",
    },
    Distribution {
        family: OsFamily::RedHat,
        name: "rockylinux",
        release: "8",
        version: "8",
        image: "docker://docker.io/rockylinux:8",
    },
    Distribution {
        family: OsFamily::RedHat,
        name: "oraclelinux",
        release: "8",
        version: "8",
        image: "docker://docker.io/oraclelinux:8",
    },
    Distribution {
        family: OsFamily::RedHat,
        name: "amazonlinux",
        release: "2022",
        version: "2022",
        image: "docker://docker.io/amazonlinux:2022",
    },
    Distribution {
        family: OsFamily::Suse,
        name: "opensuse",
        release: "leap",
        version: "15",
        image: "docker://docker.io/opensuse/leap:15",
    },
    Distribution {
        family: OsFamily::Suse,
        name: "opensuse",
        release: "tumbleweed",
        version: "latest",
        image: "docker://docker.io/opensuse/tumbleweed:latest",
    },
    // others
    Distribution {
        family: OsFamily::Arch,
        name: "archlinux",
        release: "20220501",
        version: "20220501",
        image: "docker://docker.io/archlinux:base-20220501.0.54834",
    },
];

/// Look up a curated image by either of its labels.
pub fn find_distribution(label: &str) -> Result<&'static Distribution> {
    CURATED_DISTRIBUTIONS
        .iter()
        .find(|d| label == d.fullname() || label == d.versionname())
        .ok_or_else(|| ImageError::UnknownImage(label.to_string()))
}

/// Primary labels of all curated images, in catalog order.
pub fn list_images() -> Vec<String> {
    CURATED_DISTRIBUTIONS.iter().map(|d| d.fullname()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn finds_by_release_label() {
        let dist = find_distribution("debian-bullseye").unwrap();
        assert_eq!(dist.version, "11");
        assert!(dist.image.starts_with("docker://"));
    }

    #[test]
    fn finds_by_version_label() {
        let dist = find_distribution("debian-11").unwrap();
        assert_eq!(dist.release, "bullseye");
    }

    #[test]
    fn unknown_label_is_reported_with_hint() {
        let err = find_distribution("windows-11").unwrap_err();
        assert!(err.to_string().contains("list-images"));
        assert!(matches!(err, ImageError::UnknownImage(_)));
    }

    #[test]
    fn fullnames_are_unique() {
        let labels = list_images();
        let unique: HashSet<_> = labels.iter().collect();
        assert_eq!(labels.len(), unique.len());
    }
}
