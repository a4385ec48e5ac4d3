//! OS root validation
//!
//! `systemd-nspawn` refuses a directory without an `/etc/os-release`
//! file ("doesn't look like an OS root directory"), so the same check
//! runs up front, both after provisioning and before boot.

use crate::{ExecError, Result};
use std::path::{Path, PathBuf};

/// Locate the actual OS root beneath an image path.
///
/// Accepts either a directory that is the rootfs itself or one holding
/// a `rootfs/` subdirectory (the layout produced by OCI unpacking).
pub fn resolve_os_root(image_path: &Path) -> Result<PathBuf> {
    let candidates = [
        image_path.to_path_buf(),
        image_path.join("rootfs"),
    ];

    for candidate in candidates {
        if candidate.join("etc").join("os-release").exists() {
            return Ok(candidate);
        }
    }

    Err(ExecError::OsRootInvalid(image_path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_os_root(base: &Path) {
        std::fs::create_dir_all(base.join("etc")).unwrap();
        std::fs::write(base.join("etc").join("os-release"), "ID=debian\n").unwrap();
    }

    #[test]
    fn direct_rootfs_is_found() {
        let dir = tempfile::tempdir().unwrap();
        make_os_root(dir.path());
        assert_eq!(resolve_os_root(dir.path()).unwrap(), dir.path());
    }

    #[test]
    fn oci_rootfs_subdirectory_is_found() {
        let dir = tempfile::tempdir().unwrap();
        make_os_root(&dir.path().join("rootfs"));
        assert_eq!(
            resolve_os_root(dir.path()).unwrap(),
            dir.path().join("rootfs")
        );
    }

    #[test]
    fn missing_os_release_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_os_root(dir.path()).unwrap_err();
        assert!(matches!(err, ExecError::OsRootInvalid(_)));
    }
}
