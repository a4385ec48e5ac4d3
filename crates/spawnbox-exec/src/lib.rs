//! Command executor and backend seam for spawnbox
//!
//! This crate owns everything that touches external processes:
//! - the host command runner with capture/tee/interactive handling
//! - the `MachineBackend` trait the lifecycle controller talks through
//! - the `systemd-nspawn`/`systemd-run`/`machinectl` wrappers
//! - the shared status-signal and error-classification vocabulary

mod backend;
mod error;
mod host;
mod nspawn;
mod rootfs;
pub mod signals;

pub use backend::*;
pub use error::*;
pub use host::*;
pub use nspawn::*;
pub use rootfs::*;
