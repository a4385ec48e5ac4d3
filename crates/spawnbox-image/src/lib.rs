//! Curated OS images for spawnbox
//!
//! The catalog names every image the tool can boot; the provider turns
//! a catalog entry into an activated, bootable OS root on disk.

mod catalog;
mod error;
mod provider;

pub use catalog::*;
pub use error::*;
pub use provider::*;
