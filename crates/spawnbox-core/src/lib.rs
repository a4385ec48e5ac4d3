//! Lifecycle controller for ephemeral namespace containers
//!
//! Boots a prepared OS root as a short-lived container, supervises the
//! launcher, waits for readiness, runs commands inside, and guarantees
//! teardown on every exit path.

mod error;
mod machine;
pub mod probe;
mod supervisor;
pub mod tty;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use error::*;
pub use machine::*;
pub use supervisor::{BootFailure, BootSupervisor};
