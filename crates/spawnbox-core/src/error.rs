//! Error types for the lifecycle controller

use spawnbox_exec::ExecError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Image at {0} not found")]
    ImageNotFound(PathBuf),

    #[error(
        "Unable to spawn container {machine}. Reason: {reason}. \
         Hint: Please run `machinectl terminate {machine}` and try again."
    )]
    MachineExists { machine: String, reason: String },

    #[error("Container {machine} failed to launch: {message}")]
    BootLaunchFailed { machine: String, message: String },

    #[error("Timeout while spawning container {machine} within {timeout:?}")]
    BootTimeout { machine: String, timeout: Duration },

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LifecycleError>;
