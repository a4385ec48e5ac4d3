use spawnbox_exec::ExecError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Unknown image label {0}. Hint: `spawnbox list-images` shows all curated images.")]
    UnknownImage(String),

    #[error("Unsupported scheme for image: {0}")]
    InvalidImageReference(String),

    #[error("Unable to activate image at {0}")]
    InvalidPhysicalImage(PathBuf),

    #[error("Unable to download image from {url}")]
    DownloadFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Provisioning filesystem image failed: {0}")]
    ProvisioningFailed(String),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ImageError>;
