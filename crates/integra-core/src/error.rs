use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IntegraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image format error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("At least {required} images are required for this integration ({found} given)")]
    TooFewFrames { required: usize, found: usize },

    #[error("{}: Incompatible image geometry", path.display())]
    IncompatibleGeometry { path: PathBuf },

    #[error("Invalid region of interest: {0}")]
    InvalidRoi(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("{}: {reason}", path.display())]
    InvalidWeight { path: PathBuf, reason: String },

    #[error("{}: no local normalization data available", path.display())]
    MissingLocalNormalization { path: PathBuf },

    #[error("Statistics cache error: {0}")]
    Cache(String),

    #[error("Unable to allocate {0}")]
    ResourceExhausted(String),

    #[error("Process aborted")]
    Aborted,
}

impl IntegraError {
    /// True for cooperative cancellation, which callers report as a notice
    /// rather than a failure.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

pub type Result<T> = std::result::Result<T, IntegraError>;
