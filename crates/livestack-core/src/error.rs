use std::path::PathBuf;

use thiserror::Error;

use crate::stack::StackId;

#[derive(Error, Debug)]
pub enum LiveStackError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image format error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("Invalid FITS file: {0}")]
    InvalidFits(String),

    #[error("Unsupported image format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("Geometry mismatch: expected {expected_width}x{expected_height}, got {width}x{height}")]
    GeometryMismatch {
        expected_width: usize,
        expected_height: usize,
        width: usize,
        height: usize,
    },

    #[error("Channel count mismatch: expected {expected}, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },

    #[error("Alignment failed: {0}")]
    AlignmentFailed(String),

    #[error("Noise estimation failed: insignificant data")]
    InsignificantData,

    #[error("{operation} timed out after {seconds}s")]
    Timeout {
        operation: &'static str,
        seconds: u64,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Missing stack property: {0}")]
    MissingProperty(&'static str),

    #[error("Invalid value for stack property {key}: {value:?}")]
    InvalidProperty { key: &'static str, value: String },

    #[error("Unknown stack {0}")]
    UnknownStack(StackId),

    #[error("Stack {id} cannot {action} while {state}")]
    InvalidTransition {
        id: StackId,
        action: &'static str,
        state: String,
    },

    #[error("Stack {0} has no running-average image")]
    NoRunningImage(StackId),

    #[error("Config parse error: {0}")]
    TomlDecode(#[from] toml::de::Error),

    #[error("Config encode error: {0}")]
    TomlEncode(#[from] toml::ser::Error),

    #[error("Watcher error: {0}")]
    Watcher(#[from] notify::Error),
}

pub type Result<T> = std::result::Result<T, LiveStackError>;
