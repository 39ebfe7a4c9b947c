//! Custom error types for the cropping and dataset tools

use std::fmt;
use std::io;

/// Error kinds shared by both command-line tools
#[derive(Debug)]
pub enum KitError {
    /// I/O error
    IoError(io::Error),
    /// Download failed (connection error or non-success status)
    NetworkError(String),
    /// Corrupt or unsupported gzip/tar stream, or a rejected entry
    ArchiveError(String),
    /// Batch file does not match the expected layout
    FormatError(String),
    /// No eligible image file was found for cropping
    NoInputError(String),
    /// Crop rectangle is invalid for the source image
    BoundsError(String),
    /// Image decoding or encoding failed
    ImageError(image::ImageError),
    /// Invalid configuration value
    ConfigError(String),
    /// Generic error with message
    GenericError(String),
}

impl fmt::Display for KitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KitError::IoError(e) => write!(f, "I/O error: {}", e),
            KitError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            KitError::ArchiveError(msg) => write!(f, "Archive error: {}", msg),
            KitError::FormatError(msg) => write!(f, "Format error: {}", msg),
            KitError::NoInputError(msg) => write!(f, "No input: {}", msg),
            KitError::BoundsError(msg) => write!(f, "Bounds error: {}", msg),
            KitError::ImageError(e) => write!(f, "Image error: {}", e),
            KitError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            KitError::GenericError(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for KitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            KitError::IoError(e) => Some(e),
            KitError::ImageError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for KitError {
    fn from(error: io::Error) -> Self {
        KitError::IoError(error)
    }
}

impl From<image::ImageError> for KitError {
    fn from(error: image::ImageError) -> Self {
        KitError::ImageError(error)
    }
}

impl From<String> for KitError {
    fn from(msg: String) -> Self {
        KitError::GenericError(msg)
    }
}

/// Result type for all tool operations
pub type KitResult<T> = Result<T, KitError>;
