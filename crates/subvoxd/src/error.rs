//! Error types for the capture pipeline

use std::fmt;
use std::io;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for capture, recognition, translation and speech
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(io::Error),

    /// Frame could not be cropped to the subtitle region
    Crop(String),

    /// Region could not be encoded for the recognizer
    Image(image::ImageError),

    /// Recognizer failed for this tick
    Recognize(String),

    /// Translator failed or is not ready
    Translate(String),

    /// Capture source is gone; the loop cannot continue
    CaptureLost(String),

    /// Capture loop was started twice
    AlreadyRunning,

    /// Invalid configuration
    Config(String),

    /// Translation cache could not be opened
    Cache(subvoxdb::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Crop(msg) => write!(f, "Crop failed: {}", msg),
            Error::Image(e) => write!(f, "Image encoding failed: {}", e),
            Error::Recognize(msg) => write!(f, "Recognition failed: {}", msg),
            Error::Translate(msg) => write!(f, "Translation failed: {}", msg),
            Error::CaptureLost(msg) => write!(f, "Capture source lost: {}", msg),
            Error::AlreadyRunning => write!(f, "Capture loop is already running"),
            Error::Config(msg) => write!(f, "Invalid configuration: {}", msg),
            Error::Cache(e) => write!(f, "Translation cache error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Image(e) => Some(e),
            Error::Cache(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::Image(err)
    }
}

impl From<subvoxdb::Error> for Error {
    fn from(err: subvoxdb::Error) -> Self {
        Error::Cache(err)
    }
}
