//! Error types for the application and platform layers.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised outside the GPU layer.
#[derive(Error, Debug)]
pub enum Error {
    /// Window creation or event loop errors
    #[error("Window error: {0}")]
    Window(String),

    /// Presentation surface errors (unsupported handle, creation failure)
    #[error("Surface error: {0}")]
    Surface(String),

    /// Configuration loading or saving errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using the core Error type.
pub type Result<T> = std::result::Result<T, Error>;
