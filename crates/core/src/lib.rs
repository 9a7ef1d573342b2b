//! Core utilities shared by the platform layer and the application.
//!
//! This crate provides:
//! - Error types and result aliases
//! - Logging initialization
//! - Frame timing
//! - Configuration loading and saving

mod config;
mod error;
mod logging;
mod timer;

pub use config::{AppConfig, Config, ConfigError, WindowMode};
pub use error::{Error, Result};
pub use logging::{DEFAULT_FILTER, init_logging};
pub use timer::{FpsCounter, Timer};
