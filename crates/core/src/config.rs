//! Configuration loading and saving.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        ensure_toml(path)?;
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load configuration from file, or the defaults when the file does not
    /// exist. A file that exists but fails to parse is still an error.
    fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        ensure_toml(path)?;
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        debug!("Loading config from {}", path.display());
        Self::load_from_file(path)
    }

    /// Save configuration to file
    fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        ensure_toml(path)?;
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

fn ensure_toml(path: &Path) -> Result<(), ConfigError> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => Ok(()),
        _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// How the window occupies the screen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowMode {
    #[default]
    Windowed,
    Borderless,
    Fullscreen,
}

/// Application settings read from `vkframe.toml`.
///
/// Every field has a default, so a file only needs the keys it changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub application_name: String,
    pub engine_name: String,
    /// Enables the validation layer and debug messenger.
    pub validation: bool,
    /// FIFO when set, otherwise MAILBOX (or IMMEDIATE) when available.
    pub vsync: bool,
    pub width: u32,
    pub height: u32,
    pub window_mode: WindowMode,
    pub request_compute_queue: bool,
    pub request_transfer_queue: bool,
    /// Acquire and slot fence timeout. Absent means wait forever.
    pub fence_timeout_ms: Option<u64>,
    pub pipeline_cache_path: Option<PathBuf>,
    pub clear_color: [f32; 4],
    /// SPIR-V for the triangle pipeline.
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            application_name: "vkframe".to_string(),
            engine_name: "vkframe".to_string(),
            validation: cfg!(debug_assertions),
            vsync: true,
            width: 1920,
            height: 1080,
            window_mode: WindowMode::Windowed,
            request_compute_queue: false,
            request_transfer_queue: false,
            fence_timeout_ms: None,
            pipeline_cache_path: None,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            vertex_shader: PathBuf::from("shaders/triangle.vert.spv"),
            fragment_shader: PathBuf::from("shaders/triangle.frag.spv"),
        }
    }
}

impl Config for AppConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vkframe.toml");

        let config = AppConfig {
            vsync: false,
            width: 800,
            height: 600,
            window_mode: WindowMode::Borderless,
            fence_timeout_ms: Some(250),
            pipeline_cache_path: Some(PathBuf::from("cache/pipeline.bin")),
            clear_color: [0.1, 0.2, 0.3, 1.0],
            ..AppConfig::default()
        };
        config.save_to_file(&path).unwrap();

        let loaded = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vkframe.toml");
        std::fs::write(&path, "vsync = false\nwindow_mode = \"fullscreen\"\n").unwrap();

        let loaded = AppConfig::load_from_file(&path).unwrap();
        assert!(!loaded.vsync);
        assert_eq!(loaded.window_mode, WindowMode::Fullscreen);
        assert_eq!((loaded.width, loaded.height), (1920, 1080));
        assert_eq!(loaded.fence_timeout_ms, None);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");

        let loaded = AppConfig::load_or_default(&path).unwrap();
        assert_eq!(loaded, AppConfig::default());
        assert!(matches!(
            AppConfig::load_from_file(&path),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vkframe.toml");
        std::fs::write(&path, "width = \"wide\"").unwrap();

        assert!(matches!(
            AppConfig::load_or_default(&path),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vkframe.json");

        assert!(matches!(
            AppConfig::default().save_to_file(&path),
            Err(ConfigError::UnsupportedFormat(_))
        ));
        assert!(!path.exists());
    }
}
