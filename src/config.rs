// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Provides sensible defaults if the config file is missing or has errors.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub shaders: ShaderConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Also used as the Vulkan application name
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "GridSpace".to_string(),
            width: 800,
            height: 600,
            resizable: false,
            fullscreen: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub max_frames_in_flight: usize,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            max_frames_in_flight: 2,
        }
    }
}

impl GraphicsConfig {
    /// Preferred present mode as a Vulkan enum.
    ///
    /// The swapchain still falls back to FIFO when the surface does not
    /// offer the preferred mode.
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        match self.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            other => {
                log::warn!("Unknown present mode '{}', defaulting to MAILBOX", other);
                vk::PresentModeKHR::MAILBOX
            }
        }
    }

    pub fn frames_in_flight(&self) -> usize {
        self.max_frames_in_flight.max(1)
    }
}

/// SPIR-V shader locations
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
    /// Rebuild the pipeline when either file changes on disk
    pub hot_reload: bool,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            vertex: PathBuf::from("shaders/triangle.vert.spv"),
            fragment: PathBuf::from("shaders/triangle.frag.spv"),
            hot_reload: false,
        }
    }
}

/// Debug settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Only honoured in debug builds
    pub validation_layers: bool,
    pub log_level: String,
    pub log_to_file: bool,
    pub log_dir: PathBuf,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_level: "info".to_string(),
            log_to_file: true,
            log_dir: PathBuf::from("logs"),
            show_fps: true,
        }
    }
}

impl DebugConfig {
    pub fn level_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

impl Config {
    /// Load configuration from `config.toml`, falling back to defaults.
    ///
    /// This runs before the logger exists, so a load error is handed back
    /// for the caller to log once logging is up.
    pub fn load() -> (Self, Option<anyhow::Error>) {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, Option<anyhow::Error>) {
        match Self::load_from_path(path) {
            Ok(config) => (config, None),
            Err(e) => (Config::default(), Some(e)),
        }
    }

    /// Load configuration from a specific path. A missing file yields defaults.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Validation layers are a debug-build feature only
    pub fn validation_enabled(&self) -> bool {
        cfg!(debug_assertions) && self.debug.validation_layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.window.title, "GridSpace");
        assert_eq!((config.window.width, config.window.height), (800, 600));
        assert!(!config.window.resizable);
        assert_eq!(config.graphics.present_mode(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(config.graphics.clear_color, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(config.shaders.vertex, PathBuf::from("shaders/triangle.vert.spv"));
        assert!(!config.shaders.hot_reload);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = Config::from_toml_str(
            r#"
            [window]
            width = 1024

            [graphics]
            present_mode = "FIFO"
            "#,
        )
        .unwrap();

        assert_eq!(config.window.width, 1024);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.graphics.present_mode(), vk::PresentModeKHR::FIFO);
        assert_eq!(config.graphics.max_frames_in_flight, 2);
        assert!(config.debug.log_to_file);
    }

    #[test]
    fn unknown_present_mode_falls_back_to_mailbox() {
        let graphics = GraphicsConfig {
            present_mode: "vsync-please".to_string(),
            ..Default::default()
        };
        assert_eq!(graphics.present_mode(), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn present_mode_names() {
        let mode = |name: &str| GraphicsConfig {
            present_mode: name.to_string(),
            ..Default::default()
        }
        .present_mode();

        assert_eq!(mode("immediate"), vk::PresentModeKHR::IMMEDIATE);
        assert_eq!(mode("fifo_relaxed"), vk::PresentModeKHR::FIFO_RELAXED);
        assert_eq!(mode("Mailbox"), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn frames_in_flight_is_at_least_one() {
        let graphics = GraphicsConfig {
            max_frames_in_flight: 0,
            ..Default::default()
        };
        assert_eq!(graphics.frames_in_flight(), 1);
    }

    #[test]
    fn log_level_parses_with_info_fallback() {
        let mut debug = DebugConfig::default();
        debug.log_level = "trace".to_string();
        assert_eq!(debug.level_filter(), log::LevelFilter::Trace);

        debug.log_level = "loud".to_string();
        assert_eq!(debug.level_filter(), log::LevelFilter::Info);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(Config::from_toml_str("[window\nwidth = ").is_err());
        assert!(Config::from_toml_str("[window]\nwidth = \"wide\"").is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load_from_path("does/not/exist/config.toml").unwrap();
        assert_eq!(config.window.title, "GridSpace");
    }

    #[test]
    fn unreadable_config_falls_back_with_error() {
        let path = std::env::temp_dir().join(format!("gridspace_bad_{}.toml", std::process::id()));
        std::fs::write(&path, "[graphics]\nclear_color = \"black\"\n").unwrap();

        let (config, error) = Config::load_or_default(&path);
        std::fs::remove_file(&path).unwrap();

        let error = error.expect("parse failure should be reported");
        assert!(format!("{:#}", error).contains("Failed to parse config file"));
        assert_eq!(config.graphics.clear_color, [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn missing_file_reports_no_error() {
        let (config, error) = Config::load_or_default("does/not/exist/config.toml");
        assert!(error.is_none());
        assert_eq!(config.window.width, 800);
    }
}
