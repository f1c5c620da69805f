// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section falls back to defaults, so a partial (or missing) file is fine.

use crate::error::{RenderError, RenderResult};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub camera: CameraConfig,
    pub assets: AssetConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Mesh Renderer".to_string(),
            width: 1366,
            height: 768,
        }
    }
}

/// Graphics settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub prefer_present_mode: String,
    pub clear_color: [f32; 4],
    /// Upper bound on texture descriptor sets, fixed at init.
    pub max_objects: u32,
    pub max_anisotropy: f32,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            prefer_present_mode: "mailbox".to_string(),
            clear_color: [0.6, 0.65, 0.4, 1.0],
            max_objects: 20,
            max_anisotropy: 16.0,
        }
    }
}

/// Initial camera placement; `Renderer::set_view_projection` overrides it.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub eye: [f32; 3],
    pub target: [f32; 3],
    pub up: [f32; 3],
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            eye: [10.0, 0.0, 20.0],
            target: [0.0, 0.0, -2.0],
            up: [0.0, 1.0, 0.0],
            fov_y_degrees: 45.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

/// Where models, textures and compiled shaders live
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    pub model_dir: PathBuf,
    pub texture_dir: PathBuf,
    pub shader_dir: PathBuf,
    /// Texture used for the "no texture" slot. A 1x1 white pixel when unset.
    pub default_texture: Option<String>,
    /// Model the demo driver loads at startup.
    pub model: Option<String>,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("Models"),
            texture_dir: PathBuf::from("Textures"),
            shader_dir: PathBuf::from("shaders"),
            default_texture: None,
            model: None,
        }
    }
}

/// Debug settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_to_file: false,
            log_file: "renderer.log".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> RenderResult<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| RenderError::Config(format!("failed to read {:?}: {}", path, e)))?;

        let config = Self::from_toml(&content)
            .map_err(|e| RenderError::Config(format!("failed to parse {:?}: {}", path, e)))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Preferred present mode as Vulkan enum
    pub fn preferred_present_mode(&self) -> vk::PresentModeKHR {
        match self.graphics.prefer_present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to MAILBOX",
                    self.graphics.prefer_present_mode
                );
                vk::PresentModeKHR::MAILBOX
            }
        }
    }

    pub fn model_path(&self, file: impl AsRef<Path>) -> PathBuf {
        self.assets.model_dir.join(file)
    }

    pub fn texture_path(&self, file: &str) -> PathBuf {
        self.assets.texture_dir.join(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.window.width, 1366);
        assert_eq!(config.graphics.max_objects, 20);
        assert_eq!(config.graphics.clear_color, [0.6, 0.65, 0.4, 1.0]);
        assert!(config.assets.default_texture.is_none());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml(
            r#"
            [graphics]
            max_objects = 4

            [assets]
            model = "FA18f/FA-18F.obj"
            "#,
        )
        .unwrap();
        assert_eq!(config.graphics.max_objects, 4);
        assert_eq!(config.graphics.max_anisotropy, 16.0);
        assert_eq!(config.assets.model.as_deref(), Some("FA18f/FA-18F.obj"));
        assert_eq!(config.assets.texture_dir, PathBuf::from("Textures"));
    }

    #[test]
    fn present_mode_parsing() {
        let mut config = Config::default();
        assert_eq!(config.preferred_present_mode(), vk::PresentModeKHR::MAILBOX);
        config.graphics.prefer_present_mode = "FIFO".to_string();
        assert_eq!(config.preferred_present_mode(), vk::PresentModeKHR::FIFO);
        config.graphics.prefer_present_mode = "bogus".to_string();
        assert_eq!(config.preferred_present_mode(), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let config = Config::load_from_path("definitely/not/here.toml").unwrap();
        assert_eq!(config.window.title, "Mesh Renderer");
    }

    #[test]
    fn asset_paths_join_directories() {
        let config = Config::default();
        assert_eq!(
            config.texture_path("plain.png"),
            PathBuf::from("Textures").join("plain.png")
        );
        assert_eq!(
            config.model_path("crate.obj"),
            PathBuf::from("Models").join("crate.obj")
        );
    }
}
