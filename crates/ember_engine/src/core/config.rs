//! # Unified Configuration System
//!
//! All runtime settings for the window, the renderer and engine-wide behavior.
//! Every section has defaults, so a configuration file only needs to name the
//! values it changes:
//!
//! ```toml
//! [window]
//! width = 1280
//! height = 720
//!
//! [renderer]
//! frames_in_flight = 3
//! present_mode = "Fifo"
//! ```

use serde::{Serialize, Deserialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use crate::config::{Config, ConfigError};

/// # Shader Configuration
///
/// Directory that holds the compiled SPIR-V blobs. Shader file names are
/// resolved against it by the render systems.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    /// Directory containing `*.spv` files
    pub directory: PathBuf,
}

impl ShaderConfig {
    /// Create a new shader configuration
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Try the common shader locations relative to the working directory
    pub fn with_path_resolution() -> Self {
        let candidates = ["target/shaders", "../target/shaders", "../../target/shaders", "shaders"];
        let directory = candidates
            .iter()
            .map(PathBuf::from)
            .find(|dir| dir.is_dir())
            .unwrap_or_else(|| PathBuf::from(candidates[0]));
        Self { directory }
    }

    /// Full path of a compiled shader
    pub fn path(&self, file_name: &str) -> PathBuf {
        self.directory.join(file_name)
    }

    /// Check that a compiled shader exists
    pub fn validate_shader(&self, file_name: &str) -> Result<(), ConfigError> {
        let path = self.path(file_name);
        if Path::new(&path).exists() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(format!("Shader not found: {}", path.display())))
        }
    }
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self::with_path_resolution()
    }
}

/// Preferred presentation mode, with FIFO as the guaranteed fallback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresentModePreference {
    /// Vsync, always available
    Fifo,
    /// Low-latency triple buffering when supported
    Mailbox,
    /// Tearing allowed
    Immediate,
}

/// # Renderer Configuration
///
/// Settings for the Vulkan backend and the frame orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Shader configuration
    pub shaders: ShaderConfig,
    /// Requested number of swap chain images (and frame slots)
    ///
    /// The surface capabilities clamp this; the real slot count is the
    /// image count of the created swap chain.
    pub frames_in_flight: u32,
    /// Preferred presentation mode
    pub present_mode: PresentModePreference,
    /// Clear color of the main render pass
    pub clear_color: [f32; 4],
    /// Interval after which a fence wait logs a warning and keeps waiting
    pub fence_warning_timeout_ms: u64,
    /// Whether to enable Vulkan validation layers (auto when unset)
    pub enable_validation: Option<bool>,
}

impl RendererConfig {
    /// Create a new renderer configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            shaders: ShaderConfig::default(),
            frames_in_flight: 2,
            present_mode: PresentModePreference::Mailbox,
            clear_color: [0.01, 0.01, 0.01, 1.0],
            fence_warning_timeout_ms: 2000,
            enable_validation: None,
        }
    }

    /// Set custom shader configuration
    pub fn with_shaders(mut self, shaders: ShaderConfig) -> Self {
        self.shaders = shaders;
        self
    }

    /// Set requested frames in flight
    pub fn with_frames_in_flight(mut self, frames: u32) -> Self {
        self.frames_in_flight = frames;
        self
    }

    /// Set the presentation mode preference
    pub fn with_present_mode(mut self, mode: PresentModePreference) -> Self {
        self.present_mode = mode;
        self
    }

    /// Set the clear color
    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    /// Enable or disable validation layers
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Validation layers on in debug builds unless configured otherwise
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Fence wait warning interval
    pub fn fence_warning_timeout(&self) -> Duration {
        Duration::from_millis(self.fence_warning_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application_name.is_empty() {
            return Err(ConfigError::Invalid("Application name cannot be empty".to_string()));
        }

        if self.frames_in_flight == 0 {
            return Err(ConfigError::Invalid("Frames in flight must be at least 1".to_string()));
        }

        if self.frames_in_flight > 8 {
            return Err(ConfigError::Invalid(
                "Frames in flight should not exceed 8".to_string(),
            ));
        }

        if self.fence_warning_timeout_ms == 0 {
            return Err(ConfigError::Invalid("Fence warning timeout must be positive".to_string()));
        }

        Ok(())
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::new("Ember Application")
    }
}

/// # Window Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Window title
    pub title: String,
    /// Initial width in screen coordinates
    pub width: u32,
    /// Initial height in screen coordinates
    pub height: u32,
    /// Whether the user may resize the window
    pub resizable: bool,
}

impl WindowConfig {
    /// Create a window configuration
    pub fn new(title: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            title: title.into(),
            width,
            height,
            resizable: true,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "Window size must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self::new("Ember", 800, 600)
    }
}

/// # Engine Configuration
///
/// Engine-wide behavior such as logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Upper bound on the frame time handed to systems, in seconds
    pub max_frame_time: f32,
}

impl EngineConfig {
    /// Create a new engine configuration
    pub fn new() -> Self {
        Self {
            log_level: "info".to_string(),
            max_frame_time: 0.25,
        }
    }

    /// Set log level
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// # Complete Application Configuration
///
/// Top-level configuration that applications load from disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Engine core configuration
    pub engine: EngineConfig,
    /// Window configuration
    pub window: WindowConfig,
    /// Rendering system configuration
    pub renderer: RendererConfig,
}

impl ApplicationConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.window.validate()?;
        self.renderer.validate()
    }
}

impl Config for ApplicationConfig {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFormat;

    #[test]
    fn test_defaults_are_valid() {
        let config = ApplicationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.renderer.frames_in_flight, 2);
        assert_eq!(config.renderer.clear_color, [0.01, 0.01, 0.01, 1.0]);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let text = r#"
            [window]
            width = 1280

            [renderer]
            frames_in_flight = 3
            present_mode = "Fifo"
        "#;
        let config = ApplicationConfig::parse(text, ConfigFormat::Toml).unwrap();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.renderer.frames_in_flight, 3);
        assert_eq!(config.renderer.present_mode, PresentModePreference::Fifo);
        assert_eq!(config.renderer.fence_warning_timeout_ms, 2000);
    }

    #[test]
    fn test_ron_section() {
        let text = "(renderer: (frames_in_flight: 4, fence_warning_timeout_ms: 500))";
        let config = ApplicationConfig::parse(text, ConfigFormat::Ron).unwrap();
        assert_eq!(config.renderer.frames_in_flight, 4);
        assert_eq!(config.renderer.fence_warning_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let renderer = RendererConfig::default().with_frames_in_flight(0);
        assert!(matches!(renderer.validate(), Err(ConfigError::Invalid(_))));

        let renderer = RendererConfig::default().with_frames_in_flight(9);
        assert!(renderer.validate().is_err());

        let window = WindowConfig::new("x", 0, 10);
        assert!(window.validate().is_err());
    }

    #[test]
    fn test_validation_override() {
        assert!(RendererConfig::default().with_validation(true).validation_enabled());
        assert!(!RendererConfig::default().with_validation(false).validation_enabled());
    }
}
