//! # Core Engine Module
//!
//! Shared configuration used by the window, the renderer and applications.

pub mod config;

pub use crate::foundation;

pub use config::{
    ApplicationConfig,
    EngineConfig,
    RendererConfig,
    WindowConfig,
    ShaderConfig,
    PresentModePreference,
    Config,
    ConfigError,
};
