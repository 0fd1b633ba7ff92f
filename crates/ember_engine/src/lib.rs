//! # Ember Engine
//!
//! A small Vulkan renderer built around an explicit frame lifecycle.
//!
//! ## Features
//!
//! - **Frame orchestration**: acquire, record, submit and present with one
//!   command buffer per swap chain image
//! - **Swap chain rebuilds**: resize, minimization and out-of-date surfaces are
//!   handled without losing registered pipelines
//! - **Descriptor management**: capacity-checked pools, layout builder, writer
//! - **Render systems**: textured meshes and point light billboards
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::rc::Rc;
//! use ember_engine::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ApplicationConfig::default();
//!     let mut window = Window::new(&config.window)?;
//!     let device = Rc::new(VulkanDevice::new(&mut window, &config.renderer)?);
//!     let mut renderer = Renderer::new(device, &mut window, &config.renderer)?;
//!
//!     while !window.should_close() {
//!         window.poll_events();
//!         if let Some(command_buffer) = renderer.begin_frame(&mut window)? {
//!             renderer.begin_render_pass(command_buffer);
//!             // render systems record here
//!             renderer.end_render_pass(command_buffer);
//!             renderer.end_frame(&mut window)?;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod foundation;
pub mod render;

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        core::{ApplicationConfig, Config, EngineConfig, RendererConfig, ShaderConfig, WindowConfig},
        foundation::{
            math::{Mat4, Transform, Vec3},
            time::FrameTimer,
        },
        render::{
            vulkan::{Texture, VulkanDevice, Window},
            Camera, FrameInfo, FrameUniforms, GameObject, GlobalUbo, MeshData, Model, PresentationSurface,
            RenderError, RenderResult, RenderSystem, Renderer, Scene,
        },
    };
}
