//! Rendering system
//!
//! The renderer is split into a backend-agnostic core and the Vulkan backend:
//!
//! - [`renderer`]: frame orchestration and the swap chain rebuild protocol
//! - [`descriptors`]: descriptor set layouts, capacity-checked pools and writers
//! - [`frame_uniforms`]: per-slot global uniform buffers and descriptor sets
//! - [`pipeline`]: pipeline configuration and render-pass-bound pipeline rebuilds
//! - [`systems`]: mesh and point light render systems
//! - [`vulkan`]: `ash` implementations of the device, swap chain and resources
//!
//! The core is written against the traits in [`api`] so it can be driven by a
//! recording test double as well as by the real device.

pub mod api;
pub mod descriptors;
pub mod frame_uniforms;
pub mod game_object;
pub mod object_resources;
pub mod pipeline;
pub mod primitives;
pub mod renderer;
pub mod systems;
pub mod vulkan;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{
    AcquireOutcome, FrameInfo, MappedBuffer, PresentChain, PresentOutcome, PresentationSurface,
    RenderDevice, RenderSystem, SwapchainFormats,
};
pub use descriptors::{DescriptorError, DescriptorPool, DescriptorSetLayout, DescriptorWriter};
pub use frame_uniforms::{FrameUniforms, GlobalUbo, PointLightData, MAX_LIGHTS};
pub use game_object::{GameObject, GameObjectId, MaterialComponent, PointLightComponent, SampledImage, Scene};
pub use object_resources::{ObjectResources, ObjectUbo};
pub use pipeline::{PipelineConfig, PipelineId, PipelineLayout, PipelineManager};
pub use primitives::{Camera, MeshData, Model, Vertex};
pub use renderer::{RecreateReason, Renderer};

use thiserror::Error;

use crate::render::vulkan::{TextureError, VulkanError};

/// Errors surfaced by the renderer
///
/// Out-of-date and suboptimal swap chains never appear here: they are handled
/// by rebuilding the swap chain. Everything in this enum is either a resource
/// exhaustion the caller may react to, or a fatal condition that should end
/// the run loop.
#[derive(Error, Debug)]
pub enum RenderError {
    /// Vulkan call failed
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] VulkanError),

    /// Descriptor allocation or layout problem
    #[error("Descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),

    /// Rebuilt swap chain renders into different formats than its predecessor
    ///
    /// Pipelines bake the attachment formats into their render pass, so this
    /// cannot be recovered from.
    #[error("Swap chain format changed from {previous:?} to {current:?}")]
    SwapchainFormatChanged {
        /// Formats of the replaced swap chain
        previous: SwapchainFormats,
        /// Formats of the new swap chain
        current: SwapchainFormats,
    },

    /// Texture loading failed
    #[error("Texture error: {0}")]
    Texture(#[from] TextureError),
}

/// Result type for renderer operations
pub type RenderResult<T> = Result<T, RenderError>;
