//! Seams between the renderer core and its collaborators
//!
//! The frame orchestrator, descriptor manager and render systems are written
//! against these traits. The Vulkan backend and the glfw window provide the
//! production implementations.

pub mod device;
pub mod frame_info;
pub mod surface;
pub mod swapchain;

pub use device::{DescriptorResource, DescriptorWrite, MappedBuffer, PipelineDescriptor, RenderDevice};
pub use frame_info::{FrameInfo, RenderSystem};
pub use surface::PresentationSurface;
pub use swapchain::{AcquireOutcome, PresentChain, PresentOutcome, SwapchainFormats};
