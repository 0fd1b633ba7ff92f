//! Vulkan rendering backend
//!
//! `ash` implementations of the traits in [`crate::render::api`]. Every
//! wrapper owns its handle and releases it on drop.

pub mod buffer;
pub mod commands;
pub mod context;
pub mod device;
pub mod framebuffer;
pub mod render_pass;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod texture;
pub mod window;

pub use buffer::Buffer;
pub use commands::CommandPool;
pub use context::{LogicalDevice, PhysicalDeviceInfo, SwapchainSupport, VulkanError, VulkanInstance, VulkanResult};
pub use device::VulkanDevice;
pub use framebuffer::{DepthBuffer, Framebuffer, ImageView};
pub use render_pass::RenderPass;
pub use shader::ShaderModule;
pub use swapchain::Swapchain;
pub use sync::{Fence, FrameSync, Semaphore};
pub use texture::{Texture, TextureError};
pub use window::{Window, WindowError, WindowResult};
