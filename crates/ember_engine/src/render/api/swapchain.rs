//! Swap chain abstraction
//!
//! A swap chain owns the presentable images, their render targets and the
//! per-slot synchronization objects. It is never modified in place: the
//! renderer builds a replacement from it and drops the old one.

use ash::vk;

use crate::render::vulkan::VulkanResult;

/// Color and depth formats a swap chain renders into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainFormats {
    /// Format of the presentable images
    pub color: vk::Format,
    /// Format of the depth attachment
    pub depth: vk::Format,
}

/// Result of asking for the next presentable image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is ready to be rendered into
    Acquired {
        /// Index of the acquired image
        image_index: u32,
        /// The surface no longer matches exactly but is still usable
        suboptimal: bool,
    },
    /// The surface changed and the swap chain must be rebuilt
    OutOfDate,
}

/// Result of submitting and presenting a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Presented normally
    Presented,
    /// Presented, but the swap chain should be rebuilt
    Suboptimal,
    /// Not presented, the swap chain must be rebuilt
    OutOfDate,
}

/// Presentable image chain with its render targets and synchronization
pub trait PresentChain {
    /// Number of presentable images, fixed for the lifetime of the chain
    fn image_count(&self) -> usize;

    /// Pixel extent of the images
    fn extent(&self) -> vk::Extent2D;

    /// Formats of the color and depth attachments
    fn formats(&self) -> SwapchainFormats;

    /// Render pass all framebuffers of this chain are compatible with
    fn render_pass(&self) -> vk::RenderPass;

    /// Framebuffer of one image
    fn framebuffer(&self, image_index: u32) -> vk::Framebuffer;

    /// Acquire the next image for `frame_slot`
    ///
    /// Blocks until the previous submission that used `frame_slot` finished.
    fn acquire_next_image(&mut self, frame_slot: usize) -> VulkanResult<AcquireOutcome>;

    /// Submit the recorded commands for `frame_slot` and present `image_index`
    fn submit_and_present(
        &mut self,
        command_buffer: vk::CommandBuffer,
        image_index: u32,
        frame_slot: usize,
    ) -> VulkanResult<PresentOutcome>;

    /// Block until every submission made through this chain has finished
    fn wait_for_in_flight(&self) -> VulkanResult<()>;

    /// Whether `other` renders into the same formats
    fn compare_formats(&self, other: &Self) -> bool
    where
        Self: Sized,
    {
        self.formats() == other.formats()
    }

    /// Width over height of the images
    fn extent_aspect_ratio(&self) -> f32 {
        let extent = self.extent();
        extent.width as f32 / extent.height as f32
    }
}
